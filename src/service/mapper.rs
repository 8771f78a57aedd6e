use crate::models::log_event::LogEvent;
use crate::models::log_row::{LogRecord, MAX_LEVEL_LENGTH};
use chrono::Local;
use serde_json::Value;
use std::collections::BTreeMap;

/// Turn an event into the row that will be written for it. Pure: no I/O, no clock.
pub fn map_event(event: &LogEvent, store_timestamp_in_utc: bool) -> LogRecord {
    let timestamp = if store_timestamp_in_utc {
        event.timestamp.naive_utc()
    } else {
        event.timestamp.with_timezone(&Local).naive_local()
    };

    LogRecord {
        id: 0,
        timestamp: Some(timestamp),
        level: event.level.as_str().chars().take(MAX_LEVEL_LENGTH).collect(),
        exception: event.exception.clone().unwrap_or_default(),
        rendered_message: render_message(&event.message_template, &event.properties),
        properties: serialize_properties(&event.properties),
    }
}

fn serialize_properties(properties: &BTreeMap<String, Value>) -> String {
    if properties.is_empty() {
        return String::new();
    }
    let object: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Value::Object(object).to_string()
}

/// Fill `{Name}` holes from `properties`.
///
/// `{{` and `}}` are literal braces. A hole may carry a format suffix
/// (`{Elapsed:0.00}`) or a destructuring prefix (`{@Request}`); both are
/// ignored. Holes with no matching property are left as written.
pub fn render_message(template: &str, properties: &BTreeMap<String, Value>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            rendered.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('}') {
            rendered.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail.find('}') {
            Some(end) => {
                let hole = &tail[1..end];
                match lookup(hole, properties) {
                    Some(value) => rendered.push_str(&render_value(value)),
                    None => rendered.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                rendered.push_str(tail);
                rest = "";
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

/// Escape braces so `text` renders back to itself
pub fn escape_template(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

fn lookup<'a>(hole: &str, properties: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    let name = hole
        .split([':', ','])
        .next()
        .unwrap_or_default()
        .trim_start_matches(['@', '$']);
    if name.is_empty() {
        return None;
    }
    properties.get(name)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
    use log::Level;
    use serde_json::json;

    fn fixed_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, 12, 30, 0)
            .unwrap()
    }

    fn props(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_utc_timestamp_is_converted_from_event_offset() {
        let event = LogEvent::new(Level::Info, "hello").with_timestamp(fixed_time());

        let record = map_event(&event, true);

        let expected = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(record.timestamp, Some(expected));
    }

    #[test]
    fn test_local_timestamp_uses_local_wall_clock() {
        let event = LogEvent::new(Level::Info, "hello").with_timestamp(fixed_time());

        let record = map_event(&event, false);

        let expected = fixed_time().with_timezone(&Local).naive_local();
        assert_eq!(record.timestamp, Some(expected));
    }

    #[test]
    fn test_plain_event_maps_to_empty_exception_and_properties() {
        let event = LogEvent::new(Level::Warn, "disk almost full");

        let record = map_event(&event, true);

        assert_eq!(record.id, 0);
        assert_eq!(record.level, "WARN");
        assert_eq!(record.exception, "");
        assert_eq!(record.properties, "");
        assert_eq!(record.rendered_message, "disk almost full");
    }

    #[test]
    fn test_level_names_fit_column() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            let record = map_event(&LogEvent::new(level, "x"), true);
            assert_eq!(record.level, level.as_str());
            assert!(record.level.len() <= MAX_LEVEL_LENGTH);
        }
    }

    #[test]
    fn test_properties_and_exception_are_carried() {
        let event = LogEvent::new(Level::Error, "Request {RequestId} failed after {Elapsed} ms")
            .with_property("RequestId", "r-42")
            .with_property("Elapsed", 135)
            .with_exception("timeout\nCaused by: connection reset");

        let record = map_event(&event, true);

        assert_eq!(record.rendered_message, "Request r-42 failed after 135 ms");
        assert_eq!(record.exception, "timeout\nCaused by: connection reset");
        let stored: Value = serde_json::from_str(&record.properties).unwrap();
        assert_eq!(stored, json!({ "Elapsed": 135, "RequestId": "r-42" }));
    }

    #[test]
    fn test_render_escapes_and_unknown_holes() {
        let properties = props(&[("User", json!("alice"))]);

        assert_eq!(
            render_message("{{literal}} {User} {Missing} done", &properties),
            "{literal} alice {Missing} done"
        );
    }

    #[test]
    fn test_render_ignores_format_and_destructuring_markers() {
        let properties = props(&[
            ("Elapsed", json!(1.5)),
            ("Request", json!({ "path": "/health" })),
        ]);

        assert_eq!(
            render_message("took {Elapsed:0.00}s for {@Request}", &properties),
            r#"took 1.5s for {"path":"/health"}"#
        );
    }

    #[test]
    fn test_escaped_text_renders_unchanged() {
        let properties = props(&[("User", json!("mallory"))]);
        let text = "literal {User} and }{ braces";

        assert_eq!(render_message(&escape_template(text), &properties), text);
    }

    #[test]
    fn test_render_keeps_unbalanced_braces() {
        let properties = props(&[("User", json!("bob"))]);

        assert_eq!(render_message("open { brace", &properties), "open { brace");
        assert_eq!(render_message("close } brace", &properties), "close } brace");
        assert_eq!(render_message("{}", &properties), "{}");
    }
}
