use chrono::NaiveDateTime;

/// Longest level name the Logs table accepts
pub const MAX_LEVEL_LENGTH: usize = 10;

/// One row of the Logs table
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Assigned by SQLite on insert; zero until then
    pub id: i64,
    pub timestamp: Option<NaiveDateTime>,
    pub level: String,
    pub exception: String,
    pub rendered_message: String,
    pub properties: String,
}
