use crate::models::log_event::LogEvent;
use crate::models::log_row::LogRecord;
use crate::repo::sqlite::LogWriter;
use crate::self_log;
use crate::service::mapper::map_event;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Events held in memory before the oldest start being dropped
pub const MAX_BUFFER_SIZE: usize = 100_000;

/// Longest accepted `flush_period`
pub const MAX_FLUSH_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

struct QueueState {
    /// Events paired with their push sequence number, oldest first
    events: VecDeque<(u64, LogEvent)>,
    /// Sequence number of the last event pushed
    pushed: u64,
    /// Every event up to this sequence number has been written or dropped
    completed: u64,
    /// Last sequence number of the batch the worker is writing
    in_flight: Option<u64>,
    /// Partial batches are released until events up to here are handed out
    flush_target: u64,
    closed: bool,
    dropped: u64,
}

/// Bounded buffer between producers and the flush worker.
///
/// Producers only ever take the buffer lock; when the buffer is full the
/// oldest unflushed event is evicted so `push` never waits on storage.
pub struct BatchQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    drained: Condvar,
    capacity: usize,
    batch_size: usize,
}

impl BatchQueue {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        BatchQueue {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                pushed: 0,
                completed: 0,
                in_flight: None,
                flush_target: 0,
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
            capacity: capacity.max(1),
            batch_size: batch_size.max(1),
        }
    }

    // A panic elsewhere must not turn logging into a second panic
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event. Returns false once the queue has been closed.
    pub fn push(&self, event: LogEvent) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if state.events.len() >= self.capacity {
            state.events.pop_front();
            state.dropped += 1;
        }
        state.pushed += 1;
        let sequence = state.pushed;
        state.events.push_back((sequence, event));
        if state.events.len() >= self.batch_size {
            self.available.notify_one();
        }
        true
    }

    /// Wait for the next batch of at most `batch_size` events.
    ///
    /// A batch is released once it is full, once `flush_period` passes with
    /// events pending, while a flush is waiting on the oldest pending event,
    /// or after `close`. Returns None when the queue is closed and empty.
    pub fn next_batch(&self, flush_period: Duration) -> Option<Vec<LogEvent>> {
        let flush_period = flush_period.min(MAX_FLUSH_PERIOD);
        let mut state = self.lock();
        let mut deadline = Instant::now() + flush_period;

        loop {
            let pending = state.events.len();
            let flush_waiting = state
                .events
                .front()
                .is_some_and(|(sequence, _)| *sequence <= state.flush_target);
            if pending >= self.batch_size || (pending > 0 && state.closed) || flush_waiting {
                break;
            }
            if state.closed {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                if pending > 0 {
                    break;
                }
                deadline = now + flush_period;
            }

            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let take = state.events.len().min(self.batch_size);
        let batch: Vec<(u64, LogEvent)> = state.events.drain(..take).collect();
        state.in_flight = batch.last().map(|(sequence, _)| *sequence);
        Some(batch.into_iter().map(|(_, event)| event).collect())
    }

    /// Mark the batch handed out by `next_batch` as written or dropped
    pub fn batch_done(&self) {
        let mut state = self.lock();
        if let Some(sequence) = state.in_flight.take() {
            state.completed = state.completed.max(sequence);
        }
        self.drained.notify_all();
    }

    /// Block until every event pushed before this call has been written or
    /// dropped. Events pushed while waiting are not waited for.
    pub fn flush(&self) {
        let mut state = self.lock();
        let target = state.pushed;
        if state.completed >= target {
            return;
        }
        state.flush_target = state.flush_target.max(target);
        self.available.notify_all();
        while state.completed < target {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Refuse new events and let the worker drain what is left
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events evicted since the last call
    pub fn take_dropped(&self) -> u64 {
        std::mem::take(&mut self.lock().dropped)
    }
}

/// Map and write one batch. A failed batch is reported and dropped, never re-queued.
pub fn write_batch(writer: &LogWriter, events: &[LogEvent], store_timestamp_in_utc: bool) -> bool {
    let records: Vec<LogRecord> = events
        .iter()
        .map(|event| map_event(event, store_timestamp_in_utc))
        .collect();

    match writer.write_all(&records, true) {
        Ok(_) => true,
        Err(e) => {
            self_log!("Rollback: dropped batch of {} log events: {}", records.len(), e);
            false
        }
    }
}

/// Start the thread that drains `queue` into `writer` until the queue is closed and empty
pub fn spawn_flush_worker(
    queue: Arc<BatchQueue>,
    writer: LogWriter,
    store_timestamp_in_utc: bool,
    flush_period: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("log-sink-flush".to_string())
        .spawn(move || {
            while let Some(batch) = queue.next_batch(flush_period) {
                write_batch(&writer, &batch, store_timestamp_in_utc);

                let dropped = queue.take_dropped();
                if dropped > 0 {
                    self_log!(
                        "Log buffer full ({} events); dropped {} oldest events",
                        queue.capacity,
                        dropped
                    );
                }
                queue.batch_done();
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Level::Info, message)
    }

    fn messages(batch: &[LogEvent]) -> Vec<String> {
        batch.iter().map(|e| e.message_template.clone()).collect()
    }

    fn memory_writer() -> LogWriter {
        let writer = LogWriter::open(":memory:").unwrap();
        writer.setup_database().unwrap();
        writer
    }

    #[test]
    fn test_full_batches_are_released_in_order() {
        let queue = BatchQueue::new(100, 2);
        for i in 0..5 {
            assert!(queue.push(event(&format!("e{}", i))));
        }

        let first = queue.next_batch(Duration::from_secs(60)).unwrap();
        queue.batch_done();
        let second = queue.next_batch(Duration::from_secs(60)).unwrap();
        queue.batch_done();

        assert_eq!(messages(&first), vec!["e0", "e1"]);
        assert_eq!(messages(&second), vec!["e2", "e3"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_partial_batch_is_released_after_flush_period() {
        let queue = BatchQueue::new(100, 10);
        queue.push(event("lonely"));

        let started = Instant::now();
        let batch = queue.next_batch(Duration::from_millis(50)).unwrap();

        assert_eq!(messages(&batch), vec!["lonely"]);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let queue = BatchQueue::new(3, 10);
        for i in 0..5 {
            queue.push(event(&format!("e{}", i)));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take_dropped(), 2);
        assert_eq!(queue.take_dropped(), 0);

        queue.close();
        let batch = queue.next_batch(Duration::from_secs(60)).unwrap();
        assert_eq!(messages(&batch), vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn test_closed_queue_drains_then_ends() {
        let queue = BatchQueue::new(100, 2);
        queue.push(event("a"));
        queue.push(event("b"));
        queue.push(event("c"));
        queue.close();

        assert!(!queue.push(event("late")));
        assert_eq!(queue.next_batch(Duration::from_secs(60)).unwrap().len(), 2);
        queue.batch_done();
        assert_eq!(queue.next_batch(Duration::from_secs(60)).unwrap().len(), 1);
        queue.batch_done();
        assert!(queue.next_batch(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_worker_writes_everything_on_flush() {
        let writer = memory_writer();
        let queue = Arc::new(BatchQueue::new(MAX_BUFFER_SIZE, 100));
        let worker =
            spawn_flush_worker(queue.clone(), writer.clone(), true, Duration::from_secs(60))
                .unwrap();

        for i in 0..250 {
            queue.push(event(&format!("event {}", i)));
        }
        queue.flush();

        assert!(queue.is_empty());
        assert_eq!(writer.count_logs().unwrap(), 250);

        queue.close();
        worker.join().unwrap();
    }

    #[test]
    fn test_worker_drains_remaining_events_on_close() {
        let writer = memory_writer();
        let queue = Arc::new(BatchQueue::new(MAX_BUFFER_SIZE, 100));
        let worker =
            spawn_flush_worker(queue.clone(), writer.clone(), false, Duration::from_secs(60))
                .unwrap();

        for i in 0..7 {
            queue.push(event(&format!("event {}", i)));
        }
        queue.close();
        worker.join().unwrap();

        assert_eq!(writer.count_logs().unwrap(), 7);
    }

    #[test]
    fn test_failed_batch_is_dropped_and_worker_continues() {
        let writer = memory_writer();
        writer
            .execute_raw(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON Logs
                 WHEN NEW.RenderedMessage = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poison'); END;",
            )
            .unwrap();

        assert!(!write_batch(&writer, &[event("ok"), event("poison")], true));
        assert_eq!(writer.count_logs().unwrap(), 0);

        assert!(write_batch(&writer, &[event("ok"), event("fine")], true));
        assert_eq!(writer.count_logs().unwrap(), 2);
    }

    #[test]
    fn test_huge_flush_period_does_not_overflow() {
        let queue = Arc::new(BatchQueue::new(100, 10));
        queue.push(event("waiting"));

        let closer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.close();
            })
        };
        let batch = queue.next_batch(Duration::from_secs(u64::MAX)).unwrap();
        closer.join().unwrap();

        assert_eq!(messages(&batch), vec!["waiting"]);
    }

    #[test]
    fn test_flush_returns_while_producer_keeps_emitting() {
        let writer = memory_writer();
        let queue = Arc::new(BatchQueue::new(MAX_BUFFER_SIZE, 10));
        let worker =
            spawn_flush_worker(queue.clone(), writer.clone(), true, Duration::from_secs(60))
                .unwrap();
        for i in 0..25 {
            queue.push(event(&format!("before flush {}", i)));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut i = 0;
                while !stop.load(Ordering::Relaxed) {
                    queue.push(event(&format!("during flush {}", i)));
                    i += 1;
                }
            })
        };

        let started = Instant::now();
        queue.flush();
        let waited = started.elapsed();
        stop.store(true, Ordering::Relaxed);
        producer.join().unwrap();

        assert!(waited < Duration::from_secs(10));
        assert!(writer.count_logs().unwrap() >= 25);

        queue.close();
        worker.join().unwrap();
    }

    #[test]
    fn test_flush_after_close_returns_immediately() {
        let queue = BatchQueue::new(100, 10);
        queue.close();
        assert!(!queue.push(event("late")));

        queue.flush();
        assert!(queue.is_empty());
    }
}
