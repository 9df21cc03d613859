use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Receives timing reports from the sort pipeline.
///
/// Components get the sink passed in explicitly; nothing in the crate writes
/// timings to shared global state.
pub trait SortEventSink: Send + Sync {
    /// A named operation finished after `elapsed`.
    fn operation_completed(&self, operation: &str, elapsed: Duration);

    /// A thread spent `waited` blocked on the queue `queue`.
    fn queue_wait(&self, _queue: &str, _is_write: bool, _waited: Duration) {}
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl SortEventSink for TracingEventSink {
    fn operation_completed(&self, operation: &str, elapsed: Duration) {
        info!(operation, elapsed_ms = elapsed.as_millis() as u64, "Operation completed");
    }

    fn queue_wait(&self, queue: &str, is_write: bool, waited: Duration) {
        debug!(
            queue,
            side = if is_write { "write" } else { "read" },
            waited_us = waited.as_micros() as u64,
            "Queue wait"
        );
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl SortEventSink for NullEventSink {
    fn operation_completed(&self, _operation: &str, _elapsed: Duration) {}
}

pub type SharedEventSink = Arc<dyn SortEventSink>;

pub fn default_sink() -> SharedEventSink {
    Arc::new(TracingEventSink)
}

/// Reports the lifetime of a named operation to a sink when dropped.
pub struct MeasuredOperation<'a> {
    sink: &'a dyn SortEventSink,
    operation: String,
    started: Instant,
}

impl<'a> MeasuredOperation<'a> {
    pub fn start(sink: &'a dyn SortEventSink, operation: impl Into<String>) -> Self {
        Self {
            sink,
            operation: operation.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for MeasuredOperation<'_> {
    fn drop(&mut self) {
        self.sink
            .operation_completed(&self.operation, self.started.elapsed());
    }
}
