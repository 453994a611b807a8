//! Progress events and sinks.
//!
//! Progress is a first-class stream of [`ProgressEvent`]s delivered to a
//! [`ProgressSink`](crate::application::ports::ProgressSink) observer, not an
//! optional callback. `EventBuffer` keeps the stream replayable for detached
//! runs and tests.

use std::sync::Mutex;

use crate::application::ports::ProgressSink;

/// One completed action inside a provisioning run. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Step the action belongs to, e.g. `"runtime-install"`.
    pub step: String,
    /// Human-readable narration, with command output truncated.
    pub message: String,
    pub success: bool,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(step: &str, message: &str, success: bool) -> Self {
        Self {
            step: step.to_owned(),
            message: message.to_owned(),
            success,
        }
    }
}

/// Replayable in-memory sink.
#[derive(Default)]
pub struct EventBuffer {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event emitted so far, in order.
    #[must_use]
    pub fn replay(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for EventBuffer {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Sink that discards everything; used by detached runs where progress is
/// observed by polling the record instead.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Truncate command output for event narration.
#[must_use]
pub fn truncate_output(output: &str) -> String {
    const MAX: usize = 200;
    let trimmed = output.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_owned();
    }
    let cut = trimmed
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    format!("{}…", &trimmed[..cut])
}
