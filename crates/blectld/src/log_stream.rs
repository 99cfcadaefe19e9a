//! Producer side of the operator log stream.
//!
//! Every component reports outcomes through a [`LogStream`]. Producers
//! wait when the stream is full, so a stalled broadcast loop slows radio
//! work down instead of losing entries.

use blectl_core::{Device, LogEntry};
use tracing::debug;

use crate::queue::QueueSender;

/// Cloneable handle for pushing [`LogEntry`] values.
#[derive(Debug, Clone)]
pub struct LogStream {
    queue: QueueSender<LogEntry>,
}

impl LogStream {
    pub fn new(queue: QueueSender<LogEntry>) -> Self {
        Self { queue }
    }

    /// Pushes an entry, waiting for capacity.
    ///
    /// Entries pushed after the broadcast loop has stopped are dropped.
    pub async fn push(&self, entry: LogEntry) {
        debug!(level = %entry.level, message = %entry.message, "Log entry");
        if self.queue.send(entry).await.is_err() {
            debug!("Log stream closed, dropping entry");
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.push(LogEntry::info(message)).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.push(LogEntry::error(message)).await;
    }

    pub async fn device(&self, device: &Device) {
        self.push(LogEntry::device(device)).await;
    }

    /// Pushes from a blocking radio thread.
    pub fn blocking_push(&self, entry: LogEntry) {
        debug!(level = %entry.level, message = %entry.message, "Log entry");
        if self.queue.blocking_send(entry).is_err() {
            debug!("Log stream closed, dropping entry");
        }
    }

    /// Discards all entries not yet broadcast.
    pub fn purge(&self) {
        let epoch = self.queue.purge();
        debug!(epoch, "Purged log stream");
    }
}
