//! Log fan-out worker.
//!
//! Takes entries off the log stream one at a time, renders each to an SSE
//! frame and hands it to [`ClientRegistry::broadcast`]. The next entry is
//! not taken until every subscriber write for the current one finished, so
//! all subscribers see the same order.

use std::sync::Arc;

use blectl_core::LogEntry;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::queue::QueueReceiver;
use crate::registry::ClientRegistry;

pub struct BroadcastLoop {
    logs: QueueReceiver<LogEntry>,
    clients: Arc<ClientRegistry>,
    cancel: CancellationToken,
}

impl BroadcastLoop {
    pub fn new(
        logs: QueueReceiver<LogEntry>,
        clients: Arc<ClientRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            logs,
            clients,
            cancel,
        }
    }

    /// Runs until cancelled or until every log producer is gone.
    pub async fn run(mut self) {
        info!("Broadcast loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Broadcast loop cancelled");
                    break;
                }

                entry = self.logs.recv() => match entry {
                    Some(entry) => self.deliver(&entry).await,
                    None => {
                        debug!("Log stream closed");
                        break;
                    }
                },
            }
        }

        info!("Broadcast loop stopped");
    }

    async fn deliver(&self, entry: &LogEntry) {
        if self.clients.is_empty() {
            trace!(entry = %entry, "No subscribers, dropping entry");
            return;
        }

        let frame = Bytes::from(entry.to_frame());
        let report = self.clients.broadcast(frame).await;
        trace!(
            entry = %entry,
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast entry"
        );
    }
}
