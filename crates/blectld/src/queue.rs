//! Bounded FIFO queues with process-wide purge.
//!
//! Both the command queue and the log stream are plain tokio mpsc channels
//! underneath. The extra piece is the purge: opening a new event stream
//! must discard everything still pending, but the receiving half is owned
//! by a worker task and cannot be drained from a request handler.
//!
//! Each item is stamped with the queue's epoch when it is sent. `purge()`
//! bumps the epoch and the receiver silently drops anything stamped with
//! an older one. Items whose producer was still waiting for capacity when
//! the purge happened are discarded as well.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Errors returned when enqueueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity (non-blocking enqueue only)
    #[error("queue is full")]
    Full,

    /// The consumer has shut down
    #[error("queue is closed")]
    Closed,
}

#[derive(Debug)]
struct Stamped<T> {
    epoch: u64,
    item: T,
}

/// Creates a bounded queue holding at most `capacity` items.
///
/// A capacity of zero is raised to one; tokio channels cannot be empty.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let epoch = Arc::new(AtomicU64::new(0));

    (
        QueueSender {
            tx,
            epoch: Arc::clone(&epoch),
        },
        QueueReceiver { rx, epoch },
    )
}

/// Producer half. Cheap to clone.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<Stamped<T>>,
    epoch: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<T> QueueSender<T> {
    fn stamp(&self, item: T) -> Stamped<T> {
        Stamped {
            epoch: self.epoch.load(Ordering::Acquire),
            item,
        }
    }

    /// Enqueues, waiting for capacity if the queue is full.
    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        self.tx
            .send(self.stamp(item))
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Enqueues without waiting.
    pub fn try_send(&self, item: T) -> Result<(), QueueError> {
        self.tx.try_send(self.stamp(item)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Enqueues from a thread outside the async runtime, blocking it while
    /// the queue is full.
    ///
    /// Must not be called from an async context.
    pub fn blocking_send(&self, item: T) -> Result<(), QueueError> {
        self.tx
            .blocking_send(self.stamp(item))
            .map_err(|_| QueueError::Closed)
    }

    /// Discards every item currently pending. Returns the new epoch.
    pub fn purge(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

}

/// Consumer half, owned by exactly one worker.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<Stamped<T>>,
    epoch: Arc<AtomicU64>,
}

impl<T> QueueReceiver<T> {
    /// Waits for the next live item.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let stamped = self.rx.recv().await?;
            if let Some(item) = self.accept(stamped) {
                return Some(item);
            }
        }
    }

    /// Returns the next live item if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            let stamped = self.rx.try_recv().ok()?;
            if let Some(item) = self.accept(stamped) {
                return Some(item);
            }
        }
    }

    fn accept(&self, stamped: Stamped<T>) -> Option<T> {
        if stamped.epoch < self.epoch.load(Ordering::Acquire) {
            trace!(epoch = stamped.epoch, "Dropping purged queue item");
            return None;
        }
        Some(stamped.item)
    }
}
