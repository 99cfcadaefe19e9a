//! Live event-stream subscribers and the frame fan-out.
//!
//! Each subscriber owns a bounded frame channel whose receiving half is the
//! body of one `GET /events` response. A subscriber is removed:
//! - when its [`Subscription`] is dropped (the HTTP connection went away)
//! - on the first failed or timed-out write during a broadcast
//! - on the next broadcast after its cancellation token fired

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier of a subscriber
pub type SubscriberId = Uuid;

/// Errors from registering a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("too many event stream clients (max: {max})")]
    TooManyClients { max: usize },
}

/// Why a frame could not be delivered. Never shown to the client; the
/// subscriber is simply evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriberError {
    #[error("subscriber connection was cancelled")]
    Cancelled,

    #[error("subscriber stream is closed")]
    Closed,

    #[error("write timed out")]
    Timeout,
}

/// A registered stream subscriber.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sink: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl Subscriber {
    /// Creates a subscriber with room for `buffer` undelivered frames.
    ///
    /// Returns the receiving half that the HTTP response reads from.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sink, frames) = mpsc::channel(buffer.max(1));
        let subscriber = Self {
            id: Uuid::new_v4(),
            sink,
            cancel: CancellationToken::new(),
        };
        (subscriber, frames)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn deliver(&self, frame: Bytes, write_timeout: Duration) -> Result<(), SubscriberError> {
        if self.cancel.is_cancelled() {
            return Err(SubscriberError::Cancelled);
        }

        self.sink
            .send_timeout(frame, write_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SubscriberError::Timeout,
                SendTimeoutError::Closed(_) => SubscriberError::Closed,
            })
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Set of live subscribers.
#[derive(Debug)]
pub struct ClientRegistry {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    max_clients: Option<usize>,
    write_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_clients: Option<usize>, write_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            max_clients,
            write_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, subscriber: Subscriber) -> Result<(), ClientError> {
        let mut subs = self.lock();

        if let Some(max) = self.max_clients {
            if subs.len() >= max {
                return Err(ClientError::TooManyClients { max });
            }
        }

        debug!(client_id = %subscriber.id, "Added subscriber");
        subs.insert(subscriber.id, subscriber);
        Ok(())
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(subscriber) => {
                subscriber.cancel.cancel();
                debug!(client_id = %id, "Removed subscriber");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every subscriber, ending their streams.
    pub fn clear(&self) {
        let drained: Vec<Subscriber> = self.lock().drain().map(|(_, sub)| sub).collect();
        for subscriber in &drained {
            subscriber.cancel.cancel();
        }
        debug!(count = drained.len(), "Cleared subscribers");
    }

    /// Writes `frame` to every current subscriber.
    ///
    /// Writes run concurrently, each bounded by the write timeout, so one
    /// slow reader cannot hold up the others for longer than that. The call
    /// returns only after every write finished, which keeps frame order
    /// identical across subscribers.
    pub async fn broadcast(&self, frame: Bytes) -> BroadcastReport {
        let targets: Vec<Subscriber> = self.lock().values().cloned().collect();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let write_timeout = self.write_timeout;
        let results = join_all(targets.iter().map(|sub| {
            let frame = frame.clone();
            async move { (sub.id, sub.deliver(frame, write_timeout).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(client_id = %id, error = %e, "Evicting subscriber");
                    if self.remove(id) {
                        report.evicted += 1;
                    }
                }
            }
        }
        report
    }
}

/// The frame stream behind one `GET /events` response.
///
/// Dropping it (the connection closed or the server shut down) cancels the
/// subscriber and removes it from the registry.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    frames: mpsc::Receiver<Bytes>,
    clients: Arc<ClientRegistry>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        id: SubscriberId,
        frames: mpsc::Receiver<Bytes>,
        clients: Arc<ClientRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            frames,
            clients,
            cancel,
        }
    }

    /// Waits for the next frame. Returns `None` once the subscriber has
    /// been removed.
    #[cfg(test)]
    pub(crate) async fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

impl Stream for Subscription {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().frames.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.clients.remove(self.id) {
            debug!(client_id = %self.id, "Client disconnected");
        }
    }
}
