//! HTTP front end of the daemon.
//!
//! The server:
//! - Accepts operator commands on `/scan`, `/stop`, `/connect/:address`
//!   and `/disconnect` (GET or POST)
//! - Streams the log as server-sent events on `/events`
//! - Serves the static UI for every other path when a UI directory is set
//! - Bounds command requests by the configured request timeout; the
//!   long-lived `/events` response has no such bound
//! - Shuts down gracefully via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │  (axum Router)  │
//! └───────┬─────────┘
//!         │ per request
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │    handlers     │────▶│   AppContext    │
//! │                 │     │ (queues, state) │
//! └─────────────────┘     └─────────────────┘
//!         │
//!         │ GET /events
//!         ▼
//! ┌─────────────────┐
//! │  Subscription   │
//! │  (SSE body)     │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler failures become HTTP status codes, never task panics

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use blectl_core::DomainError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::radio::Radio;
use crate::registry::ClientError;

/// Errors from the HTTP server and its handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("{0}")]
    TooManySubscribers(#[source] ClientError),

    #[error("command queue is full")]
    QueueFull,

    #[error("daemon is shutting down")]
    ShuttingDown,

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] DomainError),
}

/// Builds the daemon's router.
pub fn router<R: Radio>(ctx: Arc<AppContext<R>>) -> Router {
    let commands = Router::new()
        .route("/scan", get(handlers::scan::<R>).post(handlers::scan::<R>))
        .route("/stop", get(handlers::stop_scan::<R>).post(handlers::stop_scan::<R>))
        .route(
            "/connect/:address",
            get(handlers::connect::<R>).post(handlers::connect::<R>),
        )
        .route(
            "/disconnect",
            get(handlers::disconnect::<R>).post(handlers::disconnect::<R>),
        )
        .layer(TimeoutLayer::new(ctx.config().request_timeout));

    let routes = Router::new()
        .route("/events", get(handlers::events::<R>))
        .merge(commands);

    let routes = match &ctx.config().ui_dir {
        Some(dir) => {
            debug!(dir = %dir.display(), "Serving static UI");
            routes.fallback_service(ServeDir::new(dir))
        }
        None => routes,
    };

    routes.layer(TraceLayer::new_for_http()).with_state(ctx)
}

pub struct DaemonServer<R: Radio> {
    ctx: Arc<AppContext<R>>,
    cancel_token: CancellationToken,
}

impl<R: Radio> DaemonServer<R> {
    pub fn new(ctx: Arc<AppContext<R>>, cancel_token: CancellationToken) -> Self {
        Self { ctx, cancel_token }
    }

    /// Binds the configured listen address and serves until cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.ctx.config().listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until cancelled.
    ///
    /// On shutdown every event stream is ended so open connections can
    /// drain.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(ServerError::Serve)?;
        info!(addr = %local, "Daemon server listening");

        let cancel = self.cancel_token.clone();
        let clients = Arc::clone(self.ctx.clients());
        let shutdown = async move {
            cancel.cancelled().await;
            info!("Server shutdown requested");
            clients.clear();
        };

        axum::serve(listener, router(Arc::clone(&self.ctx)))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        info!("Server stopped");
        Ok(())
    }
}
