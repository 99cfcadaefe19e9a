//! HTTP request handlers.
//!
//! Command endpoints only report whether the command was queued. What the
//! radio made of it arrives later on the event stream.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use blectl_core::{Command, DeviceAddress};
use tracing::debug;

use super::ServerError;
use crate::context::AppContext;
use crate::queue::QueueError;
use crate::radio::Radio;

type Ctx<R> = State<Arc<AppContext<R>>>;

/// GET /events
pub async fn events<R: Radio>(State(ctx): Ctx<R>) -> Result<Response, ServerError> {
    let subscription = ctx
        .subscribe()
        .map_err(ServerError::TooManySubscribers)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(subscription),
    )
        .into_response())
}

/// GET|POST /scan
pub async fn scan<R: Radio>(State(ctx): Ctx<R>) -> Response {
    accept(&ctx, Command::scan())
}

/// GET|POST /stop
pub async fn stop_scan<R: Radio>(State(ctx): Ctx<R>) -> Response {
    accept(&ctx, Command::stop_scan())
}

/// GET|POST /connect/:address
pub async fn connect<R: Radio>(
    State(ctx): Ctx<R>,
    Path(address): Path<String>,
) -> Result<Response, ServerError> {
    let address = DeviceAddress::parse(address)?;
    Ok(accept(&ctx, Command::connect(address)))
}

/// GET|POST /disconnect
pub async fn disconnect<R: Radio>(State(ctx): Ctx<R>) -> Response {
    accept(&ctx, Command::disconnect())
}

fn accept<R: Radio>(ctx: &AppContext<R>, command: Command) -> Response {
    let kind = command.kind();
    match ctx.enqueue(command) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            debug!(command = %kind, error = %e, "Rejecting request");
            ServerError::from(e).into_response()
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::QueueFull | Self::ShuttingDown | Self::TooManySubscribers(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Bind { .. } | Self::Serve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<QueueError> for ServerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => Self::QueueFull,
            QueueError::Closed => Self::ShuttingDown,
        }
    }
}
