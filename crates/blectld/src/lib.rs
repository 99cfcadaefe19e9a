//! blectl Daemon - BLE command intake and log broadcast server
//!
//! This crate provides the core infrastructure for the blectl daemon:
//! - `queue` - Bounded FIFO queues that can be purged process-wide
//! - `registry` - Discovered devices and live stream subscribers
//! - `radio` - The blocking BLE capability surface and a simulated radio
//! - `adapter` - Connection/scan state machine over the radio
//! - `event_loop` / `broadcast` - The two long-running workers
//! - `server` - HTTP command endpoints and the SSE log stream
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         blectld daemon                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  Command   ┌──────────────┐   ┌─────────────┐  │
//! │  │ HTTP handler │──────────▶│  EventLoop   │──▶│   Adapter   │  │
//! │  │  (per req)   │   queue    │ (dispatcher) │   │ (radio ops) │  │
//! │  └──────┬───────┘            └──────────────┘   └──────┬──────┘  │
//! │         │ GET /events                                  │ LogEntry│
//! │         ▼                                              ▼         │
//! │  ┌──────────────┐   frames   ┌──────────────┐   ┌─────────────┐  │
//! │  │ Subscription │◀──────────│ClientRegistry│◀──│BroadcastLoop│  │
//! │  │ (SSE stream) │            │  (fan-out)   │   │ (log drain) │  │
//! │  └──────────────┘            └──────────────┘   └─────────────┘  │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod adapter;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod event_loop;
pub mod log_stream;
pub mod queue;
pub mod radio;
pub mod registry;
pub mod server;

pub use adapter::{Adapter, AdapterError, AdapterStatus};
pub use config::{ConfigError, DaemonConfig};
pub use context::{AppContext, StartupError, WorkerHandles, Workers};
pub use log_stream::LogStream;
pub use radio::{Radio, RadioError};
