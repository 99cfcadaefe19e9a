//! Shared registries.
//!
//! - [`DeviceRegistry`] - every named peripheral seen since startup
//! - [`ClientRegistry`] - live SSE subscribers and the frame fan-out
//!
//! Each registry guards itself with its own `std::sync::Mutex`. Locks are
//! held only for short synchronous sections and never across an `.await`,
//! and no operation takes both locks, so there is no lock ordering to keep.

mod clients;
mod devices;

pub use clients::{
    BroadcastReport, ClientError, ClientRegistry, Subscriber, SubscriberError, SubscriberId,
    Subscription,
};
pub use devices::DeviceRegistry;
