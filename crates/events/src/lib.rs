//! In-process event bus for catalog sync notifications.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`SyncEvent`]: the event envelope, with the event names in [`names`].

pub mod bus;

pub use bus::{names, EventBus, SyncEvent};
