//! Live job status fan-out.
//!
//! - `bus`: keyed publish/subscribe abstraction (`EventBus`, `Unsubscribe`)
//! - `in_memory_bus`: process-local implementation
//! - `status`: the status payload pushed to live clients

pub mod bus;
pub mod in_memory_bus;
pub mod status;

pub use bus::{EventBus, Handler, Unsubscribe, subscribe_channel};
pub use in_memory_bus::InMemoryEventBus;
pub use status::{StatusEvent, StreamStatus};
