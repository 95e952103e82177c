//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the hub and the adapter
//! crates can depend on them without creating circular dependencies.

pub mod adapter;
pub mod event_bus;

pub use adapter::{AdapterContext, Capability, ProtocolAdapter};
pub use event_bus::EventPublisher;
