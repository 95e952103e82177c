//! # vibelink-app
//!
//! Application layer — the hub core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define the [`ProtocolAdapter`](ports::ProtocolAdapter) port every
//!   transport variant implements, and the context adapters report through
//! - [`Registry`](registry::Registry): single-writer device registry with
//!   snapshot reads
//! - [`Router`](router::Router): validation, per-channel coalescing and
//!   dispatch of commands
//! - [`Supervisor`](supervisor::Supervisor): adapter lifecycle, restart
//!   with backoff, graceful shutdown
//! - [`Hub`](hub::Hub): wires the above together and consumes adapter events
//! - In-process event bus that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `vibelink-domain` only (plus `tokio` for tasks, channels and
//! timers). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod config;
pub mod event_bus;
pub mod hub;
pub mod ports;
pub mod registry;
pub mod router;
pub mod supervisor;

#[cfg(test)]
mod testing;
