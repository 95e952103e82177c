//! # vibelink-domain
//!
//! Pure domain model for the vibelink haptics hub.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define the **Actuation Model** (normalized intensities and channel ranges)
//! - Define **Devices** (opaque sets of actuation channels owned by one session)
//! - Define **Commands** (ephemeral actuation requests) and their wire envelope
//! - Define **Sessions** (per-adapter connection state machine)
//! - Define **Events** emitted by adapters and published on the hub bus
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod actuation;
pub mod channel;
pub mod command;
pub mod device;
pub mod event;
pub mod protocol;
pub mod session;
