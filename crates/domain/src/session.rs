//! Session — the per-adapter connection state machine.
//!
//! Every adapter variant shares the same lifecycle:
//!
//! ```text
//! Disconnected → Discovering → Connecting → Connected
//!        ↑            │             │            │
//!        │            └─────────────┴────────────┴──→ Error
//!        └──────────────────────────────────────────── Error (after cooldown)
//! ```
//!
//! `Error` is never terminal: the only way out is back to `Disconnected`.
//! Connectionless variants may go straight from `Discovering` to `Connected`.
//! A failed connect attempt returns from `Connecting` to `Discovering`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::id::{DeviceId, SessionId};
use crate::protocol::Protocol;

/// Connection state of an adapter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same state is always allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Discovering, Error};

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Discovering)
                | (Discovering, Connecting | Connected | Error | Disconnected)
                | (Connecting, Discovering | Connected | Error | Disconnected)
                | (Connected, Error | Disconnected)
                | (Error, Disconnected)
        )
    }

    /// Whether commands may be routed to devices owned by a session in this
    /// state.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// One adapter instance's session: its connection state, retry counter and
/// the devices it currently owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub protocol: Protocol,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub devices: BTreeSet<DeviceId>,
}

impl Session {
    /// A fresh, disconnected session.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            id: SessionId::new(),
            protocol,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            devices: BTreeSet::new(),
        }
    }

    /// Move to `next`, returning the previous state.
    ///
    /// Entering `Error` bumps the failure counter, reaching `Connected`
    /// resets it.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the move is not allowed.
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, TransitionError> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(TransitionError {
                from: previous,
                to: next,
            });
        }
        if previous != next {
            match next {
                ConnectionState::Error => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }
                ConnectionState::Connected => self.consecutive_failures = 0,
                _ => {}
            }
        }
        self.state = next;
        Ok(previous)
    }

    /// Record ownership of a device. Returns `false` if already owned.
    pub fn claim(&mut self, device: DeviceId) -> bool {
        self.devices.insert(device)
    }

    /// Drop ownership of a device. Returns `false` if it was not owned.
    pub fn release(&mut self, device: &DeviceId) -> bool {
        self.devices.remove(device)
    }

    #[must_use]
    pub fn owns(&self, device: &DeviceId) -> bool {
        self.devices.contains(device)
    }
}
