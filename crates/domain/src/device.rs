//! Device — an opaque set of actuation channels owned by one adapter session.
//!
//! Adapters describe what they found with a [`DeviceDescriptor`]; the
//! registry turns it into the authoritative [`Device`] record. Adapters
//! keep only the [`DeviceId`] for addressing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::actuation::Intensity;
use crate::channel::Channel;
use crate::error::ValidationError;
use crate::id::{DeviceId, SessionId};
use crate::protocol::Protocol;
use crate::time::{self, Timestamp};

/// What an adapter knows about a device when it discovers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub protocol: Protocol,
    pub name: Option<String>,
    pub channels: Vec<Channel>,
}

impl DeviceDescriptor {
    /// Create a builder for constructing a [`DeviceDescriptor`].
    #[must_use]
    pub fn builder() -> DeviceDescriptorBuilder {
        DeviceDescriptorBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the id is blank, no channel is
    /// declared, a channel index repeats or a channel range is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if self.channels.is_empty() {
            return Err(ValidationError::NoChannels);
        }
        let mut seen = BTreeSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.index) {
                return Err(ValidationError::DuplicateChannel(channel.index));
            }
            channel.validate()?;
        }
        Ok(())
    }

    /// Look up a channel by index.
    #[must_use]
    pub fn channel(&self, index: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.index == index)
    }
}

/// Step-by-step builder for [`DeviceDescriptor`].
#[derive(Debug)]
pub struct DeviceDescriptorBuilder {
    id: Option<DeviceId>,
    protocol: Protocol,
    name: Option<String>,
    channels: Vec<Channel>,
}

impl Default for DeviceDescriptorBuilder {
    fn default() -> Self {
        Self {
            id: None,
            protocol: Protocol::Gatt,
            name: None,
            channels: Vec::new(),
        }
    }
}

impl DeviceDescriptorBuilder {
    #[must_use]
    pub fn id(mut self, id: impl Into<DeviceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels.extend(channels);
        self
    }

    /// Consume the builder, validate, and return a [`DeviceDescriptor`].
    ///
    /// # Errors
    ///
    /// See [`DeviceDescriptor::validate`].
    pub fn build(self) -> Result<DeviceDescriptor, ValidationError> {
        let descriptor = DeviceDescriptor {
            id: self.id.unwrap_or_else(|| DeviceId::new("")),
            protocol: self.protocol,
            name: self.name,
            channels: self.channels,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Whether the last write to a device went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    #[default]
    Reachable,
    /// Writes kept failing; the session is still alive and the device may
    /// come back on its own.
    Unreachable,
}

/// Authoritative record held by the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub descriptor: DeviceDescriptor,
    pub session: SessionId,
    pub reachability: Reachability,
    /// Last delivered intensity per channel index.
    pub actuation: BTreeMap<u32, Intensity>,
    pub registered_at: Timestamp,
    pub last_seen: Timestamp,
}

impl Device {
    /// Create the record for a freshly discovered device.
    #[must_use]
    pub fn new(descriptor: DeviceDescriptor, session: SessionId, now: Timestamp) -> Self {
        Self {
            descriptor,
            session,
            reachability: Reachability::Reachable,
            actuation: BTreeMap::new(),
            registered_at: now,
            last_seen: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.descriptor.id
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.descriptor.protocol
    }

    #[must_use]
    pub fn channel(&self, index: u32) -> Option<&Channel> {
        self.descriptor.channel(index)
    }

    /// Whether no heartbeat or command was seen within `timeout`.
    #[must_use]
    pub fn is_stale(&self, now: Timestamp, timeout: std::time::Duration) -> bool {
        time::elapsed(self.last_seen, now) > timeout
    }

    /// Apply a partial update. Every update counts as a sign of life.
    pub fn apply(&mut self, update: &DeviceUpdate, now: Timestamp) {
        if let Some(reachability) = update.reachability {
            self.reachability = reachability;
        }
        if let Some((channel, intensity)) = update.actuation {
            if self.descriptor.channel(channel).is_some() {
                self.actuation.insert(channel, intensity);
            }
        }
        self.last_seen = now;
    }
}

/// Partial state change for [`Device::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceUpdate {
    pub reachability: Option<Reachability>,
    pub actuation: Option<(u32, Intensity)>,
}

impl DeviceUpdate {
    /// Only refresh `last_seen`.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// A write succeeded on `channel` with `intensity`.
    #[must_use]
    pub fn actuated(channel: u32, intensity: Intensity) -> Self {
        Self {
            reachability: Some(Reachability::Reachable),
            actuation: Some((channel, intensity)),
        }
    }

    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            reachability: Some(Reachability::Unreachable),
            actuation: None,
        }
    }
}
