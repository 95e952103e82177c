//! OSC wire codec shared by the local listener and the remote relay.
//!
//! Two fixed addresses carry the protocol-independent command envelope and
//! its state mirror:
//!
//! | Address | Arguments |
//! |---------|-----------|
//! | `/vibelink/command` | `s deviceId, i channel, f intensity[, i durationMs]` |
//! | `/vibelink/state` | `s deviceId, i channel, f intensity` |
//!
//! Everything else is a parameter message handled by the configured
//! bindings.

use rosc::{OscMessage, OscPacket, OscType, decoder, encoder};

use vibelink_domain::actuation::Intensity;
use vibelink_domain::command::CommandEnvelope;
use vibelink_domain::id::DeviceId;

use crate::error::OscError;

/// Address of inbound command envelopes.
pub const COMMAND_ADDR: &str = "/vibelink/command";

/// Address of outbound state mirror messages.
pub const STATE_ADDR: &str = "/vibelink/state";

/// A delivered channel value, as mirrored back to OSC peers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub device: DeviceId,
    pub channel: u32,
    pub intensity: Intensity,
}

/// Decode one datagram (or stream frame) and flatten bundles into the
/// messages they carry, in order.
///
/// # Errors
///
/// Returns [`OscError::Decode`] when the bytes are not a valid OSC packet.
pub fn decode_packet(bytes: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let (_, packet) = decoder::decode_udp(bytes).map_err(|err| OscError::decode(&err))?;
    let mut messages = Vec::new();
    flatten(packet, &mut messages);
    Ok(messages)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Serialize a single message.
///
/// # Errors
///
/// Returns [`OscError::Encode`] when rosc rejects the message.
pub fn encode_message(msg: OscMessage) -> Result<Vec<u8>, OscError> {
    encoder::encode(&OscPacket::Message(msg)).map_err(|err| OscError::encode(&err))
}

/// Build the `/vibelink/command` message for an envelope.
#[must_use]
pub fn envelope_message(envelope: &CommandEnvelope) -> OscMessage {
    let mut args = vec![
        OscType::String(envelope.device_id.to_string()),
        OscType::Int(to_int(envelope.channel)),
        OscType::Float(to_float(envelope.intensity)),
    ];
    if let Some(ms) = envelope.duration_ms {
        args.push(OscType::Int(to_int(ms)));
    }
    OscMessage {
        addr: COMMAND_ADDR.to_string(),
        args,
    }
}

/// Parse a `/vibelink/command` message back into an envelope.
///
/// # Errors
///
/// Returns [`OscError::Arguments`] when the address is wrong or an argument
/// is missing or has the wrong type.
pub fn decode_envelope(msg: &OscMessage) -> Result<CommandEnvelope, OscError> {
    if msg.addr != COMMAND_ADDR {
        return Err(arguments(msg, "not a command envelope"));
    }
    let device_id = string_arg(msg, 0).ok_or_else(|| arguments(msg, "missing device id"))?;
    let channel = index_arg(msg, 1).ok_or_else(|| arguments(msg, "missing channel index"))?;
    let intensity = number_arg(msg, 2).ok_or_else(|| arguments(msg, "missing intensity"))?;
    let duration_ms = match msg.args.get(3) {
        None => None,
        Some(_) => Some(index_arg(msg, 3).ok_or_else(|| arguments(msg, "invalid duration"))?),
    };
    if device_id.trim().is_empty() {
        return Err(arguments(msg, "empty device id"));
    }
    Ok(CommandEnvelope {
        device_id: DeviceId::new(device_id),
        channel,
        intensity,
        duration_ms,
    })
}

/// Build the `/vibelink/state` mirror message.
#[must_use]
pub fn state_message(update: &StateUpdate) -> OscMessage {
    OscMessage {
        addr: STATE_ADDR.to_string(),
        args: vec![
            OscType::String(update.device.to_string()),
            OscType::Int(to_int(update.channel)),
            OscType::Float(to_float(update.intensity.value())),
        ],
    }
}

/// Parse a `/vibelink/state` message.
///
/// # Errors
///
/// Returns [`OscError::Arguments`] on a wrong address or malformed arguments.
pub fn decode_state(msg: &OscMessage) -> Result<StateUpdate, OscError> {
    if msg.addr != STATE_ADDR {
        return Err(arguments(msg, "not a state message"));
    }
    let device = string_arg(msg, 0).ok_or_else(|| arguments(msg, "missing device id"))?;
    let channel = index_arg(msg, 1).ok_or_else(|| arguments(msg, "missing channel index"))?;
    let intensity = number_arg(msg, 2).ok_or_else(|| arguments(msg, "missing intensity"))?;
    Ok(StateUpdate {
        device: DeviceId::new(device),
        channel,
        intensity: Intensity::clamped(intensity),
    })
}

/// Read the first argument of a parameter message as a number.
///
/// Ints, floats, doubles, longs and bools are accepted; anything else
/// yields `None`.
#[must_use]
pub fn first_value(msg: &OscMessage) -> Option<f64> {
    number_arg(msg, 0)
}

#[allow(clippy::cast_precision_loss)]
fn number_arg(msg: &OscMessage, at: usize) -> Option<f64> {
    match msg.args.get(at)? {
        OscType::Float(v) => Some(f64::from(*v)),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(f64::from(*v)),
        OscType::Long(v) => Some(*v as f64),
        OscType::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn index_arg(msg: &OscMessage, at: usize) -> Option<u32> {
    match msg.args.get(at)? {
        OscType::Int(v) => u32::try_from(*v).ok(),
        OscType::Long(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

fn string_arg(msg: &OscMessage, at: usize) -> Option<String> {
    match msg.args.get(at)? {
        OscType::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn arguments(msg: &OscMessage, reason: &'static str) -> OscError {
    OscError::Arguments {
        addr: msg.addr.clone(),
        reason,
    }
}

fn to_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn to_float(value: f64) -> f32 {
    value as f32
}
