//! Message-bus topic names.
//!
//! ```text
//!   device/control        ◀── engine publishes "on" / "off" (QoS 2, retained)
//!   device/{id}/status    ──▶ relayed verbatim to the Broadcaster
//!   device/{id}/ack       ──▶ resolves the device's pending ack slot
//! ```

use heapless::String;

use crate::model::DeviceId;

/// Default control topic for on/off commands.
pub const CONTROL: &str = "device/control";

/// Wildcard subscriptions a bus adapter should register.
pub const STATUS_FILTER: &str = "device/+/status";
pub const ACK_FILTER: &str = "device/+/ack";

pub const PAYLOAD_ON: &str = "on";
pub const PAYLOAD_OFF: &str = "off";

/// Longest per-device topic: "device/" + u32::MAX + "/status".
pub type Topic = String<32>;

/// Inbound topic classified by [`parse_inbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Status(DeviceId),
    Ack(DeviceId),
}

pub fn status_topic(device_id: DeviceId) -> Topic {
    device_topic(device_id, "status")
}

pub fn ack_topic(device_id: DeviceId) -> Topic {
    device_topic(device_id, "ack")
}

fn device_topic(device_id: DeviceId, leaf: &str) -> Topic {
    let mut s = Topic::new();
    // Capacity covers the longest id, so this cannot overflow.
    let _ = core::fmt::Write::write_fmt(&mut s, format_args!("device/{}/{}", device_id, leaf));
    s
}

/// Classify an inbound topic.  Anything that is not exactly
/// `device/<u32>/status` or `device/<u32>/ack` (decimal, no leading
/// zeros) yields `None`.
pub fn parse_inbound(topic: &str) -> Option<Inbound> {
    let mut parts = topic.split('/');
    if parts.next()? != "device" {
        return None;
    }
    let id_part = parts.next()?;
    if id_part.is_empty() || !id_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // One canonical spelling per id.
    if id_part.len() > 1 && id_part.starts_with('0') {
        return None;
    }
    let id: DeviceId = id_part.parse().ok()?;
    let leaf = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    match leaf {
        "status" => Some(Inbound::Status(id)),
        "ack" => Some(Inbound::Ack(id)),
        _ => None,
    }
}
