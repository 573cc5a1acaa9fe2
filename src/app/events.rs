//! Outbound status events.
//!
//! The engine publishes these to the
//! [`Broadcaster`](crate::broadcast::Broadcaster) as JSON whenever a device
//! changes state under its control.  Relayed device status payloads travel
//! the same channel verbatim; clients tell them apart by the `source` field.

use core::time::Duration;

use serde::Serialize;

use crate::model::{DeviceId, DeviceState, ShutdownReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub source: &'static str,
    pub device_id: DeviceId,
    pub state: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ShutdownReason>,
    /// Requested seconds on ON events, measured seconds on OFF events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl StatusEvent {
    const SOURCE: &'static str = "engine";

    pub fn on(device_id: DeviceId, requested: Duration) -> Self {
        Self {
            source: Self::SOURCE,
            device_id,
            state: DeviceState::On,
            reason: None,
            duration_secs: Some(requested.as_secs_f64()),
        }
    }

    pub fn off(device_id: DeviceId, reason: ShutdownReason, actual: Duration) -> Self {
        Self {
            source: Self::SOURCE,
            device_id,
            state: DeviceState::Off,
            reason: Some(reason),
            duration_secs: Some(actual.as_secs_f64()),
        }
    }

    /// The handshake never produced a session.
    pub fn aborted(device_id: DeviceId, reason: ShutdownReason) -> Self {
        Self {
            source: Self::SOURCE,
            device_id,
            state: DeviceState::Off,
            reason: Some(reason),
            duration_secs: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
