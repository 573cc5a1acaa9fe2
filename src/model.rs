//! Domain records shared between the engine and the persistence port.
//!
//! The engine never owns these rows; it builds them and hands them to a
//! [`DeviceStore`](crate::app::ports::DeviceStore).  Timestamps are Unix
//! milliseconds taken from [`unix_millis`](crate::adapters::time::unix_millis).

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

pub type DeviceId = u32;
pub type UserId = u32;
pub type SessionId = u64;

/// Persisted power state of a device.
///
/// `Unknown` is the storage default for a freshly provisioned device; the
/// engine only ever writes `On` and `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    On,
    Off,
    Unknown,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub state: DeviceState,
}

impl Device {
    /// Title used for push notifications; falls back to `Device <id>`.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Device {}", self.id)
        } else {
            self.name.clone()
        }
    }
}

/// Why a device left the ON state (or never reached it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownReason {
    /// The requested duration elapsed.
    Completed,
    /// An admin force shutdown cancelled the session.
    Force,
    /// The device never acknowledged the "on" command.
    AckTimeout,
}

impl ShutdownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Force => "force",
            Self::AckTimeout => "ack-timeout",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session row written right after a successful ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub intended: Duration,
    pub started_at_ms: u64,
    /// `started_at_ms + intended`; rewritten to the real end on close.
    pub active_until_ms: u64,
}

/// Full session row as a store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub intended: Duration,
    pub started_at_ms: u64,
    pub active_until_ms: u64,
    pub reason: Option<ShutdownReason>,
}

impl SessionRecord {
    pub fn from_new(id: SessionId, session: NewSession) -> Self {
        Self {
            id,
            user_id: session.user_id,
            device_id: session.device_id,
            intended: session.intended,
            started_at_ms: session.started_at_ms,
            active_until_ms: session.active_until_ms,
            reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reason.is_some()
    }
}

/// Append-only state-change log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLogEntry {
    pub device_id: DeviceId,
    pub user_id: UserId,
    /// `None` when the session row could not be written.
    pub session_id: Option<SessionId>,
    pub state: DeviceState,
    pub changed_at_ms: u64,
    /// Intended duration on ON entries, actual on-time on OFF entries.
    pub duration: Option<Duration>,
    pub reason: Option<ShutdownReason>,
}
