//! Port traits: the hexagonal boundary between the control plane and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ActivationEngine / Broadcaster (domain)
//! ```
//!
//! Driven adapters (message bus, row storage, push delivery, live clients)
//! implement these traits.  The engine holds them as `Arc<dyn …>` so the
//! same adapter can be shared with the HTTP layer that lives outside this
//! crate.
//!
//! ## Threading contract
//!
//! Every port is `Send + Sync`: the engine calls them from its own thread,
//! notifications run on short-lived threads, and admission happens on the
//! caller's thread.  No port is ever called while a control-plane lock is held.

use core::fmt;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AdmissionError;
use crate::model::{
    Device, DeviceId, DeviceLogEntry, DeviceState, NewSession, SessionId, ShutdownReason,
};
use crate::scheduler::ScheduleItem;

// ───────────────────────────────────────────────────────────────
// Command bus (driven adapter: domain → device)
// ───────────────────────────────────────────────────────────────

/// Publish side of the message bus.
pub trait CommandBus: Send + Sync {
    /// Publish `payload` on `topic`.  The engine uses QoS 2 + retained for
    /// control commands so a reconnecting device sees the last command.
    fn publish(&self, topic: &str, payload: &str, qos: u8, retained: bool) -> Result<(), BusError>;
}

// ───────────────────────────────────────────────────────────────
// Device store (driven adapter: domain ↔ persistent rows)
// ───────────────────────────────────────────────────────────────

/// Row-level persistence for devices, sessions and state-change logs.
///
/// No multi-statement transaction is assumed.  Each call stands alone; the
/// engine logs a failed write and carries on with the activation.
pub trait DeviceStore: Send + Sync {
    fn find_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    fn set_device_state(&self, id: DeviceId, state: DeviceState) -> Result<(), StoreError>;

    /// Create a session row and return its id.
    fn open_session(&self, session: NewSession) -> Result<SessionId, StoreError>;

    /// Stamp the real end time and the shutdown reason on a session row.
    fn close_session(
        &self,
        id: SessionId,
        ended_at_ms: u64,
        reason: ShutdownReason,
    ) -> Result<(), StoreError>;

    fn append_log(&self, entry: DeviceLogEntry) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Notifier (driven adapter: domain → push delivery)
// ───────────────────────────────────────────────────────────────

/// A push notification addressed to every registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub device_id: DeviceId,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl Notice {
    pub fn new(device_id: DeviceId, body: impl Into<String>) -> Self {
        Self {
            device_id,
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }
}

/// Fire-and-forget push delivery.  Called off the engine thread; failures
/// are logged by the caller and never retried.
pub trait Notifier: Send + Sync {
    fn notify_all(&self, notice: &Notice) -> Result<(), NotifyError>;
}

// ───────────────────────────────────────────────────────────────
// Observer (driven adapter: domain → live clients)
// ───────────────────────────────────────────────────────────────

/// One live subscriber of the [`Broadcaster`](crate::broadcast::Broadcaster).
///
/// `deliver` must not block; a transport that can stall should queue
/// internally.  Returning an error evicts the observer.
pub trait Observer: Send + Sync {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (driving: scheduler → engine)
// ───────────────────────────────────────────────────────────────

/// Receives schedule items as they come due.
///
/// The scheduler does not retry: an `Err` is logged and the item is gone.
pub trait SchedulerDelegate {
    fn on_schedule_due(&self, item: &ScheduleItem) -> Result<(), AdmissionError>;
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// The driven ports the engine needs, shared with whoever else uses them.
#[derive(Clone)]
pub struct Ports {
    pub bus: Arc<dyn CommandBus>,
    pub store: Arc<dyn DeviceStore>,
    pub notifier: Arc<dyn Notifier>,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`DeviceStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed row does not exist.
    NotFound,
    /// The backend refused or failed the statement.
    Backend(String),
}

/// Errors from [`CommandBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    NotConnected,
    Rejected(String),
}

/// Errors from [`Notifier::notify_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// No recipients could be resolved.
    NoRecipients,
    Delivery(String),
}

/// The observer's transport is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError(pub String);

/// Errors from loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    Malformed { key: &'static str, value: String },
    /// A config field failed range validation.
    ValidationFailed(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "row not found"),
            Self::Backend(msg) => write!(f, "storage backend: {}", msg),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "bus not connected"),
            Self::Rejected(msg) => write!(f, "publish rejected: {}", msg),
        }
    }
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecipients => write!(f, "no push recipients"),
            Self::Delivery(msg) => write!(f, "push delivery: {}", msg),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer delivery failed: {}", self.0)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { key, value } => write!(f, "{} has malformed value {:?}", key, value),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
impl std::error::Error for BusError {}
impl std::error::Error for NotifyError {}
impl std::error::Error for DeliveryError {}
impl std::error::Error for ConfigError {}
