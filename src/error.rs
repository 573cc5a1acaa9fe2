//! Unified error types for the PumpLink control plane.
//!
//! [`Error`] covers startup (configuration and the worker thread).  Once
//! running, two propagation regimes coexist:
//!
//! - **Admission** errors ([`AdmissionError`]) are returned synchronously
//!   from `enqueue`; the request never reaches the queue.
//! - Everything after dequeue ([`Rejection`], [`HandshakeFailure`], store
//!   failures) is logged by the engine and reported only through the
//!   request's [`Ticket`](crate::engine::Ticket).

use core::fmt;
use core::time::Duration;

use crate::app::ports::{ConfigError, StoreError};
use crate::model::DeviceId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Errors from bringing the control plane up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration could not be parsed or failed validation.
    Config(ConfigError),
    /// The `activation-engine` thread could not be spawned.
    Spawn(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid control-plane configuration: {e}"),
            Self::Spawn(msg) => write!(f, "failed to spawn activation-engine thread: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Spawn(_) => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Spawn(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Synchronous rejections from `ActivationEngine::enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The device has a live (or handshaking) activation.
    AlreadyActive(DeviceId),
    /// The intake buffer is full; the caller should retry later.
    QueueFull,
    /// The request alone would overrun what is left of today's quota.
    QuotaExceeded(QuotaExceeded),
    /// The engine loop died after a panic and accepts no more work.
    EngineHalted,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyActive(id) => write!(f, "device {id} is already active"),
            Self::QueueFull => write!(f, "queue is full"),
            Self::QuotaExceeded(q) => write!(f, "{q}"),
            Self::EngineHalted => write!(f, "activation engine halted"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Quota arithmetic that caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub requested: Duration,
    pub used: Duration,
    pub quota: Duration,
}

impl fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "daily quota exceeded (requested {:?}, used {:?} of {:?})",
            self.requested, self.used, self.quota
        )
    }
}

// ---------------------------------------------------------------------------
// Dequeue-time rejection
// ---------------------------------------------------------------------------

/// Why the engine dropped a request it had already accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    QuotaExceeded(QuotaExceeded),
    DeviceNotFound(DeviceId),
    DeviceAlreadyOn(DeviceId),
    /// The device lookup itself failed.
    Store(StoreError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded(q) => write!(f, "{q}"),
            Self::DeviceNotFound(id) => write!(f, "device {id} not found"),
            Self::DeviceAlreadyOn(id) => write!(f, "device {id} already ON"),
            Self::Store(e) => write!(f, "device lookup failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Terminal failure of the ack handshake.  Both paths publish a
/// compensating "off" and create no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    AckTimeout,
    ForceCancelled,
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AckTimeout => write!(f, "device did not acknowledge in time"),
            Self::ForceCancelled => write!(f, "cancelled by admin during ack wait"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
