//! Engine statistics, crash records and runtime diagnostics.
//!
//! Counters are lock-free atomics bumped from the engine thread and read
//! from anywhere.  When the activation loop panics, the engine keeps a
//! [`CrashEntry`] describing the panic so the console (or an operator
//! endpoint) can show why the engine halted.
//!
//! Runtime metrics (queue depth, live sessions, quota usage) are
//! collected on demand by the control plane.

use core::sync::atomic::{AtomicU64, Ordering};
use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::adapters::time::unix_millis;

// ───────────────────────────────────────────────────────────────
// Counters
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EngineStats {
    processed: AtomicU64,
    rejected: AtomicU64,
    handshake_failures: AtomicU64,
    completed: AtomicU64,
    forced: AtomicU64,
    persistence_errors: AtomicU64,
    bus_errors: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub rejected: u64,
    pub handshake_failures: u64,
    pub completed: u64,
    pub forced: u64,
    pub persistence_errors: u64,
    pub bus_errors: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced(&self) {
        self.forced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_error(&self) {
        self.bus_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            bus_errors: self.bus_errors.load(Ordering::Relaxed),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Crash record
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEntry {
    pub at_ms: u64,
    pub reason: heapless::String<64>,
}

impl CrashEntry {
    /// Reason is truncated to 63 bytes on a char boundary.
    pub fn new(at_ms: u64, reason: &str) -> Self {
        let mut end = reason.len().min(63);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut r = heapless::String::new();
        let _ = r.push_str(&reason[..end]);
        Self { at_ms, reason: r }
    }

    pub fn now(reason: &str) -> Self {
        Self::new(unix_millis(), reason)
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

// ───────────────────────────────────────────────────────────────
// Runtime metrics
// ───────────────────────────────────────────────────────────────

/// Diagnostics snapshot collected on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeMetrics {
    pub queued: usize,
    pub active_sessions: usize,
    pub pending_acks: usize,
    pub quota_used_secs: f64,
    pub quota_secs: f64,
    pub scheduled: usize,
    pub observers: usize,
    pub halted: bool,
    pub last_crash: Option<CrashEntry>,
    pub stats: StatsSnapshot,
}

// ───────────────────────────────────────────────────────────────
// Panic hook
// ───────────────────────────────────────────────────────────────

/// Route panics through the `log` facade, then run the previous hook.
///
/// Call once during startup, after the logger is installed.
pub fn install_panic_handler() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        log::error!("[Panic] {} at {}", panic_message(info.payload()), location);
        previous(info);
    }));
}
