//! Per-attempt cancellation token.
//!
//! Every activation attempt gets a fresh pair.  The engine keeps the
//! [`CancelToken`] and awaits it at its two suspension points (ack wait,
//! hold).  The [`CancelHandle`] goes into the registry where
//! `force_shutdown` can reach it; it exposes nothing but `cancel()`.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

struct Shared {
    fired: AtomicBool,
    signal: Signal<CriticalSectionRawMutex, ()>,
}

/// Create a linked handle/token pair for one activation attempt.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let shared = Arc::new(Shared {
        fired: AtomicBool::new(false),
        signal: Signal::new(),
    });
    (CancelHandle(shared.clone()), CancelToken(shared))
}

/// The narrow capability handed to force shutdown.
#[derive(Clone)]
pub struct CancelHandle(Arc<Shared>);

impl CancelHandle {
    /// Request cancellation.  Returns `true` only for the call that
    /// actually fired the token; repeated calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.0.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.0.signal.signal(());
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.fired.load(Ordering::Acquire)
    }
}

/// Engine side of the pair.
pub struct CancelToken(Arc<Shared>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.fired.load(Ordering::Acquire)
    }

    /// Resolves once cancellation has been requested.  A cancel that
    /// arrived while the engine was busy elsewhere resolves immediately.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.signal.wait().await;
    }
}
