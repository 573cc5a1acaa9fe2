//! Rolling on-time quota.
//!
//! ```text
//!   used ──────────────▶ quota            resets_at
//!   ├── session A ──┤├── B ──┤  (gap)  │  reset: used = 0, resets_at = now + window
//! ```
//!
//! The window rolls lazily: only [`QuotaTracker::check`] (and the
//! explicit [`QuotaTracker::roll`]) look at the clock.  Nothing is logged
//! while the window lock is held.  Usage is charged with the *actual* on-time after a session ends,
//! never the requested one.  Every method takes `now` so tests can drive
//! the clock.

use core::cell::RefCell;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use log::info;

use crate::adapters::time::to_embassy;
use crate::error::QuotaExceeded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    pub used: Duration,
    pub resets_at: Instant,
}

pub struct QuotaTracker {
    quota: Duration,
    window: Duration,
    state: Mutex<CriticalSectionRawMutex, RefCell<QuotaWindow>>,
}

impl QuotaTracker {
    pub fn new(quota: Duration, window: Duration, now: Instant) -> Self {
        Self {
            quota,
            window,
            state: Mutex::new(RefCell::new(QuotaWindow {
                used: Duration::ZERO,
                resets_at: now + to_embassy(window),
            })),
        }
    }

    pub fn quota(&self) -> Duration {
        self.quota
    }

    /// Roll the window if it has expired, then test whether `requested`
    /// still fits.
    pub fn check(&self, requested: Duration, now: Instant) -> Result<(), QuotaExceeded> {
        let (rolled, verdict) = self.state.lock(|state| {
            let mut w = state.borrow_mut();
            let rolled = self.roll_locked(&mut w, now);
            let verdict = if w.used.saturating_add(requested) > self.quota {
                Err(QuotaExceeded {
                    requested,
                    used: w.used,
                    quota: self.quota,
                })
            } else {
                Ok(())
            };
            (rolled, verdict)
        });
        if rolled {
            info!("[Quota] Daily quota has been reset");
        }
        verdict
    }

    /// Roll the window if it has expired.  `true` when this call reset it.
    pub fn roll(&self, now: Instant) -> bool {
        let rolled = self
            .state
            .lock(|state| self.roll_locked(&mut state.borrow_mut(), now));
        if rolled {
            info!("[Quota] Daily quota has been reset");
        }
        rolled
    }

    fn roll_locked(&self, w: &mut QuotaWindow, now: Instant) -> bool {
        if now <= w.resets_at {
            return false;
        }
        w.used = Duration::ZERO;
        w.resets_at = now + to_embassy(self.window);
        true
    }

    /// Charge `actual` on-time to the current window; returns the new total.
    pub fn record(&self, actual: Duration) -> Duration {
        self.state.lock(|state| {
            let mut w = state.borrow_mut();
            w.used = w.used.saturating_add(actual);
            w.used
        })
    }

    pub fn used(&self) -> Duration {
        self.state.lock(|state| state.borrow().used)
    }

    pub fn snapshot(&self) -> QuotaWindow {
        self.state.lock(|state| *state.borrow())
    }
}
