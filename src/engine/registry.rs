//! Active-session registry: device id → cancellation handle.
//!
//! An entry exists from the moment the engine starts the handshake for a
//! device until its terminal cleanup, so at most one activation per device
//! is ever live.  Force shutdown reaches the engine only through the
//! [`CancelHandle`] stored here.

use core::cell::RefCell;
use std::collections::HashMap;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

use super::cancel::CancelHandle;
use crate::model::DeviceId;

/// Where a registered activation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// "on" published, waiting for the device ack.
    Handshake,
    /// Acknowledged and running since `started_at`.
    Holding { started_at: Instant },
}

pub struct ActiveSession {
    pub handle: CancelHandle,
    pub phase: SessionPhase,
}

pub struct ActivationRegistry {
    sessions: Mutex<CriticalSectionRawMutex, RefCell<HashMap<DeviceId, ActiveSession>>>,
}

impl Default for ActivationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Register a device in the handshake phase.  Returns `false` (and
    /// leaves the existing entry alone) if the device is already present.
    pub fn register(&self, device_id: DeviceId, handle: CancelHandle) -> bool {
        self.sessions.lock(|sessions| {
            let mut sessions = sessions.borrow_mut();
            if sessions.contains_key(&device_id) {
                return false;
            }
            sessions.insert(
                device_id,
                ActiveSession {
                    handle,
                    phase: SessionPhase::Handshake,
                },
            );
            true
        })
    }

    /// Move a registered device into the holding phase.
    pub fn promote(&self, device_id: DeviceId, started_at: Instant) -> bool {
        self.sessions.lock(|sessions| {
            match sessions.borrow_mut().get_mut(&device_id) {
                Some(entry) => {
                    entry.phase = SessionPhase::Holding { started_at };
                    true
                }
                None => false,
            }
        })
    }

    pub fn unregister(&self, device_id: DeviceId) -> Option<ActiveSession> {
        self.sessions.lock(|sessions| sessions.borrow_mut().remove(&device_id))
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.sessions.lock(|sessions| sessions.borrow().contains_key(&device_id))
    }

    pub fn phase(&self, device_id: DeviceId) -> Option<SessionPhase> {
        self.sessions
            .lock(|sessions| sessions.borrow().get(&device_id).map(|s| s.phase))
    }

    /// Fire the device's cancellation handle.  `true` only if an entry
    /// exists and this call was the one that cancelled it.
    ///
    /// Fires under the registry lock, so it is ordered against [`finish`].
    ///
    /// [`finish`]: Self::finish
    pub fn cancel(&self, device_id: DeviceId) -> bool {
        self.sessions.lock(|sessions| {
            sessions
                .borrow()
                .get(&device_id)
                .is_some_and(|s| s.handle.cancel())
        })
    }

    /// Remove the device's entry and report whether it had been cancelled.
    /// A `cancel` that loses the race finds no entry and returns `false`.
    pub fn finish(&self, device_id: DeviceId) -> bool {
        self.sessions.lock(|sessions| {
            sessions
                .borrow_mut()
                .remove(&device_id)
                .is_some_and(|s| s.handle.is_cancelled())
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.lock(|sessions| sessions.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
