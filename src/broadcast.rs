//! Latest-value fan-out to live observers.
//!
//! ```text
//!   device/{id}/status ─┐
//!                       ├─▶ publish(msg) ─▶ latest = msg ─▶ every observer
//!   engine StatusEvent ─┘
//!
//!   subscribe(obs) ─▶ obs.deliver(latest)   (late joiners catch up)
//! ```
//!
//! Deliveries happen outside the hub lock on a snapshot of the observer
//! list.  An observer whose `deliver` fails is evicted.
//!
//! A separate delivery gate serialises `publish` against the replay in
//! `subscribe`, so every observer receives messages in publish order and
//! a late joiner never ends on a stale replay.  Observers must not call
//! back into the broadcaster from `deliver`.

use core::cell::RefCell;
use std::sync::{Arc, Mutex as GateMutex, PoisonError};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, warn};

use crate::app::ports::Observer;

pub type ObserverId = u64;

#[derive(Default)]
struct Hub {
    next_id: ObserverId,
    observers: Vec<(ObserverId, Arc<dyn Observer>)>,
    latest: Option<String>,
}

pub struct Broadcaster {
    hub: Mutex<CriticalSectionRawMutex, RefCell<Hub>>,
    /// Held for a whole publish or replay; never taken while `hub` is held.
    delivery: GateMutex<()>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            hub: Mutex::new(RefCell::new(Hub::default())),
            delivery: GateMutex::new(()),
        }
    }

    /// Register `observer` and immediately hand it the latest message,
    /// if any.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let _gate = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let (id, latest) = self.hub.lock(|hub| {
            let mut hub = hub.borrow_mut();
            let id = hub.next_id;
            hub.next_id += 1;
            hub.observers.push((id, observer.clone()));
            (id, hub.latest.clone())
        });
        debug!("[Broadcast] observer {} subscribed", id);

        if let Some(message) = latest {
            if let Err(e) = observer.deliver(&message) {
                warn!("[Broadcast] Error sending to observer {}: {}", id, e);
                self.unsubscribe(id);
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.hub.lock(|hub| {
            let mut hub = hub.borrow_mut();
            let before = hub.observers.len();
            hub.observers.retain(|(oid, _)| *oid != id);
            hub.observers.len() != before
        });
        if removed {
            debug!("[Broadcast] observer {} removed", id);
        }
        removed
    }

    /// Replace the latest message and deliver it to every observer.
    /// Returns how many observers accepted it.
    pub fn publish(&self, message: &str) -> usize {
        let _gate = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let targets = self.hub.lock(|hub| {
            let mut hub = hub.borrow_mut();
            hub.latest = Some(message.to_owned());
            hub.observers.clone()
        });

        let mut failed = Vec::new();
        for (id, observer) in &targets {
            if let Err(e) = observer.deliver(message) {
                warn!("[Broadcast] Error sending to observer {}: {}", id, e);
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            self.hub.lock(|hub| {
                hub.borrow_mut()
                    .observers
                    .retain(|(id, _)| !failed.contains(id));
            });
        }
        targets.len() - failed.len()
    }

    pub fn latest(&self) -> Option<String> {
        self.hub.lock(|hub| hub.borrow().latest.clone())
    }

    pub fn observer_count(&self) -> usize {
        self.hub.lock(|hub| hub.borrow().observers.len())
    }
}
