//! Acknowledgment rendezvous.
//!
//! One single-use slot per device, armed immediately before the "on"
//! command is published and freed when the [`AckSlot`] guard drops, which
//! covers the ack, timeout and cancel paths alike.
//!
//! ```text
//!   engine: arm(id) ─▶ publish "on" ─▶ slot.acknowledged() ─┐
//!                                                           ├─▶ drop(slot)
//!   bus:    device/{id}/ack ─▶ acknowledge(id) ─▶ signal ───┘
//! ```
//!
//! An ack for a device with no armed slot is dropped on the floor.

use core::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::model::DeviceId;

type AckSignal = Signal<CriticalSectionRawMutex, ()>;

pub struct AckWaiter {
    slots: Mutex<CriticalSectionRawMutex, RefCell<HashMap<DeviceId, Arc<AckSignal>>>>,
}

impl Default for AckWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AckWaiter {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Arm a fresh slot for `device_id`, replacing any stale one.
    pub fn arm(&self, device_id: DeviceId) -> AckSlot<'_> {
        let signal = Arc::new(AckSignal::new());
        self.slots.lock(|slots| {
            slots.borrow_mut().insert(device_id, signal.clone());
        });
        AckSlot {
            waiter: self,
            device_id,
            signal,
        }
    }

    /// Resolve the pending slot for `device_id`.  Never blocks; returns
    /// `false` when nobody is waiting.
    pub fn acknowledge(&self, device_id: DeviceId) -> bool {
        let signal = self
            .slots
            .lock(|slots| slots.borrow().get(&device_id).cloned());
        match signal {
            Some(signal) => {
                signal.signal(());
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, device_id: DeviceId) -> bool {
        self.slots.lock(|slots| slots.borrow().contains_key(&device_id))
    }

    /// Number of armed slots.
    pub fn pending(&self) -> usize {
        self.slots.lock(|slots| slots.borrow().len())
    }

    fn release(&self, device_id: DeviceId, signal: &Arc<AckSignal>) {
        self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            // A newer arm for the same device owns the entry now.
            if slots
                .get(&device_id)
                .is_some_and(|current| Arc::ptr_eq(current, signal))
            {
                slots.remove(&device_id);
            }
        });
    }
}

/// Armed slot; removes itself from the table on drop.
pub struct AckSlot<'a> {
    waiter: &'a AckWaiter,
    device_id: DeviceId,
    signal: Arc<AckSignal>,
}

impl AckSlot<'_> {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Resolves when the device acknowledges.  An ack that arrived between
    /// arming and awaiting is not lost.
    pub async fn acknowledged(&self) {
        self.signal.wait().await;
    }
}

impl Drop for AckSlot<'_> {
    fn drop(&mut self) {
        self.waiter.release(self.device_id, &self.signal);
    }
}
