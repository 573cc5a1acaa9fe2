//! In-memory [`DeviceStore`].
//!
//! Backs the console binary and the integration tests.  Tables are plain
//! collections behind one blocking mutex; rows are cloned out so no lock
//! is held across a caller's code.

use core::cell::RefCell;
use std::collections::HashMap;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::info;

use crate::app::ports::{DeviceStore, StoreError};
use crate::model::{
    Device, DeviceId, DeviceLogEntry, DeviceState, NewSession, SessionId, SessionRecord,
    ShutdownReason,
};

#[derive(Default)]
struct Tables {
    devices: HashMap<DeviceId, Device>,
    sessions: Vec<SessionRecord>,
    logs: Vec<DeviceLogEntry>,
    next_session: SessionId,
}

pub struct InMemoryStore {
    tables: Mutex<CriticalSectionRawMutex, RefCell<Tables>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("InMemoryStore: simulation backend");
        Self {
            tables: Mutex::new(RefCell::new(Tables {
                next_session: 1,
                ..Tables::default()
            })),
        }
    }

    /// Builder form of [`insert_device`](Self::insert_device).
    pub fn with_device(self, id: DeviceId, name: &str) -> Self {
        self.insert_device(Device {
            id,
            name: name.to_owned(),
            state: DeviceState::Unknown,
        });
        self
    }

    pub fn insert_device(&self, device: Device) {
        self.tables.lock(|t| {
            t.borrow_mut().devices.insert(device.id, device);
        });
    }

    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.tables.lock(|t| t.borrow().devices.get(&id).cloned())
    }

    pub fn devices(&self) -> Vec<Device> {
        let mut all: Vec<Device> =
            self.tables.lock(|t| t.borrow().devices.values().cloned().collect());
        all.sort_by_key(|d| d.id);
        all
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.tables.lock(|t| t.borrow().sessions.clone())
    }

    pub fn logs(&self) -> Vec<DeviceLogEntry> {
        self.tables.lock(|t| t.borrow().logs.clone())
    }

    /// Log entries for one device, oldest first.
    pub fn logs_for(&self, id: DeviceId) -> Vec<DeviceLogEntry> {
        self.tables.lock(|t| {
            t.borrow()
                .logs
                .iter()
                .filter(|e| e.device_id == id)
                .cloned()
                .collect()
        })
    }
}

impl DeviceStore for InMemoryStore {
    fn find_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.device(id))
    }

    fn set_device_state(&self, id: DeviceId, state: DeviceState) -> Result<(), StoreError> {
        self.tables.lock(|t| {
            let mut t = t.borrow_mut();
            let device = t.devices.get_mut(&id).ok_or(StoreError::NotFound)?;
            device.state = state;
            Ok(())
        })
    }

    fn open_session(&self, session: NewSession) -> Result<SessionId, StoreError> {
        self.tables.lock(|t| {
            let mut t = t.borrow_mut();
            let id = t.next_session;
            t.next_session += 1;
            t.sessions.push(SessionRecord::from_new(id, session));
            Ok(id)
        })
    }

    fn close_session(
        &self,
        id: SessionId,
        ended_at_ms: u64,
        reason: ShutdownReason,
    ) -> Result<(), StoreError> {
        self.tables.lock(|t| {
            let mut t = t.borrow_mut();
            let row = t
                .sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(StoreError::NotFound)?;
            row.active_until_ms = ended_at_ms;
            row.reason = Some(reason);
            Ok(())
        })
    }

    fn append_log(&self, entry: DeviceLogEntry) -> Result<(), StoreError> {
        self.tables.lock(|t| t.borrow_mut().logs.push(entry));
        Ok(())
    }
}
