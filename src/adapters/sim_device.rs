//! Simulated device on an in-process bus.
//!
//! Implements [`CommandBus`] for a single motor so the console binary runs
//! end to end without a broker:
//!
//! ```text
//!   engine ── publish "on" ──▶ SimulatedDevice ── (ack_delay) ──▶ Inbox
//!                                                   device/{id}/status  {"state":"ON"}
//!                                                   device/{id}/ack
//!   Inbox ── pump thread ──▶ ControlPlane router
//! ```
//!
//! A muted device (see [`SimulatedDevice::set_responsive`]) still reports
//! status but never acks, which exercises the handshake timeout.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::HistoryBuffer;
use log::{info, warn};

use crate::app::ports::{BusError, CommandBus};
use crate::model::{DeviceId, DeviceState};
use crate::topics;

pub const INBOX_DEPTH: usize = 16;

/// How many published commands the device remembers.
pub const PUBLISHED_HISTORY: usize = 32;

type Published = HistoryBuffer<(String, String), PUBLISHED_HISTORY>;

/// Messages the simulated device sends back towards the control plane.
pub type Inbox = Channel<CriticalSectionRawMutex, InboundMessage, INBOX_DEPTH>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

pub struct SimulatedDevice {
    device_id: DeviceId,
    control_topic: String,
    ack_delay: Duration,
    responsive: AtomicBool,
    inbox: Arc<Inbox>,
    published: Mutex<CriticalSectionRawMutex, RefCell<Published>>,
}

impl SimulatedDevice {
    pub fn new(
        device_id: DeviceId,
        control_topic: &str,
        ack_delay: Duration,
        inbox: Arc<Inbox>,
    ) -> Self {
        info!(
            "SimulatedDevice: device {} on '{}' (ack after {:?})",
            device_id, control_topic, ack_delay
        );
        Self {
            device_id,
            control_topic: control_topic.to_owned(),
            ack_delay,
            responsive: AtomicBool::new(true),
            inbox,
            published: Mutex::new(RefCell::new(HistoryBuffer::new())),
        }
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::Release);
    }

    pub fn is_responsive(&self) -> bool {
        self.responsive.load(Ordering::Acquire)
    }

    /// The last [`PUBLISHED_HISTORY`] `(topic, payload)` pairs, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock(|p| p.borrow().oldest_ordered().cloned().collect())
    }

    fn report_status(inbox: &Inbox, device_id: DeviceId, state: DeviceState) {
        let payload = serde_json::json!({ "device_id": device_id, "state": state }).to_string();
        push(inbox, topics::status_topic(device_id).as_str(), &payload);
    }
}

fn push(inbox: &Inbox, topic: &str, payload: &str) {
    let msg = InboundMessage {
        topic: topic.to_owned(),
        payload: payload.to_owned(),
    };
    if inbox.try_send(msg).is_err() {
        warn!("SimulatedDevice: inbox full, dropping message on {}", topic);
    }
}

impl CommandBus for SimulatedDevice {
    fn publish(&self, topic: &str, payload: &str, _qos: u8, _retained: bool) -> Result<(), BusError> {
        self.published
            .lock(|p| p.borrow_mut().write((topic.to_owned(), payload.to_owned())));

        if topic != self.control_topic {
            return Ok(());
        }

        match payload {
            topics::PAYLOAD_ON => {
                let inbox = self.inbox.clone();
                let device_id = self.device_id;
                let delay = self.ack_delay;
                let ack = self.is_responsive();
                std::thread::Builder::new()
                    .name("sim-device".into())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        Self::report_status(&inbox, device_id, DeviceState::On);
                        if ack {
                            push(&inbox, topics::ack_topic(device_id).as_str(), "ack");
                        }
                    })
                    .map_err(|e| BusError::Rejected(e.to_string()))?;
                Ok(())
            }
            topics::PAYLOAD_OFF => {
                Self::report_status(&self.inbox, self.device_id, DeviceState::Off);
                Ok(())
            }
            other => Err(BusError::Rejected(format!("unknown command '{}'", other))),
        }
    }
}
