//! Log-based adapters.
//!
//! [`LogNotifier`] stands in for push delivery and [`LogObserver`] for a
//! live client connection.  Both write to the `log` facade so the console
//! binary shows what a real deployment would send out.

use log::info;

use crate::app::ports::{DeliveryError, Notice, Notifier, NotifyError, Observer};

/// Notifier that logs every notice instead of pushing it.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn notify_all(&self, notice: &Notice) -> Result<(), NotifyError> {
        let data = serde_json::to_string(&notice.data)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(
            "[Notify] device={} | {} | data={}",
            notice.device_id, notice.body, data
        );
        Ok(())
    }
}

/// Observer that logs every broadcast message under a client label.
#[derive(Debug)]
pub struct LogObserver {
    label: String,
}

impl LogObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Observer for LogObserver {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        info!("[Broadcast] {} <- {}", self.label, message);
        Ok(())
    }
}
