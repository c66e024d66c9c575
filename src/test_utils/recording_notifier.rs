use parking_lot::Mutex;

use crate::Notification;
use crate::Notifier;
use crate::Result;

/// Keeps every notification it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Result<()> {
        self.received.lock().push(notification);
        Ok(())
    }
}
