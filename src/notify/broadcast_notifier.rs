use tokio::sync::broadcast;
use tracing::trace;

use super::Notification;
use super::Notifier;
use crate::Result;
use crate::SystemError;

/// Fans notifications out to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest messages; they never hold up the
/// supervisor.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Result<()> {
        let key = notification.key().to_string();
        match self.sender.send(notification) {
            Ok(receivers) => {
                trace!(%key, receivers, "notification broadcast");
                Ok(())
            }
            Err(e) => Err(SystemError::SignalSendFailed(format!(
                "no subscriber for notification about {key}: {}",
                e.0
            ))
            .into()),
        }
    }
}
