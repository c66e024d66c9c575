use tracing::warn;

use super::Notification;
use super::Notifier;
use crate::Result;

/// Writes every notification to the log. The default when nothing else is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Result<()> {
        match &notification {
            Notification::Crashed {
                key,
                consecutive_failures,
                restarting,
            } => warn!(%key, consecutive_failures, restarting, "{}", notification),
            Notification::RestartPaused {
                key,
                reason,
                consecutive_failures,
            } => warn!(%key, %reason, consecutive_failures, "{}", notification),
        }
        Ok(())
    }
}
