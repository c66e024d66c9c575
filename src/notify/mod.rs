//! User-facing notification triggers.
//!
//! Only the triggering contract lives here: the supervisor decides *when* a
//! crash or a paused restart is worth telling someone about, a [`Notifier`]
//! decides how. Delivery is best-effort; callers log and swallow failures.
mod broadcast_notifier;
mod tracing_notifier;
pub use broadcast_notifier::*;
pub use tracing_notifier::*;

#[cfg(test)]
mod notify_test;

use std::fmt;

#[cfg(test)]
use mockall::automock;

use crate::PauseReason;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A session that should be alive disappeared on its own.
    Crashed {
        key: String,
        consecutive_failures: u32,
        /// Whether an auto-restart was scheduled
        restarting: bool,
    },

    /// Auto-restart is suppressed until a manual start or resume.
    RestartPaused {
        key: String,
        reason: PauseReason,
        consecutive_failures: u32,
    },
}

impl Notification {
    pub fn key(&self) -> &str {
        match self {
            Notification::Crashed { key, .. } => key,
            Notification::RestartPaused { key, .. } => key,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Notification::Crashed {
                key,
                restarting: true,
                ..
            } => write!(f, "{key} crashed, auto-restarting"),
            Notification::Crashed {
                key,
                consecutive_failures,
                restarting: false,
            } => write!(f, "{key} crashed ({consecutive_failures} consecutive failures)"),
            Notification::RestartPaused {
                key,
                reason,
                consecutive_failures,
            } => write!(
                f,
                "{key} restart paused: {reason} after {consecutive_failures} consecutive failures"
            ),
        }
    }
}

#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync + 'static {
    /// Delivers one notification. Must not block.
    fn notify(
        &self,
        notification: Notification,
    ) -> Result<()>;
}
