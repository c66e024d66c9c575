//! Process Multiplexer Client boundary.
//!
//! Every supervised process lives inside a multiplexer session named after its
//! key. The supervisor only ever talks to a [`Multiplexer`]; [`TmuxMultiplexer`]
//! is the production implementation.
mod tmux;
pub use tmux::*;


use std::collections::HashSet;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::SessionConfig;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Multiplexer: Send + Sync + 'static {
    /// Names of every live session on `host` (`None` is the local machine).
    ///
    /// A multiplexer with no server running reports an empty set, not an
    /// error.
    async fn list_active(
        &self,
        host: Option<String>,
    ) -> Result<HashSet<String>>;

    async fn exists(
        &self,
        session: &SessionConfig,
    ) -> Result<bool>;

    /// Creates a detached session running `session.command`.
    ///
    /// # Errors
    /// `LifecycleError::AlreadyRunning` if a session with this key exists.
    async fn start(
        &self,
        session: &SessionConfig,
    ) -> Result<()>;

    /// # Errors
    /// `LifecycleError::NotRunning` if no session with this key exists.
    async fn kill(
        &self,
        session: &SessionConfig,
    ) -> Result<()>;

    /// Last `max_lines` non-trailing-blank lines of the session's pane,
    /// oldest first.
    async fn capture_recent_output(
        &self,
        session: &SessionConfig,
        max_lines: usize,
    ) -> Result<Vec<String>>;
}
