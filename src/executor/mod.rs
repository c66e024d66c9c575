//! Local and remote execution of external commands.
//!
//! The multiplexer client never spawns processes itself: it builds a shell
//! command line and hands it to a [`CommandExecutor`] together with the host
//! it targets. The executor owns the transport (a local `sh -c` or an ssh
//! hop), the per-call timeout, and the mapping of spawn failures onto
//! [`LifecycleError`](crate::LifecycleError).
mod classify;
mod process_executor;
pub use classify::*;
pub use process_executor::*;


use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// One shell command line and where to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Interpreted by a POSIX shell on the target host
    pub command_line: String,
    /// `None` runs on the local machine
    pub host: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Overrides the executor's default timeout
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            ..Default::default()
        }
    }

    pub fn on_host(
        mut self,
        host: Option<&str>,
    ) -> Self {
        self.host = host.map(str::to_string);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }
}

/// Captured result of a command that ran to completion.
///
/// A non-zero exit is not an error at this layer; callers decide what a
/// given exit code means for their command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr if it says anything, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    /// Runs `spec` to completion or until its timeout elapses.
    ///
    /// # Errors
    /// - `LifecycleError::ExternalToolMissing` when the shell or ssh binary
    ///   can not be found
    /// - `LifecycleError::ConnectionFailure` when the timeout elapses
    /// - `SystemError::Io` for any other spawn failure
    async fn run(
        &self,
        spec: CommandSpec,
    ) -> Result<CommandOutput>;
}
