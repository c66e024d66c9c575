use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;

use super::Multiplexer;
use crate::connection_failure_reason;
use crate::shell_quote;
use crate::CommandExecutor;
use crate::CommandOutput;
use crate::CommandSpec;
use crate::LifecycleError;
use crate::Result;
use crate::SessionConfig;

/// Exit status a POSIX shell reports for an unknown command.
const COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;

/// stderr fragments meaning "there are no sessions at all".
const NO_SERVER_MARKERS: &[&str] = &["no server running", "error connecting to", "no sessions"];

/// stderr fragments meaning "this particular session does not exist".
const NO_SESSION_MARKERS: &[&str] = &["can't find session", "session not found"];

const DUPLICATE_SESSION_MARKER: &str = "duplicate session";

/// [`Multiplexer`] backed by tmux, reached through a [`CommandExecutor`].
pub struct TmuxMultiplexer {
    executor: Arc<dyn CommandExecutor>,
    tmux_binary: String,
}

impl TmuxMultiplexer {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        tmux_binary: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            tmux_binary: tmux_binary.into(),
        }
    }

    /// `=name` restricts tmux to an exact session name match.
    fn exact_target(key: &str) -> String {
        shell_quote(&format!("={key}"))
    }

    fn tmux_command(
        &self,
        args: &[String],
    ) -> String {
        let mut line = shell_quote(&self.tmux_binary);
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub(crate) fn new_session_command(
        &self,
        session: &SessionConfig,
    ) -> String {
        let mut args = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            shell_quote(&session.key),
        ];
        if let Some(dir) = &session.working_dir {
            args.push("-c".to_string());
            args.push(shell_quote(&dir.to_string_lossy()));
        }
        for (name, value) in &session.env {
            args.push("-e".to_string());
            args.push(shell_quote(&format!("{name}={value}")));
        }
        args.push(shell_quote(&session.command));
        self.tmux_command(&args)
    }

    async fn run(
        &self,
        host: Option<&str>,
        args: &[String],
    ) -> Result<CommandOutput> {
        let spec = CommandSpec::new(self.tmux_command(args)).on_host(host);
        self.executor.run(spec).await
    }

    fn failure(
        &self,
        output: &CommandOutput,
        remote: bool,
    ) -> LifecycleError {
        if output.exit_code == Some(COMMAND_NOT_FOUND_EXIT_CODE) {
            return LifecycleError::ExternalToolMissing(self.tmux_binary.clone());
        }
        if let Some(reason) = connection_failure_reason(output, remote) {
            return LifecycleError::ConnectionFailure(reason);
        }
        LifecycleError::ExecutionFailure {
            exit_code: output.exit_code,
            output: output.diagnostic().to_string(),
        }
    }
}

fn mentions_any(
    stderr: &str,
    markers: &[&str],
) -> bool {
    let lowered = stderr.to_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn list_active(
        &self,
        host: Option<String>,
    ) -> Result<HashSet<String>> {
        let args = [
            "list-sessions".to_string(),
            "-F".to_string(),
            shell_quote("#{session_name}"),
        ];
        let output = self.run(host.as_deref(), &args).await?;

        if output.success() {
            return Ok(output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect());
        }
        if mentions_any(&output.stderr, NO_SERVER_MARKERS) {
            return Ok(HashSet::new());
        }
        Err(self.failure(&output, host.is_some()).into())
    }

    async fn exists(
        &self,
        session: &SessionConfig,
    ) -> Result<bool> {
        let args = [
            "has-session".to_string(),
            "-t".to_string(),
            Self::exact_target(&session.key),
        ];
        let output = self.run(session.host.as_deref(), &args).await?;

        if output.success() {
            return Ok(true);
        }
        if output.exit_code == Some(1)
            || mentions_any(&output.stderr, NO_SESSION_MARKERS)
            || mentions_any(&output.stderr, NO_SERVER_MARKERS)
        {
            return Ok(false);
        }
        Err(self.failure(&output, session.host.is_some()).into())
    }

    async fn start(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        if self.exists(session).await? {
            return Err(LifecycleError::AlreadyRunning(session.key.clone()).into());
        }

        let spec = CommandSpec::new(self.new_session_command(session)).on_host(session.host.as_deref());
        let output = self.executor.run(spec).await?;

        if output.success() {
            info!(key = %session.key, host = ?session.host, "tmux session created");
            return Ok(());
        }
        if mentions_any(&output.stderr, &[DUPLICATE_SESSION_MARKER]) {
            return Err(LifecycleError::AlreadyRunning(session.key.clone()).into());
        }
        Err(self.failure(&output, session.host.is_some()).into())
    }

    async fn kill(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        let args = [
            "kill-session".to_string(),
            "-t".to_string(),
            Self::exact_target(&session.key),
        ];
        let output = self.run(session.host.as_deref(), &args).await?;

        if output.success() {
            info!(key = %session.key, host = ?session.host, "tmux session killed");
            return Ok(());
        }
        if mentions_any(&output.stderr, NO_SESSION_MARKERS) || mentions_any(&output.stderr, NO_SERVER_MARKERS) {
            return Err(LifecycleError::NotRunning(session.key.clone()).into());
        }
        Err(self.failure(&output, session.host.is_some()).into())
    }

    async fn capture_recent_output(
        &self,
        session: &SessionConfig,
        max_lines: usize,
    ) -> Result<Vec<String>> {
        let args = [
            "capture-pane".to_string(),
            "-p".to_string(),
            "-J".to_string(),
            "-t".to_string(),
            shell_quote(&format!("={}:", session.key)),
        ];
        let output = self.run(session.host.as_deref(), &args).await?;

        if !output.success() {
            if mentions_any(&output.stderr, NO_SESSION_MARKERS) || mentions_any(&output.stderr, NO_SERVER_MARKERS) {
                return Err(LifecycleError::NotRunning(session.key.clone()).into());
            }
            return Err(self.failure(&output, session.host.is_some()).into());
        }

        let mut lines: Vec<String> = output.stdout.lines().map(|line| line.trim_end().to_string()).collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        let skip = lines.len().saturating_sub(max_lines);
        debug!(key = %session.key, captured = lines.len() - skip, "pane output captured");
        Ok(lines.split_off(skip))
    }
}
