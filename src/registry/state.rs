use std::collections::VecDeque;
use std::fmt;

use tokio::time::Instant;

use crate::constants::MAX_OUTPUT_LINES;
use crate::LifecycleError;

/// Where a session is in its lifecycle, as last known by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ExecutionPhase {
    /// Phases in which the process is expected to be alive. A poll that
    /// finds the session absent in one of these phases is a crash.
    pub fn expects_running(&self) -> bool {
        matches!(self, ExecutionPhase::Starting | ExecutionPhase::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Stopped => "stopped",
            ExecutionPhase::Starting => "starting",
            ExecutionPhase::Running => "running",
            ExecutionPhase::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why auto-restart is suppressed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// An explicit `stop` command
    Manual,
    /// `max_retries` consecutive short-lived runs
    RetriesExhausted,
    /// A recent connection-class failure
    ConnectionFailure,
}

impl fmt::Display for PauseReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            PauseReason::Manual => "stopped manually",
            PauseReason::RetriesExhausted => "retries exhausted",
            PauseReason::ConnectionFailure => "host unreachable",
        };
        f.write_str(s)
    }
}

/// Mutable, in-memory state of one session. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub phase: ExecutionPhase,
    pub consecutive_failures: u32,
    pub last_start_time: Option<Instant>,
    pub last_exit_time: Option<Instant>,
    pub restart_paused: bool,
    /// Only meaningful while `restart_paused` is set
    pub pause_reason: Option<PauseReason>,
    pub last_error: Option<String>,
    pub last_error_time: Option<Instant>,
    pub is_connection_class_error: Option<bool>,
    recent_output_lines: VecDeque<String>,
}

impl RuntimeState {
    pub fn recent_output_lines(&self) -> impl Iterator<Item = &str> {
        self.recent_output_lines.iter().map(String::as_str)
    }

    /// Replaces the stored output, keeping at most the last `limit` lines
    /// (and never more than the global bound).
    pub fn set_recent_output(
        &mut self,
        lines: Vec<String>,
        limit: usize,
    ) {
        let limit = limit.min(MAX_OUTPUT_LINES);
        let skip = lines.len().saturating_sub(limit);
        self.recent_output_lines = lines.into_iter().skip(skip).collect();
    }

    pub fn pause(
        &mut self,
        reason: PauseReason,
    ) {
        self.restart_paused = true;
        self.pause_reason = Some(reason);
    }

    pub fn unpause(&mut self) {
        self.restart_paused = false;
        self.pause_reason = None;
    }

    /// Manual interventions start a fresh failure sequence.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_error(
        &mut self,
        error: &LifecycleError,
        now: Instant,
    ) {
        self.last_error = Some(error.to_string());
        self.last_error_time = Some(now);
        self.is_connection_class_error = Some(error.is_connection_class());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_time = None;
        self.is_connection_class_error = None;
    }

    /// How long the last run lasted, if both ends are known.
    pub fn last_run_duration(&self) -> Option<std::time::Duration> {
        match (self.last_start_time, self.last_exit_time) {
            (Some(start), Some(exit)) => Some(exit.saturating_duration_since(start)),
            _ => None,
        }
    }
}
