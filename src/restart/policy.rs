//! Auto-restart decision logic.
//!
//! Per session the policy distinguishes three states derived from
//! [`RuntimeState`]:
//!
//! - **Active**: running, not paused
//! - **AwaitingRestart**: stopped, a restart timer is scheduled
//! - **Paused**: stopped, restarts suppressed until a manual `start`/`resume`
//!
//! [`RestartPolicy::on_crash`] is only invoked when the reconciler sees a
//! session that should be alive disappear. It mutates the state it is handed
//! and returns what the caller must do next; it never touches timers or
//! notifications itself.

use std::time::Duration;

use tokio::time::Instant;

use crate::AutoRestartConfig;
use crate::PauseReason;
use crate::RuntimeState;
use crate::SupervisorConfig;

/// Outcome of feeding one crash into the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Auto-restart is off for this session; the crash is only recorded.
    Disabled,

    /// Restarts were already suppressed; nothing to do.
    AlreadyPaused,

    /// Restarts are now paused.
    Paused {
        reason: PauseReason,
        consecutive_failures: u32,
    },

    /// Schedule a start after `delay`.
    Restart {
        delay: Duration,
        consecutive_failures: u32,
    },
}

impl RestartDecision {
    /// First crash of a new failure sequence that will be retried.
    pub fn is_first_failure(&self) -> bool {
        matches!(
            self,
            RestartDecision::Restart {
                consecutive_failures: 1,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// A run longer than this forgives prior failures
    pub failure_reset_interval: Duration,
    /// Connection failures younger than this pause instead of retrying
    pub connection_error_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            failure_reset_interval: config.failure_reset_interval(),
            connection_error_window: config.connection_error_window(),
        }
    }

    /// Applies one crash observation to `state`.
    ///
    /// The caller has already stamped `state.last_exit_time`.
    pub fn on_crash(
        &self,
        params: &AutoRestartConfig,
        state: &mut RuntimeState,
        now: Instant,
    ) -> RestartDecision {
        if !params.enabled {
            return RestartDecision::Disabled;
        }

        if state.restart_paused {
            return RestartDecision::AlreadyPaused;
        }

        // Connection failures pause without counting toward max_retries.
        if self.recent_connection_failure(state, now) {
            state.pause(PauseReason::ConnectionFailure);
            return RestartDecision::Paused {
                reason: PauseReason::ConnectionFailure,
                consecutive_failures: state.consecutive_failures,
            };
        }

        if let Some(ran_for) = state.last_run_duration() {
            if ran_for > self.failure_reset_interval {
                state.reset_failures();
            }
        }
        state.consecutive_failures += 1;

        if state.consecutive_failures >= params.max_retries {
            state.pause(PauseReason::RetriesExhausted);
            return RestartDecision::Paused {
                reason: PauseReason::RetriesExhausted,
                consecutive_failures: state.consecutive_failures,
            };
        }

        RestartDecision::Restart {
            delay: params.retry_delay(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    fn recent_connection_failure(
        &self,
        state: &RuntimeState,
        now: Instant,
    ) -> bool {
        match (state.is_connection_class_error, state.last_error_time) {
            (Some(true), Some(at)) => now.saturating_duration_since(at) <= self.connection_error_window,
            _ => false,
        }
    }
}
