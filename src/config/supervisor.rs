use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_CONNECTION_ERROR_WINDOW_SECS;
use crate::constants::DEFAULT_FAILURE_RESET_INTERVAL_SECS;
use crate::constants::DEFAULT_HOST_QUERY_TIMEOUT_MS;
use crate::constants::DEFAULT_POLL_INTERVAL_MS;
use crate::constants::MAX_OUTPUT_LINES;
use crate::Error;
use crate::Result;

/// Reconciler cadence and restart policy tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Interval between two poll cycles (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single host's `list_active` query (milliseconds)
    #[serde(default = "default_host_query_timeout_ms")]
    pub host_query_timeout_ms: u64,

    /// A run longer than this resets the consecutive failure counter (seconds)
    #[serde(default = "default_failure_reset_interval_secs")]
    pub failure_reset_interval_secs: u64,

    /// How long a connection-class failure keeps suppressing restarts (seconds)
    #[serde(default = "default_connection_error_window_secs")]
    pub connection_error_window_secs: u64,

    /// Number of trailing output lines kept per session
    #[serde(default = "default_output_lines")]
    pub output_lines: usize,

    /// Capacity of the broadcast notification channel
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            host_query_timeout_ms: default_host_query_timeout_ms(),
            failure_reset_interval_secs: default_failure_reset_interval_secs(),
            connection_error_window_secs: default_connection_error_window_secs(),
            output_lines: default_output_lines(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms cannot be 0".into()));
        }

        if self.host_query_timeout_ms == 0 {
            return Err(Error::InvalidConfig("host_query_timeout_ms cannot be 0".into()));
        }

        if self.output_lines == 0 || self.output_lines > MAX_OUTPUT_LINES {
            return Err(Error::InvalidConfig(format!(
                "output_lines must be between 1 and {}, got {}",
                MAX_OUTPUT_LINES, self.output_lines
            )));
        }

        if self.notification_buffer == 0 {
            return Err(Error::InvalidConfig("notification_buffer must be > 0".into()));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn host_query_timeout(&self) -> Duration {
        Duration::from_millis(self.host_query_timeout_ms)
    }

    pub fn failure_reset_interval(&self) -> Duration {
        Duration::from_secs(self.failure_reset_interval_secs)
    }

    pub fn connection_error_window(&self) -> Duration {
        Duration::from_secs(self.connection_error_window_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_host_query_timeout_ms() -> u64 {
    DEFAULT_HOST_QUERY_TIMEOUT_MS
}
fn default_failure_reset_interval_secs() -> u64 {
    DEFAULT_FAILURE_RESET_INTERVAL_SECS
}
fn default_connection_error_window_secs() -> u64 {
    DEFAULT_CONNECTION_ERROR_WINDOW_SECS
}
fn default_output_lines() -> usize {
    MAX_OUTPUT_LINES
}
fn default_notification_buffer() -> usize {
    64
}
