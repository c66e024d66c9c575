// -
// Restart policy

/// A run longer than this forgives all prior consecutive failures
pub(crate) const DEFAULT_FAILURE_RESET_INTERVAL_SECS: u64 = 30;

/// Connection-class failures younger than this pause auto-restart outright
pub(crate) const DEFAULT_CONNECTION_ERROR_WINDOW_SECS: u64 = 60;

// -
// Reconciler

pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

pub(crate) const DEFAULT_HOST_QUERY_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on `RuntimeState::recent_output_lines`
pub(crate) const MAX_OUTPUT_LINES: usize = 10;

/// Label used in logs and metrics for sessions without a remote host
pub(crate) const LOCAL_HOST_LABEL: &str = "local";

// -
// Environment

pub(crate) const CONFIG_PATH_ENV: &str = "MUXKEEPER_CONFIG_PATH";
pub(crate) const CONFIG_ENV_PREFIX: &str = "MUXKEEPER";
