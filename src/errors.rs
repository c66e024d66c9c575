//! Session Supervisor Error Hierarchy
//!
//! Defines the closed error taxonomy for the supervisor, split between
//! lifecycle failures (returned from the command API and recorded into a
//! session's runtime state) and infrastructure failures of the supervisor
//! itself.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session lifecycle failures (start/stop/restart/resume)
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Infrastructure-level failures (io, background tasks, signals)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// No configuration is registered under this key
    #[error("Session {0} is not registered")]
    KeyNotFound(String),

    /// A configuration is already registered under this key
    #[error("Session {0} is already registered")]
    AlreadyRegistered(String),

    /// The multiplexer already hosts a session for this key
    #[error("Session {0} is already running")]
    AlreadyRunning(String),

    /// The multiplexer has no session for this key
    #[error("Session {0} is not running")]
    NotRunning(String),

    /// The multiplexer binary (or its transport) is not installed
    #[error("External tool missing: {0}")]
    ExternalToolMissing(String),

    /// The external command ran but reported failure
    #[error("Execution failed (exit code {exit_code:?}): {output}")]
    ExecutionFailure {
        exit_code: Option<i32>,
        output: String,
    },

    /// The host could not be reached; exempt from the retry budget
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The operation was cancelled before it acquired its session
    #[error("Operation on session {0} was cancelled")]
    OperationCancelled(String),
}

impl LifecycleError {
    /// Whether this failure is an infrastructure/connectivity failure rather
    /// than a failure of the supervised command itself.
    pub fn is_connection_class(&self) -> bool {
        matches!(self, LifecycleError::ConnectionFailure(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Local I/O failures
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    SignalSendFailed(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl Error {
    /// Returns the lifecycle error carried by this error, if any.
    pub fn lifecycle(&self) -> Option<&LifecycleError> {
        match self {
            Error::Lifecycle(e) => Some(e),
            _ => None,
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        SystemError::TaskFailed(err).into()
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        SystemError::Metrics(err.to_string()).into()
    }
}
