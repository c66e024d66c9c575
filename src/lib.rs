//! # muxkeeper
//!
//! Supervises long-running processes that live inside terminal multiplexer
//! sessions, locally or on ssh-reachable hosts.
//!
//! - [`Supervisor`]: the Command API (`start`, `stop`, `restart`,
//!   `resume`), registration and read accessors.
//! - [`Reconciler`]: the background poll that diffs observed sessions against
//!   the registry and drives [`RestartPolicy`].
//! - [`KeyLock`] and [`GenerationTracker`]: per-key serialization of
//!   commands and invalidation of stale poll results.
//! - [`Multiplexer`] / [`CommandExecutor`]: the external collaborator
//!   boundary, with tmux and process/ssh implementations.
mod config;
mod constants;
mod errors;
mod executor;
mod lock;
pub mod metrics;
mod mux;
mod notify;
mod reconciler;
mod registry;
mod restart;
mod supervisor;

pub use config::*;
pub use errors::*;
pub use executor::*;
pub use lock::*;
pub use mux::*;
pub use notify::*;
pub use reconciler::*;
pub use registry::*;
pub use restart::*;
pub use supervisor::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
