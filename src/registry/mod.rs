//! Session bookkeeping: immutable configs, mutable runtime state and the
//! generation counters that date asynchronous observations.
mod generation;
mod session_registry;
mod state;
pub use generation::*;
pub use session_registry::*;
pub use state::*;
