//! In-crate fakes and fixtures shared by the unit tests.
mod fake_multiplexer;
mod recording_notifier;
mod supervisor_setup;

pub use fake_multiplexer::*;
pub use recording_notifier::*;
pub use supervisor_setup::*;
