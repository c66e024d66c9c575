mod policy;
mod scheduler;
pub use policy::*;
pub use scheduler::*;
