//! State machine module.

pub mod machine;
pub mod progress;

pub use machine::{StateMachineContext, UpdateState};
pub use progress::ProgressTracker;
