//! Speech session orchestration.

pub mod controller;
pub mod runtime;

pub use controller::{LoadOutcome, LoadRequest, SessionController, SessionState};
pub use runtime::SessionRuntime;
