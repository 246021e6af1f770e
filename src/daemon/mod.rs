//! Daemon module for projterm.
//!
//! The daemon owns PTY processes and terminal state, allowing the UI process
//! to close and reopen without losing sessions.

pub mod protocol;

// Re-exports for daemon binary
#[allow(unused_imports)]
pub use protocol::{Event, Request, Response};
