//! PTY process management.

mod handler;

pub use handler::{OutputSink, PtyHandler};
