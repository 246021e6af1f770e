//! Terminal session management.
//!
//! A session is one interactive shell process plus its attachment state: while
//! a UI surface is attached, output streams to it live; while detached, output
//! accumulates in a bounded buffer that is flushed exactly once on reconnect.

pub mod manager;
pub mod prewarm;
pub mod relay;

pub use manager::{SessionInfo, TerminalManager};
pub use relay::{Attachment, OutputBuffer, OutputRelay, SessionEvent, DETACHED_BUFFER_CAP};

/// Unique identifier for a session.
pub type SessionId = String;
