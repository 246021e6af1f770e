//! IPC protocol for communication between the projterm UI and daemon.
//!
//! The daemon owns PTY processes and terminal state, allowing the UI process
//! to close and reopen without losing sessions.

use serde::{Deserialize, Serialize};

use crate::project::TerminalStates;
use crate::session::{SessionId, SessionInfo};

/// Request messages sent from the UI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Ping to check the daemon is alive.
    Ping,

    /// Gracefully shut down the daemon, killing every session.
    Shutdown,

    /// Spawn a session. A live process under the same id is replaced.
    Spawn {
        session_id: SessionId,
        project_id: String,
        working_dir: String,
    },

    /// Check whether a live process is registered under the id.
    Exists { session_id: SessionId },

    /// Attach to a session. The response carries the output buffered while
    /// detached; the connection then streams [`Event`] frames until either
    /// side closes it (closing is a detach).
    Attach { session_id: SessionId },

    /// Detach the surface from a session without closing it.
    Detach { session_id: SessionId },

    /// Write input to a session's PTY.
    Write {
        session_id: SessionId,
        data: Vec<u8>,
    },

    /// Resize a session's PTY.
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },

    /// Terminate a session.
    Kill { session_id: SessionId },

    /// Terminate every session owned by a project.
    KillProject { project_id: String },

    /// List all live sessions.
    ListSessions,

    /// Read the persisted project terminal state mapping.
    LoadTerminalStates,

    /// Replace the persisted project terminal state mapping (debounced).
    SaveTerminalStates { states: TerminalStates },
}

/// Response messages sent from the daemon to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Ping response.
    Pong,

    /// Shutdown acknowledged.
    ShuttingDown,

    /// Spawn outcome; false means the shell could not be started.
    Spawned { ok: bool },

    /// Whether a live process exists.
    Exists { exists: bool },

    /// Attach outcome: the buffered output, or `None` when no session is
    /// live under the id.
    Attached { buffered: Option<String> },

    /// Surface detached.
    Detached,

    /// Input forwarded (or dropped, if the session was gone).
    WriteAck,

    /// Resize applied (or ignored).
    Resized,

    /// Session terminated (or already gone).
    Killed,

    /// Project sessions terminated.
    ProjectKilled,

    /// List of all live sessions.
    SessionList { sessions: Vec<SessionInfo> },

    /// The persisted project terminal state mapping.
    TerminalStates { states: TerminalStates },

    /// Save scheduled.
    StatesSaved,

    /// Error occurred.
    Error { message: String },
}

/// One frame of the post-attach event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A chunk of session output.
    Output { data: Vec<u8> },
    /// The session's process exited; the stream ends after this frame.
    Exited { code: i32 },
}

/// Length-prefixed message framing for the IPC protocol.
pub mod framing {
    use std::io::{Read, Write};

    use serde::{Deserialize, Serialize};

    /// Upper bound on a single framed message; anything larger is a protocol
    /// error, not a legitimate payload.
    const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

    /// Write a message with length prefix.
    pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> std::io::Result<()> {
        let data = serde_json::to_vec(msg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let len = data.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&data)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a length-prefixed message.
    pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(
        reader: &mut R,
    ) -> std::io::Result<T> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Message too large: {} bytes", len),
            ));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn framing_roundtrips_requests() {
        let request = Request::Spawn {
            session_id: "p1-term-1".to_string(),
            project_id: "p1".to_string(),
            working_dir: "/tmp".to_string(),
        };

        let mut buf = Vec::new();
        framing::write_message(&mut buf, &request).unwrap();
        let parsed: Request = framing::read_message(&mut Cursor::new(&buf)).unwrap();

        match parsed {
            Request::Spawn {
                session_id,
                project_id,
                working_dir,
            } => {
                assert_eq!(session_id, "p1-term-1");
                assert_eq!(project_id, "p1");
                assert_eq!(working_dir, "/tmp");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn framing_roundtrips_event_frames() {
        let mut buf = Vec::new();
        framing::write_message(&mut buf, &Event::Output { data: b"hi".to_vec() }).unwrap();
        framing::write_message(&mut buf, &Event::Exited { code: 0 }).unwrap();

        let mut cursor = Cursor::new(&buf);
        let first: Event = framing::read_message(&mut cursor).unwrap();
        let second: Event = framing::read_message(&mut cursor).unwrap();
        assert!(matches!(first, Event::Output { data } if data == b"hi"));
        assert!(matches!(second, Event::Exited { code: 0 }));
    }

    #[test]
    fn framing_rejects_oversized_messages() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let result: std::io::Result<Request> = framing::read_message(&mut Cursor::new(&buf));
        assert!(result.is_err());
    }

    #[test]
    fn truncated_message_is_an_error_not_a_panic() {
        let mut buf = Vec::new();
        framing::write_message(&mut buf, &Request::Ping).unwrap();
        buf.truncate(buf.len() - 1);
        let result: std::io::Result<Request> = framing::read_message(&mut Cursor::new(&buf));
        assert!(result.is_err());
    }
}
