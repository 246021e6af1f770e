//! Client for communicating with the projterm daemon.
//!
//! Provides the session API the UI surface layer consumes, backed by IPC to
//! the daemon.
//!
//! Control operations use a connection-per-request model: each request opens a
//! new Unix socket connection, sends the request, receives the response, then
//! closes. `attach` is the exception: its connection stays open and carries
//! the session's event stream; dropping it detaches the surface.

use std::io::{BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::daemon::protocol::{framing, Event, Request, Response};
use crate::project::TerminalStates;
use crate::session::SessionInfo;

/// Get the socket path for the daemon.
pub fn socket_path() -> PathBuf {
    let uid = nix::unistd::getuid();
    PathBuf::from(format!("/tmp/projterm-daemon-{}.sock", uid))
}

/// An attached session: the catch-up text plus the live event stream.
///
/// Dropping this closes the connection, which the daemon treats as a detach —
/// output buffers again until the next attach.
pub struct AttachedSession {
    /// Output accumulated while the session was detached. Render this before
    /// consuming live events so nothing is lost or duplicated.
    pub buffered: String,
    reader: BufReader<UnixStream>,
}

impl AttachedSession {
    /// Block for the next event. `None` when the daemon closes the stream
    /// (after an `Exited` frame, or on daemon shutdown).
    pub fn next_event(&mut self) -> Option<Event> {
        framing::read_message(&mut self.reader).ok()
    }
}

/// Client for communicating with the daemon.
pub struct DaemonClient {
    /// Cached socket path for efficiency
    sock_path: PathBuf,
}

impl DaemonClient {
    /// Connect to the daemon, starting it if necessary.
    pub fn connect() -> Result<Self> {
        let sock_path = socket_path();

        if Self::try_ping(&sock_path).is_ok() {
            return Ok(Self { sock_path });
        }

        Self::spawn_daemon()?;

        // Wait for daemon to start
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(100));
            if Self::try_ping(&sock_path).is_ok() {
                return Ok(Self { sock_path });
            }
        }

        anyhow::bail!("Daemon failed to start after 5 seconds")
    }

    /// Try to ping the daemon at the given socket path.
    fn try_ping(sock_path: &PathBuf) -> Result<()> {
        let stream = UnixStream::connect(sock_path)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        let mut writer = BufWriter::new(&stream);
        framing::write_message(&mut writer, &Request::Ping)?;
        writer.flush()?;
        drop(writer);

        let mut reader = BufReader::new(&stream);
        let response: Response = framing::read_message(&mut reader)?;

        match response {
            Response::Pong => Ok(()),
            Response::Error { message } => anyhow::bail!("Ping failed: {}", message),
            _ => anyhow::bail!("Unexpected response to ping"),
        }
    }

    /// Spawn the daemon process.
    fn spawn_daemon() -> Result<()> {
        let daemon_path = std::env::current_exe()?
            .parent()
            .context("No parent directory for executable")?
            .join("projterm-daemon");

        Command::new(&daemon_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn daemon: {:?}", daemon_path))?;

        Ok(())
    }

    /// Send a request and receive a response (creates a new connection).
    fn request(&self, req: &Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.sock_path)
            .context("Failed to connect to daemon - it may have stopped")?;
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        let mut writer = BufWriter::new(&stream);
        framing::write_message(&mut writer, req)?;
        writer.flush()?;
        drop(writer);

        let mut reader = BufReader::new(&stream);
        let response: Response = framing::read_message(&mut reader)?;
        Ok(response)
    }

    /// Ping the daemon.
    pub fn ping(&self) -> Result<()> {
        match self.request(&Request::Ping)? {
            Response::Pong => Ok(()),
            Response::Error { message } => anyhow::bail!("Ping failed: {}", message),
            _ => anyhow::bail!("Unexpected response to ping"),
        }
    }

    /// Check if the daemon connection is still alive.
    pub fn is_connected(&self) -> bool {
        self.ping().is_ok()
    }

    /// Spawn a session; false means the shell could not be started.
    pub fn spawn_session(
        &self,
        session_id: &str,
        project_id: &str,
        working_dir: &str,
    ) -> Result<bool> {
        let req = Request::Spawn {
            session_id: session_id.to_string(),
            project_id: project_id.to_string(),
            working_dir: working_dir.to_string(),
        };

        match self.request(&req)? {
            Response::Spawned { ok } => Ok(ok),
            Response::Error { message } => anyhow::bail!("Spawn failed: {}", message),
            _ => anyhow::bail!("Unexpected response to spawn"),
        }
    }

    /// Check whether a live process exists for the session id.
    pub fn session_exists(&self, session_id: &str) -> Result<bool> {
        let req = Request::Exists {
            session_id: session_id.to_string(),
        };

        match self.request(&req)? {
            Response::Exists { exists } => Ok(exists),
            Response::Error { message } => anyhow::bail!("Exists check failed: {}", message),
            _ => anyhow::bail!("Unexpected response to exists"),
        }
    }

    /// Attach to a session: returns the buffered catch-up output and the live
    /// event stream, or `None` if no session is live under the id.
    pub fn attach(&self, session_id: &str) -> Result<Option<AttachedSession>> {
        let stream = UnixStream::connect(&self.sock_path)
            .context("Failed to connect to daemon - it may have stopped")?;
        // The event stream blocks indefinitely between events.
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        let req = Request::Attach {
            session_id: session_id.to_string(),
        };
        let mut writer = BufWriter::new(stream.try_clone()?);
        framing::write_message(&mut writer, &req)?;
        drop(writer);

        let mut reader = BufReader::new(stream);
        let response: Response = framing::read_message(&mut reader)?;
        match response {
            Response::Attached { buffered: None } => Ok(None),
            Response::Attached {
                buffered: Some(buffered),
            } => Ok(Some(AttachedSession { buffered, reader })),
            Response::Error { message } => anyhow::bail!("Attach failed: {}", message),
            _ => anyhow::bail!("Unexpected response to attach"),
        }
    }

    /// Detach the surface from a session without closing it.
    pub fn detach(&self, session_id: &str) -> Result<()> {
        let req = Request::Detach {
            session_id: session_id.to_string(),
        };

        match self.request(&req)? {
            Response::Detached => Ok(()),
            Response::Error { message } => anyhow::bail!("Detach failed: {}", message),
            _ => anyhow::bail!("Unexpected response to detach"),
        }
    }

    /// Write input to a session.
    pub fn write_to_session(&self, session_id: &str, data: &[u8]) -> Result<()> {
        let req = Request::Write {
            session_id: session_id.to_string(),
            data: data.to_vec(),
        };

        match self.request(&req)? {
            Response::WriteAck => Ok(()),
            Response::Error { message } => anyhow::bail!("Write failed: {}", message),
            _ => anyhow::bail!("Unexpected response to write"),
        }
    }

    /// Resize a session.
    pub fn resize_session(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let req = Request::Resize {
            session_id: session_id.to_string(),
            cols,
            rows,
        };

        match self.request(&req)? {
            Response::Resized => Ok(()),
            Response::Error { message } => anyhow::bail!("Resize failed: {}", message),
            _ => anyhow::bail!("Unexpected response to resize"),
        }
    }

    /// Terminate a session.
    pub fn kill_session(&self, session_id: &str) -> Result<()> {
        let req = Request::Kill {
            session_id: session_id.to_string(),
        };

        match self.request(&req)? {
            Response::Killed => Ok(()),
            Response::Error { message } => anyhow::bail!("Kill failed: {}", message),
            _ => anyhow::bail!("Unexpected response to kill"),
        }
    }

    /// Terminate every session owned by a project.
    pub fn kill_project(&self, project_id: &str) -> Result<()> {
        let req = Request::KillProject {
            project_id: project_id.to_string(),
        };

        match self.request(&req)? {
            Response::ProjectKilled => Ok(()),
            Response::Error { message } => anyhow::bail!("Kill project failed: {}", message),
            _ => anyhow::bail!("Unexpected response to kill project"),
        }
    }

    /// List all live sessions.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        match self.request(&Request::ListSessions)? {
            Response::SessionList { sessions } => Ok(sessions),
            Response::Error { message } => anyhow::bail!("List sessions failed: {}", message),
            _ => anyhow::bail!("Unexpected response to list sessions"),
        }
    }

    /// Read the persisted project terminal state mapping.
    pub fn load_terminal_states(&self) -> Result<TerminalStates> {
        match self.request(&Request::LoadTerminalStates)? {
            Response::TerminalStates { states } => Ok(states),
            Response::Error { message } => anyhow::bail!("Load states failed: {}", message),
            _ => anyhow::bail!("Unexpected response to load states"),
        }
    }

    /// Replace the persisted project terminal state mapping (debounced on the
    /// daemon side).
    pub fn save_terminal_states(&self, states: &TerminalStates) -> Result<()> {
        let req = Request::SaveTerminalStates {
            states: states.clone(),
        };

        match self.request(&req)? {
            Response::StatesSaved => Ok(()),
            Response::Error { message } => anyhow::bail!("Save states failed: {}", message),
            _ => anyhow::bail!("Unexpected response to save states"),
        }
    }

    /// Shutdown the daemon.
    pub fn shutdown(&self) -> Result<()> {
        match self.request(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            Response::Error { message } => anyhow::bail!("Shutdown failed: {}", message),
            _ => anyhow::bail!("Unexpected response to shutdown"),
        }
    }
}

/// Check if the daemon is running.
pub fn is_daemon_running() -> bool {
    DaemonClient::try_ping(&socket_path()).is_ok()
}

/// Stop the daemon if running.
pub fn stop_daemon() -> Result<()> {
    if is_daemon_running() {
        let client = DaemonClient {
            sock_path: socket_path(),
        };
        client.shutdown()?;
    }
    Ok(())
}
