//! Session registry and lifecycle control.
//!
//! One `TerminalManager` exclusively owns every live shell process. All public
//! operations are cheap registry manipulations that return immediately;
//! process I/O happens on per-session threads and is routed through each
//! session's `OutputRelay`.
//!
//! Nothing here panics or propagates errors across the public surface:
//! failures come back as `bool`/`None` or are logged and swallowed, because a
//! misbehaving shell session must never take the host down with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::relay::{Attachment, OutputRelay};
use super::SessionId;
use crate::pty::{OutputSink, PtyHandler};

/// Geometry for a freshly spawned session; the surface resizes it to its real
/// dimensions on first attach.
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// Summary info about a live session (for listing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session ID.
    pub session_id: SessionId,
    /// Project that owns the session.
    pub project_id: String,
    /// Resolved working directory the shell started in.
    pub working_dir: String,
    /// Terminal dimensions.
    pub rows: u16,
    pub cols: u16,
    /// Whether a surface is currently attached.
    pub attached: bool,
    /// Bytes buffered while detached.
    pub buffered_bytes: usize,
    /// When the process was spawned.
    pub started_at: DateTime<Local>,
}

/// A live session: the process handle plus its routing state.
struct ManagedSession {
    project_id: String,
    working_dir: PathBuf,
    pty: PtyHandler,
    relay: Arc<OutputRelay>,
    rows: u16,
    cols: u16,
    /// Distinguishes this process from any earlier or later process spawned
    /// under the same id, so a stale exit callback cannot evict a respawn.
    epoch: u64,
    started_at: DateTime<Local>,
}

type Registry = Arc<Mutex<HashMap<SessionId, ManagedSession>>>;

/// Owns the process table and serializes spawn/kill per session id.
pub struct TerminalManager {
    registry: Registry,
    shell: String,
    epochs: AtomicU64,
}

impl TerminalManager {
    /// Create a manager that spawns the user's default shell.
    pub fn new() -> Self {
        Self::with_shell(default_shell())
    }

    /// Create a manager that spawns the given shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            shell: shell.into(),
            epochs: AtomicU64::new(0),
        }
    }

    /// Spawn a shell session under `session_id` for `project_id`.
    ///
    /// Any live process already registered under the id is killed first — a
    /// session id maps to at most one process. A missing working directory
    /// falls back to the user's home. Returns false (and logs) on spawn
    /// failure.
    pub fn spawn(&self, session_id: &str, project_id: &str, working_dir: &Path) -> bool {
        let mut registry = self.registry.lock().unwrap();

        if let Some(mut existing) = registry.remove(session_id) {
            tracing::debug!(session_id, "replacing live session");
            if let Err(e) = existing.pty.kill() {
                tracing::warn!(session_id, "failed to kill replaced session: {e:#}");
            }
        }

        let working_dir = resolve_working_dir(working_dir);
        let relay = Arc::new(OutputRelay::new());
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);

        let on_output = {
            let relay = Arc::clone(&relay);
            Box::new(move |chunk: &[u8]| relay.deliver(chunk)) as Box<dyn FnMut(&[u8]) + Send>
        };
        let on_exit = {
            let relay = Arc::clone(&relay);
            let registry = Arc::clone(&self.registry);
            let id = session_id.to_string();
            Box::new(move |code: i32| {
                // Evict only if the entry is still this process; the id may
                // have been respawned in the meantime.
                {
                    let mut registry = registry.lock().unwrap();
                    if registry.get(&id).map_or(false, |s| s.epoch == epoch) {
                        registry.remove(&id);
                    }
                }
                tracing::debug!(session_id = %id, code, "session exited");
                relay.notify_exit(code);
            }) as Box<dyn FnOnce(i32) + Send>
        };

        let sink = OutputSink { on_output, on_exit };
        match PtyHandler::spawn(&self.shell, &working_dir, DEFAULT_ROWS, DEFAULT_COLS, sink) {
            Ok(pty) => {
                tracing::info!(session_id, project_id, "spawned session");
                registry.insert(
                    session_id.to_string(),
                    ManagedSession {
                        project_id: project_id.to_string(),
                        working_dir,
                        pty,
                        relay,
                        rows: DEFAULT_ROWS,
                        cols: DEFAULT_COLS,
                        epoch,
                        started_at: Local::now(),
                    },
                );
                true
            }
            Err(e) => {
                tracing::error!(session_id, "failed to spawn session: {e:#}");
                false
            }
        }
    }

    /// Check whether a live process is registered under the id.
    pub fn exists(&self, session_id: &str) -> bool {
        self.registry.lock().unwrap().contains_key(session_id)
    }

    /// Attach a surface to a live session.
    ///
    /// Returns the output buffered while detached (drained exactly once) plus
    /// the live event stream, or `None` if no session is live under the id —
    /// the caller is expected to `spawn` in that case.
    pub fn reconnect(&self, session_id: &str) -> Option<Attachment> {
        let registry = self.registry.lock().unwrap();
        registry.get(session_id).map(|s| s.relay.attach())
    }

    /// Detach the surface from a session; its output buffers from here on.
    pub fn detach(&self, session_id: &str) {
        if let Some(session) = self.registry.lock().unwrap().get(session_id) {
            session.relay.detach();
        }
    }

    /// Forward input bytes to the session's process.
    ///
    /// Writes to an unknown or dead session are dropped: the UI may race
    /// ahead of teardown notifications, and that is not an error.
    pub fn write(&self, session_id: &str, data: &[u8]) {
        let mut registry = self.registry.lock().unwrap();
        let Some(session) = registry.get_mut(session_id) else {
            return;
        };
        if let Err(e) = session.pty.write(data) {
            tracing::debug!(session_id, "dropped write to dead session: {e:#}");
        }
    }

    /// Resize the session's PTY.
    ///
    /// Zero dimensions and unknown sessions are ignored; resize failures are
    /// logged, not propagated.
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        let mut registry = self.registry.lock().unwrap();
        let Some(session) = registry.get_mut(session_id) else {
            return;
        };
        match session.pty.resize(rows, cols) {
            Ok(()) => {
                session.rows = rows;
                session.cols = cols;
            }
            Err(e) => tracing::warn!(session_id, "resize failed: {e:#}"),
        }
    }

    /// Terminate the session and discard its buffered output.
    ///
    /// Idempotent: killing an unknown id is a no-op.
    pub fn kill(&self, session_id: &str) {
        let removed = self.registry.lock().unwrap().remove(session_id);
        if let Some(mut session) = removed {
            if let Err(e) = session.pty.kill() {
                // Expected when the process already exited on its own.
                tracing::debug!(session_id, "kill: {e:#}");
            }
            tracing::info!(session_id, "killed session");
        }
    }

    /// Kill every session owned by `project_id`.
    ///
    /// Ownership is matched on the project recorded at spawn time, never
    /// inferred from the session id string.
    pub fn kill_project(&self, project_id: &str) {
        let ids: Vec<SessionId> = {
            let registry = self.registry.lock().unwrap();
            registry
                .iter()
                .filter(|(_, s)| s.project_id == project_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &ids {
            self.kill(id);
        }
    }

    /// Terminate every live session. Used only at application shutdown.
    pub fn kill_all(&self) {
        let drained: Vec<(SessionId, ManagedSession)> = {
            let mut registry = self.registry.lock().unwrap();
            registry.drain().collect()
        };
        for (session_id, mut session) in drained {
            if let Err(e) = session.pty.kill() {
                tracing::debug!(session_id, "kill during shutdown: {e:#}");
            }
        }
    }

    /// List all live sessions, ordered by id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let registry = self.registry.lock().unwrap();
        let mut sessions: Vec<SessionInfo> = registry
            .iter()
            .map(|(id, s)| SessionInfo {
                session_id: id.clone(),
                project_id: s.project_id.clone(),
                working_dir: s.working_dir.to_string_lossy().into_owned(),
                rows: s.rows,
                cols: s.cols,
                attached: s.relay.is_attached(),
                buffered_bytes: s.relay.buffered_len(),
                started_at: s.started_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the shell to spawn: `$SHELL`, then an OS default.
fn default_shell() -> String {
    if cfg!(windows) {
        return "powershell.exe".to_string();
    }
    std::env::var("SHELL").unwrap_or_else(|_| {
        if cfg!(target_os = "macos") {
            "/bin/zsh".to_string()
        } else {
            "/bin/bash".to_string()
        }
    })
}

/// Sessions start in the requested directory when it exists, otherwise the
/// user's home directory.
fn resolve_working_dir(requested: &Path) -> PathBuf {
    if requested.is_dir() {
        return requested.to_path_buf();
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}
