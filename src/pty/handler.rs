//! PTY handling for spawning and managing shell processes.
//!
//! One `PtyHandler` per session. The I/O thread drains output until EOF and
//! only then reaps the child, so the exit notification always follows the
//! final output chunk.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtyPair, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::thread;

/// Variables stripped from the spawned shell's environment. These leak from
/// the host process and break version-manager shims (nvm, volta, pyenv)
/// inside the session.
const CONFLICTING_ENV_VARS: &[&str] = &["NPM_CONFIG_PREFIX", "NODE_OPTIONS", "NODE_ENV", "PREFIX"];

/// Callbacks invoked from the PTY I/O thread.
///
/// `on_output` receives every chunk in production order; `on_exit` fires
/// exactly once, after the final chunk, with the process exit code.
pub struct OutputSink {
    pub on_output: Box<dyn FnMut(&[u8]) + Send>,
    pub on_exit: Box<dyn FnOnce(i32) + Send>,
}

/// Handles PTY spawning and I/O for one shell session.
///
/// Exclusively owns the spawned process handle.
pub struct PtyHandler {
    pair: PtyPair,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    _io_thread: thread::JoinHandle<()>,
}

impl PtyHandler {
    /// Spawn `shell` as an interactive login shell in `working_dir`.
    pub fn spawn(
        shell: &str,
        working_dir: &Path,
        rows: u16,
        cols: u16,
        sink: OutputSink,
    ) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(shell);
        #[cfg(unix)]
        cmd.arg("-l");
        cmd.cwd(working_dir);

        // Set environment variables for better terminal experience
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for var in CONFLICTING_ENV_VARS {
            cmd.env_remove(var);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn shell")?;

        let killer = child.clone_killer();
        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        let OutputSink {
            mut on_output,
            on_exit,
        } = sink;

        let io_thread = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => on_output(&buf[..n]),
                    Err(_) => break,
                }
            }
            // Output fully drained; reap the child for its exit code.
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            };
            on_exit(code);
        });

        Ok(Self {
            pair,
            writer,
            killer,
            _io_thread: io_thread,
        })
    }

    /// Write data to the PTY (keyboard input)
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Resize the PTY
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.pair
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }

    /// Terminate the child process. The I/O thread observes EOF on the PTY
    /// and reports the exit through the sink.
    pub fn kill(&mut self) -> Result<()> {
        self.killer.kill().context("Failed to kill shell process")?;
        Ok(())
    }
}

impl Drop for PtyHandler {
    fn drop(&mut self) {
        // The I/O thread reaps the child after EOF; killing here makes sure
        // the process does not outlive its session entry.
        if let Err(e) = self.killer.kill() {
            // ESRCH (no such process) is expected if already exited
            tracing::debug!("kill on drop: {}", e);
        }
    }
}
