//! projterm-daemon: background process that owns the shell sessions behind
//! every project's terminal tabs.
//!
//! The UI process can close and reopen without losing sessions: output
//! produced while no window is attached buffers in the daemon and is flushed
//! on reconnect.
//!
//! Usage:
//!   projterm-daemon          # Run daemon (normally started by the UI)
//!   projterm-daemon --status # Show running sessions
//!   projterm-daemon --stop   # Graceful shutdown

use std::fs;
use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use projterm::config::Config;
use projterm::daemon::protocol::{framing, Event, Request, Response};
use projterm::daemon_client::{socket_path, DaemonClient};
use projterm::project::{StaticCatalog, TerminalStateStore};
use projterm::session::prewarm::prewarm_sessions;
use projterm::session::{SessionEvent, TerminalManager};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--status" => return show_status(),
            "--stop" => return stop_daemon(),
            "--help" | "-h" => {
                println!("projterm-daemon: Background process for terminal sessions");
                println!();
                println!("Usage:");
                println!("  projterm-daemon          Run daemon (normally started by the UI)");
                println!("  projterm-daemon --status Show running sessions");
                println!("  projterm-daemon --stop   Graceful shutdown");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[1]);
                std::process::exit(1);
            }
        }
    }

    run_daemon()
}

fn show_status() -> Result<()> {
    let client = connect_existing()?;
    let sessions = client.list_sessions()?;

    if sessions.is_empty() {
        println!("Daemon running, no active sessions");
        return Ok(());
    }

    println!("Daemon running with {} session(s):", sessions.len());
    for session in sessions {
        let age = chrono::Local::now()
            .signed_duration_since(session.started_at)
            .num_seconds();
        println!(
            "  {} [{}x{}] {} project={} up {}s {}{}",
            session.session_id,
            session.cols,
            session.rows,
            session.working_dir,
            session.project_id,
            age,
            if session.attached {
                "attached"
            } else {
                "detached"
            },
            if session.buffered_bytes > 0 {
                format!(" ({} bytes buffered)", session.buffered_bytes)
            } else {
                String::new()
            },
        );
    }

    Ok(())
}

fn stop_daemon() -> Result<()> {
    match connect_existing() {
        Ok(client) => {
            client.shutdown()?;
            println!("Daemon shutting down");
        }
        Err(_) => println!("Daemon not running"),
    }
    Ok(())
}

/// Connect without auto-starting a daemon (maintenance commands only).
fn connect_existing() -> Result<DaemonClient> {
    if !projterm::daemon_client::is_daemon_running() {
        anyhow::bail!("Daemon not running");
    }
    DaemonClient::connect()
}

fn run_daemon() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let sock_path = socket_path();

    // Remove stale socket if it exists
    if sock_path.exists() {
        if UnixStream::connect(&sock_path).is_ok() {
            eprintln!("Daemon already running");
            std::process::exit(1);
        }
        fs::remove_file(&sock_path)?;
    }

    let listener = UnixListener::bind(&sock_path).context("Failed to bind socket")?;
    listener
        .set_nonblocking(true)
        .context("Failed to set non-blocking")?;

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("failed to load config, using defaults: {e:#}");
        Config::default()
    });

    let manager = Arc::new(match &config.terminal.shell {
        Some(shell) => TerminalManager::with_shell(shell.clone()),
        None => TerminalManager::new(),
    });
    let store = Arc::new(TerminalStateStore::open()?);

    if config.terminal.prewarm {
        let states = store.load();
        let catalog = Arc::new(load_catalog());
        prewarm_sessions(Arc::clone(&manager), &states, catalog);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    tracing::info!("projterm-daemon listening on {}", sock_path.display());

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let manager = Arc::clone(&manager);
                let store = Arc::clone(&store);
                let shutdown = Arc::clone(&shutdown);
                thread::spawn(move || {
                    if let Err(e) = handle_client(&manager, &store, &shutdown, stream) {
                        tracing::debug!("client connection ended: {e:#}");
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                tracing::warn!("accept error: {e}");
            }
        }
    }

    // Every session dies with the daemon; pending state writes land first.
    manager.kill_all();
    store.flush();
    fs::remove_file(&sock_path).ok();
    tracing::info!("projterm-daemon stopped");

    Ok(())
}

/// The project collaborator hands the daemon its catalog (project roots and
/// closed projects) through projects.json; with no catalog, spawn falls back
/// to home directories and nothing is skipped.
fn load_catalog() -> StaticCatalog {
    let Some(config_dir) = dirs::config_dir() else {
        return StaticCatalog::default();
    };
    let path = config_dir.join("projterm").join("projects.json");
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("failed to parse {}: {e}", path.display());
            StaticCatalog::default()
        }),
        Err(_) => StaticCatalog::default(),
    }
}

fn handle_client(
    manager: &TerminalManager,
    store: &TerminalStateStore,
    shutdown: &AtomicBool,
    stream: UnixStream,
) -> Result<()> {
    // The listener is non-blocking; accepted connections should block.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let request: Request = framing::read_message(&mut reader)?;

    let response = match request {
        // Attach keeps the connection open and turns it into an event stream.
        Request::Attach { session_id } => {
            return handle_attach(manager, &session_id, &stream);
        }
        other => process_request(manager, store, shutdown, other),
    };

    let mut writer = BufWriter::new(&stream);
    framing::write_message(&mut writer, &response)?;

    Ok(())
}

fn handle_attach(manager: &TerminalManager, session_id: &str, stream: &UnixStream) -> Result<()> {
    let attachment = manager.reconnect(session_id);
    let mut writer = BufWriter::new(stream.try_clone()?);

    let Some(attachment) = attachment else {
        framing::write_message(&mut writer, &Response::Attached { buffered: None })?;
        return Ok(());
    };

    framing::write_message(
        &mut writer,
        &Response::Attached {
            buffered: Some(attachment.buffered),
        },
    )?;

    // Forward events until the session exits or the client goes away. A
    // failed write ends this thread and drops the channel receiver, which the
    // relay treats as an implicit detach.
    for event in attachment.events.iter() {
        let frame = match event {
            SessionEvent::Output(data) => Event::Output { data },
            SessionEvent::Exited { code } => Event::Exited { code },
        };
        let last = matches!(frame, Event::Exited { .. });
        framing::write_message(&mut writer, &frame)?;
        if last {
            break;
        }
    }

    Ok(())
}

fn process_request(
    manager: &TerminalManager,
    store: &TerminalStateStore,
    shutdown: &AtomicBool,
    request: Request,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Shutdown => {
            shutdown.store(true, Ordering::SeqCst);
            Response::ShuttingDown
        }

        Request::Spawn {
            session_id,
            project_id,
            working_dir,
        } => Response::Spawned {
            ok: manager.spawn(&session_id, &project_id, std::path::Path::new(&working_dir)),
        },

        Request::Exists { session_id } => Response::Exists {
            exists: manager.exists(&session_id),
        },

        // Handled before dispatch; kept so the match stays exhaustive.
        Request::Attach { .. } => Response::Error {
            message: "Attach requires a streaming connection".to_string(),
        },

        Request::Detach { session_id } => {
            manager.detach(&session_id);
            Response::Detached
        }

        Request::Write { session_id, data } => {
            manager.write(&session_id, &data);
            Response::WriteAck
        }

        Request::Resize {
            session_id,
            cols,
            rows,
        } => {
            manager.resize(&session_id, cols, rows);
            Response::Resized
        }

        Request::Kill { session_id } => {
            manager.kill(&session_id);
            Response::Killed
        }

        Request::KillProject { project_id } => {
            manager.kill_project(&project_id);
            Response::ProjectKilled
        }

        Request::ListSessions => Response::SessionList {
            sessions: manager.list_sessions(),
        },

        Request::LoadTerminalStates => Response::TerminalStates {
            states: store.load(),
        },

        Request::SaveTerminalStates { states } => {
            store.save(&states);
            Response::StatesSaved
        }
    }
}
