//! Startup prewarming of persisted sessions.
//!
//! Reopening the app with many projects must not spawn dozens of shells in
//! the same instant: the first session spawns immediately, each subsequent one
//! a fixed offset later. Sessions of closed projects are skipped, as are ids
//! that already have a live process.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::project::{ProjectCatalog, TerminalStates};
use crate::session::TerminalManager;

/// Offset between consecutive prewarm spawns.
pub const PREWARM_STAGGER: Duration = Duration::from_millis(250);

/// Spawn every persisted session that is not already live.
///
/// Returns the worker handle carrying the number of sessions spawned; the
/// daemon lets it run to completion in the background, tests join it.
pub fn prewarm_sessions(
    manager: Arc<TerminalManager>,
    states: &TerminalStates,
    catalog: Arc<dyn ProjectCatalog>,
) -> thread::JoinHandle<usize> {
    // Snapshot the work list up front, in stable project order; tab order
    // within a project is preserved.
    let mut projects: Vec<_> = states.values().collect();
    projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));

    let mut pending: Vec<(String, String)> = Vec::new();
    for project in projects {
        if catalog.is_closed(&project.project_id) {
            tracing::debug!(project_id = %project.project_id, "skipping closed project");
            continue;
        }
        for tab in project.sessions() {
            pending.push((tab.id.clone(), project.project_id.clone()));
        }
    }

    thread::spawn(move || {
        let mut spawned = 0usize;
        for (i, (session_id, project_id)) in pending.iter().enumerate() {
            if i > 0 {
                thread::sleep(PREWARM_STAGGER);
            }
            if manager.exists(session_id) {
                continue;
            }
            // A missing or unknown root falls back to the home directory
            // inside spawn.
            let root = catalog.root_path(project_id).unwrap_or_else(PathBuf::new);
            if manager.spawn(session_id, project_id, &root) {
                spawned += 1;
            }
        }
        tracing::info!(spawned, "prewarm complete");
        spawned
    })
}
