//! Debounced persistence for project terminal state.
//!
//! Every structural change replaces the whole persisted mapping. Rapid bursts
//! coalesce into a single write after a quiet period; only the latest state is
//! ever written, and a pending write is flushed synchronously on shutdown so a
//! quit mid-burst cannot lose the last change.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::ProjectTerminals;

/// Mapping persisted to disk: project id -> terminal state.
pub type TerminalStates = HashMap<String, ProjectTerminals>;

/// Quiet period before a scheduled write lands on disk.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Pending {
    states: Option<TerminalStates>,
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    inner: Mutex<Pending>,
    wake: Condvar,
    debounce: Duration,
    path: PathBuf,
    writes: AtomicU64,
}

impl Shared {
    fn write_now(&self, states: &TerminalStates) {
        match self.try_write(states) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!("failed to persist terminal state: {e:#}"),
        }
    }

    fn try_write(&self, states: &TerminalStates) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }
        let content =
            serde_json::to_string_pretty(states).context("Failed to serialize terminal state")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;
        Ok(())
    }
}

/// Write-behind store for the project terminal state mapping.
pub struct TerminalStateStore {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TerminalStateStore {
    /// Open the store at its default location under the user config dir.
    pub fn open() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("projterm");
        Ok(Self::with_debounce(
            config_dir.join("terminals.json"),
            SAVE_DEBOUNCE,
        ))
    }

    /// Open a store at an explicit path with an explicit quiet period.
    pub fn with_debounce(path: PathBuf, debounce: Duration) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Pending::default()),
            wake: Condvar::new(),
            debounce,
            path,
            writes: AtomicU64::new(0),
        });
        let worker = thread::spawn({
            let shared = Arc::clone(&shared);
            move || write_behind_loop(&shared)
        });
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Load the persisted mapping. Absent or corrupt data yields an empty
    /// mapping; startup never fails on persistence problems.
    pub fn load(&self) -> TerminalStates {
        match fs::read_to_string(&self.shared.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(states) => states,
                Err(e) => {
                    tracing::warn!("corrupt terminal state file, starting empty: {e}");
                    TerminalStates::new()
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to read terminal state file: {e}");
                }
                TerminalStates::new()
            }
        }
    }

    /// Schedule a full-replace write of `states`, resetting the quiet-period
    /// deadline. Calls within the debounce window coalesce; only the latest
    /// state reaches disk.
    pub fn save(&self, states: &TerminalStates) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.states = Some(states.clone());
        inner.deadline = Some(Instant::now() + self.shared.debounce);
        self.shared.wake.notify_one();
    }

    /// Write any pending state now. Called at shutdown.
    pub fn flush(&self) {
        let pending = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.deadline = None;
            inner.states.take()
        };
        if let Some(states) = pending {
            self.shared.write_now(&states);
        }
    }

    /// Number of completed disk writes, for deterministic testing of the
    /// coalescing behavior.
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl Drop for TerminalStateStore {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.shutdown = true;
            self.shared.wake.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Deadline loop: sleep until the quiet period elapses, write the latest
/// state, repeat. A reset deadline (new save) extends the sleep; shutdown
/// flushes whatever is pending before exiting.
fn write_behind_loop(shared: &Shared) {
    let mut inner = shared.inner.lock().unwrap();
    loop {
        if inner.shutdown {
            if let Some(states) = inner.states.take() {
                drop(inner);
                shared.write_now(&states);
            }
            return;
        }
        match inner.deadline {
            None => {
                inner = shared.wake.wait(inner).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    let (guard, _) = shared.wake.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                } else {
                    let states = inner.states.take();
                    inner.deadline = None;
                    drop(inner);
                    if let Some(states) = states {
                        shared.write_now(&states);
                    }
                    inner = shared.inner.lock().unwrap();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectTerminals;
    use tempfile::TempDir;

    fn states_with(project_ids: &[&str]) -> TerminalStates {
        project_ids
            .iter()
            .map(|id| ((*id).to_string(), ProjectTerminals::new(*id)))
            .collect()
    }

    fn store_in(dir: &TempDir, debounce: Duration) -> TerminalStateStore {
        TerminalStateStore::with_debounce(dir.path().join("terminals.json"), debounce)
    }

    #[test]
    fn load_missing_file_yields_empty_mapping() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, SAVE_DEBOUNCE);
        assert!(store.load().is_empty());
    }

    #[test]
    fn load_corrupt_file_yields_empty_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terminals.json");
        fs::write(&path, "{ not json").unwrap();

        let store = TerminalStateStore::with_debounce(path, SAVE_DEBOUNCE);
        assert!(store.load().is_empty());
    }

    #[test]
    fn rapid_saves_coalesce_into_one_write_of_the_final_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, Duration::from_millis(100));

        for i in 1..=10 {
            let mut states = states_with(&["p1"]);
            let project = states.get_mut("p1").unwrap();
            for _ in 1..i.min(3) {
                project.add_session();
            }
            store.save(&states);
            thread::sleep(Duration::from_millis(5));
        }

        thread::sleep(Duration::from_millis(500));
        assert_eq!(store.write_count(), 1);

        // The write reflects the tenth (final) state: three tabs.
        let loaded = store.load();
        assert_eq!(loaded["p1"].sessions().len(), 3);
    }

    #[test]
    fn flush_persists_pending_state_before_the_deadline() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, Duration::from_secs(60));

        store.save(&states_with(&["p1", "p2"]));
        assert_eq!(store.write_count(), 0);

        store.flush();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn flush_without_pending_state_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, SAVE_DEBOUNCE);
        store.flush();
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn drop_flushes_pending_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terminals.json");
        {
            let store =
                TerminalStateStore::with_debounce(path.clone(), Duration::from_secs(60));
            store.save(&states_with(&["p1"]));
        }
        let content = fs::read_to_string(&path).unwrap();
        let states: TerminalStates = serde_json::from_str(&content).unwrap();
        assert!(states.contains_key("p1"));
    }

    #[test]
    fn separate_bursts_produce_separate_writes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, Duration::from_millis(50));

        store.save(&states_with(&["p1"]));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(store.write_count(), 1);

        store.save(&states_with(&["p1", "p2"]));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn saved_state_roundtrips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, Duration::from_millis(10));

        let mut states = states_with(&["p1"]);
        states.get_mut("p1").unwrap().rename_session("p1-term-1", "deploy");
        store.save(&states);
        store.flush();

        assert_eq!(store.load(), states);
    }
}
