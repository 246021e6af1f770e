//! Per-project terminal tab state.
//!
//! Each project carries an ordered list of terminal tabs (insertion order is
//! tab order), the active tab, and a split-view flag. Mutation rules live
//! here so the cap and renumbering behavior hold no matter which UI path
//! triggers them.

pub mod store;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use store::{TerminalStateStore, TerminalStates};

/// Hard cap on concurrent sessions per project.
///
/// Every session owns a real OS process and a rendering surface; the limit is
/// enforced here at the mutator boundary, not just in the UI.
pub const MAX_SESSIONS_PER_PROJECT: usize = 3;

/// One terminal tab: a stable session id plus its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalTab {
    pub id: String,
    pub name: String,
}

/// Terminal state for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTerminals {
    /// Owning project.
    pub project_id: String,
    /// Ordered tabs, at most [`MAX_SESSIONS_PER_PROJECT`].
    #[serde(default)]
    sessions: Vec<TerminalTab>,
    /// The focused tab; always a member of `sessions` when present.
    #[serde(default)]
    active_session: Option<String>,
    /// Whether multiple tabs are shown simultaneously.
    #[serde(default)]
    split_view: bool,
}

impl ProjectTerminals {
    /// Fresh state with one default tab, created the first time a project's
    /// terminal panel opens.
    pub fn new(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        let tab = TerminalTab {
            id: format!("{project_id}-term-1"),
            name: "Terminal 1".to_string(),
        };
        let active_session = Some(tab.id.clone());
        Self {
            project_id,
            sessions: vec![tab],
            active_session,
            split_view: false,
        }
    }

    pub fn sessions(&self) -> &[TerminalTab] {
        &self.sessions
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active_session.as_deref()
    }

    pub fn split_view(&self) -> bool {
        self.split_view
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|t| t.id == id)
    }

    /// Next unused discriminator for this project's session ids.
    fn next_discriminator(&self) -> u32 {
        self.sessions
            .iter()
            .filter_map(|t| t.id.rsplit_once("-term-"))
            .filter_map(|(_, n)| n.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1)
    }

    /// Add a tab, focusing it. Rejected (returns `None`) once the project
    /// already holds [`MAX_SESSIONS_PER_PROJECT`] tabs.
    pub fn add_session(&mut self) -> Option<&TerminalTab> {
        if self.sessions.len() >= MAX_SESSIONS_PER_PROJECT {
            return None;
        }
        let id = format!("{}-term-{}", self.project_id, self.next_discriminator());
        let name = format!("Terminal {}", self.sessions.len() + 1);
        self.active_session = Some(id.clone());
        self.sessions.push(TerminalTab { id, name });
        self.sessions.last()
    }

    /// Close a tab. Closing the last tab synthesizes a fresh default one
    /// rather than leaving the project with zero sessions. Remaining tabs
    /// that still carry a default name are renumbered sequentially.
    pub fn close_session(&mut self, id: &str) -> bool {
        let Some(pos) = self.sessions.iter().position(|t| t.id == id) else {
            return false;
        };
        // Taken before removal so the synthesized tab never reuses the closed
        // tab's id.
        let next = self.next_discriminator();
        self.sessions.remove(pos);

        if self.sessions.is_empty() {
            self.sessions.push(TerminalTab {
                id: format!("{}-term-{}", self.project_id, next),
                name: "Terminal 1".to_string(),
            });
        }
        self.renumber_default_names();

        let active_gone = self
            .active_session
            .as_deref()
            .map_or(true, |active| !self.contains(active));
        if active_gone {
            let pos = pos.min(self.sessions.len() - 1);
            self.active_session = Some(self.sessions[pos].id.clone());
        }
        if self.sessions.len() < 2 {
            self.split_view = false;
        }
        true
    }

    /// Rename a tab. User-chosen names survive later renumbering.
    pub fn rename_session(&mut self, id: &str, name: impl Into<String>) -> bool {
        match self.sessions.iter_mut().find(|t| t.id == id) {
            Some(tab) => {
                tab.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Move a tab to a new position (clamped); tab order is display order.
    pub fn move_session(&mut self, id: &str, to: usize) -> bool {
        let Some(from) = self.sessions.iter().position(|t| t.id == id) else {
            return false;
        };
        let to = to.min(self.sessions.len() - 1);
        let tab = self.sessions.remove(from);
        self.sessions.insert(to, tab);
        true
    }

    /// Focus a tab; rejected if the id is not a member.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active_session = Some(id.to_string());
        true
    }

    pub fn toggle_split_view(&mut self) {
        self.split_view = !self.split_view;
    }

    fn renumber_default_names(&mut self) {
        for (idx, tab) in self.sessions.iter_mut().enumerate() {
            if is_default_name(&tab.name) {
                tab.name = format!("Terminal {}", idx + 1);
            }
        }
    }
}

fn is_default_name(name: &str) -> bool {
    name.strip_prefix("Terminal ")
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Lookup into the project collaborator: where a project lives on disk and
/// whether the user has closed it.
pub trait ProjectCatalog: Send + Sync {
    /// Filesystem root for a project, used to resolve spawn directories.
    fn root_path(&self, project_id: &str) -> Option<PathBuf>;
    /// Closed projects are skipped when prewarming.
    fn is_closed(&self, project_id: &str) -> bool;
}

/// In-memory catalog, fed from `projects.json` by the daemon and built
/// directly in tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    roots: HashMap<String, PathBuf>,
    #[serde(default)]
    closed: HashSet<String>,
}

impl StaticCatalog {
    pub fn insert_root(&mut self, project_id: impl Into<String>, root: impl Into<PathBuf>) {
        self.roots.insert(project_id.into(), root.into());
    }

    pub fn mark_closed(&mut self, project_id: impl Into<String>) {
        self.closed.insert(project_id.into());
    }
}

impl ProjectCatalog for StaticCatalog {
    fn root_path(&self, project_id: &str) -> Option<PathBuf> {
        self.roots.get(project_id).cloned()
    }

    fn is_closed(&self, project_id: &str) -> bool {
        self.closed.contains(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_project_starts_with_one_default_tab() {
        let state = ProjectTerminals::new("p1");
        assert_eq!(state.sessions().len(), 1);
        assert_eq!(state.sessions()[0].id, "p1-term-1");
        assert_eq!(state.sessions()[0].name, "Terminal 1");
        assert_eq!(state.active_session(), Some("p1-term-1"));
        assert!(!state.split_view());
    }

    #[test]
    fn add_session_is_rejected_at_the_cap() {
        let mut state = ProjectTerminals::new("p1");
        assert!(state.add_session().is_some());
        assert!(state.add_session().is_some());
        assert_eq!(state.sessions().len(), 3);

        assert!(state.add_session().is_none());
        assert_eq!(state.sessions().len(), 3);
    }

    #[test]
    fn added_sessions_get_fresh_ids_and_focus() {
        let mut state = ProjectTerminals::new("p1");
        let id = state.add_session().unwrap().id.clone();
        assert_eq!(id, "p1-term-2");
        assert_eq!(state.active_session(), Some(id.as_str()));
    }

    #[test]
    fn close_session_renumbers_default_names() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.add_session();

        assert!(state.close_session("p1-term-2"));
        assert_eq!(state.sessions().len(), 2);
        assert_eq!(state.sessions()[0].name, "Terminal 1");
        assert_eq!(state.sessions()[1].name, "Terminal 2");
        assert_eq!(state.sessions()[1].id, "p1-term-3");
    }

    #[test]
    fn close_session_keeps_user_renames() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.add_session();
        assert!(state.rename_session("p1-term-3", "build watch"));

        state.close_session("p1-term-1");
        let names: Vec<&str> = state.sessions().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Terminal 1", "build watch"]);
    }

    #[test]
    fn closing_the_last_tab_synthesizes_a_default_one() {
        let mut state = ProjectTerminals::new("p1");
        assert!(state.close_session("p1-term-1"));
        assert_eq!(state.sessions().len(), 1);
        assert_eq!(state.sessions()[0].name, "Terminal 1");
        assert_eq!(state.active_session(), Some(state.sessions()[0].id.as_str()));
    }

    #[test]
    fn closing_the_active_tab_moves_focus_to_a_neighbor() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.add_session();
        state.set_active("p1-term-2");

        state.close_session("p1-term-2");
        assert_eq!(state.active_session(), Some("p1-term-3"));
    }

    #[test]
    fn close_unknown_session_is_rejected() {
        let mut state = ProjectTerminals::new("p1");
        assert!(!state.close_session("p1-term-99"));
        assert_eq!(state.sessions().len(), 1);
    }

    #[test]
    fn set_active_rejects_non_members() {
        let mut state = ProjectTerminals::new("p1");
        assert!(!state.set_active("p2-term-1"));
        assert_eq!(state.active_session(), Some("p1-term-1"));
    }

    #[test]
    fn move_session_reorders_tabs() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.add_session();

        assert!(state.move_session("p1-term-3", 0));
        let ids: Vec<&str> = state.sessions().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-term-3", "p1-term-1", "p1-term-2"]);
    }

    #[test]
    fn split_view_toggles_and_clears_when_one_tab_remains() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.toggle_split_view();
        assert!(state.split_view());

        state.close_session("p1-term-2");
        assert!(!state.split_view());
    }

    #[test]
    fn serde_roundtrip_preserves_state() {
        let mut state = ProjectTerminals::new("p1");
        state.add_session();
        state.rename_session("p1-term-2", "tests");
        state.toggle_split_view();

        let json = serde_json::to_string(&state).unwrap();
        let parsed: ProjectTerminals = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn default_name_detection() {
        assert!(is_default_name("Terminal 1"));
        assert!(is_default_name("Terminal 12"));
        assert!(!is_default_name("Terminal "));
        assert!(!is_default_name("Terminal one"));
        assert!(!is_default_name("build watch"));
    }

    #[test]
    fn static_catalog_lookups() {
        let mut catalog = StaticCatalog::default();
        catalog.insert_root("p1", "/tmp/p1");
        catalog.mark_closed("p2");

        assert_eq!(catalog.root_path("p1"), Some(PathBuf::from("/tmp/p1")));
        assert_eq!(catalog.root_path("p2"), None);
        assert!(!catalog.is_closed("p1"));
        assert!(catalog.is_closed("p2"));
    }
}
