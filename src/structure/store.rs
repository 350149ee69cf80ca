//! Dual-mode structure store
//!
//! Owns the authoritative structure for one session: the tree-or-graph sum
//! type, a version counter bumped on every merge, and the transient change
//! set renderers use to emphasize what the latest merge touched.

use chrono::Utc;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::merge;
use super::{GraphStructure, StructureState, TreeStructure};

/// How long a merge's change set stays active for rendering emphasis.
pub(crate) const CHANGE_HIGHLIGHT_WINDOW: Duration = Duration::from_secs(5);

/// Ids touched by the latest merge, valid for a short highlight window.
#[derive(Debug, Clone)]
pub(crate) struct ChangeSet {
    ids: BTreeSet<String>,
    created: Instant,
}

impl ChangeSet {
    fn new(ids: BTreeSet<String>) -> Self {
        ChangeSet {
            ids,
            created: Instant::now(),
        }
    }

    pub(crate) fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub(crate) fn is_active_at(&self, now: Instant) -> bool {
        now.duration_since(self.created) < CHANGE_HIGHLIGHT_WINDOW
    }
}

/// Authoritative structure state for one session
#[derive(Debug, Default)]
pub(crate) struct StructureStore {
    state: StructureState,
    version: u64,
    changes: Option<ChangeSet>,
}

impl StructureStore {
    pub(crate) fn new() -> Self {
        StructureStore::default()
    }

    pub(crate) fn state(&self) -> &StructureState {
        &self.state
    }

    /// Version of the structure, starting at 0 for the empty state and
    /// incremented by exactly one on every merge.
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    /// Replace the authoritative structure with a freshly structured tree.
    ///
    /// Stamps the new version and merge time into the tree's metadata and
    /// returns the ids that changed relative to the previous state. A store
    /// holding a graph switches topology here; every tree node counts as
    /// changed in that case because nothing carries over.
    pub(crate) fn set_tree(&mut self, mut tree: TreeStructure) -> BTreeSet<String> {
        let changed = merge::changed_tree_ids(self.state.as_tree(), &tree);
        self.version += 1;
        tree.metadata.version = self.version;
        tree.metadata.last_updated = Some(Utc::now());
        self.state = StructureState::Tree(tree);
        self.changes = Some(ChangeSet::new(changed.clone()));
        changed
    }

    /// Replace the authoritative structure with the accumulated graph
    /// returned by the extraction service. Returns the ids of entities not
    /// seen before.
    pub(crate) fn set_graph(&mut self, graph: GraphStructure) -> BTreeSet<String> {
        let changed = merge::changed_graph_ids(self.state.as_graph(), &graph);
        self.version += 1;
        self.state = StructureState::Graph(graph);
        self.changes = Some(ChangeSet::new(changed.clone()));
        changed
    }

    /// Clear structure, version and changes. Used when a handle is reused
    /// for a new session.
    pub(crate) fn reset(&mut self) {
        *self = StructureStore::default();
    }

    /// The latest change set if it is still inside the highlight window.
    pub(crate) fn active_changes_at(&self, now: Instant) -> Option<&ChangeSet> {
        self.changes
            .as_ref()
            .filter(|changes| changes.is_active_at(now))
    }

    pub(crate) fn active_changes(&self) -> Option<&ChangeSet> {
        self.active_changes_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::TopicNode;

    fn sample_tree(label: &str) -> TreeStructure {
        let mut root = TopicNode::new("root", "Session");
        root.children.push(TopicNode::new("t1", label));
        TreeStructure::new(root)
    }

    fn sample_graph() -> GraphStructure {
        serde_json::from_str(r#"{"entities": [{"id": "e-1", "name": "Plan"}]}"#)
            .expect("Failed to parse graph")
    }

    #[test]
    fn test_version_increments_on_every_merge() {
        let mut store = StructureStore::new();
        assert_eq!(store.version(), 0);

        store.set_tree(sample_tree("Budget"));
        assert_eq!(store.version(), 1);

        store.set_tree(sample_tree("Budget overrun"));
        assert_eq!(store.version(), 2);

        store.set_graph(sample_graph());
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_merge_stamps_tree_metadata() {
        let mut store = StructureStore::new();
        store.set_tree(sample_tree("Budget"));

        let tree = store.state().as_tree().expect("Expected tree state");
        assert_eq!(tree.metadata.version, 1);
        assert!(tree.metadata.last_updated.is_some());
    }

    #[test]
    fn test_mode_switch_replaces_other_topology() {
        let mut store = StructureStore::new();
        store.set_tree(sample_tree("Budget"));
        assert!(store.state().as_tree().is_some());

        store.set_graph(sample_graph());
        assert!(store.state().as_tree().is_none());
        assert!(store.state().as_graph().is_some());

        let changed = store.set_tree(sample_tree("Budget"));
        assert!(store.state().as_graph().is_none());
        // Nothing carries over from the graph, so the whole tree is new
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn test_change_set_expires_after_highlight_window() {
        let mut store = StructureStore::new();
        store.set_tree(sample_tree("Budget"));

        let now = Instant::now();
        assert!(store.active_changes_at(now).is_some());

        let later = now + CHANGE_HIGHLIGHT_WINDOW + Duration::from_millis(10);
        assert!(store.active_changes_at(later).is_none());
    }

    #[test]
    fn test_change_set_lists_changed_ids() {
        let mut store = StructureStore::new();
        store.set_tree(sample_tree("Budget"));
        store.set_tree(sample_tree("Budget overrun"));

        let changes = store.active_changes().expect("Expected active changes");
        assert_eq!(changes.ids().len(), 1);
        assert!(changes.ids().contains("t1"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = StructureStore::new();
        store.set_tree(sample_tree("Budget"));
        store.reset();

        assert!(store.state().is_empty());
        assert_eq!(store.version(), 0);
        assert!(store.active_changes().is_none());
    }
}
