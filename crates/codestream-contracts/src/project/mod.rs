mod console;
mod manifest;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{Commit, CommitGraph, CommitHash, VersionHistory};

pub use console::ExecutionConsoles;
pub use manifest::ProjectManifest;

/// Everything a project owns: the commit graph, the version history layered
/// on top of it and the per-variant consoles of the latest request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub commits: CommitGraph,
    #[serde(default)]
    pub history: VersionHistory,
    #[serde(default)]
    pub consoles: ExecutionConsoles,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            commits: CommitGraph::new(),
            history: VersionHistory::new(),
            consoles: ExecutionConsoles::new(),
        }
    }

    /// The commit the global head points at.
    pub fn current_commit(&self) -> Option<&Commit> {
        self.history
            .head()
            .and_then(|hash| self.commits.get(hash))
    }

    pub fn is_referenced(&self, hash: &CommitHash) -> bool {
        self.history.is_referenced(hash)
    }

    /// Removes uncommitted commits that no head or version points at.
    /// Returns the evicted hashes.
    pub fn prune_unreferenced(&mut self) -> Vec<CommitHash> {
        let orphans: Vec<CommitHash> = self
            .commits
            .iter()
            .filter(|commit| !commit.is_committed && !self.is_referenced(&commit.hash))
            .map(|commit| commit.hash.clone())
            .collect();
        for hash in &orphans {
            self.commits.remove_commit(hash);
        }
        orphans
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::ProjectState;
    use crate::history::{Commit, CommitKind, Variant, VersionEntry, VersionKind};
    use crate::protocol::PromptContent;

    #[test]
    fn current_commit_follows_the_head() {
        let mut state = ProjectState::new();
        assert!(state.current_commit().is_none());

        let mut commit = Commit::new(CommitKind::CodeCreate, None, PromptContent::default(), 1);
        commit.variants[0] = Variant::complete("<main/>");
        let hash = commit.hash.clone();
        state.commits.add_commit(commit);
        state.history.set_head(Some(hash.clone()));

        assert_eq!(state.current_commit().map(|c| c.hash.clone()), Some(hash));
    }

    #[test]
    fn prune_keeps_referenced_and_committed_commits() {
        let mut state = ProjectState::new();
        let root = Commit::new(CommitKind::AiCreate, None, PromptContent::text("a"), 1);
        let kept = Commit::new(CommitKind::AiEdit, Some(root.hash.clone()), PromptContent::text("b"), 1);
        let orphan = Commit::new(CommitKind::AiEdit, Some(kept.hash.clone()), PromptContent::text("c"), 1);
        state.commits.add_commit(root.clone());
        state.commits.add_commit(kept.clone());
        state.history.add_version(VersionEntry::new(
            VersionKind::Edit,
            "b",
            BTreeMap::new(),
            Some(kept.hash.clone()),
        ));
        let orphan_hash = orphan.hash.clone();
        state.commits.add_commit(orphan);

        // kept is committed now that orphan is its child, so only orphan goes
        assert_eq!(state.prune_unreferenced(), vec![orphan_hash]);
        assert!(state.commits.contains(&root.hash));
        assert!(state.commits.contains(&kept.hash));
    }
}
