use std::collections::HashSet;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::PromptContent;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    AiCreate,
    AiEdit,
    CodeCreate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    #[default]
    Generating,
    Complete,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_code: Option<String>,
    #[serde(default)]
    pub status: VariantStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Variant {
    pub fn generating() -> Self {
        Self::default()
    }

    pub fn complete(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: VariantStatus::Complete,
            ..Self::default()
        }
    }

    /// The error message is only kept for `VariantStatus::Error`.
    pub fn set_status(&mut self, status: VariantStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = match status {
            VariantStatus::Error => error_message,
            _ => None,
        };
    }

    pub fn has_content(&self) -> bool {
        !self.code.is_empty()
            || self
                .secondary_code
                .as_deref()
                .map(|code| !code.is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: CommitHash,
    pub parent_hash: Option<CommitHash>,
    pub kind: CommitKind,
    #[serde(default)]
    pub inputs: PromptContent,
    pub date_created: String,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub selected_variant_index: usize,
    #[serde(default)]
    pub is_committed: bool,
}

impl Commit {
    /// A fresh, uncommitted commit with `variant_count` generating variants.
    pub fn new(
        kind: CommitKind,
        parent_hash: Option<CommitHash>,
        inputs: PromptContent,
        variant_count: usize,
    ) -> Self {
        let hash = content_hash(parent_hash.as_ref(), kind, &inputs);
        Self {
            hash,
            parent_hash,
            kind,
            inputs,
            date_created: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            variants: vec![Variant::generating(); variant_count],
            selected_variant_index: 0,
            is_committed: false,
        }
    }

    pub fn selected_variant(&self) -> Option<&Variant> {
        self.variants.get(self.selected_variant_index)
    }

    pub fn is_generating(&self) -> bool {
        self.variants
            .iter()
            .any(|variant| variant.status == VariantStatus::Generating)
    }

    pub fn has_content(&self) -> bool {
        self.variants.iter().any(Variant::has_content)
    }
}

/// SHA-256 over the commit's identity. The random nonce keeps two identical
/// requests from colliding.
fn content_hash(parent: Option<&CommitHash>, kind: CommitKind, inputs: &PromptContent) -> CommitHash {
    let identity = json!({
        "parent": parent.map(CommitHash::as_str),
        "kind": kind,
        "inputs": inputs,
        "nonce": Uuid::new_v4().to_string(),
    });
    let bytes = serde_json::to_vec(&identity).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    CommitHash(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitGraphError {
    #[error("unknown commit {0}")]
    UnknownCommit(CommitHash),
    #[error("commit {hash} has no variant {index} ({len} variants)")]
    VariantOutOfRange {
        hash: CommitHash,
        index: usize,
        len: usize,
    },
}

/// Every generation result, keyed by hash, in insertion order.
///
/// A commit can be mutated while it is the tip of its lineage. Attaching a
/// child marks the parent committed; after that any attempt to change its
/// content is a programming error and panics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitGraph {
    commits: IndexMap<CommitHash, Commit>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_commit(&mut self, mut commit: Commit) {
        for variant in &mut commit.variants {
            let message = variant.error_message.take();
            variant.set_status(variant.status, message);
        }
        if let Some(parent) = commit
            .parent_hash
            .as_ref()
            .and_then(|hash| self.commits.get_mut(hash))
        {
            parent.is_committed = true;
        }
        tracing::debug!(hash = %commit.hash.short(), kind = ?commit.kind, "commit added");
        self.commits.insert(commit.hash.clone(), commit);
    }

    pub fn remove_commit(&mut self, hash: &CommitHash) -> Option<Commit> {
        self.commits.shift_remove(hash)
    }

    pub fn reset_commits(&mut self) {
        self.commits.clear();
    }

    pub fn append_commit_code(
        &mut self,
        hash: &CommitHash,
        variant_index: usize,
        fragment: &str,
    ) -> Result<(), CommitGraphError> {
        self.mutable_variant(hash, variant_index, "append code to")?
            .code
            .push_str(fragment);
        Ok(())
    }

    pub fn set_commit_code(
        &mut self,
        hash: &CommitHash,
        variant_index: usize,
        code: &str,
    ) -> Result<(), CommitGraphError> {
        self.mutable_variant(hash, variant_index, "set code of")?.code = code.to_string();
        Ok(())
    }

    pub fn set_secondary_code(
        &mut self,
        hash: &CommitHash,
        variant_index: usize,
        code: &str,
    ) -> Result<(), CommitGraphError> {
        self.mutable_variant(hash, variant_index, "set secondary code of")?
            .secondary_code = Some(code.to_string());
        Ok(())
    }

    /// Switching the displayed variant never touches the others, so a user
    /// can preview one while the rest are still generating.
    pub fn update_selected_variant_index(
        &mut self,
        hash: &CommitHash,
        index: usize,
    ) -> Result<(), CommitGraphError> {
        let commit = self.mutable_commit(hash, "update the selected variant of")?;
        if index >= commit.variants.len() {
            return Err(CommitGraphError::VariantOutOfRange {
                hash: hash.clone(),
                index,
                len: commit.variants.len(),
            });
        }
        commit.selected_variant_index = index;
        Ok(())
    }

    /// Late status updates can target a commit that was already discarded,
    /// so a missing commit or variant is ignored.
    pub fn update_variant_status(
        &mut self,
        hash: &CommitHash,
        variant_index: usize,
        status: VariantStatus,
        error_message: Option<String>,
    ) {
        let Some(variant) = self
            .commits
            .get_mut(hash)
            .and_then(|commit| commit.variants.get_mut(variant_index))
        else {
            tracing::debug!(hash = %hash.short(), variant_index, "status update for missing variant ignored");
            return;
        };
        variant.set_status(status, error_message);
    }

    /// Matches the variant list to a count declared by the service, keeping
    /// existing variants by index.
    pub fn resize_variants(&mut self, hash: &CommitHash, count: usize) {
        let Some(commit) = self.commits.get_mut(hash) else {
            return;
        };
        commit.variants.resize_with(count, Variant::generating);
        commit.selected_variant_index = commit
            .selected_variant_index
            .min(count.saturating_sub(1));
    }

    pub fn get(&self, hash: &CommitHash) -> Option<&Commit> {
        self.commits.get(hash)
    }

    pub fn contains(&self, hash: &CommitHash) -> bool {
        self.commits.contains_key(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.commits.values()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Ancestors of `hash` followed by the commit itself, oldest first.
    /// Stops at the first parent that is not in the graph.
    pub fn lineage(&self, hash: &CommitHash) -> Vec<&Commit> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.commits.get(hash);
        while let Some(commit) = cursor {
            if !seen.insert(&commit.hash) {
                break;
            }
            chain.push(commit);
            cursor = commit
                .parent_hash
                .as_ref()
                .and_then(|parent| self.commits.get(parent));
        }
        chain.reverse();
        chain
    }

    pub fn children(&self, hash: &CommitHash) -> Vec<&Commit> {
        self.commits
            .values()
            .filter(|commit| commit.parent_hash.as_ref() == Some(hash))
            .collect()
    }

    fn mutable_commit(
        &mut self,
        hash: &CommitHash,
        operation: &str,
    ) -> Result<&mut Commit, CommitGraphError> {
        let commit = self
            .commits
            .get_mut(hash)
            .ok_or_else(|| CommitGraphError::UnknownCommit(hash.clone()))?;
        if commit.is_committed {
            panic!("attempted to {operation} committed commit {hash}");
        }
        Ok(commit)
    }

    fn mutable_variant(
        &mut self,
        hash: &CommitHash,
        variant_index: usize,
        operation: &str,
    ) -> Result<&mut Variant, CommitGraphError> {
        let commit = self.mutable_commit(hash, operation)?;
        let len = commit.variants.len();
        commit
            .variants
            .get_mut(variant_index)
            .ok_or_else(|| CommitGraphError::VariantOutOfRange {
                hash: hash.clone(),
                index: variant_index,
                len,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{Commit, CommitGraph, CommitGraphError, CommitKind, Variant, VariantStatus};
    use crate::protocol::PromptContent;

    fn root(variants: usize) -> Commit {
        Commit::new(CommitKind::AiCreate, None, PromptContent::text("landing page"), variants)
    }

    fn child_of(parent: &Commit) -> Commit {
        Commit::new(
            CommitKind::AiEdit,
            Some(parent.hash.clone()),
            PromptContent::text("make it blue"),
            1,
        )
    }

    #[test]
    fn identical_inputs_still_produce_distinct_hashes() {
        let a = root(1);
        let b = root(1);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.hash.as_str().len(), 64);
        assert!(a.hash.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn adding_a_child_commits_the_parent() -> anyhow::Result<()> {
        let mut graph = CommitGraph::new();
        let parent = root(2);
        let child = child_of(&parent);
        graph.add_commit(parent.clone());
        assert!(!graph.get(&parent.hash).map(|c| c.is_committed).unwrap_or(true));

        graph.add_commit(child.clone());
        assert!(graph.get(&parent.hash).map(|c| c.is_committed).unwrap_or(false));
        assert!(!graph.get(&child.hash).map(|c| c.is_committed).unwrap_or(true));

        graph.append_commit_code(&child.hash, 0, "<p>")?;
        graph.set_commit_code(&child.hash, 0, "<p>hi</p>")?;
        graph.update_selected_variant_index(&child.hash, 0)?;
        assert_eq!(
            graph.get(&child.hash).map(|c| c.variants[0].code.as_str()),
            Some("<p>hi</p>")
        );
        Ok(())
    }

    #[test]
    #[should_panic(expected = "committed commit")]
    fn appending_to_a_committed_parent_panics() {
        let mut graph = CommitGraph::new();
        let parent = root(1);
        graph.add_commit(parent.clone());
        graph.add_commit(child_of(&parent));
        let _ = graph.append_commit_code(&parent.hash, 0, "late");
    }

    #[test]
    #[should_panic(expected = "committed commit")]
    fn setting_code_on_a_committed_parent_panics() {
        let mut graph = CommitGraph::new();
        let parent = root(1);
        graph.add_commit(parent.clone());
        graph.add_commit(child_of(&parent));
        let _ = graph.set_commit_code(&parent.hash, 0, "late");
    }

    #[test]
    #[should_panic(expected = "committed commit")]
    fn selecting_a_variant_of_a_committed_parent_panics() {
        let mut graph = CommitGraph::new();
        let parent = root(2);
        graph.add_commit(parent.clone());
        graph.add_commit(child_of(&parent));
        let _ = graph.update_selected_variant_index(&parent.hash, 1);
    }

    #[test]
    fn unknown_targets_are_typed_errors() {
        let mut graph = CommitGraph::new();
        let commit = root(1);
        graph.add_commit(commit.clone());
        let missing = super::CommitHash::from("feedface");

        assert_eq!(
            graph.append_commit_code(&missing, 0, "x"),
            Err(CommitGraphError::UnknownCommit(missing.clone()))
        );
        assert!(matches!(
            graph.set_secondary_code(&commit.hash, 4, "x"),
            Err(CommitGraphError::VariantOutOfRange { index: 4, len: 1, .. })
        ));
        assert!(matches!(
            graph.update_selected_variant_index(&commit.hash, 1),
            Err(CommitGraphError::VariantOutOfRange { index: 1, .. })
        ));
    }

    #[test]
    fn status_updates_for_missing_commits_are_ignored() {
        let mut graph = CommitGraph::new();
        let before = graph.clone();
        graph.update_variant_status(&"gone".into(), 0, VariantStatus::Complete, None);
        assert_eq!(graph, before);
    }

    #[test]
    fn variant_error_leaves_siblings_generating() {
        let mut graph = CommitGraph::new();
        let commit = root(2);
        graph.add_commit(commit.clone());
        graph.update_variant_status(
            &commit.hash,
            1,
            VariantStatus::Error,
            Some("model overloaded".to_string()),
        );

        let stored = graph.get(&commit.hash).cloned().unwrap_or(commit);
        assert_eq!(stored.variants[0].status, VariantStatus::Generating);
        assert_eq!(stored.variants[0].error_message, None);
        assert_eq!(stored.variants[1].status, VariantStatus::Error);
        assert_eq!(
            stored.variants[1].error_message.as_deref(),
            Some("model overloaded")
        );
    }

    #[test]
    fn error_message_is_dropped_for_non_error_status() {
        let mut graph = CommitGraph::new();
        let mut commit = root(1);
        commit.variants[0].error_message = Some("stale".to_string());
        graph.add_commit(commit.clone());
        assert_eq!(
            graph.get(&commit.hash).and_then(|c| c.variants[0].error_message.clone()),
            None
        );

        graph.update_variant_status(&commit.hash, 0, VariantStatus::Complete, Some("x".to_string()));
        assert_eq!(
            graph.get(&commit.hash).and_then(|c| c.variants[0].error_message.clone()),
            None
        );
    }

    #[test]
    fn resize_preserves_existing_variants_and_clamps_selection() {
        let mut graph = CommitGraph::new();
        let mut commit = root(2);
        commit.variants[0] = Variant::complete("<a/>");
        commit.variants[1] = Variant::complete("<b/>");
        commit.selected_variant_index = 1;
        graph.add_commit(commit.clone());

        graph.resize_variants(&commit.hash, 4);
        let grown = graph.get(&commit.hash).cloned().unwrap_or(commit.clone());
        assert_eq!(grown.variants.len(), 4);
        assert_eq!(grown.variants[0].code, "<a/>");
        assert_eq!(grown.variants[1].code, "<b/>");
        for variant in &grown.variants[2..] {
            assert_eq!(variant, &Variant::generating());
        }
        assert_eq!(grown.selected_variant_index, 1);

        graph.resize_variants(&commit.hash, 1);
        let shrunk = graph.get(&commit.hash).cloned().unwrap_or(commit);
        assert_eq!(shrunk.variants, vec![Variant::complete("<a/>")]);
        assert_eq!(shrunk.selected_variant_index, 0);
    }

    #[test]
    fn lineage_walks_parents_oldest_first() {
        let mut graph = CommitGraph::new();
        let a = root(1);
        let b = child_of(&a);
        let c = child_of(&b);
        let sibling = child_of(&a);
        graph.add_commit(a.clone());
        graph.add_commit(b.clone());
        graph.add_commit(c.clone());
        graph.add_commit(sibling.clone());

        let hashes: Vec<_> = graph.lineage(&c.hash).iter().map(|x| x.hash.clone()).collect();
        assert_eq!(hashes, vec![a.hash.clone(), b.hash.clone(), c.hash.clone()]);
        assert_eq!(graph.children(&a.hash).len(), 2);

        graph.remove_commit(&b.hash);
        let hashes: Vec<_> = graph.lineage(&c.hash).iter().map(|x| x.hash.clone()).collect();
        assert_eq!(hashes, vec![c.hash.clone()]);

        graph.reset_commits();
        assert!(graph.is_empty());
    }
}
