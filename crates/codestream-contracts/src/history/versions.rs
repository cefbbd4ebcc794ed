use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commits::CommitHash;

/// One reference input and the head of its independent edit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSession {
    pub id: String,
    pub reference_image: String,
    #[serde(default)]
    pub head: Option<CommitHash>,
}

impl ImageSession {
    pub fn new(reference_image: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reference_image: reference_image.into(),
            head: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Create,
    Edit,
    CodeCreate,
}

impl VersionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::CodeCreate => "code_create",
        }
    }
}

/// Snapshot of every session head at the moment a request resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    pub created_at: String,
    pub summary: String,
    #[serde(rename = "type")]
    pub kind: VersionKind,
    #[serde(default)]
    pub session_heads: BTreeMap<String, Option<CommitHash>>,
    #[serde(default)]
    pub primary_head: Option<CommitHash>,
}

impl VersionEntry {
    pub fn new(
        kind: VersionKind,
        summary: impl Into<String>,
        session_heads: BTreeMap<String, Option<CommitHash>>,
        primary_head: Option<CommitHash>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            summary: summary.into(),
            kind,
            session_heads,
            primary_head,
        }
    }

    pub fn references(&self, hash: &CommitHash) -> bool {
        self.primary_head.as_ref() == Some(hash)
            || self
                .session_heads
                .values()
                .any(|head| head.as_ref() == Some(hash))
    }
}

/// Linear version history plus the image sessions it snapshots.
///
/// While a session is selected the global `head` always equals that
/// session's head; every mutator below re-derives it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistory {
    #[serde(default)]
    sessions: Vec<ImageSession>,
    #[serde(default)]
    selected_session_id: Option<String>,
    #[serde(default)]
    head: Option<CommitHash>,
    #[serde(default)]
    versions: Vec<VersionEntry>,
    #[serde(default)]
    selected_version_id: Option<String>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[ImageSession] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&ImageSession> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn selected_session_id(&self) -> Option<&str> {
        self.selected_session_id.as_deref()
    }

    pub fn selected_session(&self) -> Option<&ImageSession> {
        self.selected_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    pub fn head(&self) -> Option<&CommitHash> {
        self.head.as_ref()
    }

    pub fn versions(&self) -> &[VersionEntry] {
        &self.versions
    }

    pub fn version(&self, id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|entry| entry.id == id)
    }

    pub fn selected_version_id(&self) -> Option<&str> {
        self.selected_version_id.as_deref()
    }

    pub fn selected_version(&self) -> Option<&VersionEntry> {
        self.selected_version_id
            .as_deref()
            .and_then(|id| self.version(id))
    }

    /// Current heads of all sessions, keyed by session id.
    pub fn session_heads(&self) -> BTreeMap<String, Option<CommitHash>> {
        self.sessions
            .iter()
            .map(|session| (session.id.clone(), session.head.clone()))
            .collect()
    }

    /// Replaces all sessions at once. A selection that no longer exists is
    /// dropped together with the head it contributed.
    pub fn replace_image_sessions(&mut self, sessions: Vec<ImageSession>) {
        self.sessions = sessions;
        if self
            .selected_session_id
            .as_deref()
            .is_some_and(|id| self.session(id).is_none())
        {
            self.selected_session_id = None;
            self.head = None;
        }
        self.sync_head_from_selection();
    }

    /// Selects a session (or clears the selection). Returns false and
    /// changes nothing when the id is unknown.
    pub fn set_selected_image_session_id(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.session(id).is_none() => {
                tracing::debug!(session_id = id, "ignoring unknown image session");
                false
            }
            Some(id) => {
                self.selected_session_id = Some(id.to_string());
                self.sync_head_from_selection();
                true
            }
            None => {
                self.selected_session_id = None;
                self.head = None;
                true
            }
        }
    }

    pub fn set_image_session_head(&mut self, session_id: &str, head: Option<CommitHash>) -> bool {
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|session| session.id == session_id)
        else {
            return false;
        };
        session.head = head.clone();
        if self.selected_session_id.as_deref() == Some(session_id) {
            self.head = head;
        }
        true
    }

    /// Moves the global head, carrying the selected session along with it.
    pub fn set_head(&mut self, head: Option<CommitHash>) {
        if let Some(selected) = self.selected_session_id.clone() {
            if let Some(session) = self.sessions.iter_mut().find(|s| s.id == selected) {
                session.head = head.clone();
            }
        }
        self.head = head;
    }

    pub fn reset_head(&mut self) {
        self.set_head(None);
    }

    pub fn add_version(&mut self, entry: VersionEntry) {
        self.selected_version_id = Some(entry.id.clone());
        self.versions.push(entry);
    }

    /// Restores the heads recorded by a version. Sessions the version does
    /// not know about keep their current head. Unknown ids change nothing.
    pub fn set_version(&mut self, id: &str) -> bool {
        let Some(entry) = self.version(id).cloned() else {
            return false;
        };
        for session in &mut self.sessions {
            if let Some(Some(head)) = entry.session_heads.get(&session.id) {
                session.head = Some(head.clone());
            }
        }
        self.head = match self.selected_session() {
            Some(session) => session.head.clone(),
            None => entry.primary_head.clone(),
        };
        self.selected_version_id = Some(entry.id);
        true
    }

    pub fn remove_last_version(&mut self) -> Option<VersionEntry> {
        let removed = self.versions.pop()?;
        self.selected_version_id = self.versions.last().map(|entry| entry.id.clone());
        Some(removed)
    }

    pub fn reset_versions(&mut self) {
        self.versions.clear();
        self.selected_version_id = None;
    }

    /// True when a session head, the global head or any version points at
    /// `hash`.
    pub fn is_referenced(&self, hash: &CommitHash) -> bool {
        self.head.as_ref() == Some(hash)
            || self
                .sessions
                .iter()
                .any(|session| session.head.as_ref() == Some(hash))
            || self.versions.iter().any(|entry| entry.references(hash))
    }

    fn sync_head_from_selection(&mut self) {
        if let Some(head) = self.selected_session().map(|session| session.head.clone()) {
            self.head = head;
        }
    }
}
