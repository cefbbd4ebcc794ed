use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use super::{ExecutionConsoles, ProjectState};
use crate::history::{Commit, VersionHistory};

const SCHEMA_VERSION: u64 = 1;

/// A `ProjectState` bound to the JSON file it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub state: ProjectState,
}

impl ProjectManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: SCHEMA_VERSION,
            state: ProjectState::new(),
        }
    }

    /// Loads whatever can be salvaged. A missing or unreadable file yields an
    /// empty project; malformed commits are skipped one by one.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone());
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        if let Some(id) = obj.get("project_id").and_then(Value::as_str) {
            manifest.state.id = id.to_string();
        }
        if let Some(created_at) = obj.get("created_at").and_then(Value::as_str) {
            manifest.state.created_at = created_at.to_string();
        }

        if let Some(commits) = obj.get("commits").and_then(Value::as_object) {
            for (hash, item) in commits {
                match serde_json::from_value::<Commit>(item.clone()) {
                    Ok(commit) => manifest.state.commits.add_commit(commit),
                    Err(err) => tracing::warn!(%hash, error = %err, "skipping malformed commit"),
                }
            }
        }
        if let Some(history) = obj.get("history") {
            match serde_json::from_value::<VersionHistory>(history.clone()) {
                Ok(history) => manifest.state.history = history,
                Err(err) => tracing::warn!(error = %err, "discarding malformed version history"),
            }
        }
        if let Some(consoles) = obj.get("consoles") {
            manifest.state.consoles =
                serde_json::from_value::<ExecutionConsoles>(consoles.clone()).unwrap_or_default();
        }
        manifest
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert(
            "project_id".to_string(),
            Value::String(self.state.id.clone()),
        );
        payload.insert(
            "created_at".to_string(),
            Value::String(self.state.created_at.clone()),
        );
        payload.insert(
            "commits".to_string(),
            serde_json::to_value(&self.state.commits)?,
        );
        payload.insert(
            "history".to_string(),
            serde_json::to_value(&self.state.history)?,
        );
        payload.insert(
            "consoles".to_string(),
            serde_json::to_value(&self.state.consoles)?,
        );

        write_json(&self.path, Value::Object(payload))
            .with_context(|| format!("failed to write project {}", self.path.display()))
    }
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::ProjectManifest;
    use crate::history::{Commit, CommitKind, ImageSession, Variant, VersionEntry, VersionKind};
    use crate::protocol::PromptContent;

    #[test]
    fn project_survives_save_and_load() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("nested").join("project.json");
        let mut manifest = ProjectManifest::new(&path);

        let session = ImageSession::new("data:image/png;base64,AAA");
        let session_id = session.id.clone();
        manifest.state.history.replace_image_sessions(vec![session]);
        manifest
            .state
            .history
            .set_selected_image_session_id(Some(session_id.as_str()));

        let mut root = Commit::new(CommitKind::AiCreate, None, PromptContent::text("hero"), 2);
        root.variants[0] = Variant::complete("<section/>");
        let child = Commit::new(
            CommitKind::AiEdit,
            Some(root.hash.clone()),
            PromptContent::text("darker"),
            1,
        );
        manifest.state.commits.add_commit(root.clone());
        manifest.state.commits.add_commit(child.clone());
        manifest.state.history.set_head(Some(child.hash.clone()));
        let heads = manifest.state.history.session_heads();
        manifest.state.history.add_version(VersionEntry::new(
            VersionKind::Edit,
            "darker",
            heads,
            Some(child.hash.clone()),
        ));
        manifest.state.consoles.append(0, "Thinking");
        manifest.save()?;

        let loaded = ProjectManifest::load(&path);
        assert_eq!(loaded.state, manifest.state);
        assert!(loaded
            .state
            .commits
            .get(&root.hash)
            .map(|commit| commit.is_committed)
            .unwrap_or(false));
        assert_eq!(loaded.state.history.head(), Some(&child.hash));
        Ok(())
    }

    #[test]
    fn missing_file_loads_an_empty_project() {
        let loaded = ProjectManifest::load("/nonexistent/codestream/project.json");
        assert!(loaded.state.commits.is_empty());
        assert!(loaded.state.history.versions().is_empty());
    }

    #[test]
    fn malformed_commits_are_skipped() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("project.json");
        let good = Commit::new(CommitKind::CodeCreate, None, PromptContent::default(), 1);
        fs::write(
            &path,
            serde_json::to_string(&json!({
                "schema_version": 1,
                "project_id": "p-1",
                "commits": {
                    good.hash.as_str(): good,
                    "broken": {"hash": 7}
                },
                "history": "not an object"
            }))?,
        )?;

        let loaded = ProjectManifest::load(&path);
        assert_eq!(loaded.state.id, "p-1");
        assert_eq!(loaded.state.commits.len(), 1);
        assert!(loaded.state.commits.contains(&good.hash));
        assert!(loaded.state.history.versions().is_empty());
        Ok(())
    }
}
