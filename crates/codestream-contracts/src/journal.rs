use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Lifecycle events worth keeping for a project, one per journal line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    GenerationStarted {
        generation_type: String,
        pages: usize,
        variants: usize,
        commits: Vec<String>,
    },
    VariantCompleted {
        commit: String,
        variant: usize,
    },
    VariantFailed {
        commit: String,
        variant: usize,
        message: String,
    },
    VariantCountDeclared {
        commit: String,
        count: usize,
    },
    GenerationFinished {
        outcome: String,
        surviving_commits: Vec<String>,
    },
    VersionRecorded {
        version_id: String,
        kind: String,
        summary: String,
    },
    VersionRemoved {
        version_id: String,
        pruned_commits: Vec<String>,
    },
    CodeImported {
        commit: String,
    },
}

/// Append-only writer for a project's `journal.jsonl`.
///
/// Every line carries `type`, `project_id` and `ts`, followed by the event
/// fields. One compact JSON object per line.
#[derive(Debug, Clone)]
pub struct GenerationJournal {
    inner: Arc<GenerationJournalInner>,
}

#[derive(Debug)]
struct GenerationJournalInner {
    path: PathBuf,
    project_id: String,
    lock: Mutex<()>,
}

impl GenerationJournal {
    pub fn new(path: impl Into<PathBuf>, project_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GenerationJournalInner {
                path: path.into(),
                project_id: project_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Appends one line for `event`, creating the journal file and its
    /// directory on first use.
    pub fn record(&self, event: &JournalEvent) -> Result<()> {
        let line = JournalLine {
            project_id: &self.inner.project_id,
            ts: now_utc_iso(),
            event,
        };
        let mut raw = serde_json::to_string(&line).context("failed to encode journal event")?;
        raw.push('\n');

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .and_then(|mut file| file.write_all(raw.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.inner.path.display()))
    }
}

#[derive(Serialize)]
struct JournalLine<'a> {
    project_id: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a JournalEvent,
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::Value;

    use super::*;

    #[test]
    fn record_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("journal.jsonl");
        let journal = GenerationJournal::new(&path, "project-1");

        journal.record(&JournalEvent::VariantFailed {
            commit: "abc".to_string(),
            variant: 1,
            message: "overloaded".to_string(),
        })?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(content.trim_end())?;

        assert_eq!(parsed["commit"], Value::String("abc".to_string()));
        assert_eq!(parsed["type"], Value::String("variant_failed".to_string()));
        assert_eq!(parsed["project_id"], Value::String("project-1".to_string()));
        assert_eq!(parsed["variant"], Value::from(1));
        assert_eq!(parsed["message"], Value::String("overloaded".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn record_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("journal.jsonl");
        let journal = GenerationJournal::new(&path, "project-1");

        journal.record(&JournalEvent::CodeImported {
            commit: "c1".to_string(),
        })?;
        journal.record(&JournalEvent::VersionRemoved {
            version_id: "v1".to_string(),
            pruned_commits: vec!["c1".to_string()],
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("code_imported".to_string()));
        assert_eq!(second["type"], Value::String("version_removed".to_string()));
        assert_eq!(second["pruned_commits"][0], Value::String("c1".to_string()));
        Ok(())
    }
}
