use anyhow::{anyhow, bail, Context, Result};
use uuid::Uuid;

use codestream_contracts::history::{
    Commit, CommitHash, CommitKind, ImageSession, Variant, VariantStatus, VersionEntry,
    VersionKind,
};
use codestream_contracts::journal::{GenerationJournal, JournalEvent};
use codestream_contracts::project::ProjectState;
use codestream_contracts::protocol::{
    CodeGenerationParams, CodePayload, GenerationParams, GenerationType, InputMode,
    PromptBatchEntry, PromptContent, Settings,
};
use codestream_contracts::stream::StreamKey;

use crate::client::{
    CancelHandle, CancelReason, CodegenClient, GenerationCallbacks, GenerationOutcome, Notice,
    FAILURE_MESSAGE,
};
use crate::transport::CodegenTransport;

pub const CANCELLED_VARIANT_MESSAGE: &str = "Generation cancelled";
const DEFAULT_CREATE_SUMMARY: &str = "Create";
const DEFAULT_EDIT_SUMMARY: &str = "Edit";
const DEFAULT_IMPORT_SUMMARY: &str = "Imported code";

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub generation_type: GenerationType,
    pub input_mode: InputMode,
    pub prompt: PromptContent,
    pub num_variants: usize,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub outcome: GenerationOutcome,
    /// Commits of this request that are still in the graph.
    pub commits: Vec<CommitHash>,
    pub version_id: Option<String>,
}

/// One page of a request: the commit it streams into and the session whose
/// head follows it.
#[derive(Debug, Clone)]
struct PageTarget {
    page: usize,
    session_id: Option<String>,
    parent: Option<CommitHash>,
    hash: CommitHash,
}

/// Owns a project and wires generation requests into it.
pub struct ProjectController {
    state: ProjectState,
    journal: Option<GenerationJournal>,
}

impl ProjectController {
    pub fn new(state: ProjectState) -> Self {
        Self {
            state,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: GenerationJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn into_state(self) -> ProjectState {
        self.state
    }

    /// Starts one session per reference image, replacing the current ones.
    /// A lone image is selected right away.
    pub fn set_reference_images(&mut self, images: Vec<String>) -> Vec<String> {
        let sessions: Vec<ImageSession> = images.into_iter().map(ImageSession::new).collect();
        let ids: Vec<String> = sessions.iter().map(|session| session.id.clone()).collect();
        self.state.history.replace_image_sessions(sessions);
        if let [only] = ids.as_slice() {
            self.state.history.set_selected_image_session_id(Some(only.as_str()));
        }
        ids
    }

    pub fn select_session(&mut self, id: Option<&str>) -> Result<()> {
        if !self.state.history.set_selected_image_session_id(id) {
            bail!("unknown image session {}", id.unwrap_or_default());
        }
        Ok(())
    }

    pub fn checkout(&mut self, version_id: &str) -> Result<()> {
        if !self.state.history.set_version(version_id) {
            bail!("unknown version {version_id}");
        }
        Ok(())
    }

    /// Runs one request end to end: creates the commits, streams into them
    /// and records a version once the request settles.
    pub fn generate<T, F>(
        &mut self,
        request: &GenerationRequest,
        connect: F,
        cancel: CancelHandle,
        observer: &mut dyn GenerationCallbacks,
    ) -> Result<GenerationReport>
    where
        T: CodegenTransport,
        F: FnOnce() -> Result<T>,
    {
        let pages = self.resolve_pages(request)?;
        if request.generation_type == GenerationType::Create
            && request.input_mode != InputMode::Image
            && !self.state.history.sessions().is_empty()
        {
            self.state.history.replace_image_sessions(Vec::new());
        }
        self.state.consoles.reset();

        let kind = match request.generation_type {
            GenerationType::Create => CommitKind::AiCreate,
            GenerationType::Update => CommitKind::AiEdit,
        };
        let mut targets = Vec::with_capacity(pages.len());
        for (page, (session_id, parent, inputs)) in pages.into_iter().enumerate() {
            let commit = Commit::new(kind, parent.clone(), inputs, request.num_variants);
            let hash = commit.hash.clone();
            self.state.commits.add_commit(commit);
            self.move_head(session_id.as_deref(), Some(hash.clone()));
            targets.push(PageTarget {
                page,
                session_id,
                parent,
                hash,
            });
        }
        if self.state.history.selected_session_id().is_none() {
            if let Some(first) = targets.iter().find_map(|target| target.session_id.clone()) {
                self.state.history.set_selected_image_session_id(Some(first.as_str()));
            }
        }

        let params = self.build_params(request, &targets)?;
        self.record(JournalEvent::GenerationStarted {
            generation_type: format!("{:?}", request.generation_type).to_lowercase(),
            pages: targets.len(),
            variants: request.num_variants,
            commits: targets.iter().map(|target| target.hash.to_string()).collect(),
        });

        let outcome = match connect() {
            Ok(transport) => {
                let block_updates = params.block_updates();
                let mut callbacks = StoreCallbacks {
                    state: &mut self.state,
                    targets: &targets,
                    journal: self.journal.as_ref(),
                    observer,
                };
                CodegenClient::new(transport, block_updates, cancel).run(&params, &mut callbacks)
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not reach the generation service");
                observer.on_notice(Notice::Failure(FAILURE_MESSAGE.to_string()));
                observer.on_cancel();
                GenerationOutcome::Cancelled(CancelReason::Transport)
            }
        };

        let surviving = self.settle(&targets, outcome);
        let version_id = if surviving.is_empty() {
            None
        } else {
            let kind = match request.generation_type {
                GenerationType::Create => VersionKind::Create,
                GenerationType::Update => VersionKind::Edit,
            };
            let fallback = match kind {
                VersionKind::Edit => DEFAULT_EDIT_SUMMARY,
                _ => DEFAULT_CREATE_SUMMARY,
            };
            Some(self.record_version(kind, summary_from(&request.prompt, fallback)))
        };

        self.record(JournalEvent::GenerationFinished {
            outcome: outcome_label(outcome).to_string(),
            surviving_commits: surviving.iter().map(ToString::to_string).collect(),
        });
        tracing::info!(outcome = outcome_label(outcome), commits = surviving.len(), "generation settled");
        Ok(GenerationReport {
            outcome,
            commits: surviving,
            version_id,
        })
    }

    /// Adds hand-written code as a new root commit with its own version.
    pub fn import_code(&mut self, code: &str, summary: Option<&str>) -> Result<CommitHash> {
        if code.trim().is_empty() {
            bail!("nothing to import: code is empty");
        }
        let mut commit = Commit::new(CommitKind::CodeCreate, None, PromptContent::default(), 1);
        commit.variants[0] = Variant::complete(code);
        let hash = commit.hash.clone();
        self.state.commits.add_commit(commit);
        self.state.history.set_head(Some(hash.clone()));
        self.record(JournalEvent::CodeImported {
            commit: hash.to_string(),
        });
        let summary = summary
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMPORT_SUMMARY);
        self.record_version(VersionKind::CodeCreate, summary.to_string());
        Ok(hash)
    }

    /// Drops the newest version and the uncommitted commits only it kept
    /// alive, then moves the heads back to the version before it.
    pub fn undo_last_version(&mut self) -> Option<VersionEntry> {
        let removed = self.state.history.remove_last_version()?;
        match self.state.history.selected_version_id().map(str::to_string) {
            Some(id) => {
                self.state.history.set_version(&id);
            }
            None => {
                let session_ids: Vec<String> = self
                    .state
                    .history
                    .sessions()
                    .iter()
                    .map(|session| session.id.clone())
                    .collect();
                for id in session_ids {
                    self.state.history.set_image_session_head(&id, None);
                }
                self.state.history.reset_head();
            }
        }
        let pruned = self.state.prune_unreferenced();
        self.record(JournalEvent::VersionRemoved {
            version_id: removed.id.clone(),
            pruned_commits: pruned.iter().map(ToString::to_string).collect(),
        });
        Some(removed)
    }

    /// Shows another variant of the current commit.
    pub fn select_variant(&mut self, index: usize) -> Result<()> {
        let commit = self
            .state
            .current_commit()
            .ok_or_else(|| anyhow!("no current commit"))?;
        if commit.is_committed {
            bail!(
                "commit {} already has edits on top of it; check out a newer version instead",
                commit.hash.short()
            );
        }
        let hash = commit.hash.clone();
        self.state
            .commits
            .update_selected_variant_index(&hash, index)
            .with_context(|| format!("cannot select variant {index}"))
    }

    /// The code currently on display: selected variant of the head commit.
    pub fn current_code(&self, secondary: bool) -> Result<String> {
        let commit = self
            .state
            .current_commit()
            .ok_or_else(|| anyhow!("no current commit"))?;
        let variant = commit
            .selected_variant()
            .ok_or_else(|| anyhow!("commit {} has no variants", commit.hash.short()))?;
        if secondary {
            return variant
                .secondary_code
                .clone()
                .ok_or_else(|| anyhow!("commit {} has no secondary code", commit.hash.short()));
        }
        Ok(variant.code.clone())
    }

    /// Per page: the session it belongs to, the parent commit and the
    /// prompt content of the new commit.
    fn resolve_pages(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<(Option<String>, Option<CommitHash>, PromptContent)>> {
        if request.num_variants == 0 {
            bail!("at least one variant is required");
        }
        let history = &self.state.history;
        match request.generation_type {
            GenerationType::Create => {
                if request.input_mode != InputMode::Image
                    || history.sessions().is_empty()
                    || !request.prompt.images.is_empty()
                {
                    return Ok(vec![(None, None, request.prompt.clone())]);
                }
                Ok(history
                    .sessions()
                    .iter()
                    .map(|session| {
                        let inputs = PromptContent {
                            text: request.prompt.text.clone(),
                            images: vec![session.reference_image.clone()],
                        };
                        (Some(session.id.clone()), None, inputs)
                    })
                    .collect())
            }
            GenerationType::Update => {
                let session = history.selected_session();
                let parent = match session {
                    Some(session) => session.head.clone(),
                    None => history.head().cloned(),
                };
                let Some(parent) = parent else {
                    bail!("nothing to edit yet: generate or import code first");
                };
                if !self.state.commits.contains(&parent) {
                    bail!("head commit {} is missing from the project", parent.short());
                }
                Ok(vec![(
                    session.map(|session| session.id.clone()),
                    Some(parent),
                    request.prompt.clone(),
                )])
            }
        }
    }

    fn build_params(
        &self,
        request: &GenerationRequest,
        targets: &[PageTarget],
    ) -> Result<GenerationParams> {
        let inputs_of = |target: &PageTarget| -> Result<PromptContent> {
            self.state
                .commits
                .get(&target.hash)
                .map(|commit| commit.inputs.clone())
                .ok_or_else(|| anyhow!("commit {} vanished", target.hash.short()))
        };
        let first = targets
            .first()
            .ok_or_else(|| anyhow!("request has no pages"))?;
        let prompt = inputs_of(first)?;

        let (prompts, prompt_batch_id) = if targets.len() > 1 {
            let batch_id = Uuid::new_v4().to_string();
            let entries = targets
                .iter()
                .map(|target| {
                    Ok(PromptBatchEntry {
                        content: inputs_of(target)?,
                        page_index: target.page,
                        batch_id: Some(batch_id.clone()),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (entries, Some(batch_id))
        } else {
            (Vec::new(), None)
        };

        let (history, is_imported_from_code) = match &first.parent {
            Some(parent) => {
                let (mut history, imported) = self.edit_history(parent);
                history.push(prompt.clone());
                (history, imported)
            }
            None => (Vec::new(), false),
        };

        Ok(GenerationParams {
            request: CodeGenerationParams {
                generation_type: request.generation_type,
                input_mode: request.input_mode,
                prompt,
                prompts,
                prompt_batch_id,
                history,
                is_imported_from_code,
            },
            settings: request.settings.clone(),
        })
    }

    /// Alternating code and instructions along the lineage of `parent`,
    /// oldest first, ending with the code being edited. The new instruction
    /// is appended by the caller.
    fn edit_history(&self, parent: &CommitHash) -> (Vec<PromptContent>, bool) {
        let lineage = self.state.commits.lineage(parent);
        let imported = lineage
            .first()
            .map(|root| root.kind == CommitKind::CodeCreate)
            .unwrap_or(false);
        let mut history = Vec::new();
        for commit in lineage {
            if commit.kind == CommitKind::AiEdit {
                history.push(commit.inputs.clone());
            }
            let code = commit
                .selected_variant()
                .map(|variant| variant.code.clone())
                .unwrap_or_default();
            history.push(PromptContent::text(code));
        }
        (history, imported)
    }

    fn move_head(&mut self, session_id: Option<&str>, head: Option<CommitHash>) {
        match session_id {
            Some(id) => {
                self.state.history.set_image_session_head(id, head);
            }
            None => self.state.history.set_head(head),
        }
    }

    /// Finalizes variant statuses and discards commits a cancelled request
    /// never filled. Returns the commits that remain.
    fn settle(&mut self, targets: &[PageTarget], outcome: GenerationOutcome) -> Vec<CommitHash> {
        let (status, message) = match outcome {
            GenerationOutcome::Completed => (VariantStatus::Complete, None),
            GenerationOutcome::Cancelled(_) => (
                VariantStatus::Error,
                Some(CANCELLED_VARIANT_MESSAGE.to_string()),
            ),
        };

        let mut surviving = Vec::new();
        for target in targets {
            let Some(commit) = self.state.commits.get(&target.hash) else {
                continue;
            };
            let generating: Vec<usize> = commit
                .variants
                .iter()
                .enumerate()
                .filter(|(_, variant)| variant.status == VariantStatus::Generating)
                .map(|(index, _)| index)
                .collect();
            let keep = matches!(outcome, GenerationOutcome::Completed) || commit.has_content();
            for index in generating {
                self.state
                    .commits
                    .update_variant_status(&target.hash, index, status, message.clone());
            }

            if keep {
                surviving.push(target.hash.clone());
                continue;
            }
            tracing::debug!(hash = %target.hash.short(), "discarding empty commit");
            self.state.commits.remove_commit(&target.hash);
            self.move_head(target.session_id.as_deref(), target.parent.clone());
        }
        surviving
    }

    fn record_version(&mut self, kind: VersionKind, summary: String) -> String {
        let entry = VersionEntry::new(
            kind,
            summary,
            self.state.history.session_heads(),
            self.state.history.head().cloned(),
        );
        let id = entry.id.clone();
        self.record(JournalEvent::VersionRecorded {
            version_id: id.clone(),
            kind: kind.as_str().to_string(),
            summary: entry.summary.clone(),
        });
        self.state.history.add_version(entry);
        id
    }

    fn record(&self, event: JournalEvent) {
        record_event(self.journal.as_ref(), &event);
    }
}

fn record_event(journal: Option<&GenerationJournal>, event: &JournalEvent) {
    let Some(journal) = journal else {
        return;
    };
    if let Err(err) = journal.record(event) {
        tracing::warn!(error = %format!("{err:#}"), path = %journal.path().display(), "journal write failed");
    }
}

fn summary_from(prompt: &PromptContent, fallback: &str) -> String {
    let text = prompt.text.trim();
    if text.is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

fn outcome_label(outcome: GenerationOutcome) -> &'static str {
    match outcome {
        GenerationOutcome::Completed => "completed",
        GenerationOutcome::Cancelled(CancelReason::User) => "cancelled",
        GenerationOutcome::Cancelled(CancelReason::ApplicationError) => "application_error",
        GenerationOutcome::Cancelled(CancelReason::Transport) => "failed",
    }
}

/// Applies client callbacks to the project, then passes them on.
struct StoreCallbacks<'a> {
    state: &'a mut ProjectState,
    targets: &'a [PageTarget],
    journal: Option<&'a GenerationJournal>,
    observer: &'a mut dyn GenerationCallbacks,
}

impl StoreCallbacks<'_> {
    fn commit_for(&self, page: usize) -> Option<CommitHash> {
        let hash = self
            .targets
            .iter()
            .find(|target| target.page == page)
            .map(|target| target.hash.clone());
        if hash.is_none() {
            tracing::debug!(page, "message for a page this request did not open");
        }
        hash
    }
}

impl GenerationCallbacks for StoreCallbacks<'_> {
    fn on_change(&mut self, fragment: &str, key: StreamKey) {
        if let Some(hash) = self.commit_for(key.page) {
            if let Err(err) = self.state.commits.append_commit_code(&hash, key.variant, fragment) {
                tracing::warn!(error = %err, %key, "dropping code fragment");
            }
        }
        self.observer.on_change(fragment, key);
    }

    fn on_set_code(&mut self, code: &CodePayload, key: StreamKey) {
        if let Some(hash) = self.commit_for(key.page) {
            let applied = self
                .state
                .commits
                .set_commit_code(&hash, key.variant, &code.code)
                .and_then(|()| match code.secondary.as_deref() {
                    Some(secondary) => {
                        self.state
                            .commits
                            .set_secondary_code(&hash, key.variant, secondary)
                    }
                    None => Ok(()),
                });
            if let Err(err) = applied {
                tracing::warn!(error = %err, %key, "dropping replacement code");
            }
        }
        self.observer.on_set_code(code, key);
    }

    fn on_status_update(&mut self, status: &str, key: StreamKey) {
        self.state.consoles.append(key.variant, status);
        self.observer.on_status_update(status, key);
    }

    fn on_variant_complete(&mut self, key: StreamKey) {
        if let Some(hash) = self.commit_for(key.page) {
            self.state
                .commits
                .update_variant_status(&hash, key.variant, VariantStatus::Complete, None);
            record_event(
                self.journal,
                &JournalEvent::VariantCompleted {
                    commit: hash.to_string(),
                    variant: key.variant,
                },
            );
        }
        self.observer.on_variant_complete(key);
    }

    fn on_variant_error(&mut self, key: StreamKey, message: &str) {
        if let Some(hash) = self.commit_for(key.page) {
            self.state.commits.update_variant_status(
                &hash,
                key.variant,
                VariantStatus::Error,
                Some(message.to_string()),
            );
            record_event(
                self.journal,
                &JournalEvent::VariantFailed {
                    commit: hash.to_string(),
                    variant: key.variant,
                    message: message.to_string(),
                },
            );
        }
        self.observer.on_variant_error(key, message);
    }

    fn on_variant_count(&mut self, count: usize, page: usize) {
        if let Some(hash) = self.commit_for(page) {
            self.state.commits.resize_variants(&hash, count);
            record_event(
                self.journal,
                &JournalEvent::VariantCountDeclared {
                    commit: hash.to_string(),
                    count,
                },
            );
        }
        self.observer.on_variant_count(count, page);
    }

    fn on_notice(&mut self, notice: Notice) {
        self.observer.on_notice(notice);
    }

    fn on_cancel(&mut self) {
        self.observer.on_cancel();
    }

    fn on_complete(&mut self) {
        self.observer.on_complete();
    }
}
