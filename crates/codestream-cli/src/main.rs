use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use codestream_contracts::history::{diff_commits, CommitHash};
use codestream_contracts::journal::GenerationJournal;
use codestream_contracts::project::ProjectManifest;
use codestream_contracts::protocol::{CodePayload, GenerationType, InputMode, PromptContent};
use codestream_contracts::stream::StreamKey;
use codestream_engine::{
    CancelHandle, EngineConfig, GenerationCallbacks, GenerationOutcome, GenerationRequest, Notice,
    ProjectController, ScreenshotClient, WebSocketTransport,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_PROJECT_PATH: &str = "codestream-project.json";

#[derive(Debug, Parser)]
#[command(name = "codestream", version, about = "Streaming code generation client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate new code from reference images, a page URL or a text prompt.
    Generate(GenerateArgs),
    /// Edit the current code with an instruction.
    Edit(EditArgs),
    /// Import existing code as a new version.
    Import(ImportArgs),
    /// List versions and image sessions.
    History(ProjectArgs),
    /// Restore the heads recorded by a version.
    Checkout(CheckoutArgs),
    /// Drop the latest version.
    Undo(ProjectArgs),
    /// Show another variant of the current commit.
    Select(SelectArgs),
    /// Diff the current commit against its parent or another commit.
    Diff(DiffArgs),
    /// Write the current code to a file.
    Export(ExportArgs),
    /// Capture a page URL as a reference image.
    Screenshot(ScreenshotArgs),
}

#[derive(Debug, Args)]
struct ProjectArgs {
    #[arg(long, default_value = DEFAULT_PROJECT_PATH)]
    project: PathBuf,
    /// Journal file; defaults to `<project>.journal.jsonl`.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StreamArgs {
    #[arg(long)]
    ws_url: Option<String>,
    #[arg(long)]
    variants: Option<usize>,
    #[arg(long)]
    block_updates: bool,
    #[arg(long)]
    model: Option<String>,
    /// Stop the request after this many seconds.
    #[arg(long)]
    max_seconds: Option<u64>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    stream: StreamArgs,
    #[arg(long, default_value = "")]
    text: String,
    /// Reference image: a file path, an http(s) URL or a data URL. Repeatable.
    #[arg(long = "image")]
    images: Vec<String>,
    /// Page to screenshot and use as the reference image.
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    stack: Option<String>,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    stream: StreamArgs,
    #[arg(long)]
    text: String,
    /// Image session to edit; defaults to the selected one.
    #[arg(long)]
    session: Option<String>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct CheckoutArgs {
    #[command(flatten)]
    project: ProjectArgs,
    version: String,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[command(flatten)]
    project: ProjectArgs,
    index: usize,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Commit to compare against; defaults to the parent of the current one.
    #[arg(long)]
    against: Option<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    project: ProjectArgs,
    #[arg(long)]
    out: PathBuf,
    /// Export the secondary platform code instead of the html.
    #[arg(long)]
    secondary: bool,
}

#[derive(Debug, Args)]
struct ScreenshotArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    http_url: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("codestream error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CODESTREAM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    match cli.command {
        Command::Generate(args) => run_generate(args, config),
        Command::Edit(args) => run_edit(args, config),
        Command::Import(args) => run_import(args),
        Command::History(args) => run_history(args),
        Command::Checkout(args) => run_checkout(args),
        Command::Undo(args) => run_undo(args),
        Command::Select(args) => run_select(args),
        Command::Diff(args) => run_diff(args),
        Command::Export(args) => run_export(args),
        Command::Screenshot(args) => run_screenshot(args, config),
    }
}

fn run_generate(args: GenerateArgs, config: EngineConfig) -> Result<i32> {
    let mut images = args
        .images
        .iter()
        .map(|raw| reference_input(raw))
        .collect::<Result<Vec<String>>>()?;
    if let Some(url) = args.url.as_deref() {
        images.push(capture_screenshot(url, &config.screenshot_url(), &config)?);
    }

    let mut controller = open_controller(&args.project);
    let input_mode = if images.is_empty() {
        InputMode::Text
    } else {
        controller.set_reference_images(images);
        InputMode::Image
    };
    if input_mode == InputMode::Text && args.text.trim().is_empty() {
        bail!("nothing to generate from: pass --text, --image or --url");
    }

    let mut request = stream_request(
        GenerationType::Create,
        PromptContent::text(args.text.trim()),
        input_mode,
        &args.stream,
        &config,
    );
    if let Some(stack) = args.stack {
        request.settings.generated_code_config = stack;
    }
    run_request(controller, &args.project, &request, &args.stream, &config)
}

fn run_edit(args: EditArgs, config: EngineConfig) -> Result<i32> {
    if args.text.trim().is_empty() {
        bail!("--text must not be empty");
    }
    let mut controller = open_controller(&args.project);
    if let Some(session) = args.session.as_deref() {
        controller.select_session(Some(session))?;
    }
    let input_mode = if controller.state().history.selected_session().is_some() {
        InputMode::Image
    } else {
        InputMode::Text
    };
    let request = stream_request(
        GenerationType::Update,
        PromptContent::text(args.text.trim()),
        input_mode,
        &args.stream,
        &config,
    );
    run_request(controller, &args.project, &request, &args.stream, &config)
}

fn stream_request(
    generation_type: GenerationType,
    prompt: PromptContent,
    input_mode: InputMode,
    stream: &StreamArgs,
    config: &EngineConfig,
) -> GenerationRequest {
    let mut settings = config.settings.clone();
    settings.is_block_update_enabled = stream.block_updates;
    if let Some(model) = stream.model.clone() {
        settings.code_generation_model = Some(model);
    }
    GenerationRequest {
        generation_type,
        input_mode,
        prompt,
        num_variants: stream.variants.unwrap_or(config.num_variants).max(1),
        settings,
    }
}

fn run_request(
    mut controller: ProjectController,
    project: &ProjectArgs,
    request: &GenerationRequest,
    stream: &StreamArgs,
    config: &EngineConfig,
) -> Result<i32> {
    let url = match stream.ws_url.as_deref() {
        Some(base) => format!("{}/generate-code", base.trim().trim_end_matches('/')),
        None => config.generate_code_url(),
    };
    let cancel = CancelHandle::new();
    if let Some(seconds) = stream.max_seconds {
        let deadline = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            deadline.cancel();
        });
    }

    let read_timeout = config.read_timeout;
    tracing::info!(%url, variants = request.num_variants, "starting generation");
    let mut printer = ProgressPrinter::default();
    let report = controller.generate(
        request,
        || WebSocketTransport::connect(&url, read_timeout),
        cancel,
        &mut printer,
    )?;
    save_project(project, controller)?;

    match &report.version_id {
        Some(id) => println!("Recorded version {id} ({} commit(s))", report.commits.len()),
        None => println!("No version recorded"),
    }
    Ok(match report.outcome {
        GenerationOutcome::Completed => 0,
        GenerationOutcome::Cancelled(_) => 2,
    })
}

fn run_import(args: ImportArgs) -> Result<i32> {
    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mut controller = open_controller(&args.project);
    let hash = controller.import_code(&code, args.summary.as_deref())?;
    save_project(&args.project, controller)?;
    println!("Imported {} as {}", args.file.display(), hash.short());
    Ok(0)
}

fn run_history(args: ProjectArgs) -> Result<i32> {
    let manifest = ProjectManifest::load(&args.project);
    let history = &manifest.state.history;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if history.versions().is_empty() {
        writeln!(out, "No versions yet")?;
    }
    for (index, entry) in history.versions().iter().enumerate() {
        let marker = if history.selected_version_id() == Some(entry.id.as_str()) {
            "*"
        } else {
            " "
        };
        let head = entry
            .primary_head
            .as_ref()
            .map(|hash| hash.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{marker} {:>3}  {}  {:<11}  {}  {}  {}",
            index + 1,
            entry.id,
            entry.kind.as_str(),
            head,
            entry.created_at,
            entry.summary
        )?;
    }
    for session in history.sessions() {
        let marker = if history.selected_session_id() == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        let head = session
            .head
            .as_ref()
            .map(|hash| hash.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{marker} session {}  head {}  {}",
            session.id,
            head,
            truncate_chars(&session.reference_image, 48)
        )?;
    }
    Ok(0)
}

fn run_checkout(args: CheckoutArgs) -> Result<i32> {
    let mut controller = open_controller(&args.project);
    controller.checkout(&args.version)?;
    save_project(&args.project, controller)?;
    println!("Checked out {}", args.version);
    Ok(0)
}

fn run_undo(args: ProjectArgs) -> Result<i32> {
    let mut controller = open_controller(&args);
    let Some(removed) = controller.undo_last_version() else {
        println!("Nothing to undo");
        return Ok(0);
    };
    save_project(&args, controller)?;
    println!("Removed version {} ({})", removed.id, removed.summary);
    Ok(0)
}

fn run_select(args: SelectArgs) -> Result<i32> {
    let mut controller = open_controller(&args.project);
    controller.select_variant(args.index)?;
    save_project(&args.project, controller)?;
    println!("Selected variant {}", args.index);
    Ok(0)
}

fn run_diff(args: DiffArgs) -> Result<i32> {
    let manifest = ProjectManifest::load(&args.project.project);
    let state = &manifest.state;
    let current = state
        .current_commit()
        .context("no current commit to diff")?;
    let base_hash = match args.against.as_deref() {
        Some(raw) => resolve_commit(state.commits.iter().map(|c| &c.hash), raw)?,
        None => current
            .parent_hash
            .clone()
            .context("current commit has no parent; pass --against")?,
    };
    let base = state
        .commits
        .get(&base_hash)
        .with_context(|| format!("unknown commit {base_hash}"))?;
    print!("{}", diff_commits(base, current));
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let controller = open_controller(&args.project);
    let code = controller.current_code(args.secondary)?;
    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&args.out, code).with_context(|| format!("failed to write {}", args.out.display()))?;
    println!("Exported to {}", args.out.display());
    Ok(0)
}

fn run_screenshot(args: ScreenshotArgs, mut config: EngineConfig) -> Result<i32> {
    if let Some(http_url) = args.http_url {
        config.http_base = http_url.trim().trim_end_matches('/').to_string();
    }
    let image = capture_screenshot(&args.url, &config.screenshot_url(), &config)?;
    println!("{image}");
    Ok(0)
}

fn capture_screenshot(url: &str, endpoint: &str, config: &EngineConfig) -> Result<String> {
    let api_key = config
        .settings
        .screenshot_one_api_key
        .clone()
        .unwrap_or_default();
    ScreenshotClient::new(endpoint)
        .capture(url, &api_key)
        .with_context(|| format!("failed to capture {url}"))
}

fn open_controller(args: &ProjectArgs) -> ProjectController {
    let manifest = ProjectManifest::load(&args.project);
    let journal_path = journal_path(args);
    let journal = GenerationJournal::new(journal_path, manifest.state.id.clone());
    ProjectController::new(manifest.state).with_journal(journal)
}

fn save_project(args: &ProjectArgs, controller: ProjectController) -> Result<()> {
    let mut manifest = ProjectManifest::new(&args.project);
    manifest.state = controller.into_state();
    manifest.save()
}

fn journal_path(args: &ProjectArgs) -> PathBuf {
    args.events
        .clone()
        .unwrap_or_else(|| args.project.with_extension("journal.jsonl"))
}

/// Commit whose hash equals or starts with `raw`.
fn resolve_commit<'a>(
    hashes: impl Iterator<Item = &'a CommitHash>,
    raw: &str,
) -> Result<CommitHash> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty commit hash");
    }
    let matches: Vec<&CommitHash> = hashes.filter(|hash| hash.as_str().starts_with(raw)).collect();
    match matches.as_slice() {
        [only] => Ok((*only).clone()),
        [] => bail!("no commit matches {raw}"),
        _ => bail!("{raw} is ambiguous ({} commits)", matches.len()),
    }
}

/// Reference images given on the command line: URLs pass through, local
/// files become data URLs.
fn reference_input(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.starts_with("data:") || raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }
    read_image_as_data_url(Path::new(raw))
}

fn read_image_as_data_url(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let encoded = BASE64.encode(bytes);
    Ok(format!("data:{};base64,{}", guess_image_mime(path), encoded))
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Prints request progress to stderr; stdout stays reserved for results.
#[derive(Debug, Default)]
struct ProgressPrinter {
    received: usize,
}

impl GenerationCallbacks for ProgressPrinter {
    fn on_change(&mut self, fragment: &str, _key: StreamKey) {
        self.received += fragment.len();
    }

    fn on_set_code(&mut self, code: &CodePayload, key: StreamKey) {
        eprintln!("[{key}] code replaced ({} bytes)", code.code.len());
    }

    fn on_status_update(&mut self, status: &str, key: StreamKey) {
        eprintln!("[{key}] {status}");
    }

    fn on_variant_complete(&mut self, key: StreamKey) {
        eprintln!("[{key}] complete");
    }

    fn on_variant_error(&mut self, key: StreamKey, message: &str) {
        eprintln!("[{key}] failed: {message}");
    }

    fn on_variant_count(&mut self, count: usize, page: usize) {
        eprintln!("[page {page}] {count} variant(s)");
    }

    fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Failure(message) => eprintln!("error: {message}"),
            Notice::Cancelled(message) => eprintln!("{message}"),
        }
    }

    fn on_complete(&mut self) {
        eprintln!("done ({} bytes streamed)", self.received);
    }
}
