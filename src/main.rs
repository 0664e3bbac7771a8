//! # Draft Harness CLI (`draft`)
//!
//! The `draft` binary manages sessions and sources, ingests work history,
//! generates blog drafts and edits posts.
//!
//! ## Usage
//!
//! ```bash
//! draft --config ./config/draft.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `draft init` | Create the SQLite database and tables |
//! | `draft session ...` | Create, configure, attach sources to and delete sessions |
//! | `draft source ...` | Register git/Notion sources |
//! | `draft ingest <source>` | Sync one source into the store |
//! | `draft generate <session>` | Generate a draft (or get clarifying questions) |
//! | `draft post ...` | List, show and edit posts; show revision history |
//! | `draft completions <shell>` | Print shell completions |
//!
//! ## Clarification round-trip
//!
//! ```bash
//! draft generate $SESSION --json > reply.json
//! draft generate $SESSION --reply reply.json \
//!     --answer agent-q-1-1="담백한 회고" --answer agent-q-1-2="주간 회고"
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use draft_harness::agent::AgentRegistry;
use draft_harness::clarify::ClarificationResponse;
use draft_harness::config::{self, Config, MOCK_PROVIDER};
use draft_harness::generate::{GenerateRequest, GenerationOutcome, Generator};
use draft_harness::ingest::{self, Ingestor};
use draft_harness::models::{
    format_ts_iso, NewSession, NewSource, PostStatus, SessionConfigUpdate, SourceKind,
};
use draft_harness::posts::{self, ManualEdit};
use draft_harness::sqlite_store::SqliteStore;
use draft_harness::store::Store;
use draft_harness::{db, migrate};

/// Draft Harness CLI: turn git history and Notion pages into blog drafts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/draft.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "draft", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/draft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file (if missing) and all tables.
    /// Safe to run multiple times.
    Init,

    /// Manage writing sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Manage ingestion sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Ingest one source (by id or name) into the store.
    ///
    /// Records are upserted by external id, so re-running is idempotent.
    Ingest {
        /// Source id or name.
        source: String,
    },

    /// Generate a blog draft for a session.
    ///
    /// Re-ingests every attached source, then either saves a new draft or
    /// prints clarifying questions. Answer them by passing the previous
    /// `--json` output to `--reply` together with `--answer ID=TEXT`.
    Generate {
        /// Session id.
        session: String,

        /// Agent provider (overrides the session default).
        #[arg(long)]
        provider: Option<String>,

        /// Tone for this draft (overrides the session default).
        #[arg(long)]
        tone: Option<String>,

        /// Format for this draft (overrides the session default).
        #[arg(long)]
        format: Option<String>,

        /// Extra instruction appended to the prompt.
        #[arg(long)]
        instruction: Option<String>,

        /// Refine an existing post of this session instead of drafting anew.
        #[arg(long)]
        refine: Option<String>,

        /// Skip clarification and generate with defaults.
        #[arg(long)]
        skip_preflight: bool,

        /// Print the draft to stdout as the agent writes it.
        #[arg(long)]
        stream: bool,

        /// Previous clarification response (JSON written by `--json`).
        #[arg(long)]
        reply: Option<PathBuf>,

        /// Answer to a clarifying question as `ID=TEXT`.
        #[arg(long = "answer", value_parser = parse_key_val, requires = "reply")]
        answers: Vec<(String, String)>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and edit posts.
    Post {
        #[command(subcommand)]
        action: PostAction,
    },

    /// Print shell completions to stdout.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Session management subcommands.
#[derive(Subcommand)]
enum SessionAction {
    /// Create a session.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        tone: Option<String>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },
    /// List sessions, newest first.
    List,
    /// Show a session with its sources and posts.
    Show { id: String },
    /// Change session defaults.
    Config {
        id: String,
        #[arg(long, conflicts_with = "clear_tone")]
        tone: Option<String>,
        #[arg(long, conflicts_with = "clear_format")]
        format: Option<String>,
        #[arg(long, conflicts_with = "clear_provider")]
        provider: Option<String>,
        #[arg(long)]
        clear_tone: bool,
        #[arg(long)]
        clear_format: bool,
        #[arg(long)]
        clear_provider: bool,
    },
    /// Attach a source (id or name) to a session.
    Attach { session: String, source: String },
    /// Detach a source (id or name) from a session.
    Detach { session: String, source: String },
    /// Delete a session with its attachments and posts.
    Delete { id: String },
}

/// Source management subcommands.
#[derive(Subcommand)]
enum SourceAction {
    /// Register a git repository (local path or clone URL).
    AddGit {
        name: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        branch: Option<String>,
        /// Only read the most recent N commits.
        #[arg(long)]
        max_commits: Option<usize>,
    },
    /// Register a Notion page.
    AddNotion {
        name: String,
        #[arg(long)]
        page_id: String,
    },
    /// List registered sources.
    List,
}

/// Post subcommands.
#[derive(Subcommand)]
enum PostAction {
    /// List posts, newest first.
    List {
        #[arg(long)]
        session: Option<String>,
    },
    /// Print a post.
    Show { id: String },
    /// Save a manual edit as a new revision.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// File holding the new body (`-` for stdin).
        #[arg(long)]
        body_file: Option<PathBuf>,
        #[arg(long, value_parser = parse_status)]
        status: Option<PostStatus>,
    },
    /// Show the revision history of a post.
    Revisions { id: String },
}

/// Parse a `key=value` pair for `--answer` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid ID=TEXT: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_status(s: &str) -> Result<PostStatus, String> {
    PostStatus::parse(s).ok_or_else(|| format!("invalid status '{}': expected draft or published", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "draft", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let store: Arc<dyn Store> = Arc::new(open_store(&cfg).await?);

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {
            // Handled above
            unreachable!()
        }
        Commands::Session { action } => run_session(&cfg, store.as_ref(), action).await?,
        Commands::Source { action } => run_source(store.as_ref(), action).await?,
        Commands::Ingest { source } => ingest::run_ingest(&cfg, store, &source).await?,
        Commands::Generate {
            session,
            provider,
            tone,
            format,
            instruction,
            refine,
            skip_preflight,
            stream,
            reply,
            answers,
            json,
        } => {
            let mut request = GenerateRequest::new(session);
            request.provider = provider;
            request.tone = tone;
            request.format = format;
            request.user_instruction = instruction;
            request.refine_post_id = refine;
            request.skip_preflight = skip_preflight;
            if let Some(path) = reply {
                let previous = read_clarification(&path)?;
                request.clarification = Some(previous.answer(&answers)?);
            }
            run_generate(&cfg, store, &request, stream, json).await?;
        }
        Commands::Post { action } => run_post(store.as_ref(), action).await?,
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    Ok(SqliteStore::new(pool))
}

fn read_clarification(path: &Path) -> Result<ClarificationResponse> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a clarification response", path.display()))
}

fn read_body(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut body = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut body)?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn check_provider(cfg: &Config, provider: Option<&str>) -> Result<()> {
    if let Some(p) = provider {
        if p != MOCK_PROVIDER && !cfg.agent.providers.contains_key(p) {
            bail!(
                "Unknown provider: '{}'. Must be one of: {}",
                p,
                AgentRegistry::from_config(&cfg.agent).names().join(", ")
            );
        }
    }
    Ok(())
}

async fn run_session(cfg: &Config, store: &dyn Store, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Create {
            title,
            tone,
            format,
            provider,
        } => {
            if title.trim().is_empty() {
                bail!("session title must not be empty");
            }
            check_provider(cfg, provider.as_deref())?;
            let session = store
                .create_session(&NewSession {
                    title,
                    tone,
                    format,
                    provider,
                })
                .await?;
            println!("{}", session.id);
        }
        SessionAction::List => {
            let sessions = store.list_sessions().await?;
            println!("{:<38} {:<22} TITLE", "ID", "UPDATED");
            for s in sessions {
                println!("{:<38} {:<22} {}", s.id, format_ts_iso(&s.updated_at), s.title);
            }
        }
        SessionAction::Show { id } => {
            let session = store
                .get_session(&id)
                .await?
                .with_context(|| format!("Session not found: {}", id))?;
            println!("--- Session ---");
            println!("id:         {}", session.id);
            println!("title:      {}", session.title);
            println!("tone:       {}", session.tone.as_deref().unwrap_or("-"));
            println!("format:     {}", session.format.as_deref().unwrap_or("-"));
            println!("provider:   {}", session.provider.as_deref().unwrap_or("-"));
            println!("created_at: {}", format_ts_iso(&session.created_at));
            println!("updated_at: {}", format_ts_iso(&session.updated_at));
            println!("--- Sources ---");
            for source in store.list_session_sources(&session.id).await? {
                println!("{:<20} {:<8} {}", source.name, source.kind.as_str(), source.id);
            }
            println!("--- Posts ---");
            for post in store.list_posts(Some(session.id.as_str())).await? {
                println!("{:<38} {:<10} {}", post.id, post.status.as_str(), post.title);
            }
        }
        SessionAction::Config {
            id,
            tone,
            format,
            provider,
            clear_tone,
            clear_format,
            clear_provider,
        } => {
            check_provider(cfg, provider.as_deref())?;
            let update = SessionConfigUpdate {
                tone: if clear_tone { Some(None) } else { tone.map(Some) },
                format: if clear_format { Some(None) } else { format.map(Some) },
                provider: if clear_provider { Some(None) } else { provider.map(Some) },
            };
            let session = store
                .update_session_config(&id, &update)
                .await?
                .with_context(|| format!("Session not found: {}", id))?;
            println!(
                "tone={} format={} provider={}",
                session.tone.as_deref().unwrap_or("-"),
                session.format.as_deref().unwrap_or("-"),
                session.provider.as_deref().unwrap_or("-")
            );
        }
        SessionAction::Attach { session, source } => {
            let found = store
                .find_source(&source)
                .await?
                .with_context(|| format!("Unknown source: '{}'", source))?;
            if store.get_session(&session).await?.is_none() {
                bail!("Session not found: {}", session);
            }
            store.attach_source(&session, &found.id).await?;
            println!("attached {} to {}", found.name, session);
        }
        SessionAction::Detach { session, source } => {
            let found = store
                .find_source(&source)
                .await?
                .with_context(|| format!("Unknown source: '{}'", source))?;
            if store.detach_source(&session, &found.id).await? {
                println!("detached {} from {}", found.name, session);
            } else {
                println!("{} was not attached to {}", found.name, session);
            }
        }
        SessionAction::Delete { id } => {
            if !store.delete_session(&id).await? {
                bail!("Session not found: {}", id);
            }
            println!("deleted {}", id);
        }
    }
    Ok(())
}

async fn run_source(store: &dyn Store, action: SourceAction) -> Result<()> {
    match action {
        SourceAction::AddGit {
            name,
            repo,
            branch,
            max_commits,
        } => {
            let mut config = serde_json::json!({ "repo": repo });
            if let Some(branch) = branch {
                config["branch"] = serde_json::json!(branch);
            }
            if let Some(max) = max_commits {
                config["maxCommits"] = serde_json::json!(max);
            }
            let source = store
                .create_source(&NewSource {
                    name,
                    kind: SourceKind::Git,
                    config,
                })
                .await?;
            println!("{}", source.id);
        }
        SourceAction::AddNotion { name, page_id } => {
            let source = store
                .create_source(&NewSource {
                    name,
                    kind: SourceKind::Notion,
                    config: serde_json::json!({ "pageId": page_id }),
                })
                .await?;
            println!("{}", source.id);
        }
        SourceAction::List => {
            println!("{:<20} {:<8} {:<38} CONFIG", "NAME", "KIND", "ID");
            for s in store.list_sources().await? {
                println!("{:<20} {:<8} {:<38} {}", s.name, s.kind.as_str(), s.id, s.config);
            }
        }
    }
    Ok(())
}

async fn run_generate(
    cfg: &Config,
    store: Arc<dyn Store>,
    request: &GenerateRequest,
    stream: bool,
    json: bool,
) -> Result<()> {
    let ingestor = Arc::new(Ingestor::new(cfg.clone(), store.clone()));
    let agents = Arc::new(AgentRegistry::from_config(&cfg.agent));
    let generator = Generator::new(cfg, store, ingestor, agents);

    let outcome = if stream {
        let mut on_chunk = |chunk: &str| {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        };
        let outcome = generator.generate_stream(request, &mut on_chunk).await?;
        println!();
        outcome
    } else {
        generator.generate(request).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        GenerationOutcome::Completed(post) => {
            if !stream {
                println!("{}", post.body);
            }
            let fallback = post.generation["fallback"].as_bool().unwrap_or(false);
            eprintln!(
                "saved post {} (provider: {}{})",
                post.id,
                post.provider,
                if fallback { ", fallback draft" } else { "" }
            );
        }
        GenerationOutcome::NeedsClarification(response) => {
            println!("{}", response.message);
            for q in &response.clarifying_questions {
                println!("  [{}] {}", q.id, q.question);
            }
            println!(
                "defaults: tone={} format={}",
                response.defaults.tone, response.defaults.format
            );
            println!("Re-run with --json to capture the response for --reply.");
        }
    }
    Ok(())
}

async fn run_post(store: &dyn Store, action: PostAction) -> Result<()> {
    match action {
        PostAction::List { session } => {
            println!("{:<38} {:<10} {:<22} TITLE", "ID", "STATUS", "UPDATED");
            for post in store.list_posts(session.as_deref()).await? {
                println!(
                    "{:<38} {:<10} {:<22} {}",
                    post.id,
                    post.status.as_str(),
                    format_ts_iso(&post.updated_at),
                    post.title
                );
            }
        }
        PostAction::Show { id } => {
            let post = store
                .get_post(&id)
                .await?
                .with_context(|| format!("Post not found: {}", id))?;
            println!("--- Post ---");
            println!("id:         {}", post.id);
            println!("session:    {}", post.session_id);
            println!("title:      {}", post.title);
            println!("status:     {}", post.status.as_str());
            println!("provider:   {}", post.provider);
            println!("updated_at: {}", format_ts_iso(&post.updated_at));
            println!("--- Body ---");
            println!("{}", post.body);
        }
        PostAction::Edit {
            id,
            title,
            body_file,
            status,
        } => {
            let body = body_file.as_deref().map(read_body).transpose()?;
            let edit = ManualEdit {
                title,
                body,
                status,
            };
            let post = posts::save_manual_edit(store, &id, &edit).await?;
            let version = store
                .list_revisions(&post.id)
                .await?
                .last()
                .map(|r| r.version)
                .unwrap_or(0);
            println!("saved {} as revision {}", post.id, version);
        }
        PostAction::Revisions { id } => {
            println!("{:<8} {:<12} {:<10} {:<22} TITLE", "VERSION", "SOURCE", "STATUS", "CREATED");
            for r in posts::list_revisions(store, &id).await? {
                println!(
                    "{:<8} {:<12} {:<10} {:<22} {}",
                    r.version,
                    r.source.as_str(),
                    r.status.as_str(),
                    format_ts_iso(&r.created_at),
                    r.title
                );
            }
        }
    }
    Ok(())
}
