//! # notes-rag CLI
//!
//! Index a directory of notes and extracted documents, then ask questions
//! against it.
//!
//! ## Usage
//!
//! ```bash
//! notes-rag --config ./config/notes-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notes-rag init` | Create the SQLite schema |
//! | `notes-rag index [--full]` | Index changed sources, or everything |
//! | `notes-rag ask "<question>"` | Answer from notes with fallbacks |
//! | `notes-rag search "<query>"` | Show retrieval candidates and the gate decision |
//! | `notes-rag remove <source-id>` | Drop a source from the index |
//! | `notes-rag status` | Chunk counts and configured providers |
//!
//! Logs go to stderr; set `RUST_LOG` to change verbosity.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notes_rag::answer::{AnswerChain, ProgressTextFn};
use notes_rag::ask::{AskRequest, Assistant};
use notes_rag::config::{self, Config, StoreBackend};
use notes_rag::embedding::Embedder;
use notes_rag::indexer::{Indexer, RunOutcome};
use notes_rag::migrate;
use notes_rag::models::AskResponse;
use notes_rag::progress::ProgressMode;
use notes_rag::sources::scan_notes;
use notes_rag::store::{open_store, VectorStore};

/// Retrieval-augmented answers from your own notes.
#[derive(Parser)]
#[command(name = "notes-rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/notes-rag.toml")]
    config: PathBuf,

    /// Indexing progress on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Index sources under `notes.root`.
    ///
    /// Without `--full` only sources modified since they were last indexed
    /// are processed, and a failing source is skipped.
    Index {
        /// Re-index every source and stop at the first failure.
        #[arg(long)]
        full: bool,
    },

    /// Answer a question from your notes.
    Ask {
        question: String,

        /// Try the on-device model first.
        #[arg(long)]
        prefer_local: bool,

        /// Number of candidate chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show retrieval candidates without answering.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Remove a source (by id, e.g. `cooking/bread.md`) from the index.
    Remove { source_id: String },

    /// Show indexed chunk counts and configured providers.
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notes_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Index { full } => run_index(&cfg, full, progress).await?,
        Commands::Ask {
            question,
            prefer_local,
            top_k,
            json,
        } => run_ask(&cfg, &question, prefer_local, top_k, json, progress).await?,
        Commands::Search { query, top_k } => run_search(&cfg, &query, top_k).await?,
        Commands::Remove { source_id } => run_remove(&cfg, &source_id).await?,
        Commands::Status => run_status(&cfg).await?,
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    match cfg.db.backend {
        StoreBackend::Sqlite => {
            migrate::run_migrations(cfg).await?;
            println!("Database initialized at {}.", cfg.db.path.display());
        }
        StoreBackend::Memory => println!("In-memory store configured; nothing to initialize."),
    }
    Ok(())
}

async fn run_index(cfg: &Config, full: bool, progress: ProgressMode) -> Result<()> {
    let sources = scan_notes(&cfg.notes)?;
    let store = open_store(cfg).await?;
    let embedder = Arc::new(Embedder::from_config(&cfg.embedding)?);
    let indexer = Indexer::from_config(cfg, embedder, store).with_reporter(progress.reporter());

    let outcome = if full {
        indexer.index_all(&sources).await?
    } else {
        indexer.index_stale(&sources).await?
    };
    match outcome {
        RunOutcome::Completed { indexed, failed } => {
            println!(
                "Indexed {} of {} sources ({} failed).",
                indexed,
                sources.len(),
                failed
            );
        }
        RunOutcome::AlreadyRunning => println!("An index run is already in progress."),
    }
    Ok(())
}

async fn assistant(cfg: &Config) -> Result<Assistant> {
    let store = open_store(cfg).await?;
    let embedder = Arc::new(Embedder::from_config(&cfg.embedding)?);
    Ok(Assistant::from_config(cfg, embedder, store))
}

async fn run_ask(
    cfg: &Config,
    question: &str,
    prefer_local: bool,
    top_k: Option<usize>,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let assistant = assistant(cfg).await?;

    // The on-device model reports the whole reply so far; echo only the new tail.
    let printed = AtomicUsize::new(0);
    let echo = move |text: &str| {
        let from = printed.swap(text.len(), Ordering::Relaxed).min(text.len());
        let mut err = std::io::stderr();
        let _ = write!(err, "{}", &text[from..]);
        let _ = err.flush();
    };
    let echo_fn: &ProgressTextFn = &echo;
    let show_stream = !json && progress == ProgressMode::Human;

    let response = assistant
        .ask_from_notes(AskRequest {
            top_k,
            prefer_local: prefer_local.then_some(true),
            on_local_progress_text: show_stream.then_some(echo_fn),
            ..AskRequest::new(&cfg.notes.owner, question)
        })
        .await;
    if show_stream {
        eprintln!();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_answer(&response);
    }
    Ok(())
}

fn print_answer(response: &AskResponse) {
    println!("{}", response.answer);
    if response.sources.is_empty() {
        return;
    }
    println!();
    println!("[{}] sources:", response.used.as_str());
    for (i, s) in response.sources.iter().enumerate() {
        let page = s
            .page_number
            .map(|p| format!(" p.{}", p))
            .unwrap_or_default();
        println!(
            "{}. [{:.2}] {}{} ({})",
            i + 1,
            s.score,
            s.source_title,
            page,
            s.source_id
        );
        println!("    {}", s.snippet);
    }
}

async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let assistant = assistant(cfg).await?;
    let retrieval = assistant
        .retrieve(&AskRequest {
            top_k,
            ..AskRequest::new(&cfg.notes.owner, query)
        })
        .await?;

    if retrieval.candidates.is_empty() {
        println!("No indexed chunks for owner {}.", cfg.notes.owner);
        return Ok(());
    }

    for (i, sc) in retrieval.candidates.iter().enumerate() {
        let chosen = retrieval.selected.iter().any(|s| s.chunk.id == sc.chunk.id);
        println!(
            "{}{}. [{:.3}] {}  {}",
            if chosen { "*" } else { " " },
            i + 1,
            sc.score,
            sc.chunk.label(),
            sc.chunk.id
        );
    }
    println!();
    println!(
        "match: {}  (top {:.3}, threshold {:.3})",
        retrieval.has_match,
        retrieval.top_score().unwrap_or(0.0),
        assistant.defaults().min_top_score
    );
    println!(
        "selected: {}  context: {} chars  keywords: {}",
        retrieval.selected.len(),
        retrieval.context_text.chars().count(),
        retrieval.keywords.join(", ")
    );
    Ok(())
}

async fn run_remove(cfg: &Config, source_id: &str) -> Result<()> {
    let store = open_store(cfg).await?;
    let embedder = Arc::new(Embedder::from_config(&cfg.embedding)?);
    let indexer = Indexer::from_config(cfg, embedder, store);
    let removed = indexer.remove_source(&cfg.notes.owner, source_id).await?;
    println!("Removed {} chunks of {}.", removed, source_id);
    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    let stats = store.stats().await?;

    println!("{:<20} {:>8} {:>8}", "OWNER", "SOURCES", "CHUNKS");
    for s in &stats {
        println!("{:<20} {:>8} {:>8}", s.owner_id, s.sources, s.chunks);
    }
    if stats.is_empty() {
        println!("(nothing indexed)");
    }

    println!();
    println!(
        "embedding   {} {}",
        cfg.embedding.provider,
        cfg.embedding.model.as_deref().unwrap_or("(default)")
    );
    println!("hosted llm  {} {}", cfg.llm.provider, cfg.llm.model);
    println!(
        "local llm   {} {}",
        if cfg.local_llm.enabled { "enabled" } else { "disabled" },
        cfg.local_llm.model
    );
    println!(
        "web         {} {}",
        if cfg.web.enabled { "enabled" } else { "disabled" },
        cfg.web.url
    );
    println!(
        "chain       {}",
        AnswerChain::from_config(cfg).stage_names().join(" -> ")
    );
    Ok(())
}
