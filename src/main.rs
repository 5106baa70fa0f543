//! # Study Planner CLI (`planner`)
//!
//! Turns PDF course material into a day-by-day study plan with per-topic
//! PDF excerpts.
//!
//! ## Usage
//!
//! ```bash
//! planner --config ./config/planner.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `planner init` | Create the SQLite database and schema |
//! | `planner generate` | Run the full pipeline over PDFs and store the project |
//! | `planner pages <files>` | Print the global page index |
//! | `planner chunk <file>` | Cut a page subset into a new PDF |
//! | `planner list` | List stored projects |
//! | `planner show <id>` | Print a stored project as JSON |
//! | `planner delete <id>` | Delete a project, its topics and blobs no other project uses |
//!
//! ## Examples
//!
//! ```bash
//! planner init
//! planner generate --exam "Private Law" --days 10 ./slides/
//! planner chunk book.pdf --pages 12-30 --title "Contracts" --out ./out
//! planner show 0b6c…
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use study_planner::ai;
use study_planner::blob_fs::FsBlobStore;
use study_planner::chunk::extract_chunk;
use study_planner::config;
use study_planner::db;
use study_planner::extract::{collect_pdf_paths, display_name, load_pdf, page_index_for};
use study_planner::generate::{generate_plan, InputFile, PlanRequest, PlanServices};
use study_planner::migrate;
use study_planner::progress::ProgressMode;
use study_planner::purge::purge_project;
use study_planner::sqlite_store::SqliteDocumentStore;
use study_planner_core::cache::PhaseCache;
use study_planner_core::chunk::{chunk_file_name, normalize_page_list, parse_page_spec};
use study_planner_core::store::DocumentStore;

/// Study Planner: PDF material in, page-accurate study plan out.
#[derive(Parser)]
#[command(
    name = "planner",
    about = "Study Planner: turn PDF course material into a page-accurate study plan",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/planner.toml`. A missing file means built-in
    /// defaults with the AI provider disabled.
    #[arg(long, global = true, default_value = "./config/planner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Generate a study plan from PDFs.
    ///
    /// Directories are walked for `*.pdf`, sorted by path. Files keep the
    /// order given on the command line; that order defines page markers.
    Generate {
        /// Name of the exam the plan prepares for.
        #[arg(long)]
        exam: String,

        /// Number of study days.
        #[arg(long)]
        days: u32,

        /// Free-text notes passed to synthesis and distribution.
        #[arg(long)]
        notes: Option<String>,

        /// Project name (defaults to the exam name).
        #[arg(long)]
        name: Option<String>,

        /// Progress on stderr: off, human, json. Default: human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the full summary as JSON instead of a day table.
        #[arg(long)]
        json: bool,

        /// PDF files or directories.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print the global page index of one or more PDFs.
    Pages {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Extract a page subset of a PDF into a new file.
    Chunk {
        file: PathBuf,

        /// Pages to keep, e.g. `1,3-5`.
        #[arg(long)]
        pages: String,

        /// Topic title used in the output file name.
        #[arg(long, default_value = "topic")]
        title: String,

        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// List stored projects, newest first.
    List,

    /// Print a stored project as JSON.
    Show { id: String },

    /// Delete a stored project, its topics, and blobs no other project uses.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Pages { files } => return print_pages(files),
        Commands::Chunk {
            file,
            pages,
            title,
            out,
        } => return write_chunk(file, pages, title, out),
        _ => {}
    }

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.storage.db_path.display());
        }
        Commands::Generate {
            exam,
            days,
            notes,
            name,
            progress,
            json,
            inputs,
        } => {
            let paths = collect_pdf_paths(&inputs)?;
            if paths.is_empty() {
                bail!("No PDF files found in the given inputs");
            }
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                files.push(InputFile {
                    name: display_name(path),
                    bytes,
                });
            }

            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping after the current step");
                    on_interrupt.cancel();
                }
            });

            let services = PlanServices {
                model: ai::create_model(&cfg.ai)?,
                blobs: Arc::new(FsBlobStore::open(&cfg.storage.blob_dir).await?),
                documents: Arc::new(SqliteDocumentStore::new(pool.clone())),
                cache: Arc::new(PhaseCache::new()),
                progress: progress
                    .unwrap_or_else(ProgressMode::default_for_tty)
                    .reporter()
                    .into(),
                cancel,
            };
            let request = PlanRequest {
                name,
                exam_name: exam,
                total_days: days,
                user_notes: notes,
                files,
            };
            let summary = generate_plan(&cfg, &services, request).await?;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Project {} ({} topics, quality {:.2})",
                    summary.project_id,
                    summary.project.topics.len(),
                    summary.quality_score
                );
                for day in summary.project.daily_plan.keys() {
                    let titles: Vec<&str> = summary
                        .project
                        .topics_for_day(*day)
                        .into_iter()
                        .map(|t| t.title.as_str())
                        .collect();
                    println!("  day {:>2}: {}", day, titles.join(" | "));
                }
                if !summary.project.unassigned.is_empty() {
                    println!("  unassigned: {}", summary.project.unassigned.len());
                }
                println!(
                    "  chunks: {}  failed chunks: {}  whole-file fallbacks: {}",
                    summary.chunks, summary.error_chunks, summary.fallbacks
                );
                for warning in &summary.warnings {
                    println!("  warning: {}", warning);
                }
            }
        }
        Commands::List => {
            let store = open_store(&cfg).await?;
            let projects = store.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for p in projects {
                println!(
                    "{}  {}  {} days  {} topics  {}",
                    p.id,
                    p.name,
                    p.total_days,
                    p.topic_count,
                    p.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Show { id } => {
            let store = open_store(&cfg).await?;
            match store.get_project(&id).await? {
                Some(project) => println!("{}", serde_json::to_string_pretty(&project)?),
                None => bail!("Project not found: {}", id),
            }
        }
        Commands::Delete { id } => {
            let store = open_store(&cfg).await?;
            let blobs = FsBlobStore::open(&cfg.storage.blob_dir).await?;
            match purge_project(&store, &blobs, &id).await? {
                Some(purged) => println!(
                    "Deleted project {} ({} blobs removed, {} shared blobs kept)",
                    id, purged.blobs_deleted, purged.blobs_kept
                ),
                None => bail!("Project not found: {}", id),
            }
        }
        Commands::Pages { .. } | Commands::Chunk { .. } => {}
    }

    Ok(())
}

async fn open_store(cfg: &config::Config) -> anyhow::Result<SqliteDocumentStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    Ok(SqliteDocumentStore::new(pool))
}

fn print_pages(files: &[PathBuf]) -> anyhow::Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for (index, path) in files.iter().enumerate() {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let source = load_pdf(index, &display_name(path), bytes)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        sources.push(source);
    }

    let index = page_index_for(&sources);
    println!("{:>6}  {:>4}  {:>5}  {:>6}  FILE", "MARKER", "IDX", "PAGE", "CHARS");
    for entry in index.entries() {
        let name = index
            .file(entry.file_index)
            .map(|f| f.name.as_str())
            .unwrap_or("?");
        let status = entry
            .extraction_error
            .as_deref()
            .map(|e| format!("  (no text: {})", e))
            .unwrap_or_default();
        println!(
            "{:>6}  {:>4}  {:>5}  {:>6}  {}{}",
            entry.marker,
            entry.file_index,
            entry.local_page,
            entry.text.chars().count(),
            name,
            status
        );
    }
    println!("{} pages across {} file(s)", index.total_markers(), index.files().len());
    Ok(())
}

fn write_chunk(file: &Path, pages: &str, title: &str, out: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let page_count = lopdf::Document::load_mem(&bytes)
        .with_context(|| format!("Not a readable PDF: {}", file.display()))?
        .get_pages()
        .len() as u32;
    let requested = parse_page_spec(pages, page_count).map_err(anyhow::Error::msg)?;
    let kept = normalize_page_list(&requested, page_count);
    let (Some(&first), Some(&last)) = (kept.first(), kept.last()) else {
        bail!("No requested page lies within 1..={}", page_count);
    };

    let chunk = extract_chunk(&bytes, &requested)?;
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let target = out.join(chunk_file_name(&display_name(file), title, first, last));
    std::fs::write(&target, &chunk)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("{} ({} pages, {} bytes)", target.display(), kept.len(), chunk.len());
    Ok(())
}
