//! # docqa CLI
//!
//! The `docqa` binary drives the knowledge base from the command line:
//! ingest documents, ask grounded questions, inspect and prune the index.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the upload directory and vector index |
//! | `docqa ingest <files...>` | Ingest PDF, DOCX or TXT files |
//! | `docqa ask "<question>"` | Answer questions from the ingested documents |
//! | `docqa search "<query>"` | Show the top-K matching chunks |
//! | `docqa usage` | Upload directory size and file count |
//! | `docqa list` | Indexed documents and stored uploads |
//! | `docqa remove <file>` | Remove a document from the index and uploads |
//! | `docqa reindex` | Re-embed every chunk with the configured provider |
//!
//! Logs go to stderr; set `RUST_LOG=docqa=debug` for pipeline detail.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::config;
use docqa::models::UploadedFile;
use docqa::KnowledgeBase;

/// docqa: ask questions about your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults plus environment overrides
/// (`UPLOAD_DIR`, `VECTORSTORE_DIR`, `MAX_FILE_SIZE_MB`,
/// `MAX_TOTAL_SIZE_MB`, `MAX_FILES`).
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Ingest PDF, DOCX and TXT documents and answer questions grounded in them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the upload directory and the vector index. Idempotent.
    Init,

    /// Ingest one or more files as a single batch.
    ///
    /// The batch is rejected as a whole if it would exceed the configured
    /// file-count or total-size quota. Individual files that cannot be read
    /// or extracted are reported and skipped.
    Ingest {
        /// Files to ingest (.pdf, .docx, .txt).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer one or more questions from the ingested documents.
    Ask {
        #[arg(required = true)]
        questions: Vec<String>,
    },

    /// Show the chunks most similar to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long, short)]
        k: Option<usize>,
    },

    /// Report upload directory usage.
    Usage,

    /// List indexed documents and stored uploads.
    List,

    /// Remove every indexed document with this file name, and its upload.
    Remove { file_name: String },

    /// Re-embed all chunks. Use after changing the embedding provider.
    Reindex,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = config::load_config(&cli.config)?;
    let kb = KnowledgeBase::open(cfg).await?;
    let json = cli.json;

    let code = match cli.command {
        Commands::Init => {
            println!("Knowledge base initialized.");
            println!("    uploads: {}", kb.config().storage.upload_dir.display());
            println!("    index: {}", kb.config().storage.index_path().display());
            ExitCode::SUCCESS
        }
        Commands::Ingest { paths } => {
            let files = paths.into_iter().map(UploadedFile::from_path).collect();
            let outcome = kb.ingest_documents(files).await;
            if let Err(docqa::Error::BatchAborted { committed, .. }) = &outcome {
                for file in committed {
                    println!("ingested {} before the batch stopped", file.file_name);
                }
            }
            let result = outcome?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for file in &result.processed {
                    println!(
                        "ingested {} ({} chunks, {} chars)",
                        file.file_name, file.chunk_count, file.char_count
                    );
                }
                for error in &result.errors {
                    println!("failed {}: {}", error.file_name, error.message);
                }
                println!(
                    "{} succeeded, {} failed",
                    result.success_count, result.error_count
                );
            }
            if result.error_count > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Ask { questions } => {
            for question in &questions {
                let answer = kb.answer_question(question).await;
                if json {
                    println!("{}", serde_json::to_string(&answer)?);
                    continue;
                }
                println!("Q: {}", question);
                println!("A: {}", answer.answer);
                for (i, source) in answer.sources.iter().enumerate() {
                    println!(
                        "    [{}] {} #{} ({:.2})",
                        i + 1,
                        source.file_name,
                        source.chunk_index,
                        source.score
                    );
                }
                println!();
            }
            ExitCode::SUCCESS
        }
        Commands::Search { query, k } => {
            let hits = kb.search(&query, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] {} #{}",
                        i + 1,
                        hit.score,
                        hit.file_name,
                        hit.chunk.chunk_index
                    );
                    println!(
                        "    excerpt: \"{}\"",
                        hit.chunk.text.replace('\n', " ").trim()
                    );
                    println!();
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Usage => {
            let (megabytes, count) = kb.get_total_upload_usage()?;
            let storage = &kb.config().storage;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "total_mb": megabytes,
                        "file_count": count,
                        "max_total_mb": storage.max_total_size_mb(),
                        "max_files": storage.max_files,
                    })
                );
            } else {
                println!(
                    "{:.2} MB of {} MB, {} of {} files",
                    megabytes,
                    storage.max_total_size_mb(),
                    count,
                    storage.max_files
                );
            }
            ExitCode::SUCCESS
        }
        Commands::List => {
            let documents = kb.list_documents().await?;
            let uploads = kb.list_uploads()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "documents": documents,
                        "uploads": uploads,
                    }))?
                );
            } else {
                println!("Documents ({}):", documents.len());
                for entry in &documents {
                    let date = chrono::DateTime::from_timestamp(entry.document.ingested_at, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!(
                        "    {}  {} chunks  {}  {}",
                        entry.document.file_name, entry.chunk_count, date, entry.document.id
                    );
                }
                println!("Uploads ({}):", uploads.len());
                for file in &uploads {
                    println!("    {}  {} bytes", file.file_name, file.byte_size);
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Remove { file_name } => {
            let removal = kb.remove_document(&file_name).await?;
            if removal.documents == 0 && !removal.file_deleted {
                println!("Nothing named {} to remove.", file_name);
                ExitCode::FAILURE
            } else {
                println!(
                    "Removed {} document(s){}.",
                    removal.documents,
                    if removal.file_deleted {
                        " and the stored upload"
                    } else {
                        ""
                    }
                );
                ExitCode::SUCCESS
            }
        }
        Commands::Reindex => {
            let count = kb.reindex().await?;
            println!("Re-embedded {} chunks.", count);
            ExitCode::SUCCESS
        }
    };

    kb.close().await;
    Ok(code)
}
