use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docqa_core::{
    ingest_documents, AskOutcome, CharacterNgramEmbedder, ChatSettings, ChunkingConfig,
    CompletionService, Embedder, FolderSource, IndexError, IngestError, IngestMode,
    IngestionReport, OpenAiChatCompletion, OpenAiConfig, OpenAiEmbedder, PassageFormat,
    PipelineOptions, ProjectCatalog, QaError, QaPipeline, SqliteVectorIndex, VectorIndex,
    DEFAULT_API_BASE, DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_MAX_RETRIES, DEFAULT_TOP_K,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod server;

type Pipeline =
    QaPipeline<SqliteVectorIndex, Box<dyn Embedder>, Box<dyn CompletionService>>;

const PROMPT: &str = "Enter your question (or 'quit' to exit, 'update' to reprocess documents): ";

#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions about your own documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Folder scanned recursively for text and PDF documents.
    #[arg(long, env = "DOCQA_DOCS_DIR", default_value = "Documents")]
    docs_dir: PathBuf,

    /// SQLite file holding the embedding index.
    #[arg(long, env = "DOCQA_INDEX_PATH", default_value = ".docqa/index.sqlite3")]
    index_path: PathBuf,

    /// Optional project catalog appended to project questions.
    #[arg(long, env = "DOCQA_PROJECTS_FILE", default_value = "projects.json")]
    projects_file: PathBuf,

    #[arg(long, env = "DOCQA_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, env = "DOCQA_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Passages retrieved per question.
    #[arg(long, env = "DOCQA_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Character budget for the retrieved context.
    #[arg(long, env = "DOCQA_MAX_CONTEXT_CHARS", default_value_t = DEFAULT_MAX_CONTEXT_CHARS)]
    max_context_chars: usize,

    /// Leave out the `Document: ...` line above each passage.
    #[arg(long, default_value_t = false)]
    plain_context: bool,

    #[arg(long, env = "DOCQA_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Requested embedding size. Defaults to the model's native size for
    /// `openai` and 128 for `ngram`.
    #[arg(long, env = "DOCQA_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "DOCQA_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    #[arg(long, env = "DOCQA_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    #[arg(long, env = "DOCQA_MAX_TOKENS", default_value_t = 500)]
    max_tokens: u32,

    /// Replaces the built-in system prompt.
    #[arg(long, env = "DOCQA_SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    #[arg(long, env = "OPENAI_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-request timeout for the embedding and chat services.
    #[arg(long, env = "DOCQA_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Retries after a rate limit, server or network error.
    #[arg(long, env = "DOCQA_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Index the documents, then answer questions interactively (default).
    Chat,
    /// Bring the index up to date with the documents folder.
    Ingest {
        /// Keep index entries for documents that are no longer in the folder.
        #[arg(long, default_value_t = false)]
        incremental: bool,
    },
    /// Answer a single question from the current index.
    Ask {
        question: String,
    },
    /// Delete the index store and index every document again.
    Rebuild,
    /// Serve `/ask`, `/update`, `/warmup` and `/health` over HTTP.
    Serve {
        #[arg(long, env = "DOCQA_BIND", default_value = "127.0.0.1:8000")]
        bind: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// OpenAI-compatible embeddings endpoint.
    Openai,
    /// Local character n-gram hashing, no network.
    Ngram,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    let chunking = ChunkingConfig::new(cli.chunk_size, cli.chunk_overlap)?;
    let passage_format = if cli.plain_context {
        PassageFormat::Plain
    } else {
        PassageFormat::WithSource
    };
    let options = PipelineOptions::new(chunking, cli.top_k, cli.max_context_chars)?
        .with_passage_format(passage_format);
    let source = FolderSource::new(&cli.docs_dir);

    match cli.command.clone().unwrap_or(Command::Chat) {
        Command::Ingest { incremental } => {
            let mode = if incremental {
                IngestMode::Incremental
            } else {
                IngestMode::Full
            };
            index_only(&cli, &source, chunking, mode).await?;
        }
        Command::Rebuild => {
            remove_store(&cli.index_path)?;
            index_only(&cli, &source, chunking, IngestMode::Full).await?;
        }
        Command::Ask { question } => {
            let pipeline = build_pipeline(&cli, options)?;
            let outcome = pipeline.ask(&question).await?;
            print_outcome(&outcome);
            pipeline.into_index().close()?;
        }
        Command::Chat => {
            let mut pipeline = build_pipeline(&cli, options)?;
            println!("Processing documents in {}...", cli.docs_dir.display());
            match pipeline.ingest(&source, IngestMode::Full).await {
                Ok(report) => print_report(&report),
                Err(IngestError::Index(error)) => return Err(error.into()),
                Err(error) => {
                    warn!(%error, "startup indexing failed, answering from the existing index");
                    println!("Could not process documents: {error}");
                }
            }
            chat(&mut pipeline, &source).await?;
            pipeline.into_index().close()?;
        }
        Command::Serve { bind } => {
            let pipeline = build_pipeline(&cli, options)?;
            server::run_server(&bind, server::AppState::new(pipeline, source)).await?;
        }
    }

    Ok(())
}

fn openai_config(cli: &Cli) -> anyhow::Result<OpenAiConfig> {
    let api_key = cli.api_key.clone().unwrap_or_default();
    let config = OpenAiConfig::new(&cli.api_base, api_key)?
        .with_timeout(Duration::from_secs(cli.timeout_secs))
        .with_max_retries(cli.max_retries);
    Ok(config)
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match cli.embedder {
        EmbedderKind::Openai => Box::new(OpenAiEmbedder::new(
            &openai_config(cli)?,
            cli.embedding_model.clone(),
            cli.embedding_dimensions,
        )?),
        EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder {
            dimensions: cli
                .embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        }),
    };
    Ok(embedder)
}

fn build_pipeline(cli: &Cli, options: PipelineOptions) -> anyhow::Result<Pipeline> {
    let index = SqliteVectorIndex::open(&cli.index_path)?;
    info!(path = index.location(), entries = index.len()?, "index opened");

    let completion: Box<dyn CompletionService> = Box::new(OpenAiChatCompletion::new(
        &openai_config(cli)?,
        ChatSettings {
            model: cli.chat_model.clone(),
            temperature: cli.temperature,
            max_tokens: cli.max_tokens,
        },
    )?);

    let mut pipeline = QaPipeline::new(index, build_embedder(cli)?, completion, options)
        .with_projects(ProjectCatalog::load(&cli.projects_file));
    if let Some(system_prompt) = &cli.system_prompt {
        pipeline = pipeline.with_system_prompt(system_prompt.clone());
    }
    pipeline.check_embedder()?;
    Ok(pipeline)
}

/// Ingest without a chat client, so an API key is only needed for the
/// `openai` embedder.
async fn index_only(
    cli: &Cli,
    source: &FolderSource,
    chunking: ChunkingConfig,
    mode: IngestMode,
) -> anyhow::Result<()> {
    let mut index = SqliteVectorIndex::open(&cli.index_path)?;
    let embedder = build_embedder(cli)?;

    let report = ingest_documents(source, &mut index, &embedder, chunking, mode).await?;
    print_report(&report);
    index.close()?;
    Ok(())
}

fn remove_store(path: &Path) -> anyhow::Result<()> {
    let mut removed = 0;
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            fs::remove_file(&candidate)?;
            removed += 1;
        }
    }
    info!(path = %path.display(), files = removed, "index store removed");
    Ok(())
}

async fn chat(pipeline: &mut Pipeline, source: &FolderSource) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("\n{PROMPT}");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" => break,
            "update" => {
                println!("Reprocessing documents...");
                match pipeline.ingest(source, IngestMode::Incremental).await {
                    Ok(report) => print_report(&report),
                    Err(IngestError::Index(error)) => return Err(error.into()),
                    Err(error) => println!("Update failed: {error}"),
                }
            }
            _ => match pipeline.ask(input).await {
                Ok(outcome) => print_outcome(&outcome),
                Err(error) if ends_session(&error) => return Err(error.into()),
                Err(QaError::Index(error @ IndexError::Schema { .. })) => {
                    println!("\n{error}. Run `docqa rebuild` after changing the embedding model.");
                }
                Err(error) if error.is_timeout() => {
                    println!("\n{error}. Ask again to retry.");
                }
                Err(error) => {
                    error!(%error, "question failed");
                    println!("\nUnable to answer: {error}");
                }
            },
        }
    }

    println!("Goodbye.");
    Ok(())
}

/// Whether a failed question leaves the index unusable for the rest of the
/// session.
fn ends_session(error: &QaError) -> bool {
    matches!(
        error,
        QaError::Index(IndexError::Corrupt { .. } | IndexError::Storage(_) | IndexError::Io(_))
    )
}

fn print_outcome(outcome: &AskOutcome) {
    if !outcome.context.is_empty() {
        println!("\n--- Retrieved Context ---");
        println!("{}", outcome.context);
        println!("--- End of Context ---");
    }
    println!("\nAnswer: {}", outcome.answer);
}

fn print_report(report: &IngestionReport) {
    println!(
        "{} document(s) found: {} indexed ({} chunks embedded), {} unchanged, {} empty, {} removed, {} failed",
        report.discovered,
        report.indexed,
        report.chunks_embedded,
        report.unchanged,
        report.empty,
        report.removed,
        report.failed_count()
    );
    for failed in &report.failed {
        println!("  skipped {}: {}", failed.document_id, failed.reason);
    }
}
