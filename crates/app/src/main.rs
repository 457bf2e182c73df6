use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unichunk_core::{
    ask, ingest_path_best_effort, list_collections, open_store, CharacterNgramEmbedder,
    ChatSession, Embedder, GeminiAnswerer, HttpOcrEngine, IngestionReport, OcrEndpointConfig,
    OcrEngine, Pipeline, PipelineOptions, StoreConfig, TesseractCli, VectorStore,
    DEFAULT_EMBEDDING_DIMENSIONS,
};

#[derive(Parser)]
#[command(name = "unichunk", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for page, metadata and chunk exports and extracted images.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Vector backend.
    #[arg(long, value_enum, default_value_t = StoreBackend::Flat)]
    store: StoreBackend,

    /// Where the flat index keeps one snapshot directory per collection.
    #[arg(long, default_value = "output/vector_store")]
    store_dir: PathBuf,

    /// Chroma server base URL.
    #[arg(long, env = "CHROMA_URL", default_value = "http://localhost:8000")]
    chroma_url: String,

    /// Embedding length.
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// Upper bound for each OCR, rasterizer, vector store or language model call.
    #[arg(long, default_value = "60")]
    timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreBackend {
    Flat,
    Chroma,
}

#[derive(Clone, Copy, ValueEnum)]
enum OcrBackend {
    Tesseract,
    Remote,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a PDF or a folder of PDFs and store their chunks.
    Ingest {
        /// PDF file or folder searched recursively.
        #[arg(long)]
        path: PathBuf,
        /// OCR engine for scanned pages.
        #[arg(long, value_enum, default_value_t = OcrBackend::Tesseract)]
        ocr: OcrBackend,
        #[arg(long, env = "LLM_OCR_ENDPOINT")]
        ocr_endpoint: Option<String>,
        #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
        ocr_api_key: Option<String>,
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        #[arg(long, default_value = "100")]
        overlap: usize,
    },
    /// Print the stored chunks nearest to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Restrict to one collection (document id); all by default.
        #[arg(long)]
        collection: Option<String>,
    },
    /// Answer one question from the ingested documents.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
        gemini_api_key: String,
    },
    /// Interactive question loop on stdin; `exit` ends it.
    Chat {
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
        gemini_api_key: String,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        match self.store {
            StoreBackend::Flat => StoreConfig::Flat {
                dimension: self.dimensions,
                directory: Some(self.store_dir.clone()),
            },
            StoreBackend::Chroma => StoreConfig::Chroma {
                endpoint: self.chroma_url.clone(),
                dimension: Some(self.dimensions),
            },
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

async fn within<T, E>(
    limit: Duration,
    what: &str,
    future: impl Future<Output = Result<T, E>>,
) -> anyhow::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.with_context(|| format!("{what} failed")),
        Err(_) => Err(anyhow!("{what} timed out after {}s", limit.as_secs())),
    }
}

async fn open_collections(
    cli: &Cli,
    only: Option<&str>,
) -> anyhow::Result<Vec<(String, Box<dyn VectorStore>)>> {
    let config = cli.store_config();
    let names = match only {
        Some(name) => vec![name.to_string()],
        None => within(cli.timeout(), "listing collections", list_collections(&config)).await?,
    };

    let mut stores = Vec::with_capacity(names.len());
    for name in names {
        let store = within(cli.timeout(), "opening store", open_store(&config, &name)).await?;
        stores.push((name, store));
    }
    Ok(stores)
}

fn run_ingestion(
    path: PathBuf,
    output_dir: PathBuf,
    dimensions: usize,
    ocr: OcrBackend,
    endpoint: Option<OcrEndpointConfig>,
    options: PipelineOptions,
) -> anyhow::Result<IngestionReport> {
    let engine: Box<dyn OcrEngine> = match (ocr, options.external_timeout) {
        (OcrBackend::Tesseract, timeout) => Box::new(TesseractCli {
            timeout,
            ..TesseractCli::default()
        }),
        (OcrBackend::Remote, Some(limit)) => {
            Box::new(HttpOcrEngine::new(endpoint).with_timeout(limit)?)
        }
        (OcrBackend::Remote, None) => Box::new(HttpOcrEngine::new(endpoint)),
    };
    let embedder = CharacterNgramEmbedder { dimensions };
    let pipeline = Pipeline::new(engine.as_ref(), &embedder, options);

    let report = ingest_path_best_effort(&path, &pipeline)?;
    for ingested in &report.documents {
        ingested.run.export(&output_dir)?;
    }
    Ok(report)
}

async fn ingest(
    cli: &Cli,
    path: &Path,
    ocr: OcrBackend,
    endpoint: Option<OcrEndpointConfig>,
    chunk_size: usize,
    overlap: usize,
) -> anyhow::Result<()> {
    let options = PipelineOptions {
        chunk_size,
        chunk_overlap: overlap,
        image_dir: Some(cli.output_dir.join("images")),
        external_timeout: Some(cli.timeout()),
        ..PipelineOptions::default()
    };

    let path = path.to_path_buf();
    let output_dir = cli.output_dir.clone();
    let dimensions = cli.dimensions;
    let report = tokio::task::spawn_blocking(move || {
        run_ingestion(path, output_dir, dimensions, ocr, endpoint, options)
    })
    .await
    .context("ingestion worker panicked")??;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }

    let config = cli.store_config();
    let mut total = 0;
    for mut ingested in report.documents {
        let document_id = ingested.fingerprint.document_id.clone();
        for page in ingested.run.degraded_pages() {
            for issue in &page.issues {
                warn!(
                    document = %document_id,
                    page = page.page_no,
                    stage = ?issue.stage,
                    details = %issue.details,
                    "degraded page"
                );
            }
        }

        let store =
            within(cli.timeout(), "opening store", open_store(&config, &document_id)).await?;
        let written =
            within(cli.timeout(), "storing chunks", ingested.run.store(store.as_ref())).await?;
        println!("{document_id}: {written} chunks stored");
        total += written;
    }

    println!(
        "{total} chunks ingested, {} files skipped, at {}",
        report.skipped_files.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn search(
    cli: &Cli,
    query: &str,
    top_k: usize,
    collection: Option<&str>,
) -> anyhow::Result<()> {
    let embedder = CharacterNgramEmbedder {
        dimensions: cli.dimensions,
    };
    let vector = embedder.embed(query);

    for (name, store) in open_collections(cli, collection).await? {
        let hits = within(cli.timeout(), "query", store.query(&vector, top_k)).await?;
        println!("collection: {name}");
        for hit in hits {
            let page = hit.get("page_no").map(ToString::to_string).unwrap_or_default();
            let kind = hit.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            let content = hit.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            println!("  [page {page}] ({kind})\n{content}");
        }
    }
    Ok(())
}

async fn answer_once(
    cli: &Cli,
    session: &mut ChatSession,
    answerer: &GeminiAnswerer,
    stores: &[(String, Box<dyn VectorStore>)],
    question: &str,
) -> anyhow::Result<()> {
    let embedder = CharacterNgramEmbedder {
        dimensions: cli.dimensions,
    };
    let views: Vec<&dyn VectorStore> = stores.iter().map(|(_, store)| store.as_ref()).collect();

    let reply = within(
        cli.timeout(),
        "answering",
        ask(session, question, &views, &embedder, answerer),
    )
    .await?;

    println!("{}", reply.answer.trim());
    for (index, reference) in reply.references.iter().enumerate() {
        let page = reference
            .page_no
            .map(|page| page.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("  reference {}: {} page {page}", index + 1, reference.pdf_name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "unichunk boot"
    );

    match &cli.command {
        Command::Ingest {
            path,
            ocr,
            ocr_endpoint,
            ocr_api_key,
            chunk_size,
            overlap,
        } => {
            let endpoint = ocr_endpoint
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|endpoint| OcrEndpointConfig {
                    endpoint: endpoint.to_string(),
                    api_key: ocr_api_key
                        .as_deref()
                        .map(str::trim)
                        .filter(|key| !key.is_empty())
                        .map(str::to_string),
                });
            ingest(&cli, path, *ocr, endpoint, *chunk_size, *overlap).await?;
        }
        Command::Search {
            query,
            top_k,
            collection,
        } => {
            search(&cli, query, *top_k, collection.as_deref()).await?;
        }
        Command::Ask {
            question,
            gemini_api_key,
        } => {
            let answerer = GeminiAnswerer::new(gemini_api_key.as_str())?;
            let stores = open_collections(&cli, None).await?;
            let mut session = ChatSession::new();
            answer_once(&cli, &mut session, &answerer, &stores, question).await?;
        }
        Command::Chat { gemini_api_key } => {
            let answerer = GeminiAnswerer::new(gemini_api_key.as_str())?;
            let stores = open_collections(&cli, None).await?;
            let mut session = ChatSession::new();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();

            loop {
                stdout.write_all(b"> ").await?;
                stdout.flush().await?;

                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                if matches!(question, "exit" | "quit") {
                    break;
                }

                let answered = answer_once(&cli, &mut session, &answerer, &stores, question).await;
                if let Err(error) = answered {
                    warn!(%error, "question failed");
                    println!("error: {error:#}");
                }
            }
        }
    }

    Ok(())
}
