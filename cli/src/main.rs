//! `docsort`: classify documents by nearest-neighbor search over cached
//! embeddings, and export similarity reports.

mod loader;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsort_classifier::report::{render_matrix, render_pairs, render_predictions, write_report};
use docsort_classifier::{ClassifierConfig, DocumentProcessor, SimilarityAnalyzer};
use docsort_embeddings::{EmbeddingCache, OpenAIProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docsort", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train on labeled folders, then classify a folder of documents.
    Classify(ClassifyArgs),

    /// Similarity of every pair of cached embeddings.
    Pairs(PairsArgs),

    /// Training × query similarity matrix.
    Matrix(MatrixArgs),
}

#[derive(Debug, clap::Args)]
struct ClassifyArgs {
    /// Directory with one subdirectory of `.txt` documents per label.
    #[arg(long)]
    train: PathBuf,

    /// Directory of `.txt` documents to classify.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the predictions CSV.
    #[arg(long, default_value = "output/predictions.csv")]
    output: PathBuf,

    /// Embedding cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Number of neighbors.
    #[arg(short)]
    k: Option<usize>,

    /// Documents embedded in parallel.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Debug, clap::Args)]
struct PairsArgs {
    /// Directory of embedding records (defaults to the cache directory).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Where to write the CSV (defaults to `<dir>/SimilarityResults.csv`).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct MatrixArgs {
    /// Records used as rows.
    #[arg(long)]
    train_dir: PathBuf,

    /// Records used as columns.
    #[arg(long)]
    query_dir: PathBuf,

    /// Where to write the CSV.
    #[arg(long, default_value = "SimilarityMatrix.csv")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => ClassifierConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClassifierConfig::default(),
    };

    match cli.command {
        Command::Classify(args) => classify(config, args).await,
        Command::Pairs(args) => pairs(&config, args).await,
        Command::Matrix(args) => matrix(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn classify(mut config: ClassifierConfig, args: ClassifyArgs) -> Result<()> {
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;

    let api_key = std::env::var(&config.provider.api_key_env).with_context(|| {
        format!(
            "the embedding API key is not set; export {}",
            config.provider.api_key_env
        )
    })?;
    let provider = OpenAIProvider::new(api_key)
        .with_base_url(&config.provider.base_url)
        .with_model(&config.provider.model)
        .with_chunk_size(config.provider.chunk_size);

    let cache = EmbeddingCache::new(&config.cache_dir, Arc::new(provider))
        .await
        .with_context(|| format!("opening cache {}", config.cache_dir.display()))?;
    let mut processor = DocumentProcessor::new(Arc::new(cache), &config);

    let training = loader::load_training(&args.train)?;
    let queries = loader::load_queries(&args.input)?;

    let report = processor.train(training).await;
    if report.trained == 0 {
        warn!("No usable training documents; every prediction will be unknown");
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if forward_interrupts(on_ctrl_c, tokio::signal::ctrl_c).await {
            warn!("Aborted");
            std::process::exit(130);
        }
    });

    let results = processor.classify(queries, cancel).await;
    write_report(&args.output, &render_predictions(&results)?).await?;

    let classified = results.iter().filter(|r| r.prediction().is_some()).count();
    info!(
        "Classified {classified} of {} documents, predictions saved to {}",
        results.len(),
        args.output.display()
    );
    Ok(())
}

/// Cancel `cancel` on the first interrupt, then wait for another.
///
/// Returns `true` when a second interrupt arrives.
async fn forward_interrupts<F, Fut>(cancel: CancellationToken, mut interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted, finishing documents already in progress (Ctrl-C again to abort)");
    cancel.cancel();

    interrupt().await.is_ok()
}

async fn pairs(config: &ClassifierConfig, args: PairsArgs) -> Result<()> {
    let dir = args.cache_dir.unwrap_or_else(|| config.cache_dir.clone());
    let output = args
        .output
        .unwrap_or_else(|| dir.join("SimilarityResults.csv"));

    let analyzer = load_analyzer(&dir).await?;
    let pairs = analyzer.pairs();
    write_report(&output, &render_pairs(&pairs)?).await?;

    info!("Wrote {} pairs to {}", pairs.len(), output.display());
    Ok(())
}

async fn matrix(args: MatrixArgs) -> Result<()> {
    let training = load_analyzer(&args.train_dir).await?;
    let queries = load_analyzer(&args.query_dir).await?;

    let matrix = training.matrix(&queries);
    write_report(&args.output, &render_matrix(&matrix)?).await?;

    info!(
        "Wrote {}x{} matrix to {}",
        matrix.rows.len(),
        matrix.columns.len(),
        args.output.display()
    );
    Ok(())
}

async fn load_analyzer(dir: &Path) -> Result<SimilarityAnalyzer> {
    SimilarityAnalyzer::from_dir(dir)
        .await
        .with_context(|| format!("loading embeddings from {}", dir.display()))
}
