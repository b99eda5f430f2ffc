//! # Scout CLI Application
//!
//! Command-line front end for the scout crawl scheduler.
//!
//! ## Key Components
//!
//! - CLI argument parsing with clap
//! - Subcommands:
//!   - `crawl`: Run or resume a crawl, writing saved URLs to CSV
//!   - `status`: Show how many frontier URLs are in each state
//!   - `requeue`: Return URLs stuck in `processing` to the queue
//!
//! ## Features
//!
//! - JSON configuration file with command-line overrides
//! - Graceful shutdown on Ctrl-C and SIGTERM
//! - Progress bar fed by the crawler's live counters
//! - Optional log file and OTLP telemetry

mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use scout::crawler::{CrawlStats, Crawler, CrawlerConfig, CrawlerConfigBuilder};
use scout::fetch::HttpFetcher;
use scout::frontier::FrontierStore;
use scout::sink::{CsvSink, ProductPageClassifier};
use telemetry::{TelemetryGuard, TelemetryOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about = "Polite, resumable crawler collecting product page URLs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Export traces and metrics over OTLP
    #[arg(long, global = true)]
    otlp: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl from the seeds, or resume the crawl stored in the database
    Crawl(CrawlArgs),

    /// Show frontier counts per status
    Status(StatusArgs),

    /// Put URLs stuck in `processing` back in the queue
    Requeue(RequeueArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed URL (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Domain links may point to (repeatable)
    #[arg(long = "allow-domain")]
    allowed_domains: Vec<String>,

    /// Keyword a link must contain (repeatable)
    #[arg(short, long = "keyword")]
    keywords: Vec<String>,

    /// Stop after saving this many pages
    #[arg(long)]
    max_urls: Option<u64>,

    /// Pages fetched concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Seconds between requests to the same domain
    #[arg(long)]
    delay: Option<f64>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Retries after a failed fetch
    #[arg(long)]
    retries: Option<u32>,

    /// Do not follow links deeper than this
    #[arg(long)]
    max_depth: Option<u32>,

    /// Frontier database
    #[arg(long, default_value = "crawler_queue.db")]
    database: PathBuf,

    /// CSV file receiving saved URLs
    #[arg(short, long, default_value = "collected_urls.csv")]
    output: PathBuf,

    /// Before crawling, requeue URLs stuck in processing for this many seconds
    #[arg(long, value_name = "SECS")]
    recover_stale: Option<u64>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Frontier database
    #[arg(long, default_value = "crawler_queue.db")]
    database: PathBuf,
}

#[derive(Args, Debug)]
struct RequeueArgs {
    /// Only requeue URLs claimed at least this many seconds ago
    #[arg(long, value_name = "SECS")]
    older_than: u64,

    /// Frontier database
    #[arg(long, default_value = "crawler_queue.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let _telemetry: TelemetryGuard = telemetry::init_tracing_subscriber(TelemetryOptions {
        log_file: cli.log_file.as_deref(),
        otlp: cli.otlp,
    })?;

    match cli.command {
        Some(Commands::Crawl(args)) => {
            crawl_command(args).await?;
        }
        Some(Commands::Status(args)) => {
            status_command(args).await?;
        }
        Some(Commands::Requeue(args)) => {
            requeue_command(args).await?;
        }
        None => {
            // If no command is provided, show help
            let _ = Cli::parse_from(["scout", "--help"]);
        }
    }

    Ok(())
}

async fn open_store(path: &std::path::Path) -> anyhow::Result<FrontierStore> {
    FrontierStore::new_from_path(&path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open frontier database {}", path.display()))
}

fn build_config(args: &CrawlArgs) -> anyhow::Result<CrawlerConfig> {
    let base = match &args.config {
        Some(path) => CrawlerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => CrawlerConfig::default(),
    };

    let mut builder = CrawlerConfigBuilder::from_config(base);
    if !args.seeds.is_empty() {
        builder = builder.seeds(args.seeds.iter().cloned());
    }
    if !args.allowed_domains.is_empty() {
        builder = builder.allowed_domains(args.allowed_domains.iter().cloned());
    }
    if !args.keywords.is_empty() {
        builder = builder.keywords(args.keywords.iter().cloned());
    }
    if let Some(max_urls) = args.max_urls {
        builder = builder.max_urls(max_urls);
    }
    if let Some(concurrency) = args.concurrency {
        builder = builder.max_concurrent_tasks(concurrency);
    }
    if let Some(delay) = args.delay {
        builder = builder.per_domain_delay_secs(delay);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.request_timeout_secs(timeout);
    }
    if let Some(retries) = args.retries {
        builder = builder.max_retries(retries);
    }
    if args.max_depth.is_some() {
        builder = builder.max_depth(args.max_depth);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}

#[instrument]
async fn crawl_command(args: CrawlArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let store = open_store(&args.database).await?;

    if let Some(secs) = args.recover_stale {
        let requeued = store.requeue_orphaned(Duration::from_secs(secs)).await?;
        info!(requeued, "Recovered stale URLs");
    }

    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
    let sink = Arc::new(
        CsvSink::open(&args.output, config.id_prefix.clone())
            .with_context(|| format!("Failed to open output file {}", args.output.display()))?,
    );
    if !sink.is_empty().await {
        info!(existing = sink.len().await, path = %sink.path().display(), "Appending to existing output");
    }
    let classifier = Arc::new(ProductPageClassifier::new()?);
    let quota = config.max_urls;

    let crawler = Crawler::new(config, store, fetcher, sink.clone(), classifier)?;

    let shutdown = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_on_signal(shutdown.clone()));

    // Create progress bar
    let progress_bar = ProgressBar::new(quota);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} saved {msg}")?
            .progress_chars("##-"),
    );

    // Spawn a task to follow the crawler's counters
    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        let mut stats = crawler.subscribe_stats();
        async move {
            while stats.changed().await.is_ok() {
                let snapshot = *stats.borrow_and_update();
                progress_bar.set_position(snapshot.saved);
                progress_bar.set_message(format!(
                    "| processed {} | failed {} | queued {}",
                    snapshot.processed, snapshot.failed, snapshot.queued
                ));
            }
        }
    });

    let result = crawler.run(shutdown).await;

    progress_handle.abort();
    signal_handle.abort();
    progress_bar.finish_and_clear();

    let summary = result?;
    println!("Crawl stopped: {}", summary.stop_reason);
    print_stats(&summary.stats);
    println!(
        "{} saved URLs in {}",
        sink.len().await,
        sink.path().display()
    );

    Ok(())
}

fn print_stats(stats: &CrawlStats) {
    println!("  queued:        {}", stats.queued);
    println!("  processed:     {}", stats.processed);
    println!("  saved:         {}", stats.saved);
    println!("  failed:        {}", stats.failed);
    println!("  robots denied: {}", stats.robots_denied);
    println!("  duplicates:    {}", stats.duplicates);
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown requested, finishing in-flight URLs");
    shutdown.cancel();
}

#[instrument]
async fn status_command(args: StatusArgs) -> anyhow::Result<()> {
    let store = open_store(&args.database).await?;
    let counts = store.status_counts().await?;

    println!("Frontier {}", args.database.display());
    println!("  queued:     {}", counts.queued);
    println!("  processing: {}", counts.processing);
    println!("  completed:  {}", counts.completed);
    println!("  failed:     {}", counts.failed);
    println!("  total:      {}", counts.total());

    Ok(())
}

#[instrument]
async fn requeue_command(args: RequeueArgs) -> anyhow::Result<()> {
    let store = open_store(&args.database).await?;
    let requeued = store
        .requeue_orphaned(Duration::from_secs(args.older_than))
        .await?;

    println!(
        "Requeued {} URLs stuck in processing for at least {}s",
        requeued, args.older_than
    );

    Ok(())
}
