//! Stashy main entry point
//!
//! This is the command-line interface for the Stashy frontier queue.

use anyhow::Context;
use clap::Parser;
use stashy::config::{load_config_with_hash, Config};
use stashy::crawler::{
    HttpFetcher, KeywordScorer, LeaseSweeper, PageFetcher, RelevanceScorer, Worker,
    WorkerSettings,
};
use stashy::output::{load_statistics, print_statistics};
use stashy::storage::QueuePolicy;
use stashy::{DiscoveredLink, FrontierStore, ItemSource, MergeOutcome, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Stashy: an adaptive frontier queue for recursive document ingestion
///
/// Workers claim ranked batches of URLs from a shared SQLite queue, fetch
/// and score them, and feed promising outgoing links back into the
/// frontier.
#[derive(Parser, Debug)]
#[command(name = "stashy")]
#[command(version)]
#[command(about = "An adaptive frontier queue for recursive document ingestion", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the configured base worker id
    #[arg(long, value_name = "ID")]
    worker_id: Option<String>,

    /// Add URLs to the queue and exit
    #[arg(long, value_name = "URL", num_args = 1.., conflicts_with_all = ["dry_run", "stats", "reclaim"])]
    seed: Vec<String>,

    /// Priority for URLs given with --seed
    #[arg(long, default_value_t = 0)]
    priority: i64,

    /// Return expired claims to the queue once and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    reclaim: bool,

    /// Validate config and show what would run without touching the queue
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(worker_id) = cli.worker_id {
        config.worker.worker_id = Some(worker_id);
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.reclaim {
        handle_reclaim(&config)?;
    } else if !cli.seed.is_empty() {
        handle_seed(&config, &cli.seed, cli.priority)?;
    } else {
        handle_run(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("stashy=info,warn"),
            1 => EnvFilter::new("stashy=debug,info"),
            2 => EnvFilter::new("stashy=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let path = Path::new(&config.storage.database_path);
    SqliteStore::new(path, QueuePolicy::from(&config.queue))
        .with_context(|| format!("Failed to open queue database {}", path.display()))
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Stashy Dry Run ===\n");

    println!("Queue:");
    println!("  Batch size: {}", config.queue.batch_size);
    println!("  Max retries: {}", config.queue.max_retries);
    println!("  Lease expiry: {}s", config.queue.lease_expiry_secs);
    println!("  Retry backoff: {}s", config.queue.retry_backoff_secs);

    println!("\nWorkers:");
    println!("  Base id: {}", config.worker.resolved_worker_id());
    println!("  Concurrency: {}", config.worker.concurrency);
    println!("  Poll interval: {}ms", config.worker.poll_interval_ms);
    println!("  Fetch timeout: {}s", config.worker.fetch_timeout_secs);

    println!("\nFrontier:");
    println!("  Max depth: {}", config.frontier.max_depth);
    println!("  Max links per page: {}", config.frontier.max_links);
    println!(
        "  Relevance threshold: {:.2}",
        config.frontier.relevance_threshold
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.storage.database_path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {} (priority {})", seed.url, seed.priority);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_store(config)?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --reclaim mode: a single lease-expiry sweep
fn handle_reclaim(config: &Config) -> anyhow::Result<()> {
    let lease = Duration::from_secs(config.queue.lease_expiry_secs);
    let mut sweeper = LeaseSweeper::new(open_store(config)?, lease);
    let reclaimed = sweeper.sweep()?;

    println!(
        "Reclaimed {} items claimed more than {}s ago",
        reclaimed.len(),
        lease.as_secs()
    );
    Ok(())
}

/// Handles the --seed mode: merges operator-supplied URLs
fn handle_seed(config: &Config, urls: &[String], priority: i64) -> anyhow::Result<()> {
    let mut store = open_store(config)?;

    for url in urls {
        let link = DiscoveredLink::seed(url.as_str(), priority).with_source(ItemSource::Manual);
        match store.merge(&link)? {
            MergeOutcome::Inserted { item_id } => println!("+ {} (item {})", url, item_id),
            MergeOutcome::Updated {
                item_id,
                resurrected,
            } => {
                let note = if resurrected { ", requeued" } else { "" };
                println!("= {} (item {}, already known{})", url, item_id, note);
            }
        }
    }

    Ok(())
}

/// Merges the configured `[[seed]]` entries
fn seed_from_config(store: &mut SqliteStore, config: &Config) -> anyhow::Result<()> {
    let mut inserted = 0;
    for seed in &config.seeds {
        if store
            .merge(&DiscoveredLink::seed(seed.url.as_str(), seed.priority))?
            .inserted()
        {
            inserted += 1;
        }
    }

    tracing::info!(
        "Seeded {} configured URLs ({} new)",
        config.seeds.len(),
        inserted
    );
    Ok(())
}

/// Handles the main run: workers plus lease sweeper until Ctrl-C
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let mut store = open_store(&config)?;
    seed_from_config(&mut store, &config)?;

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(
        &config.user_agent,
        Duration::from_secs(config.worker.fetch_timeout_secs),
    )?);
    let scorer: Arc<dyn RelevanceScorer> = Arc::new(KeywordScorer::from_config(&config.scoring));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let base_id = config.worker.resolved_worker_id();

    tracing::info!(
        "Starting {} workers as {}-*",
        config.worker.concurrency,
        base_id
    );

    let mut workers = Vec::new();
    for i in 0..config.worker.concurrency {
        let settings = WorkerSettings::from_config(&config, format!("{}-{}", base_id, i));
        let mut worker = Worker::new(
            open_store(&config)?,
            Arc::clone(&fetcher),
            Arc::clone(&scorer),
            settings,
        );
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    // The seeding connection becomes the sweeper's
    let mut sweeper = LeaseSweeper::new(
        store,
        Duration::from_secs(config.queue.lease_expiry_secs),
    );
    let sweeper_handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, waiting for workers to finish their current item");
    let _ = shutdown_tx.send(true);

    for handle in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Worker exited with error: {}", e),
            Err(e) => tracing::error!("Worker task panicked: {}", e),
        }
    }
    sweeper_handle.await?;

    tracing::info!("All workers stopped");
    Ok(())
}
