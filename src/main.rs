//! stac-spider main entry point
//!
//! This is the command-line interface for the stac-spider crawler.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use stac_spider::config::{load_config, validate, Config};
use stac_spider::operations::{self, DateIndex, FeatureWriter, Sampler};
use stac_spider::url::to_directory_url;
use stac_spider::{Cache, StacSpider, StorageRegistry};
use tracing_subscriber::EnvFilter;
use url::Url;

/// stac-spider: A concurrent STAC catalog crawler
///
/// Walks catalogs, collections and items from local disk or HTTP, reading
/// every document once through a disk cache. Seeds are read from standard
/// input (one per line) and from the positional arguments.
#[derive(Parser, Debug)]
#[command(name = "stac-spider")]
#[command(version)]
#[command(about = "A concurrent STAC catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Maximum number of documents fetched at the same time
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Outstanding task count above which discovery blocks
    #[arg(long, global = true)]
    max_queue_size: Option<usize>,

    /// Directory of the document cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Print the crawl statistics when done
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the seeds and count what was found
    Crawl(SeedArgs),

    /// Summarise items by their created and updated timestamps
    Dates {
        #[command(flatten)]
        seeds: SeedArgs,

        /// Hosts collections may be served from; any other host is an error
        #[arg(long = "allow-host", value_name = "HOST")]
        allowed_hosts: Vec<String>,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export every item as a GeoJSON feature
    Features {
        #[command(flatten)]
        seeds: SeedArgs,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Randomly sample the public catalogs of a STAC index
    Sample {
        /// Catalog listing to seed from
        #[arg(long, default_value = operations::DEFAULT_INDEX)]
        index: String,
    },
}

#[derive(Args, Debug)]
struct SeedArgs {
    /// STAC .json documents, or .txt files listing collection prefixes
    #[arg(value_name = "SEED")]
    seeds: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = build_config(&cli)?;
    let storage = Arc::new(
        StorageRegistry::with_defaults(&config.user_agent)
            .context("Failed to build storage backends")?,
    );
    let cache = Arc::new(Cache::new(&config.cache.directory, Arc::clone(&storage)));
    let spider = StacSpider::new(config.crawler.clone(), cache);

    tracing::info!(
        "Crawling with concurrency {}, max queue size {}, cache {}",
        config.crawler.concurrency,
        config.crawler.max_queue_size,
        config.cache.directory.display()
    );

    match cli.command {
        Command::Crawl(args) => {
            submit_seeds(&spider, &args).await?;
            finish(&spider, cli.stats).await?;
        }
        Command::Dates {
            seeds,
            allowed_hosts,
            output,
        } => {
            let output = output.unwrap_or_else(|| config.output.directory.clone());
            let output = to_directory_url(&output)?;
            let index = DateIndex::new(output, Arc::clone(&storage), allowed_hosts);
            index.attach(&spider);

            submit_seeds(&spider, &seeds).await?;
            finish(&spider, cli.stats).await?;
        }
        Command::Features { seeds, output } => {
            let output = output.unwrap_or_else(|| config.output.directory.clone());
            let writer = FeatureWriter::create(output.join("features.geojson"))
                .await
                .context("Failed to create feature output")?;
            writer.attach(&spider);

            submit_seeds(&spider, &seeds).await?;
            let result = finish(&spider, cli.stats).await;
            writer.finish().await?;
            result?;
        }
        Command::Sample { index } => {
            let sampler = Sampler::new();
            sampler.attach(&spider);

            let index = Url::parse(&index).with_context(|| format!("Invalid index URL: {}", index))?;
            let catalogs = operations::load_index(&storage, &index)
                .await
                .context("Failed to load the catalog index")?;
            operations::seed_from_index(&spider, catalogs).await?;
            finish(&spider, cli.stats).await?;
        }
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
            0 => EnvFilter::new("stac_spider=info,warn"),
            1 => EnvFilter::new("stac_spider=debug,info"),
            2 => EnvFilter::new("stac_spider=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration file, if any, and applies command line overrides
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(concurrency) = cli.concurrency {
        config.crawler.concurrency = concurrency;
    }
    if let Some(max_queue_size) = cli.max_queue_size {
        config.crawler.max_queue_size = max_queue_size;
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache.directory = cache_dir.clone();
    }

    validate(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Submits seeds from standard input (when piped) and from the arguments
async fn submit_seeds(spider: &StacSpider, args: &SeedArgs) -> anyhow::Result<()> {
    let mut submitted = 0;
    if !std::io::stdin().is_terminal() {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        submitted += operations::submit_lines(spider, stdin).await?;
    }
    submitted += operations::submit_args(spider, &args.seeds).await?;

    if submitted == 0 {
        anyhow::bail!("Usage: stac-spider <COMMAND> <SEED>... (or pipe seeds on stdin)");
    }
    tracing::info!("Submitted {} seeds", submitted);
    Ok(())
}

/// Waits for the crawl to finish and reports the counters
async fn finish(spider: &StacSpider, print: bool) -> anyhow::Result<()> {
    let result = spider.join().await;

    let stats = spider.stats();
    operations::log_stats(&stats);
    if print {
        operations::print_stats(&stats);
    }
    println!("{}", stats.seen);

    result.context("Crawl failed")
}
