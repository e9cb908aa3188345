//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use modcrawl_core::{
    BacklogOptions, CrawlOptions, EnrichmentPool, ProgressReporter, crawl_and_enrich, crawl_index,
    enrich_backlog, version_range,
};
use modcrawl_enrichment::EnrichmentClient;
use modcrawl_index::IndexReader;
use modcrawl_shared::{
    AppConfig, IndexTimestamp, PackageIdentity, init_config, load_config, load_config_from,
};
use modcrawl_storage::Storage;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// modcrawl: incremental crawler for a package index and its registry pages.
#[derive(Parser)]
#[command(
    name = "modcrawl",
    version,
    about = "Crawl a package index feed, enrich packages from the registry, and store the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.modcrawl/modcrawl.toml.
    #[arg(long, env = "MODCRAWL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides sink.database_path).
    #[arg(long, env = "MODCRAWL_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Concurrent enrichments (overrides enrichment.workers).
    #[arg(long, env = "MODCRAWL_WORKERS", global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl the index feed from the stored watermark.
    Index {
        /// Enrich every package path as its page is written.
        #[arg(long)]
        enrich: bool,

        /// Start from this timestamp instead of the stored watermark.
        #[arg(long, env = "MODCRAWL_SINCE")]
        since: Option<String>,
    },

    /// Enrich indexed packages that have no enriched record yet.
    Enrich {
        /// Maximum number of packages to enrich in this pass.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Enrich a single package and print the result as JSON.
    Package {
        /// Package path, optionally pinned: `path@version`.
        identity: String,
    },

    /// Print the minimum and maximum recorded version of a package.
    Versions {
        /// Package path.
        path: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "modcrawl=info",
        1 => "modcrawl=debug",
        _ => "modcrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Load the config file and apply flag and environment overrides on top.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    if let Some(database) = &cli.database {
        config.sink.database_path = database.to_string_lossy().to_string();
    }
    if let Some(workers) = cli.workers {
        config.enrichment.workers = workers;
    }
    if let Command::Index {
        since: Some(since), ..
    } = &cli.command
    {
        config.starting_cursor = Some(since.clone());
    }

    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?).await,
        };
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Index { enrich, .. } => cmd_index(&config, enrich).await,
        Command::Enrich { limit } => cmd_enrich(&config, limit).await,
        Command::Package { identity } => cmd_package(&config, &identity).await,
        Command::Versions { path } => cmd_versions(&config, &path).await,
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_index(config: &AppConfig, enrich: bool) -> Result<()> {
    let storage = Storage::open(Path::new(&config.sink.database_path)).await?;
    let kind = if enrich { "index+enrich" } else { "index" };
    let run_id = storage.begin_run(kind).await?;

    info!(
        database = %config.sink.database_path,
        feed = %config.index.base_url,
        enrich,
        %run_id,
        "starting crawl"
    );

    let mut reader = IndexReader::new(&config.index)?;
    let options = CrawlOptions::from_config(config);
    let reporter = CliProgress::new();

    let result = if enrich {
        let client = EnrichmentClient::new(&config.enrichment)?;
        let mut pool = EnrichmentPool::new(
            client,
            config.enrichment.workers,
            config.enrichment.deadline(),
        );
        crawl_and_enrich(&mut reader, &storage, &mut pool, &options, &reporter).await
    } else {
        crawl_index(&mut reader, &storage, &options, &reporter).await
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            reporter.done("crawl failed");
            record_failure(&storage, &run_id, &e.to_string()).await;
            return Err(e.into());
        }
    };
    storage
        .finish_run(&run_id, &serde_json::to_string(&stats)?)
        .await?;
    reporter.done("crawl complete");

    println!();
    println!("  Index crawl complete");
    println!("  Pages:    {}", stats.pages);
    println!("  Entries:  {}", stats.entries);
    println!("  Cursor:   {}", stats.cursor.as_deref().unwrap_or("-"));
    if enrich {
        println!("  Enriched: {}", stats.enrichment.persisted);
        println!(
            "  Failed:   {}",
            stats.enrichment.failed + stats.enrichment.timed_out + stats.enrichment.panicked
        );
        println!("  Unwritten: {}", stats.enrichment.write_failed);
    }
    println!();

    Ok(())
}

async fn cmd_enrich(config: &AppConfig, limit: Option<usize>) -> Result<()> {
    let storage = Storage::open(Path::new(&config.sink.database_path)).await?;
    let run_id = storage.begin_run("enrich").await?;

    let client = EnrichmentClient::new(&config.enrichment)?;
    let mut pool = EnrichmentPool::new(
        client,
        config.enrichment.workers,
        config.enrichment.deadline(),
    );
    let options = BacklogOptions::from_config(config, limit);
    let reporter = CliProgress::new();

    let stats = match enrich_backlog(&storage, &mut pool, &options, &reporter).await {
        Ok(stats) => stats,
        Err(e) => {
            reporter.done("enrichment failed");
            record_failure(&storage, &run_id, &e.to_string()).await;
            return Err(e.into());
        }
    };
    storage
        .finish_run(&run_id, &serde_json::to_string(&stats)?)
        .await?;
    reporter.done("enrichment complete");

    println!();
    println!("  Backlog enrichment complete");
    println!("  Submitted: {}", stats.submitted);
    println!("  Persisted: {}", stats.persisted);
    println!("  Failed:    {}", stats.failed);
    println!("  Timed out: {}", stats.timed_out);
    println!("  Unwritten: {}", stats.write_failed);
    println!();

    Ok(())
}

async fn cmd_package(config: &AppConfig, identity: &str) -> Result<()> {
    let identity: PackageIdentity = identity.parse()?;
    let client = EnrichmentClient::new(&config.enrichment)?;

    info!(%identity, "enriching package");
    let enrichment = client.fetch(&identity).await;
    let persistable = enrichment.failures.is_persistable();
    let failures: Vec<_> = enrichment.failures.iter().collect();

    let output = serde_json::json!({
        "identity": identity.route(),
        "persistable": persistable,
        "record": enrichment.record,
        "failures": failures,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !persistable {
        return Err(eyre!("{identity}: {}", enrichment.failures));
    }
    Ok(())
}

async fn cmd_versions(config: &AppConfig, path: &str) -> Result<()> {
    let storage = Storage::open_readonly(Path::new(&config.sink.database_path)).await?;
    match version_range(&storage, &config.sink.index_table, path).await? {
        Some(range) => println!("{}", serde_json::to_string_pretty(&range)?),
        None => return Err(eyre!("no semantic versions recorded for '{path}'")),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

/// Close the run ledger entry of a failed run. Logged, not propagated.
async fn record_failure(storage: &Storage, run_id: &str, error: &str) {
    let stats = serde_json::json!({ "status": "failed", "error": error });
    if let Err(e) = storage.finish_run(run_id, &stats.to_string()).await {
        warn!(%run_id, error = %e, "failed to close run ledger entry");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    entries: AtomicUsize,
    packages: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            entries: AtomicUsize::new(0),
            packages: AtomicUsize::new(0),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_written(&self, entries: usize, cursor: &IndexTimestamp) {
        let total = self.entries.fetch_add(entries, Ordering::Relaxed) + entries;
        self.spinner
            .set_message(format!("Indexed {total} entries, cursor {cursor}"));
    }

    fn package_done(&self, identity: &PackageIdentity, persisted: bool) {
        let done = self.packages.fetch_add(1, Ordering::Relaxed) + 1;
        let mark = if persisted { "ok" } else { "failed" };
        self.spinner
            .set_message(format!("Enriched [{done}] {identity} ({mark})"));
    }

    fn done(&self, _summary: &str) {
        self.spinner.finish_and_clear();
    }
}
