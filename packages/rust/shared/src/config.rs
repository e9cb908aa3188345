//! Application configuration for modcrawl.
//!
//! User config lives at `~/.modcrawl/modcrawl.toml`.
//! CLI flags and environment variables override config file values, which
//! override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModCrawlError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "modcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".modcrawl";

// ---------------------------------------------------------------------------
// Config structs (matching modcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Index feed settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Enrichment service settings.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Sink settings.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Start the index crawl from this cursor instead of the sink's watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_cursor: Option<String>,
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Feed endpoint; `limit` and `since` are appended as query parameters.
    #[serde(default = "default_index_url")]
    pub base_url: String,

    /// Maximum entries requested per page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Per-request timeout.
    #[serde(default = "default_index_timeout")]
    pub request_timeout_secs: u64,

    /// Delay reached after `backoff_steps` consecutive rate limits.
    #[serde(default = "default_index_backoff_ceiling")]
    pub backoff_ceiling_secs: u64,

    /// Rate-limit responses tolerated before giving up.
    #[serde(default = "default_index_backoff_steps")]
    pub backoff_steps: u32,

    /// End-to-end retries of a page after a transport failure.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    /// Pause between transport retries, multiplied by the retry number.
    #[serde(default = "default_transport_retry_delay")]
    pub transport_retry_delay_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: default_index_url(),
            page_limit: default_page_limit(),
            request_timeout_secs: default_index_timeout(),
            backoff_ceiling_secs: default_index_backoff_ceiling(),
            backoff_steps: default_index_backoff_steps(),
            transport_retries: default_transport_retries(),
            transport_retry_delay_ms: default_transport_retry_delay(),
        }
    }
}

impl IndexConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }

    pub fn transport_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transport_retry_delay_ms)
    }
}

fn default_index_url() -> String {
    "https://index.golang.org/index".into()
}
fn default_page_limit() -> u32 {
    2000
}
fn default_index_timeout() -> u64 {
    10
}
fn default_index_backoff_ceiling() -> u64 {
    10
}
fn default_index_backoff_steps() -> u32 {
    5
}
fn default_transport_retries() -> u32 {
    3
}
fn default_transport_retry_delay() -> u64 {
    1000
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Registry site serving per-package detail pages.
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_enrichment_timeout")]
    pub request_timeout_secs: u64,

    /// Delay reached after `backoff_steps` consecutive rate limits on a route.
    #[serde(default = "default_enrichment_backoff_ceiling")]
    pub backoff_ceiling_secs: u64,

    /// Rate-limit responses tolerated per route.
    #[serde(default = "default_enrichment_backoff_steps")]
    pub backoff_steps: u32,

    /// Maximum packages enriched concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for enriching one package (all three resources).
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_enrichment_url(),
            request_timeout_secs: default_enrichment_timeout(),
            backoff_ceiling_secs: default_enrichment_backoff_ceiling(),
            backoff_steps: default_enrichment_backoff_steps(),
            workers: default_workers(),
            deadline_secs: default_deadline(),
        }
    }
}

impl EnrichmentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn default_enrichment_url() -> String {
    "https://pkg.go.dev".into()
}
fn default_enrichment_timeout() -> u64 {
    60
}
fn default_enrichment_backoff_ceiling() -> u64 {
    30
}
fn default_enrichment_backoff_steps() -> u32 {
    30
}
fn default_workers() -> usize {
    20
}
fn default_deadline() -> u64 {
    300
}

/// `[sink]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Destination table for index entries.
    #[serde(default = "default_index_table")]
    pub index_table: String,

    /// Destination table for enriched packages.
    #[serde(default = "default_packages_table")]
    pub packages_table: String,

    /// Deadline for a single batch append.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            index_table: default_index_table(),
            packages_table: default_packages_table(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl SinkConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

fn default_database_path() -> String {
    "var/modcrawl.db".into()
}
fn default_index_table() -> String {
    "index_entries".into()
}
fn default_packages_table() -> String {
    "packages".into()
}
fn default_write_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.index.page_limit == 0 {
            return Err(ModCrawlError::config("index.page_limit must be positive"));
        }
        if self.index.backoff_steps == 0 || self.enrichment.backoff_steps == 0 {
            return Err(ModCrawlError::config("backoff_steps must be positive"));
        }
        if self.enrichment.workers == 0 {
            return Err(ModCrawlError::config("enrichment.workers must be positive"));
        }
        for (name, value) in [
            ("index.base_url", &self.index.base_url),
            ("enrichment.base_url", &self.enrichment.base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ModCrawlError::config(format!("{name} '{value}' is invalid: {e}")))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.modcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ModCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.modcrawl/modcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ModCrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ModCrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ModCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ModCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ModCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
