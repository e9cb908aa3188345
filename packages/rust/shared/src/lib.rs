//! Shared types, error model, configuration, and retry policy for modcrawl.
//!
//! This crate is the foundation depended on by all other modcrawl crates.
//! It provides:
//! - [`ModCrawlError`]: the unified error type
//! - Domain types ([`IndexEntry`], [`EnrichedRecord`], [`FailureSet`], ...)
//! - Configuration ([`AppConfig`], config loading)
//! - [`Backoff`] and [`BackoffRegistry`]: per-domain linear retry delays
//! - [`ResponseClass`]: HTTP status classification

pub mod backoff;
pub mod config;
pub mod error;
pub mod http;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use backoff::{Backoff, BackoffRegistry};
pub use config::{
    AppConfig, EnrichmentConfig, IndexConfig, SinkConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{ModCrawlError, Result};
pub use http::{ResponseClass, USER_AGENT, build_client};
pub use types::{
    DependencyEdges, EnrichedRecord, FailureKind, FailureSet, FetchFailure, IndexEntry,
    IndexTimestamp, PackageIdentity, PackageSummary, Resource, ReverseDependents,
};
