//! Crawl orchestration for modcrawl.
//!
//! This crate ties the index reader, the enrichment client and the sink
//! together: the incremental index crawl ([`crawl_index`],
//! [`crawl_and_enrich`]), the bounded enrichment pool, the backlog pass,
//! the sink wire format, and version-range reporting.

pub mod backlog;
pub mod crawl;
pub mod pool;
pub mod progress;
pub mod versions;
pub mod watermark;
pub mod wire;

#[cfg(test)]
mod testing;

pub use backlog::{BacklogOptions, enrich_backlog, pending_paths};
pub use crawl::{CrawlOptions, CrawlStats, crawl_and_enrich, crawl_index};
pub use pool::{EnrichOutcome, EnrichResult, EnrichStats, Enricher, EnrichmentPool};
pub use progress::{ProgressReporter, SilentProgress};
pub use versions::{VersionRange, version_range};
pub use watermark::{Watermark, bootstrap_cursor};
