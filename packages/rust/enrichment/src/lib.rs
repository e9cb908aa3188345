//! Package enrichment from the registry's detail pages.
//!
//! For every package identity the [`EnrichmentClient`] fetches three pages
//! concurrently: the summary page, the imports tab and the imported-by tab.
//! Each page is scraped by a pure function in [`scrape`]; failures are
//! collected per resource into a [`FailureSet`](modcrawl_shared::FailureSet)
//! instead of aborting the sibling fetches.

pub mod client;
pub mod scrape;

pub use client::{Enrichment, EnrichmentClient};
pub use scrape::{ScrapeError, parse_imported_by, parse_imports, parse_summary};
