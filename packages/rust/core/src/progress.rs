//! Progress callbacks for long-running crawls.

use modcrawl_shared::{IndexTimestamp, PackageIdentity};

/// Progress callback for reporting crawl status.
pub trait ProgressReporter: Send + Sync {
    /// A new phase has started (e.g. "index", "enrich").
    fn phase(&self, name: &str);
    /// A page of index entries was durably written.
    fn page_written(&self, entries: usize, cursor: &IndexTimestamp);
    /// One package finished enrichment; `persisted` is false when it failed.
    fn package_done(&self, identity: &PackageIdentity, persisted: bool);
    /// The whole run is complete.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for non-interactive use.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_written(&self, _entries: usize, _cursor: &IndexTimestamp) {}
    fn package_done(&self, _identity: &PackageIdentity, _persisted: bool) {}
    fn done(&self, _summary: &str) {}
}
