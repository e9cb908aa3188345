//! Bounded enrichment worker pool.
//!
//! At most `workers` identities are enriched at once. Each task owns a
//! semaphore permit for its whole lifetime, so the slot comes back when the
//! task ends, whether it finished, failed, timed out, or panicked.
//! Finished tasks are handed back from [`EnrichmentPool::submit`] and
//! [`EnrichmentPool::next`] for the caller to persist one by one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use modcrawl_enrichment::EnrichmentClient;
use modcrawl_shared::{EnrichedRecord, FailureSet, ModCrawlError, PackageIdentity, Result};
use modcrawl_storage::Sink;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::crawl::write_batch;
use crate::progress::ProgressReporter;
use crate::wire;

/// Anything that can turn an identity into a persistable record.
pub trait Enricher: Send + Sync + 'static {
    fn enrich(
        &self,
        identity: &PackageIdentity,
    ) -> impl Future<Output = std::result::Result<EnrichedRecord, FailureSet>> + Send;
}

impl Enricher for EnrichmentClient {
    fn enrich(
        &self,
        identity: &PackageIdentity,
    ) -> impl Future<Output = std::result::Result<EnrichedRecord, FailureSet>> + Send {
        EnrichmentClient::enrich(self, identity)
    }
}

/// How one enrichment ended.
#[derive(Debug)]
pub enum EnrichResult {
    Enriched(EnrichedRecord),
    Failed(FailureSet),
    TimedOut,
    Panicked(String),
}

#[derive(Debug)]
pub struct EnrichOutcome {
    pub identity: PackageIdentity,
    pub result: EnrichResult,
}

/// Per-run enrichment counters, stored in the run ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichStats {
    pub submitted: usize,
    pub persisted: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub panicked: usize,
    /// Records enriched but not written; their paths stay in the backlog.
    pub write_failed: usize,
}

pub struct EnrichmentPool<E: Enricher> {
    enricher: Arc<E>,
    permits: Arc<Semaphore>,
    workers: usize,
    deadline: Duration,
    tasks: JoinSet<EnrichOutcome>,
}

impl<E: Enricher> EnrichmentPool<E> {
    /// `workers` is clamped to at least one.
    pub fn new(enricher: E, workers: usize, deadline: Duration) -> Self {
        let workers = workers.max(1);
        Self {
            enricher: Arc::new(enricher),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            deadline,
            tasks: JoinSet::new(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks spawned and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Queue one identity, waiting for a free slot if the pool is full.
    ///
    /// Returns the outcomes collected while waiting.
    pub async fn submit(&mut self, identity: PackageIdentity) -> Result<Vec<EnrichOutcome>> {
        let mut ready = Vec::new();
        while self.tasks.len() >= self.workers {
            if let Some(outcome) = self.next().await {
                ready.push(outcome);
            }
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ModCrawlError::validation(format!("enrichment pool closed: {e}")))?;

        let enricher = Arc::clone(&self.enricher);
        let deadline = self.deadline;
        debug!(%identity, in_flight = self.tasks.len() + 1, "enrichment queued");

        self.tasks.spawn(async move {
            let _permit = permit;

            let work_identity = identity.clone();
            let mut work = AbortOnDrop(tokio::spawn(async move {
                enricher.enrich(&work_identity).await
            }));

            let result = match tokio::time::timeout(deadline, &mut work.0).await {
                Ok(Ok(Ok(record))) => EnrichResult::Enriched(record),
                Ok(Ok(Err(failures))) => EnrichResult::Failed(failures),
                Ok(Err(e)) => EnrichResult::Panicked(e.to_string()),
                Err(_) => EnrichResult::TimedOut,
            };

            EnrichOutcome { identity, result }
        });

        Ok(ready)
    }

    /// Wait for the next finished task. `None` once the pool is empty.
    pub async fn next(&mut self) -> Option<EnrichOutcome> {
        loop {
            match self.tasks.join_next().await? {
                Ok(outcome) => return Some(outcome),
                // Only reachable if the supervising task itself was cancelled.
                Err(e) => warn!(error = %e, "enrichment task lost"),
            }
        }
    }
}

/// Aborts the wrapped task when dropped, so work never outlives the task
/// supervising it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Record one outcome: write the record if there is one, count the rest.
///
/// Nothing here is fatal. Failed enrichments and failed writes are logged
/// and counted, and the path stays in the backlog for a later pass.
pub async fn persist_outcome<S: Sink>(
    sink: &S,
    packages_table: &str,
    outcome: EnrichOutcome,
    stats: &mut EnrichStats,
    write_timeout: Duration,
    progress: &dyn ProgressReporter,
) {
    let EnrichOutcome { identity, result } = outcome;

    let persisted = match result {
        EnrichResult::Enriched(record) => {
            let written = match wire::package_batch(&record) {
                Ok(batch) => write_batch(sink, &batch, packages_table, write_timeout).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {
                    stats.persisted += 1;
                    true
                }
                Err(e) => {
                    warn!(%identity, error = %e, "failed to write enriched package");
                    stats.write_failed += 1;
                    false
                }
            }
        }
        EnrichResult::Failed(failures) => {
            warn!(%identity, %failures, "enrichment failed");
            stats.failed += 1;
            false
        }
        EnrichResult::TimedOut => {
            warn!(%identity, "enrichment timed out");
            stats.timed_out += 1;
            false
        }
        EnrichResult::Panicked(message) => {
            warn!(%identity, %message, "enrichment task panicked");
            stats.panicked += 1;
            false
        }
    };

    progress.package_done(&identity, persisted);
}

/// Persist every outcome still in the pool.
pub async fn drain_pool<S: Sink, E: Enricher>(
    sink: &S,
    pool: &mut EnrichmentPool<E>,
    packages_table: &str,
    stats: &mut EnrichStats,
    write_timeout: Duration,
    progress: &dyn ProgressReporter,
) {
    while let Some(outcome) = pool.next().await {
        persist_outcome(sink, packages_table, outcome, stats, write_timeout, progress).await;
    }
}
