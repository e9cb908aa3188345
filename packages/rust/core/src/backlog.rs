//! Enrichment pass over packages already in the sink.
//!
//! Picks every indexed path that has no enriched row yet and runs it through
//! the same pool the live crawl uses. Paths that fail stay in the backlog
//! and are picked up again by the next pass.

use std::time::Duration;

use modcrawl_shared::{AppConfig, PackageIdentity, Result};
use modcrawl_storage::{Sink, ensure_identifier};
use tracing::{info, instrument};

use crate::pool::{EnrichStats, Enricher, EnrichmentPool, drain_pool, persist_outcome};
use crate::progress::ProgressReporter;

#[derive(Debug, Clone)]
pub struct BacklogOptions {
    pub index_table: String,
    pub packages_table: String,
    /// Maximum number of paths taken in one pass.
    pub limit: Option<usize>,
    pub write_timeout: Duration,
}

impl BacklogOptions {
    pub fn from_config(config: &AppConfig, limit: Option<usize>) -> Self {
        Self {
            index_table: config.sink.index_table.clone(),
            packages_table: config.sink.packages_table.clone(),
            limit,
            write_timeout: config.sink.write_timeout(),
        }
    }
}

/// Paths present in `index_table` but missing from `packages_table`.
pub async fn pending_paths<S: Sink>(sink: &S, options: &BacklogOptions) -> Result<Vec<String>> {
    ensure_identifier(&options.index_table)?;
    ensure_identifier(&options.packages_table)?;

    let mut sql = format!(
        "SELECT DISTINCT i.path FROM {idx} i \
         LEFT JOIN {pkg} p ON p.path = i.path \
         WHERE p.path IS NULL ORDER BY i.path",
        idx = options.index_table,
        pkg = options.packages_table,
    );
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows = sink.query(&sql).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
        .collect())
}

#[instrument(skip_all, fields(limit = ?options.limit))]
pub async fn enrich_backlog<S: Sink, E: Enricher>(
    sink: &S,
    pool: &mut EnrichmentPool<E>,
    options: &BacklogOptions,
    progress: &dyn ProgressReporter,
) -> Result<EnrichStats> {
    let paths = pending_paths(sink, options).await?;
    info!(pending = paths.len(), workers = pool.workers(), "starting backlog enrichment");
    progress.phase("enrich");

    let mut stats = EnrichStats::default();
    for path in paths {
        stats.submitted += 1;
        for outcome in pool.submit(PackageIdentity::latest(path)).await? {
            persist_outcome(
                sink,
                &options.packages_table,
                outcome,
                &mut stats,
                options.write_timeout,
                progress,
            )
            .await;
        }
    }
    drain_pool(
        sink,
        pool,
        &options.packages_table,
        &mut stats,
        options.write_timeout,
        progress,
    )
    .await;

    info!(
        persisted = stats.persisted,
        failed = stats.failed,
        timed_out = stats.timed_out,
        write_failed = stats.write_failed,
        "backlog enrichment complete"
    );
    Ok(stats)
}
