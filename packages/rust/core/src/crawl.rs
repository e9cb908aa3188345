//! The incremental index crawl.
//!
//! Pages are fetched strictly one after another. Each page is written to
//! the sink before the cursor moves past it, so a crash or a fatal error
//! leaves a watermark that a restart can resume from safely.

use std::collections::HashSet;
use std::time::Duration;

use modcrawl_enrichment::EnrichmentClient;
use modcrawl_index::{IndexReader, Page};
use modcrawl_shared::{AppConfig, IndexTimestamp, ModCrawlError, PackageIdentity, Result};
use modcrawl_storage::{RowBatch, Sink};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::pool::{EnrichStats, Enricher, EnrichmentPool, drain_pool, persist_outcome};
use crate::progress::ProgressReporter;
use crate::watermark::{Watermark, bootstrap_cursor};
use crate::wire;

/// Knobs for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub index_table: String,
    pub packages_table: String,
    /// Overrides the watermark stored in the sink.
    pub starting_cursor: Option<String>,
    pub write_timeout: Duration,
    /// End-to-end retries of a page after a transient failure.
    pub transport_retries: u32,
    pub transport_retry_delay: Duration,
}

impl CrawlOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            index_table: config.sink.index_table.clone(),
            packages_table: config.sink.packages_table.clone(),
            starting_cursor: config.starting_cursor.clone(),
            write_timeout: config.sink.write_timeout(),
            transport_retries: config.index.transport_retries,
            transport_retry_delay: config.index.transport_retry_delay(),
        }
    }
}

/// Summary of a finished crawl.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub pages: usize,
    pub entries: usize,
    /// Watermark at the end of the run.
    pub cursor: Option<String>,
    pub enrichment: EnrichStats,
}

/// Crawl the index feed into `options.index_table`.
pub async fn crawl_index<S: Sink>(
    reader: &mut IndexReader,
    sink: &S,
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
) -> Result<CrawlStats> {
    run::<S, EnrichmentClient>(reader, sink, None, options, progress).await
}

/// Crawl the index feed and enrich every package path it yields.
pub async fn crawl_and_enrich<S: Sink, E: Enricher>(
    reader: &mut IndexReader,
    sink: &S,
    pool: &mut EnrichmentPool<E>,
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
) -> Result<CrawlStats> {
    run(reader, sink, Some(pool), options, progress).await
}

#[instrument(skip_all, fields(table = %options.index_table, enrich = pool.is_some()))]
async fn run<S: Sink, E: Enricher>(
    reader: &mut IndexReader,
    sink: &S,
    mut pool: Option<&mut EnrichmentPool<E>>,
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
) -> Result<CrawlStats> {
    let start = bootstrap_cursor(
        sink,
        &options.index_table,
        options.starting_cursor.as_deref(),
    )
    .await?;
    let mut watermark = Watermark::new(start)?;
    let mut stats = CrawlStats::default();

    info!(
        since = watermark.cursor().map(IndexTimestamp::as_str).unwrap_or("beginning"),
        "starting index crawl"
    );
    progress.phase("index");

    let paged = paginate(
        reader,
        sink,
        pool.as_deref_mut(),
        options,
        progress,
        &mut watermark,
        &mut stats,
    )
    .await;

    // Enrichments that already finished are written even when pagination
    // failed; only then is the error returned.
    if let Some(pool) = pool {
        progress.phase("enrich");
        drain_pool(
            sink,
            pool,
            &options.packages_table,
            &mut stats.enrichment,
            options.write_timeout,
            progress,
        )
        .await;
    }

    stats.cursor = watermark.cursor().map(|c| c.as_str().to_string());
    if let Err(e) = paged {
        warn!(
            error = %e,
            pages = stats.pages,
            cursor = stats.cursor.as_deref().unwrap_or(""),
            persisted = stats.enrichment.persisted,
            "index crawl failed"
        );
        return Err(e);
    }

    info!(
        pages = stats.pages,
        entries = stats.entries,
        cursor = stats.cursor.as_deref().unwrap_or(""),
        persisted = stats.enrichment.persisted,
        failed = stats.enrichment.failed,
        write_failed = stats.enrichment.write_failed,
        "index crawl complete"
    );
    Ok(stats)
}

/// Fetch, write and advance page by page until the feed is exhausted.
///
/// Any error here is fatal: the watermark only ever reflects pages that
/// were written.
async fn paginate<S: Sink, E: Enricher>(
    reader: &mut IndexReader,
    sink: &S,
    mut pool: Option<&mut EnrichmentPool<E>>,
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
    watermark: &mut Watermark,
    stats: &mut CrawlStats,
) -> Result<()> {
    loop {
        let entries = match fetch_with_retries(reader, watermark.cursor(), options).await? {
            Page::Done => return Ok(()),
            Page::Entries(entries) if entries.is_empty() => return Ok(()),
            Page::Entries(entries) => entries,
        };

        let batch = wire::index_batch(&entries)?;
        write_batch(sink, &batch, &options.index_table, options.write_timeout).await?;
        stats.pages += 1;
        stats.entries += entries.len();

        let mut advanced = false;
        for entry in &entries {
            advanced |= watermark.advance(&entry.timestamp)?;
        }
        if let Some(cursor) = watermark.cursor() {
            debug!(entries = entries.len(), %cursor, "page written");
            progress.page_written(entries.len(), cursor);
        }

        if let Some(pool) = pool.as_deref_mut() {
            let mut seen = HashSet::new();
            for entry in &entries {
                if !seen.insert(entry.path.as_str()) {
                    continue;
                }
                stats.enrichment.submitted += 1;
                for outcome in pool.submit(PackageIdentity::latest(&entry.path)).await? {
                    persist_outcome(
                        sink,
                        &options.packages_table,
                        outcome,
                        &mut stats.enrichment,
                        options.write_timeout,
                        progress,
                    )
                    .await;
                }
            }
        }

        // The feed echoed entries we already have; asking again would loop.
        if !advanced {
            info!("page did not move the watermark, stopping");
            return Ok(());
        }
    }
}

/// Fetch one page, retrying transient failures a bounded number of times.
async fn fetch_with_retries(
    reader: &mut IndexReader,
    cursor: Option<&IndexTimestamp>,
    options: &CrawlOptions,
) -> Result<Page> {
    let mut attempt = 0;
    loop {
        match reader.fetch_next(cursor).await {
            Err(e) if e.is_transient() && attempt < options.transport_retries => {
                attempt += 1;
                let delay = options.transport_retry_delay * attempt;
                warn!(error = %e, attempt, ?delay, "page fetch failed, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Append a batch, failing with [`ModCrawlError::Timeout`] past `deadline`.
pub(crate) async fn write_batch<S: Sink>(
    sink: &S,
    batch: &RowBatch,
    destination: &str,
    deadline: Duration,
) -> Result<()> {
    tokio::time::timeout(deadline, sink.append(batch, destination))
        .await
        .map_err(|_| ModCrawlError::timeout(format!("append to {destination}"), deadline))?
}
