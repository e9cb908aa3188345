//! The crawl cursor.
//!
//! A [`Watermark`] only moves forward. Ordering is decided on parsed
//! instants, but the raw feed text is kept so the exact value the feed
//! emitted is echoed back as `since`.

use chrono::{DateTime, Utc};
use modcrawl_shared::{IndexTimestamp, Result};
use modcrawl_storage::{Sink, ensure_identifier};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Watermark {
    cursor: Option<IndexTimestamp>,
    instant: Option<DateTime<Utc>>,
}

impl Watermark {
    /// Start at `cursor`, or from the beginning of the feed when `None`.
    pub fn new(cursor: Option<IndexTimestamp>) -> Result<Self> {
        let instant = cursor.as_ref().map(IndexTimestamp::instant).transpose()?;
        Ok(Self { cursor, instant })
    }

    pub fn cursor(&self) -> Option<&IndexTimestamp> {
        self.cursor.as_ref()
    }

    /// Move to `candidate` if it is strictly later. Returns whether it moved.
    pub fn advance(&mut self, candidate: &IndexTimestamp) -> Result<bool> {
        let instant = candidate.instant()?;
        if self.instant.is_some_and(|current| instant <= current) {
            return Ok(false);
        }
        self.cursor = Some(candidate.clone());
        self.instant = Some(instant);
        Ok(true)
    }
}

/// Pick the cursor a crawl starts from.
///
/// A configured cursor wins. Otherwise the latest timestamp already in the
/// sink is used, so a restarted crawl resumes where the last one stopped.
/// An empty destination means the crawl starts from the beginning.
pub async fn bootstrap_cursor<S: Sink>(
    sink: &S,
    index_table: &str,
    configured: Option<&str>,
) -> Result<Option<IndexTimestamp>> {
    if let Some(raw) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        let cursor = IndexTimestamp::new(raw);
        cursor.instant()?;
        debug!(%cursor, "using configured starting cursor");
        return Ok(Some(cursor));
    }

    ensure_identifier(index_table)?;
    let rows = sink
        .query(&format!("SELECT MAX(timestamp) FROM {index_table}"))
        .await?;
    let cursor = rows
        .first()
        .and_then(|row| row.first())
        .and_then(|value| value.as_i64())
        .and_then(IndexTimestamp::from_micros);

    debug!(cursor = ?cursor.as_ref().map(IndexTimestamp::as_str), "bootstrapped cursor from sink");
    Ok(cursor)
}
