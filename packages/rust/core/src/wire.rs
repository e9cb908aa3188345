//! Row encoding for the two sink destinations.
//!
//! Timestamps travel as microseconds since the Unix epoch so the sink can
//! order and aggregate them numerically.

use chrono::{DateTime, Utc};
use modcrawl_shared::{
    DependencyEdges, EnrichedRecord, IndexEntry, IndexTimestamp, ModCrawlError, PackageSummary,
    Result,
};
use modcrawl_storage::{Column, ColumnKind, RowBatch, RowSchema};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Index rows
// ---------------------------------------------------------------------------

/// One index entry as stored, keyed by `(path, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
    pub path: String,
    pub version: String,
    pub timestamp: i64,
}

impl IndexRow {
    pub fn schema() -> RowSchema {
        RowSchema::new(
            vec![
                Column::new("path", ColumnKind::Text),
                Column::new("version", ColumnKind::Text),
                Column::new("timestamp", ColumnKind::Integer),
            ],
            &["path", "version"],
        )
    }

    /// Convert a decoded entry. `line` is the entry's 1-based position in
    /// its page, reported when the timestamp cannot be parsed.
    pub fn from_entry(entry: &IndexEntry, line: usize) -> Result<Self> {
        let timestamp = entry
            .timestamp
            .micros()
            .map_err(|e| ModCrawlError::malformed(line, e.to_string()))?;
        Ok(Self {
            path: entry.path.clone(),
            version: entry.version.clone(),
            timestamp,
        })
    }

    /// Back to an entry; the timestamp is rendered with six fractional digits.
    pub fn to_entry(&self) -> Result<IndexEntry> {
        let timestamp = IndexTimestamp::from_micros(self.timestamp).ok_or_else(|| {
            ModCrawlError::validation(format!("timestamp {} is out of range", self.timestamp))
        })?;
        Ok(IndexEntry {
            path: self.path.clone(),
            version: self.version.clone(),
            timestamp,
        })
    }
}

/// Encode a page of entries into one batch.
pub fn index_batch(entries: &[IndexEntry]) -> Result<RowBatch> {
    let mut batch = RowBatch::new(IndexRow::schema());
    for (i, entry) in entries.iter().enumerate() {
        batch.push(encode(&IndexRow::from_entry(entry, i + 1)?)?);
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Package rows
// ---------------------------------------------------------------------------

/// One enriched package as stored, keyed by `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRow {
    pub path: String,
    pub version: String,
    pub license: String,
    pub repository: String,
    pub is_module: bool,
    pub is_latest_version: bool,
    pub is_valid_manifest: bool,
    pub has_redistributable_license: bool,
    pub is_tagged_version: bool,
    pub is_stable_version: bool,
    pub std_imports: Vec<String>,
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
    pub captured_at: i64,
}

impl PackageRow {
    pub fn schema() -> RowSchema {
        use ColumnKind::{Boolean, Integer, Text, TextList};
        RowSchema::new(
            vec![
                Column::new("path", Text),
                Column::new("version", Text),
                Column::new("license", Text),
                Column::new("repository", Text),
                Column::new("is_module", Boolean),
                Column::new("is_latest_version", Boolean),
                Column::new("is_valid_manifest", Boolean),
                Column::new("has_redistributable_license", Boolean),
                Column::new("is_tagged_version", Boolean),
                Column::new("is_stable_version", Boolean),
                Column::new("std_imports", TextList),
                Column::new("imports", TextList),
                Column::new("imported_by", TextList),
                Column::new("captured_at", Integer),
            ],
            &["path"],
        )
    }

    pub fn from_record(record: &EnrichedRecord) -> Self {
        let s = &record.summary;
        Self {
            path: record.path.clone(),
            version: s.version.clone(),
            license: s.license.clone(),
            repository: s.repository_url.clone(),
            is_module: s.is_module,
            is_latest_version: s.is_latest_version,
            is_valid_manifest: s.is_valid_manifest,
            has_redistributable_license: s.has_redistributable_license,
            is_tagged_version: s.is_tagged_version,
            is_stable_version: s.is_stable_version,
            std_imports: record.edges.standard_library_deps.clone(),
            imports: record.edges.third_party_deps.clone(),
            imported_by: record.dependents.clone(),
            captured_at: record.captured_at.timestamp_micros(),
        }
    }

    pub fn to_record(&self) -> Result<EnrichedRecord> {
        let captured_at = DateTime::<Utc>::from_timestamp_micros(self.captured_at)
            .ok_or_else(|| {
                ModCrawlError::validation(format!(
                    "captured_at {} is out of range",
                    self.captured_at
                ))
            })?;
        Ok(EnrichedRecord {
            path: self.path.clone(),
            summary: PackageSummary {
                version: self.version.clone(),
                license: self.license.clone(),
                repository_url: self.repository.clone(),
                is_module: self.is_module,
                is_latest_version: self.is_latest_version,
                is_valid_manifest: self.is_valid_manifest,
                has_redistributable_license: self.has_redistributable_license,
                is_tagged_version: self.is_tagged_version,
                is_stable_version: self.is_stable_version,
            },
            edges: DependencyEdges {
                standard_library_deps: self.std_imports.clone(),
                third_party_deps: self.imports.clone(),
            },
            dependents: self.imported_by.clone(),
            captured_at,
        })
    }
}

/// Encode a single record as a one-row batch.
pub fn package_batch(record: &EnrichedRecord) -> Result<RowBatch> {
    let mut batch = RowBatch::new(PackageRow::schema());
    batch.push(encode(&PackageRow::from_record(record))?);
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(row).map_err(|e| ModCrawlError::validation(format!("encode row: {e}")))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ModCrawlError::validation(format!("decode row: {e}")))
}
