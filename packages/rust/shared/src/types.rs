//! Core domain types for modcrawl.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModCrawlError, Result};

// ---------------------------------------------------------------------------
// IndexTimestamp
// ---------------------------------------------------------------------------

/// Timestamp text exactly as captured from the index feed.
///
/// The feed emits RFC 3339 instants with a variable number of fractional
/// digits. The raw text is kept verbatim (it is echoed back as the `since`
/// cursor) and only parsed when an instant or wire value is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexTimestamp(String);

impl IndexTimestamp {
    /// Wrap raw timestamp text without validating it.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build a timestamp from microseconds since the Unix epoch, rendered
    /// with six fractional digits.
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_micros(micros)
            .map(|dt| Self(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()))
    }

    /// The raw text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the raw text into a UTC instant.
    pub fn instant(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.0)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ModCrawlError::validation(format!("corrupt timestamp '{}': {e}", self.0)))
    }

    /// Microseconds since the Unix epoch.
    pub fn micros(&self) -> Result<i64> {
        Ok(self.instant()?.timestamp_micros())
    }
}

impl fmt::Display for IndexTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// IndexEntry
// ---------------------------------------------------------------------------

/// One decoded line of the index feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Package path, e.g. `github.com/spf13/cobra`.
    pub path: String,
    /// Published version, e.g. `v1.6.1`.
    pub version: String,
    /// Publication time; the cursor field.
    pub timestamp: IndexTimestamp,
}

// ---------------------------------------------------------------------------
// PackageIdentity
// ---------------------------------------------------------------------------

/// A package to enrich, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageIdentity {
    /// Identity for the latest version of `path`.
    pub fn latest(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: None,
        }
    }

    /// Identity pinned to `version`.
    pub fn pinned(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: Some(version.into()),
        }
    }

    /// Route segment used by the enrichment service: `path` or `path@version`.
    pub fn route(&self) -> String {
        match &self.version {
            Some(v) if !v.is_empty() => format!("{}@{v}", self.path),
            _ => self.path.clone(),
        }
    }
}

impl std::str::FromStr for PackageIdentity {
    type Err = ModCrawlError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('/');
        if s.is_empty() {
            return Err(ModCrawlError::validation("empty package identity"));
        }
        match s.split_once('@') {
            Some((path, version)) if !path.is_empty() && !version.is_empty() => {
                Ok(Self::pinned(path, version))
            }
            Some(_) => Err(ModCrawlError::validation(format!(
                "invalid package identity '{s}'"
            ))),
            None => Ok(Self::latest(s)),
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route())
    }
}

// ---------------------------------------------------------------------------
// Enrichment payloads
// ---------------------------------------------------------------------------

/// Flags and strings scraped from a package's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub version: String,
    pub license: String,
    pub repository_url: String,
    pub is_module: bool,
    pub is_latest_version: bool,
    pub is_valid_manifest: bool,
    pub has_redistributable_license: bool,
    pub is_tagged_version: bool,
    pub is_stable_version: bool,
}

/// Packages imported by the subject, split by origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdges {
    pub standard_library_deps: Vec<String>,
    pub third_party_deps: Vec<String>,
}

/// Packages that import the subject.
pub type ReverseDependents = Vec<String>;

/// The unit persisted to the sink by the enrichment pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub path: String,
    pub summary: PackageSummary,
    pub edges: DependencyEdges,
    pub dependents: ReverseDependents,
    pub captured_at: DateTime<Utc>,
}

impl EnrichedRecord {
    /// A record carrying only the package path.
    pub fn placeholder(path: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            summary: PackageSummary::default(),
            edges: DependencyEdges::default(),
            dependents: Vec::new(),
            captured_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// The three resources fetched per package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Summary,
    Edges,
    Dependents,
}

impl Resource {
    /// All resources, in fetch order.
    pub const ALL: [Resource; 3] = [Self::Summary, Self::Edges, Self::Dependents];

    /// Stable name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Edges => "edges",
            Self::Dependents => "dependents",
        }
    }

    /// Query suffix appended to the identity route.
    pub fn route_suffix(&self) -> &'static str {
        match self {
            Self::Summary => "",
            Self::Edges => "?tab=imports",
            Self::Dependents => "?tab=importedby",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a resource fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-success, non-rate-limit HTTP status.
    Http,
    /// The body lacked the expected structural markers.
    Parse,
    /// Connection or timeout failure.
    Transport,
    /// The route's step budget ran out under rate limiting.
    BackoffExhausted,
}

/// Terminal failure of one resource fetch.
///
/// `status_code` is the HTTP status for [`FailureKind::Http`] and `0` for
/// every failure that did not come from an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub resource: Resource,
    pub status_code: u16,
    pub message: String,
    pub kind: FailureKind,
}

impl FetchFailure {
    /// HTTP status failure.
    pub fn http(resource: Resource, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            resource,
            status_code,
            message: message.into(),
            kind: FailureKind::Http,
        }
    }

    /// Failure with status `0` and the given kind.
    pub fn other(resource: Resource, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            resource,
            status_code: 0,
            message: message.into(),
            kind,
        }
    }

    /// Whether this is an upstream "not found".
    pub fn is_not_found(&self) -> bool {
        self.kind == FailureKind::Http && self.status_code == 404
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] status {}: {}",
            self.resource, self.status_code, self.message
        )
    }
}

/// Aggregate failure of one enrichment attempt, at most one per resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSet {
    failures: BTreeMap<Resource, FetchFailure>,
}

impl FailureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, replacing any earlier one for the same resource.
    pub fn insert(&mut self, failure: FetchFailure) {
        self.failures.insert(failure.resource, failure);
    }

    pub fn get(&self, resource: Resource) -> Option<&FetchFailure> {
        self.failures.get(&resource)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures ordered by resource.
    pub fn iter(&self) -> impl Iterator<Item = &FetchFailure> {
        self.failures.values()
    }

    /// Whether every resource failed.
    pub fn is_total(&self) -> bool {
        self.failures.len() == Resource::ALL.len()
    }

    /// Whether any failure carries the given HTTP status.
    pub fn has_status(&self, status: u16) -> bool {
        self.iter()
            .any(|f| f.kind == FailureKind::Http && f.status_code == status)
    }

    /// Whether the record may still be persisted: nothing failed, or the
    /// summary resource reported "not found".
    pub fn is_persistable(&self) -> bool {
        self.is_empty()
            || self
                .get(Resource::Summary)
                .is_some_and(FetchFailure::is_not_found)
    }
}

impl fmt::Display for FailureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for failure in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FailureSet {}
