//! Minimum and maximum semantic version of a package.

use modcrawl_shared::{ModCrawlError, Result};
use modcrawl_storage::{Sink, ensure_identifier};
use semver::Version;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRange {
    #[serde(rename = "version_min")]
    pub min: String,
    #[serde(rename = "version_max")]
    pub max: String,
}

impl VersionRange {
    /// Range over `versions`, compared by semver precedence.
    ///
    /// Versions must carry the `v` prefix; the `vMAJOR` and `vMAJOR.MINOR`
    /// shorthands stand for `.0` patches. Anything else that is not a
    /// semantic version is ignored; `None` when nothing parses. The original
    /// strings are kept.
    pub fn from_versions<'a>(versions: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut parsed: Vec<(Version, &str)> = versions
            .into_iter()
            .filter_map(|raw| parse_version(raw.trim()).map(|v| (v, raw)))
            .collect();
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        let (_, min) = parsed.first()?;
        let (_, max) = parsed.last()?;
        Some(Self {
            min: (*min).to_string(),
            max: (*max).to_string(),
        })
    }
}

/// Parse `v`-prefixed version text, expanding `v1` and `v1.2`.
fn parse_version(raw: &str) -> Option<Version> {
    let text = raw.strip_prefix('v')?;
    let is_shorthand = !text.is_empty()
        && text.split('.').count() < 3
        && text.chars().all(|c| c.is_ascii_digit() || c == '.');
    if is_shorthand {
        let padded = match text.split('.').count() {
            1 => format!("{text}.0.0"),
            _ => format!("{text}.0"),
        };
        return Version::parse(&padded).ok();
    }
    Version::parse(text).ok()
}

/// Version range of `path` as recorded in `index_table`.
pub async fn version_range<S: Sink>(
    sink: &S,
    index_table: &str,
    path: &str,
) -> Result<Option<VersionRange>> {
    ensure_identifier(index_table)?;
    if path.trim().is_empty() {
        return Err(ModCrawlError::validation("empty package path"));
    }

    let sql = format!(
        "SELECT version FROM {index_table} WHERE path = '{}'",
        path.replace('\'', "''")
    );
    let rows = sink.query(&sql).await?;
    Ok(VersionRange::from_versions(
        rows.iter().filter_map(|row| row.first().and_then(|v| v.as_str())),
    ))
}
