//! Pure scrapers for the three package pages.
//!
//! Each function parses a full HTML document and returns freshly built
//! values. They are synchronous on purpose: [`Html`] is not `Send`, so the
//! client reads the body first and scrapes it without holding the document
//! across an await point.

use std::sync::LazyLock;

use modcrawl_shared::{DependencyEdges, PackageSummary, ReverseDependents};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// A page did not contain the structure its scraper relies on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScrapeError {
    #[error("unknown HTML content: no {0} found")]
    MissingStructure(&'static str),
}

// ---------------------------------------------------------------------------
// Selectors (compiled once)
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static LICENSE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"a[data-test-id="UnitHeader-license"]"#));
static VERSIONS_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href="?tab=versions"]"#));
static LATEST_CHIP: LazyLock<Selector> =
    LazyLock::new(|| selector("span.DetailsHeader-span--latest"));
static INVERTED_CHIP: LazyLock<Selector> = LazyLock::new(|| selector("span.go-Chip--inverted"));
static DETAILS_SUMMARY: LazyLock<Selector> = LazyLock::new(|| selector("summary.go-textSubtle"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static REPO_LINK: LazyLock<Selector> = LazyLock::new(|| selector("div.UnitMeta-repo a[href]"));
static IMPORTS_LIST: LazyLock<Selector> = LazyLock::new(|| selector("ul.Imports-list"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static DEPENDENT_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.u-breakWord[href]"));

static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v\d\S*").expect("valid regex"));

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Scrape the package detail page.
///
/// The four details summaries carry, in page order: valid manifest,
/// redistributable license, tagged version, stable version. Each flag is set
/// when its summary holds an image with `alt="checked"`.
pub fn parse_summary(html: &str) -> Result<PackageSummary, ScrapeError> {
    let doc = Html::parse_document(html);

    let versions_link = doc.select(&VERSIONS_LINK).next();
    let details: Vec<ElementRef<'_>> = doc.select(&DETAILS_SUMMARY).collect();
    if versions_link.is_none() && details.is_empty() {
        return Err(ScrapeError::MissingStructure("package header"));
    }

    let mut summary = PackageSummary {
        version: versions_link
            .map(|a| extract_version(&text_of(a)))
            .unwrap_or_default(),
        license: doc
            .select(&LICENSE)
            .next()
            .map(text_of)
            .unwrap_or_default(),
        repository_url: doc
            .select(&REPO_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string(),
        is_module: doc.select(&INVERTED_CHIP).any(|chip| text_of(chip) == "module"),
        is_latest_version: doc
            .select(&LATEST_CHIP)
            .next()
            .is_some_and(|chip| text_of(chip) == "Latest"),
        ..PackageSummary::default()
    };

    let flags = [
        &mut summary.is_valid_manifest,
        &mut summary.has_redistributable_license,
        &mut summary.is_tagged_version,
        &mut summary.is_stable_version,
    ];
    for (flag, detail) in flags.into_iter().zip(&details) {
        *flag = detail
            .select(&IMG)
            .next()
            .and_then(|img| img.value().attr("alt"))
            == Some("checked");
    }

    Ok(summary)
}

/// Pull `v1.2.3` out of link text such as `Version: v1.2.3`.
fn extract_version(text: &str) -> String {
    VERSION
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// Scrape the imports tab.
///
/// The page lists imports in one or more `ul.Imports-list` blocks; the last
/// block is the standard library, every earlier block is third-party.
pub fn parse_imports(html: &str) -> Result<DependencyEdges, ScrapeError> {
    let doc = Html::parse_document(html);
    let lists: Vec<ElementRef<'_>> = doc.select(&IMPORTS_LIST).collect();

    let Some((std_list, third_party)) = lists.split_last() else {
        return Err(ScrapeError::MissingStructure("imports list"));
    };

    Ok(DependencyEdges {
        standard_library_deps: hrefs(std_list.select(&LINK)),
        third_party_deps: third_party
            .iter()
            .flat_map(|list| hrefs(list.select(&LINK)))
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Imported by
// ---------------------------------------------------------------------------

/// Scrape the imported-by tab. A package nobody imports yields an empty list.
pub fn parse_imported_by(html: &str) -> Result<ReverseDependents, ScrapeError> {
    let doc = Html::parse_document(html);
    Ok(hrefs(doc.select(&DEPENDENT_LINK)))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn hrefs<'a>(links: impl Iterator<Item = ElementRef<'a>>) -> Vec<String> {
    links
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim_start_matches('/').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_PAGE: &str = r#"<!DOCTYPE html>
<html><body>
<div class="go-Main-headerDetails">
  <span class="go-Main-headerDetailItem" data-test-id="UnitHeader-version">
    <a href="?tab=versions" aria-label="Version: v1.9.0">Version: v1.9.0</a>
  </span>
  <span class="go-Chip DetailsHeader-span--latest">Latest</span>
  <span class="go-Main-headerDetailItem" data-test-id="UnitHeader-licenses">
    <a href="/github.com/fsouza/go-dockerclient?tab=licenses" data-test-id="UnitHeader-license">BSD-2-Clause</a>
  </span>
  <span class="go-Chip go-Chip--inverted">module</span>
</div>
<div class="UnitMeta">
  <details><summary class="go-textSubtle">Valid <a href="https://go.dev/ref/mod#go-mod-file">go.mod</a> file <img src="/static/shared/icon/check_circle_gm_grey_24dp.svg" alt="checked"></summary></details>
  <details><summary class="go-textSubtle">Redistributable license <img src="/static/shared/icon/check_circle_gm_grey_24dp.svg" alt="checked"></summary></details>
  <details><summary class="go-textSubtle">Tagged version <img src="/static/shared/icon/check_circle_gm_grey_24dp.svg" alt="checked"></summary></details>
  <details><summary class="go-textSubtle">Stable version <img src="/static/shared/icon/cancel_gm_grey_24dp.svg" alt="unchecked"></summary></details>
  <div class="UnitMeta-repo">
    <a href="https://github.com/fsouza/go-dockerclient" title="https://github.com/fsouza/go-dockerclient" target="_blank" rel="noopener">github.com/fsouza/go-dockerclient</a>
  </div>
</div>
</body></html>"#;

    const IMPORTS_PAGE: &str = r#"<html><body>
<h2>Imports</h2>
<ul class="Imports-list">
  <li><a href="/github.com/docker/docker/api/types/swarm">github.com/docker/docker/api/types/swarm</a></li>
  <li><a href="/github.com/docker/go-units">github.com/docker/go-units</a></li>
</ul>
<ul class="Imports-list">
  <li><a href="/golang.org/x/sys/unix">golang.org/x/sys/unix</a></li>
</ul>
<h3>Standard library imports</h3>
<ul class="Imports-list">
  <li><a href="/bufio">bufio</a></li>
  <li><a href="/bytes">bytes</a></li>
  <li><a href="/context">context</a></li>
</ul>
</body></html>"#;

    const IMPORTED_BY_PAGE: &str = r#"<html><body>
<div class="ImportedBy">
  <ul>
    <li class="u-breakWord"><a class="u-breakWord" href="/bitbucket.org/blackxcloudeng/infra/common/docker">bitbucket.org/blackxcloudeng/infra/common/docker</a></li>
    <li><a class="u-breakWord" href="/bldy.build/build/namespace/docker">bldy.build/build/namespace/docker</a></li>
    <li><a href="/not/a/dependent">ignored</a></li>
  </ul>
</div>
</body></html>"#;

    #[test]
    fn parses_summary_page() {
        let summary = parse_summary(MAIN_PAGE).unwrap();
        assert_eq!(summary.version, "v1.9.0");
        assert_eq!(summary.license, "BSD-2-Clause");
        assert_eq!(
            summary.repository_url,
            "https://github.com/fsouza/go-dockerclient"
        );
        assert!(summary.is_module);
        assert!(summary.is_latest_version);
        assert!(summary.is_valid_manifest);
        assert!(summary.has_redistributable_license);
        assert!(summary.is_tagged_version);
        assert!(!summary.is_stable_version);
    }

    #[test]
    fn summary_without_structure_fails() {
        let err = parse_summary("<html><body><p>Oops</p></body></html>").unwrap_err();
        assert_eq!(err, ScrapeError::MissingStructure("package header"));
        assert!(err.to_string().starts_with("unknown HTML content"));
    }

    #[test]
    fn summary_with_only_details_is_accepted() {
        let html = r#"<html><body><details><summary class="go-textSubtle">Valid go.mod <img alt="checked"></summary></details></body></html>"#;
        let summary = parse_summary(html).unwrap();
        assert!(summary.is_valid_manifest);
        assert!(summary.version.is_empty());
        assert!(!summary.is_module);
    }

    #[test]
    fn version_extraction() {
        assert_eq!(extract_version("Version: v1.9.0"), "v1.9.0");
        assert_eq!(extract_version("v0.0.0-20220101-abcdef"), "v0.0.0-20220101-abcdef");
        assert_eq!(extract_version("no version here"), "");
    }

    #[test]
    fn parses_imports_page() {
        let edges = parse_imports(IMPORTS_PAGE).unwrap();
        assert_eq!(edges.standard_library_deps, vec!["bufio", "bytes", "context"]);
        assert_eq!(
            edges.third_party_deps,
            vec![
                "github.com/docker/docker/api/types/swarm",
                "github.com/docker/go-units",
                "golang.org/x/sys/unix",
            ]
        );
    }

    #[test]
    fn imports_without_lists_fails() {
        assert!(parse_imports("<html><body><h2>Imports</h2></body></html>").is_err());
    }

    #[test]
    fn single_imports_list_is_standard_library() {
        let html = r#"<ul class="Imports-list"><li><a href="/fmt">fmt</a></li></ul>"#;
        let edges = parse_imports(html).unwrap();
        assert_eq!(edges.standard_library_deps, vec!["fmt"]);
        assert!(edges.third_party_deps.is_empty());
    }

    #[test]
    fn parses_imported_by_page() {
        let dependents = parse_imported_by(IMPORTED_BY_PAGE).unwrap();
        assert_eq!(
            dependents,
            vec![
                "bitbucket.org/blackxcloudeng/infra/common/docker",
                "bldy.build/build/namespace/docker",
            ]
        );
    }

    #[test]
    fn imported_by_may_be_empty() {
        assert!(parse_imported_by("<html></html>").unwrap().is_empty());
    }
}
