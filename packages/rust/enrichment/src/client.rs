//! HTTP client for the package registry's detail pages.

use chrono::Utc;
use modcrawl_shared::{
    BackoffRegistry, EnrichedRecord, EnrichmentConfig, FailureKind, FailureSet, FetchFailure,
    ModCrawlError, PackageIdentity, ResponseClass, Resource, Result, build_client,
};
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::scrape::{self, ScrapeError};

/// Outcome of enriching one identity: whatever was scraped plus the
/// failures of the resources that were not.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub record: EnrichedRecord,
    pub failures: FailureSet,
}

impl Enrichment {
    /// Keep the record if it may be persisted, otherwise surface the failures.
    ///
    /// A record is persistable when nothing failed, or when the summary page
    /// returned 404 (the package is known to the index but not published on
    /// the registry). In that case the other resources are kept as scraped.
    pub fn into_persistable(self) -> std::result::Result<EnrichedRecord, FailureSet> {
        if self.failures.is_persistable() {
            Ok(self.record)
        } else {
            Err(self.failures)
        }
    }
}

/// Scrapes the summary, imports and imported-by pages of a package.
///
/// Every concrete route (`a/b`, `a/b?tab=imports`, ...) is its own retry
/// domain in the client's [`BackoffRegistry`], so one rate-limited page does
/// not slow down the others.
#[derive(Debug)]
pub struct EnrichmentClient {
    client: Client,
    base_url: String,
    backoff: BackoffRegistry,
}

impl EnrichmentClient {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let client = build_client(config.request_timeout())?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &EnrichmentConfig) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            ModCrawlError::config(format!("enrichment base_url '{}': {e}", config.base_url))
        })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            backoff: BackoffRegistry::new(config.backoff_ceiling(), config.backoff_steps),
        })
    }

    /// Retry domains still carrying failures.
    pub fn backoff(&self) -> &BackoffRegistry {
        &self.backoff
    }

    /// Fetch all three resources concurrently and collect the results.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn fetch(&self, identity: &PackageIdentity) -> Enrichment {
        let route = identity.route();

        let (summary, edges, dependents) = tokio::join!(
            self.fetch_resource(&route, Resource::Summary, scrape::parse_summary),
            self.fetch_resource(&route, Resource::Edges, scrape::parse_imports),
            self.fetch_resource(&route, Resource::Dependents, scrape::parse_imported_by),
        );

        let mut record = EnrichedRecord::placeholder(&identity.path, Utc::now());
        let mut failures = FailureSet::new();

        match summary {
            Ok(summary) => record.summary = summary,
            Err(failure) => failures.insert(failure),
        }
        match edges {
            Ok(edges) => record.edges = edges,
            Err(failure) => failures.insert(failure),
        }
        match dependents {
            Ok(dependents) => record.dependents = dependents,
            Err(failure) => failures.insert(failure),
        }

        if failures.is_empty() {
            debug!(
                imports = record.edges.third_party_deps.len(),
                dependents = record.dependents.len(),
                "package enriched"
            );
        } else {
            warn!(failures = %failures, "package partially enriched");
        }

        Enrichment { record, failures }
    }

    /// Fetch and apply the persistence rule in one step.
    pub async fn enrich(
        &self,
        identity: &PackageIdentity,
    ) -> std::result::Result<EnrichedRecord, FailureSet> {
        self.fetch(identity).await.into_persistable()
    }

    async fn fetch_resource<T>(
        &self,
        identity_route: &str,
        resource: Resource,
        scrape: fn(&str) -> std::result::Result<T, ScrapeError>,
    ) -> std::result::Result<T, FetchFailure> {
        let route = format!("{identity_route}{}", resource.route_suffix());
        let body = self.get(&route, resource).await?;
        scrape(&body).map_err(|e| FetchFailure::other(resource, FailureKind::Parse, e.to_string()))
    }

    /// GET one route, absorbing rate limits under the route's backoff.
    async fn get(&self, route: &str, resource: Resource) -> std::result::Result<String, FetchFailure> {
        let backoff = self.backoff.domain(route);
        let url = format!("{}/{route}", self.base_url);

        let outcome = loop {
            let delay = match backoff.next_delay() {
                Ok(delay) => delay,
                Err(e) => {
                    break Err(FetchFailure::other(
                        resource,
                        FailureKind::BackoffExhausted,
                        e.to_string(),
                    ));
                }
            };
            if !delay.is_zero() {
                debug!(route, ?delay, "backing off");
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    break Err(FetchFailure::other(
                        resource,
                        FailureKind::Transport,
                        format!("{url}: {e}"),
                    ));
                }
            };

            let status = response.status();
            match ResponseClass::of(status) {
                ResponseClass::RateLimited => {
                    backoff.record_failure();
                    debug!(route, attempt = backoff.attempt(), "rate limited");
                }
                ResponseClass::Success => {
                    break response.text().await.map_err(|e| {
                        FetchFailure::other(
                            resource,
                            FailureKind::Transport,
                            format!("{url}: failed to read body: {e}"),
                        )
                    });
                }
                ResponseClass::NotFound | ResponseClass::Failed(_) => {
                    break Err(FetchFailure::http(
                        resource,
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("unexpected status"),
                    ));
                }
            }
        };

        // Every exit is terminal for this route, so settle and drop its domain.
        backoff.record_success();
        self.backoff.release(route);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAIN_PAGE: &str = r#"<html><body>
<a href="?tab=versions">Version: v1.6.1</a>
<span class="go-Chip DetailsHeader-span--latest">Latest</span>
<a data-test-id="UnitHeader-license" href="?tab=licenses">Apache-2.0</a>
<span class="go-Chip go-Chip--inverted">module</span>
<details><summary class="go-textSubtle">Valid go.mod file <img alt="checked"></summary></details>
<details><summary class="go-textSubtle">Redistributable license <img alt="checked"></summary></details>
<details><summary class="go-textSubtle">Tagged version <img alt="checked"></summary></details>
<details><summary class="go-textSubtle">Stable version <img alt="checked"></summary></details>
<div class="UnitMeta-repo"><a href="https://github.com/spf13/cobra">github.com/spf13/cobra</a></div>
</body></html>"#;

    const IMPORTS_PAGE: &str = r#"<html><body>
<ul class="Imports-list"><li><a href="/github.com/spf13/pflag">github.com/spf13/pflag</a></li></ul>
<ul class="Imports-list"><li><a href="/fmt">fmt</a></li><li><a href="/os">os</a></li></ul>
</body></html>"#;

    const IMPORTED_BY_PAGE: &str = r#"<html><body>
<a class="u-breakWord" href="/github.com/foo/bar">github.com/foo/bar</a>
</body></html>"#;

    fn test_config(server: &MockServer, steps: u32) -> EnrichmentConfig {
        EnrichmentConfig {
            base_url: server.uri(),
            backoff_ceiling_secs: 0,
            backoff_steps: steps,
            ..EnrichmentConfig::default()
        }
    }

    async fn mount_page(server: &MockServer, route: &str, tab: Option<&str>, response: ResponseTemplate) {
        let mock = Mock::given(method("GET")).and(path(route));
        let mock = match tab {
            Some(tab) => mock.and(query_param("tab", tab)),
            None => mock.and(query_param_is_missing("tab")),
        };
        mock.respond_with(response).mount(server).await;
    }

    fn page(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(body)
    }

    #[tokio::test]
    async fn enriches_all_three_resources() {
        let server = MockServer::start().await;
        mount_page(&server, "/github.com/spf13/cobra", None, page(MAIN_PAGE)).await;
        mount_page(&server, "/github.com/spf13/cobra", Some("imports"), page(IMPORTS_PAGE)).await;
        mount_page(&server, "/github.com/spf13/cobra", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let identity = PackageIdentity::latest("github.com/spf13/cobra");
        let record = client.enrich(&identity).await.unwrap();

        assert_eq!(record.path, "github.com/spf13/cobra");
        assert_eq!(record.summary.version, "v1.6.1");
        assert_eq!(record.summary.license, "Apache-2.0");
        assert!(record.summary.is_stable_version);
        assert_eq!(record.edges.standard_library_deps, vec!["fmt", "os"]);
        assert_eq!(record.edges.third_party_deps, vec!["github.com/spf13/pflag"]);
        assert_eq!(record.dependents, vec!["github.com/foo/bar"]);
        assert!(client.backoff().is_empty());
    }

    #[tokio::test]
    async fn sub_fetches_run_concurrently() {
        let server = MockServer::start().await;
        let delay = std::time::Duration::from_millis(300);
        mount_page(&server, "/a/b", None, page(MAIN_PAGE).set_delay(delay)).await;
        mount_page(&server, "/a/b", Some("imports"), page(IMPORTS_PAGE).set_delay(delay)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE).set_delay(delay)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let started = std::time::Instant::now();
        let enrichment = client.fetch(&PackageIdentity::latest("a/b")).await;
        let elapsed = started.elapsed();

        assert!(enrichment.failures.is_empty());
        assert!(elapsed < std::time::Duration::from_millis(750), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn summary_not_found_is_still_persisted() {
        let server = MockServer::start().await;
        mount_page(&server, "/a/b", None, ResponseTemplate::new(404)).await;
        mount_page(&server, "/a/b", Some("imports"), page(IMPORTS_PAGE)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let enrichment = client.fetch(&PackageIdentity::latest("a/b")).await;
        assert_eq!(enrichment.failures.len(), 1);
        assert!(enrichment.failures.has_status(404));

        let record = enrichment.into_persistable().unwrap();
        assert_eq!(record.summary, Default::default());
        assert_eq!(record.edges.standard_library_deps, vec!["fmt", "os"]);
    }

    #[tokio::test]
    async fn edges_server_error_aborts_persistence() {
        let server = MockServer::start().await;
        mount_page(&server, "/a/b", None, page(MAIN_PAGE)).await;
        mount_page(&server, "/a/b", Some("imports"), ResponseTemplate::new(500)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let failures = client
            .enrich(&PackageIdentity::latest("a/b"))
            .await
            .unwrap_err();

        assert_eq!(failures.len(), 1);
        let failure = failures.get(Resource::Edges).unwrap();
        assert_eq!(failure.status_code, 500);
        assert_eq!(failure.kind, FailureKind::Http);
    }

    #[tokio::test]
    async fn rate_limited_route_is_retried_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/b"))
            .and(query_param("tab", "importedby"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_page(&server, "/a/b", None, page(MAIN_PAGE)).await;
        mount_page(&server, "/a/b", Some("imports"), page(IMPORTS_PAGE)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let record = client.enrich(&PackageIdentity::latest("a/b")).await.unwrap();
        assert_eq!(record.dependents, vec!["github.com/foo/bar"]);
        assert!(client.backoff().is_empty());
    }

    #[tokio::test]
    async fn exhausted_route_reports_status_zero() {
        let server = MockServer::start().await;
        mount_page(&server, "/a/b", None, page(MAIN_PAGE)).await;
        mount_page(&server, "/a/b", Some("imports"), ResponseTemplate::new(429)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 2)).unwrap();
        let failures = client
            .enrich(&PackageIdentity::latest("a/b"))
            .await
            .unwrap_err();

        let failure = failures.get(Resource::Edges).unwrap();
        assert_eq!(failure.status_code, 0);
        assert_eq!(failure.kind, FailureKind::BackoffExhausted);
        assert!(client.backoff().is_empty());
    }

    #[tokio::test]
    async fn unparseable_page_reports_status_zero() {
        let server = MockServer::start().await;
        mount_page(&server, "/a/b", None, page("<html><body>captcha</body></html>")).await;
        mount_page(&server, "/a/b", Some("imports"), page(IMPORTS_PAGE)).await;
        mount_page(&server, "/a/b", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let failures = client
            .enrich(&PackageIdentity::latest("a/b"))
            .await
            .unwrap_err();

        let failure = failures.get(Resource::Summary).unwrap();
        assert_eq!(failure.status_code, 0);
        assert_eq!(failure.kind, FailureKind::Parse);
        assert!(failure.message.contains("unknown HTML content"));
    }

    #[tokio::test]
    async fn total_failure_leaves_a_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let enrichment = client.fetch(&PackageIdentity::latest("a/b")).await;

        assert!(enrichment.failures.is_total());
        assert_eq!(enrichment.record.path, "a/b");
        assert_eq!(enrichment.record.summary, Default::default());
        assert!(enrichment.record.dependents.is_empty());
        assert!(enrichment.into_persistable().is_err());
    }

    #[tokio::test]
    async fn pinned_identity_uses_versioned_route() {
        let server = MockServer::start().await;
        mount_page(&server, "/a/b@v1.2.0", None, page(MAIN_PAGE)).await;
        mount_page(&server, "/a/b@v1.2.0", Some("imports"), page(IMPORTS_PAGE)).await;
        mount_page(&server, "/a/b@v1.2.0", Some("importedby"), page(IMPORTED_BY_PAGE)).await;

        let client = EnrichmentClient::new(&test_config(&server, 3)).unwrap();
        let record = client
            .enrich(&PackageIdentity::pinned("a/b", "v1.2.0"))
            .await
            .unwrap();
        assert_eq!(record.path, "a/b");
    }
}
