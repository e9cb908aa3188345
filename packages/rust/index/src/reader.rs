//! Paginating reader for the index feed.

use modcrawl_shared::{
    Backoff, IndexConfig, IndexEntry, IndexTimestamp, ModCrawlError, ResponseClass, Result,
    build_client,
};
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::decoder;

/// Retry-domain key for the feed's backoff.
const FEED_DOMAIN: &str = "index-feed";

/// Where the reader is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Between pages.
    Idle,
    /// A request is in flight.
    Fetching,
    /// Sleeping after a rate-limit response.
    BackingOff,
    /// Decoding a received page.
    Decoding,
    /// The feed returned an empty page; no further requests are made.
    Done,
}

/// Result of one [`IndexReader::fetch_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Entries in feed order. May include entries at or before the cursor.
    Entries(Vec<IndexEntry>),
    /// The feed has nothing newer than the cursor.
    Done,
}

/// Fetches pages of the index feed under a single backoff domain.
///
/// The reader holds no cursor of its own: the caller passes the watermark on
/// every call and decides what to do with replayed entries.
#[derive(Debug)]
pub struct IndexReader {
    client: Client,
    base_url: Url,
    page_limit: u32,
    backoff: Backoff,
    state: ReaderState,
}

impl IndexReader {
    /// Build a reader with its own HTTP client.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = build_client(config.request_timeout())?;
        Self::with_client(client, config)
    }

    /// Build a reader sharing an existing client.
    pub fn with_client(client: Client, config: &IndexConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ModCrawlError::config(format!("index base_url '{}': {e}", config.base_url))
        })?;

        Ok(Self {
            client,
            base_url,
            page_limit: config.page_limit,
            backoff: Backoff::new(FEED_DOMAIN, config.backoff_ceiling(), config.backoff_steps),
            state: ReaderState::Idle,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Fetch the page following `cursor`, or the start of the feed.
    ///
    /// Rate-limit responses are retried under the feed's backoff until its
    /// step budget runs out ([`ModCrawlError::BackoffExhausted`]). Any other
    /// non-success status is returned as [`ModCrawlError::Http`] without
    /// retrying, and connection failures as [`ModCrawlError::Transport`].
    /// Once the feed has returned an empty page, every later call returns
    /// [`Page::Done`] without a request.
    #[instrument(skip_all, fields(since = cursor.map(IndexTimestamp::as_str).unwrap_or("")))]
    pub async fn fetch_next(&mut self, cursor: Option<&IndexTimestamp>) -> Result<Page> {
        if self.state == ReaderState::Done {
            return Ok(Page::Done);
        }

        let url = self.page_url(cursor);

        loop {
            let delay = match self.backoff.next_delay() {
                Ok(delay) => delay,
                Err(e) => {
                    self.state = ReaderState::Idle;
                    return Err(e);
                }
            };
            if !delay.is_zero() {
                self.state = ReaderState::BackingOff;
                debug!(?delay, attempt = self.backoff.attempt(), "backing off");
                tokio::time::sleep(delay).await;
            }

            self.state = ReaderState::Fetching;
            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    self.state = ReaderState::Idle;
                    return Err(ModCrawlError::Transport(format!("{url}: {e}")));
                }
            };

            let status = response.status();
            match ResponseClass::of(status) {
                ResponseClass::RateLimited => {
                    self.backoff.record_failure();
                    warn!(attempt = self.backoff.attempt(), "index feed rate limited");
                }
                ResponseClass::Success => {
                    self.backoff.record_success();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            self.state = ReaderState::Idle;
                            return Err(ModCrawlError::Transport(format!(
                                "{url}: failed to read body: {e}"
                            )));
                        }
                    };

                    if body.trim().is_empty() {
                        debug!("empty page, feed exhausted");
                        self.state = ReaderState::Done;
                        return Ok(Page::Done);
                    }

                    self.state = ReaderState::Decoding;
                    let decoded = decoder::decode(&body);
                    self.state = ReaderState::Idle;
                    let entries = decoded?;
                    debug!(entries = entries.len(), bytes = body.len(), "page decoded");
                    return Ok(Page::Entries(entries));
                }
                ResponseClass::NotFound | ResponseClass::Failed(_) => {
                    self.state = ReaderState::Idle;
                    return Err(ModCrawlError::Http {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
            }
        }
    }

    fn page_url(&self, cursor: Option<&IndexTimestamp>) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("since", cursor.as_str());
            }
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = concat!(
        r#"{"Path":"a/b","Version":"v1.0.0","Timestamp":"2022-10-23T14:22:05.247192Z"}"#,
        "\n",
        r#"{"Path":"c/d","Version":"v0.3.1","Timestamp":"2022-10-23T14:22:06.01234Z"}"#,
        "\n",
    );

    fn test_config(server: &MockServer, steps: u32) -> IndexConfig {
        IndexConfig {
            base_url: format!("{}/index", server.uri()),
            page_limit: 2,
            backoff_ceiling_secs: 0,
            backoff_steps: steps,
            ..IndexConfig::default()
        }
    }

    #[tokio::test]
    async fn fetches_and_decodes_a_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        let page = reader.fetch_next(None).await.unwrap();

        match page {
            Page::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[1].path, "c/d");
                assert_eq!(entries[1].timestamp.as_str(), "2022-10-23T14:22:06.01234Z");
            }
            Page::Done => panic!("expected entries"),
        }
        assert_eq!(reader.state(), ReaderState::Idle);
    }

    #[tokio::test]
    async fn sends_cursor_as_since() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .and(query_param("since", "2022-10-23T14:22:05.247192Z"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        let cursor = IndexTimestamp::new("2022-10-23T14:22:05.247192Z");
        let page = reader.fetch_next(Some(&cursor)).await.unwrap();
        assert!(matches!(page, Page::Entries(_)));
    }

    #[tokio::test]
    async fn empty_body_is_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        assert_eq!(reader.fetch_next(None).await.unwrap(), Page::Done);
        assert_eq!(reader.state(), ReaderState::Done);

        // No second request once done.
        assert_eq!(reader.fetch_next(None).await.unwrap(), Page::Done);
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        let page = reader.fetch_next(None).await.unwrap();
        assert!(matches!(page, Page::Entries(ref e) if e.len() == 2));
        assert_eq!(reader.backoff().attempt(), 0);
    }

    #[tokio::test]
    async fn rate_limit_past_budget_is_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 2)).unwrap();
        match reader.fetch_next(None).await {
            Err(ModCrawlError::BackoffExhausted { domain, attempts }) => {
                assert_eq!(domain, FEED_DOMAIN);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        let err = reader.fetch_next(None).await.unwrap_err();
        assert!(matches!(err, ModCrawlError::Http { status: 500, .. }));
        assert!(err.is_transient());
        assert_eq!(reader.state(), ReaderState::Idle);
    }

    #[tokio::test]
    async fn malformed_page_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>maintenance</body></html>\n"),
            )
            .mount(&server)
            .await;

        let mut reader = IndexReader::new(&test_config(&server, 5)).unwrap();
        let err = reader.fetch_next(None).await.unwrap_err();
        assert!(matches!(err, ModCrawlError::MalformedRecord { line: 1, .. }));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let config = IndexConfig {
            base_url: "::not a url".into(),
            ..IndexConfig::default()
        };
        assert!(IndexReader::new(&config).is_err());
    }
}
