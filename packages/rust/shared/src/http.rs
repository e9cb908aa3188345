//! HTTP response classification shared by the index reader and the
//! enrichment client.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::{ModCrawlError, Result};

/// User-Agent string for all outbound requests.
pub const USER_AGENT: &str = concat!("modcrawl/", env!("CARGO_PKG_VERSION"));

/// How a response status should be treated by a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx: hand the body to the decoder or scraper.
    Success,
    /// 429: a capacity signal, retry under the domain's backoff.
    RateLimited,
    /// 404: the resource does not exist upstream.
    NotFound,
    /// Any other status; terminal for this attempt.
    Failed(u16),
}

impl ResponseClass {
    /// Classify an HTTP status code.
    pub fn of(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Success
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited
        } else if status == StatusCode::NOT_FOUND {
            Self::NotFound
        } else {
            Self::Failed(status.as_u16())
        }
    }
}

/// Build a reqwest client with the crawler's user agent and a request timeout.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ModCrawlError::Transport(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(ResponseClass::of(StatusCode::OK), ResponseClass::Success);
        assert_eq!(
            ResponseClass::of(StatusCode::NO_CONTENT),
            ResponseClass::Success
        );
        assert_eq!(
            ResponseClass::of(StatusCode::TOO_MANY_REQUESTS),
            ResponseClass::RateLimited
        );
        assert_eq!(
            ResponseClass::of(StatusCode::NOT_FOUND),
            ResponseClass::NotFound
        );
        assert_eq!(
            ResponseClass::of(StatusCode::INTERNAL_SERVER_ERROR),
            ResponseClass::Failed(500)
        );
    }
}
