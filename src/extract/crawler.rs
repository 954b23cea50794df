//! Page fetching shared by all forums.

use std::time::Duration;

use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::http::build_crawl_http_client;
use super::{ExtractError, Extraction, Forum, nga};
use crate::user_agent;

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Default pause between the priming request and the real fetch.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Crawl client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOptions {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Fixed delay after a priming request.
    pub request_delay: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: user_agent::default_crawl_user_agent(),
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }
}

/// Fetches forum pages and extracts their fields.
///
/// Created once and reused; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Crawler {
    client: Client,
    request_delay: Duration,
}

impl Crawler {
    /// Builds a crawler from options.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Fetch`] if the HTTP client cannot be built.
    pub fn new(options: &CrawlOptions) -> Result<Self, ExtractError> {
        let client = build_crawl_http_client(
            &options.user_agent,
            options.connect_timeout,
            options.read_timeout,
        )?;
        Ok(Self {
            client,
            request_delay: options.request_delay,
        })
    }

    /// Fetches `url` and extracts its fields for `forum`.
    ///
    /// Never returns an error directly: fetch and decode failures come back as
    /// [`Extraction::Failed`].
    #[instrument(skip(self), fields(forum = %forum))]
    pub async fn crawl(&self, forum: Forum, url: &str) -> Extraction {
        match self.fetch_text(forum, url).await {
            Ok(text) => forum.extract(&text),
            Err(error) => Extraction::Failed(error),
        }
    }

    /// Builds the request for the real fetch of `url`.
    ///
    /// NGA refuses guests without a `guestJs` cookie. The token is read from a
    /// priming GET (served with an error status, so the status is not checked),
    /// attached as a cookie, and the request delay is observed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Fetch`] if priming fails or yields no token.
    pub async fn prepare_request(&self, forum: Forum, url: &Url) -> Result<RequestBuilder, ExtractError> {
        let request = self.client.get(url.clone());
        match forum {
            Forum::Tieba => Ok(request),
            Forum::Nga => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| ExtractError::fetch(url.as_str(), e.to_string()))?;
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ExtractError::fetch(url.as_str(), e.to_string()))?;
                let text = String::from_utf8_lossy(&body);
                let token = nga::guest_token(&text).ok_or_else(|| {
                    ExtractError::fetch(url.as_str(), "guest token not found in priming response")
                })?;
                debug!(token, "primed guest token");

                let request = request.header(COOKIE, format!("{}={token}", nga::GUEST_COOKIE));
                tokio::time::sleep(self.request_delay).await;
                Ok(request)
            }
        }
    }

    /// Fetches `url` and decodes the body with the forum's charset.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::Fetch`] on an invalid URL, transport error or non-200 status.
    /// - [`ExtractError::Encoding`] when the body is not valid in the forum's charset.
    pub async fn fetch_text(&self, forum: Forum, url: &str) -> Result<String, ExtractError> {
        let parsed =
            Url::parse(url).map_err(|e| ExtractError::fetch(url, format!("invalid URL: {e}")))?;
        let request = self.prepare_request(forum, &parsed).await?;

        let response = request
            .send()
            .await
            .map_err(|e| ExtractError::fetch(url, e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ExtractError::fetch(url, format!("HTTP {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ExtractError::fetch(url, e.to_string()))?;
        debug!(bytes = body.len(), "fetched page");

        let charset = forum.charset();
        charset.decode(&body).ok_or_else(|| ExtractError::Encoding {
            url: url.to_string(),
            charset: charset.label(),
        })
    }
}
