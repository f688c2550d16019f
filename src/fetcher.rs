//! HTTP page fetching.
//!
//! [`Fetcher`] owns the one `reqwest::Client` for the run, configured with
//! the site's headers and a bounded timeout. The [`FetchPage`] trait is the
//! seam the orchestrator is generic over, so tests can run the whole
//! pipeline against canned HTML.
//!
//! No retry lives here; the orchestrator decides whether a network failure
//! is worth retrying.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use crate::config::WebsiteConfig;
use crate::error::{HarvestError, Result};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Async page-fetching capability.
#[async_trait]
pub trait FetchPage: Send + Sync {
    /// GET a URL and return its body as text.
    ///
    /// Connection failures and non-2xx statuses are reported uniformly as
    /// [`HarvestError::Network`].
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP fetcher backed by a configured `reqwest::Client`.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Build a client with the configured headers and timeout.
    pub fn new(config: &WebsiteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut has_user_agent = false;
        for (name, value) in &config.headers {
            if name.eq_ignore_ascii_case("user-agent") {
                has_user_agent = true;
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HarvestError::config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HarvestError::config(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs));
        if !has_user_agent {
            builder = builder.user_agent(DEFAULT_USER_AGENT);
        }
        let client = builder
            .build()
            .map_err(|e| HarvestError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchPage for Fetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::network(url, format!("HTTP status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::network(url, e))?;
        debug!(%url, bytes = body.len(), "Fetched page");
        Ok(body)
    }
}
