use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::CrawlConfig;
use crate::dispatch::{Fetched, Transport};
use crate::error::CrawlError;
use crate::utils::RateLimiter;

/// HTTP transport backed by `reqwest`, spacing requests with a [`RateLimiter`].
pub struct HttpTransport {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl HttpTransport {
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::from_secs(
                config.download_delay,
                config.randomize_download_delay,
            ),
        })
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, url: Url) -> Result<Fetched, CrawlError> {
        self.rate_limiter.wait().await;
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(Fetched {
            url: final_url,
            body,
        })
    }
}

/// Serves canned pages from memory; unknown URLs fail with status 404.
///
/// Useful for replaying saved pages and for tests.
#[derive(Default)]
pub struct StaticTransport {
    pages: HashMap<String, String>,
    requested: Mutex<Vec<Url>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, body: impl Into<String>) -> &mut Self {
        match Url::parse(url) {
            Ok(parsed) => {
                self.pages.insert(parsed.to_string(), body.into());
            }
            Err(e) => log::warn!("Skipping canned page with invalid URL {}: {}", url, e),
        }
        self
    }

    /// URLs fetched so far, in request order.
    pub fn requested(&self) -> Vec<Url> {
        match self.requested.lock() {
            Ok(requested) => requested.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transport for StaticTransport {
    async fn fetch(&self, url: Url) -> Result<Fetched, CrawlError> {
        match self.requested.lock() {
            Ok(mut requested) => requested.push(url.clone()),
            Err(poisoned) => poisoned.into_inner().push(url.clone()),
        }

        match self.pages.get(url.as_str()) {
            Some(body) => Ok(Fetched {
                url,
                body: body.clone(),
            }),
            None => Err(CrawlError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
