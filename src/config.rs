use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::CrawlError;

pub const DEFAULT_START_URL: &str = "http://minecraft.curseforge.com/mc-mods";

/// Crawl settings, read from a TOML file. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub start_urls: Vec<String>,
    pub user_agent: String,
    /// Seconds between two requests.
    pub download_delay: f64,
    pub randomize_download_delay: bool,
    pub max_concurrent_requests: usize,
    /// Stop dispatching after this many requests.
    pub max_requests: Option<usize>,
    pub follow_pagination: bool,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_urls: vec![DEFAULT_START_URL.to_string()],
            user_agent: "mpm".to_string(),
            download_delay: 5.0,
            randomize_download_delay: true,
            max_concurrent_requests: 8,
            max_requests: None,
            follow_pagination: true,
            request_timeout: 30,
        }
    }
}

impl CrawlConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("Invalid crawl configuration")
    }

    pub fn parse_start_urls(&self) -> Result<Vec<Url>, CrawlError> {
        self.start_urls
            .iter()
            .map(|url| {
                Url::parse(url).map_err(|source| CrawlError::InvalidUrl {
                    url: url.clone(),
                    source,
                })
            })
            .collect()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&input)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }
}
