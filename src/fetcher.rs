//! Page fetching.
//!
//! The [`Fetcher`] trait is the transport seam: the controller only ever
//! asks for the bytes at a URL and learns whether a failure is worth
//! retrying. [`HttpFetcher`] is the reqwest implementation; anything else
//! (a proxy pool, a recorded fixture set) can stand in behind the trait.
//!
//! # Failure classification
//!
//! | Outcome | Kind |
//! |---------|------|
//! | network error, timeout | transient |
//! | 408, 429, 403, 5xx | transient |
//! | any other non-success status | permanent |

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use registry_scrape_core::lifecycle::FailureKind;
use registry_scrape_core::models::ItemKey;

use crate::config::ScrapeConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient error fetching {url}: {message}")]
    Transient {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("permanent error fetching {url}: {message}")]
    Permanent {
        url: String,
        status: Option<u16>,
        message: String,
    },
}

impl FetchError {
    pub fn transient(url: &str, message: impl Into<String>) -> Self {
        FetchError::Transient {
            url: url.to_string(),
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(url: &str, message: impl Into<String>) -> Self {
        FetchError::Permanent {
            url: url.to_string(),
            status: None,
            message: message.into(),
        }
    }

    /// Build the error for a non-success HTTP status.
    pub fn from_status(url: &str, status: u16) -> Self {
        let message = format!("HTTP {}", status);
        match classify_status(status) {
            FailureKind::Transient => FetchError::Transient {
                url: url.to_string(),
                status: Some(status),
                message,
            },
            FailureKind::Permanent => FetchError::Permanent {
                url: url.to_string(),
                status: Some(status),
                message,
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transient { .. } => FailureKind::Transient,
            FetchError::Permanent { .. } => FailureKind::Permanent,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transient { status, .. } | FetchError::Permanent { status, .. } => *status,
        }
    }
}

/// Whether a non-success HTTP status may succeed later.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        403 | 408 | 429 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Fetches the raw bytes of a page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Registry URL for one scrape item.
///
/// `{base}/company/{entity}{suffix}`, then `/{detail id}` for charge detail
/// pages and `?page=N` for pages after the first.
pub fn page_url(base_url: &str, key: &ItemKey) -> String {
    let mut url = format!(
        "{}/company/{}{}",
        base_url.trim_end_matches('/'),
        key.entity_id.trim(),
        key.page_type.path_suffix()
    );
    if let Some(id) = &key.detail_id {
        url.push('/');
        url.push_str(id);
    }
    if key.page_index > 1 {
        url.push_str(&format!("?page={}", key.page_index));
    }
    url
}

/// HTTP fetcher backed by a shared `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &ScrapeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(url, e.to_string()))?;
        Ok(body.to_vec())
    }
}
