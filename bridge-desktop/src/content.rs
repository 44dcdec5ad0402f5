//! Content Provider Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    content::{Content, ContentProvider},
    error::{BridgeError, Result},
};
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Reqwest-based content provider
///
/// Fetches `GET {base_url}/content/{YYYY-MM-DD}`:
/// - `200` with a JSON [`Content`] body
/// - `404` / `204` when nothing exists for the date yet
/// - `5xx` / `429` are retried with exponential backoff
pub struct ReqwestContentProvider {
    client: Client,
    base_url: String,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReqwestContentProvider {
    /// Create a provider with default timeouts
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("daily-cache/0.1.0")
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a provider around a preconfigured client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn url_for(&self, date: NaiveDate) -> String {
        format!("{}/content/{}", self.base_url, date.format("%Y-%m-%d"))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[async_trait]
impl ContentProvider for ReqwestContentProvider {
    async fn fetch(&self, date: NaiveDate) -> Result<Option<Content>> {
        let url = self.url_for(date);
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            debug!(attempt, max_attempts = self.max_attempts, url = %url, "Fetching content");

            match self.client.get(&url).send().await {
                Ok(response) => match response.status() {
                    StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(None),
                    status if status.is_success() => {
                        let content = response.json::<Content>().await.map_err(|e| {
                            BridgeError::Remote(format!("Malformed content body: {}", e))
                        })?;
                        return Ok(Some(content));
                    }
                    status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                        warn!(status = status.as_u16(), attempt, "Content fetch failed with retryable status");
                        last_error = Some(BridgeError::Remote(format!("HTTP {} error", status.as_u16())));
                    }
                    status => {
                        return Err(BridgeError::Remote(format!("HTTP {} error", status.as_u16())));
                    }
                },
                Err(e) => {
                    warn!(error = %e, attempt, "Content fetch failed");
                    last_error = Some(if e.is_timeout() {
                        BridgeError::Remote("Request timed out".to_string())
                    } else {
                        BridgeError::Remote(e.to_string())
                    });
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::Remote("All retry attempts exhausted".to_string())
        }))
    }
}
