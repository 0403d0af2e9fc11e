// ABOUTME: Signed HTTP client for paginated MarketSharp OData feeds
// ABOUTME: Retries 503 and known-transient 4xx responses with a fixed delay

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use url::Url;

use super::signing::RequestSigner;
use super::{FetchError, PageFetcher};
use crate::feed::sanitize_bytes;

/// Statuses this upstream returns for conditions that clear on retry.
const RETRYABLE_STATUSES: &[u16] = &[503, 400, 404];

/// Per-request behaviour of [`SignedClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Records requested per page (`$top`).
    pub page_size: usize,
    /// Attempts per page before giving up with [`FetchError::Exhausted`].
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// Hard timeout for each HTTP call.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: 5000,
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct SignedClient {
    http: Client,
    signer: RequestSigner,
    config: ClientConfig,
}

impl SignedClient {
    pub fn new(signer: RequestSigner, config: ClientConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            signer,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn fetch(&self, url: Url) -> Result<String, FetchError> {
        let mut last_status = 0;

        for attempt in 1..=self.config.max_attempts {
            tracing::debug!(
                "GET {} (attempt {} of {})",
                url,
                attempt,
                self.config.max_attempts
            );

            let response = self
                .http
                .get(url.clone())
                .header(AUTHORIZATION, self.signer.authorization_now())
                .send()
                .await
                .map_err(FetchError::Network)?;

            let status = response.status();
            if status.is_success() {
                let body = response.bytes().await.map_err(FetchError::Network)?;
                return Ok(sanitize_bytes(&body)?);
            }

            if !RETRYABLE_STATUSES.contains(&status.as_u16()) {
                let body = error_body(response.text().await);
                tracing::error!("{} returned {}: {}", url, status, body);
                return Err(FetchError::ServerError {
                    status: status.as_u16(),
                    body,
                });
            }

            last_status = status.as_u16();
            if attempt < self.config.max_attempts {
                tracing::warn!(
                    "{} returned {}. Retrying in {:?}...",
                    url,
                    status,
                    self.config.retry_delay
                );
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.config.max_attempts,
            last_status,
        })
    }
}

#[async_trait]
impl PageFetcher for SignedClient {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    async fn fetch_page(
        &self,
        endpoint_url: &str,
        after: Option<DateTime<Utc>>,
        skip: usize,
    ) -> Result<String, FetchError> {
        let url = page_url(endpoint_url, self.config.page_size, after, skip)?;
        self.fetch(url).await
    }
}

/// Body text of an error response, or a placeholder when it could not be read.
fn error_body<E: std::fmt::Display>(body: Result<String, E>) -> String {
    match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to read error response body: {}", e);
            format!("<unreadable body: {}>", e)
        }
    }
}

/// Build the paginated (and, given a watermark, filtered and ordered) page URL.
pub fn page_url(
    endpoint_url: &str,
    page_size: usize,
    after: Option<DateTime<Utc>>,
    skip: usize,
) -> Result<Url, FetchError> {
    let mut raw = format!("{}?$top={}&$skip={}", endpoint_url, page_size, skip);
    if let Some(after) = after {
        raw.push_str(&format!(
            "&$filter=lastUpdate gt datetime'{}'&$orderby=lastUpdate asc",
            after.format("%Y-%m-%dT%H:%M:%S")
        ));
    }

    Url::parse(&raw).map_err(|source| FetchError::InvalidUrl {
        url: crate::utils::redact_url(endpoint_url),
        source,
    })
}
