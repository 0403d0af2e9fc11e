// ABOUTME: Remote access to the MarketSharp OData service
// ABOUTME: Defines the page-fetching seam and its failure taxonomy

pub mod client;
pub mod signing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::feed::FeedError;

pub use client::{page_url, ClientConfig, SignedClient};
pub use signing::{RequestSigner, SigningError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Every attempt hit a retryable status.
    #[error("request failed after {attempts} attempts (last status {last_status})")]
    Exhausted { attempts: u32, last_status: u16 },
    /// A status that retrying will not fix.
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("invalid request URL for {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unreadable response body: {0}")]
    Payload(#[from] FeedError),
}

impl FetchError {
    /// Whether the page is worth retrying with backoff: an exhausted run of
    /// 503s, or a connection-level failure.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Exhausted { last_status, .. } => *last_status == 503,
            FetchError::Network(_) => true,
            _ => false,
        }
    }
}

/// Source of raw feed pages. Returns sanitized body text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Number of records requested per page.
    fn page_size(&self) -> usize;

    async fn fetch_page(
        &self,
        endpoint_url: &str,
        after: Option<DateTime<Utc>>,
        skip: usize,
    ) -> Result<String, FetchError>;
}
