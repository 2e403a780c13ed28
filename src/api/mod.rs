//! Remote fetch collaborator.
//!
//! The sync engine only knows the [`ResourceFetcher`] contract: fetch one page
//! of a collection (following `next_url` cursors) or fetch the standalone user
//! resource. [`HttpFetcher`] implements it over HTTP for a WaniKani-v2-shaped
//! API; tests substitute in-memory fetchers.

mod http;
mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::model::{ResourceCategory, ResourceItem, StandaloneResource};

pub use http::{HttpFetcher, DEFAULT_BASE_URL};
pub use wire::{decode_collection, decode_user};

/// Errors that can occur while fetching from the remote service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Transport failure reported by a non-HTTP fetcher
    #[error("Transport error: {0}")]
    Transport(String),
    /// HTTP response with a status the client does not handle specially
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// 401/403: the API key was rejected
    #[error("API key rejected by the server")]
    InvalidCredential,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidCredential => ErrorKind::InvalidCredential,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::Decode(_) => ErrorKind::Decode,
            FetchError::Network(_)
            | FetchError::Transport(_)
            | FetchError::HttpStatus(_)
            | FetchError::Timeout
            | FetchError::RateLimited(_)
            | FetchError::ResponseTooLarge
            | FetchError::IncompleteResponse { .. } => ErrorKind::Network,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Which page of a collection to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// The first page, filtered to items updated after the cursor when one exists.
    First {
        updated_after: Option<DateTime<Utc>>,
    },
    /// A continuation page, addressed by the previous page's `next_url`.
    Next(String),
}

/// One page of a remote collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPage {
    pub items: Vec<ResourceItem>,
    /// Collection-level timestamp supplied by the source (absent when empty)
    pub data_updated_at: Option<DateTime<Utc>>,
    pub next_url: Option<String>,
}

/// The remote side of a sync.
///
/// Implementations own their transport, authentication and timeout policy.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_collection(
        &self,
        category: ResourceCategory,
        request: &PageRequest,
    ) -> Result<CollectionPage, FetchError>;

    async fn fetch_user(&self) -> Result<StandaloneResource, FetchError>;
}
