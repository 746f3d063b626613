//! Provider API boundary
//!
//! The engine never talks HTTP directly; it consumes a [`Provider`]
//! implementation that exposes the three remote operations the sync
//! protocol needs (list, batched get, delta feed). Errors come back as a
//! typed classification so downstream code can pattern-match throttle vs
//! fatal instead of parsing messages.

mod retry;

pub use retry::{RetryPolicy, with_retry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ItemKind, SyncItem};

/// Quota costs per provider operation, in the provider's quota units.
///
/// The rate limiter budgets in these units, not raw request counts; batch
/// requests cost proportionally to their size.
pub mod quota {
    /// One page of the list-all endpoint
    pub const LIST: f64 = 5.0;
    /// One single-item fetch
    pub const GET: f64 = 5.0;
    /// One page of the delta feed
    pub const DELTA: f64 = 2.0;

    /// A batched fetch of `len` items
    pub fn batch(len: usize) -> f64 {
        GET * len as f64
    }
}

/// Typed provider failure classification.
///
/// Constructed from the provider's status code and message at the boundary;
/// everything downstream matches on the variant.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Quota exhausted (429, or 403 with a quota-style message)
    #[error("provider throttled the request ({status}): {message}")]
    Throttled {
        status: u16,
        message: String,
        /// Provider-suggested wait, when the response carried one
        retry_after: Option<std::time::Duration>,
    },

    /// The stored checkpoint is expired or invalid; the only recovery is a
    /// full re-baseline, never a retry.
    #[error("checkpoint expired or invalid")]
    CheckpointExpired,

    /// Any other provider-reported status
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Transport-level failure before a status was received
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Classify a raw status code + message from the provider.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let quota_like = message.to_ascii_lowercase().contains("quota")
            || message.to_ascii_lowercase().contains("rate limit");
        match status {
            429 => Self::Throttled {
                status,
                message,
                retry_after: None,
            },
            403 if quota_like => Self::Throttled {
                status,
                message,
                retry_after: None,
            },
            _ => Self::Status { status, message },
        }
    }

    /// Quota/throttle errors get the escalating-cooldown treatment
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Transient failures are worth an in-call retry: network drops and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

/// Reference to a remote item (identity only, returned by list pages)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub id: String,
    pub kind: ItemKind,
}

/// One page from the list-all endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub items: Vec<ItemRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
    /// The provider's current feed position, reported on the first page.
    /// Persisted as the account checkpoint once the full sync completes.
    pub checkpoint: Option<String>,
}

/// Full item content as fetched from the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    pub kind: ItemKind,
    pub labels: Vec<String>,
    pub payload: String,
}

impl RemoteItem {
    /// Materialize into a local item owned by `account_id`, stamping the
    /// fetch time. All mutable fields are overwritten on every fetch.
    pub fn into_item(self, account_id: &str, fetched_at: DateTime<Utc>) -> SyncItem {
        SyncItem {
            account_id: account_id.to_string(),
            external_id: self.id,
            kind: self.kind,
            labels: self.labels,
            payload: self.payload,
            fetched_at,
        }
    }
}

/// Result of a batched fetch. The provider resolves each id independently;
/// ids it throttled are reported so the caller can retry just that subset.
#[derive(Debug, Clone, Default)]
pub struct BatchPage {
    pub items: Vec<RemoteItem>,
    pub throttled: Vec<String>,
}

/// One entry in the delta feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Change {
    /// Item added or updated remotely; fully overwrites the local copy
    Upsert { item: RemoteItem },
    /// Item removed remotely; the feed never emits both an upsert and a
    /// delete for the same id within one call
    Delete { id: String },
}

/// One page of the delta feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPage {
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_checkpoint: Option<String>,
}

/// The remote provider, as seen by the sync protocol.
///
/// Implementations own authentication, transport, and request/response
/// schemas; the engine only sees these operations and the typed errors.
pub trait Provider: Send + Sync {
    /// Enumerate item identifiers, one page at a time
    fn list_all(&self, account_id: &str, page_token: Option<&str>)
    -> Result<ListPage, ProviderError>;

    /// Fetch one item
    fn get_one(&self, account_id: &str, id: &str) -> Result<RemoteItem, ProviderError>;

    /// Fetch a batch of items; quota cost is proportional to batch size
    fn get_many(&self, account_id: &str, ids: &[String]) -> Result<BatchPage, ProviderError>;

    /// Read the change feed from `checkpoint`, one page at a time
    fn delta(
        &self,
        account_id: &str,
        checkpoint: &str,
        page_token: Option<&str>,
    ) -> Result<DeltaPage, ProviderError>;
}
