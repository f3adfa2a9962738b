//! Feed options for one query execution

use serde::{Deserialize, Serialize};

/// Caller options for a query
///
/// Immutable for the lifetime of an execution; each page fetch works on a
/// derived copy carrying that stream's continuation token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOptions {
    /// Opaque token to resume from
    #[serde(default)]
    pub continuation: Option<String>,
    /// Maximum rows per page; `None` uses the configured default
    #[serde(default)]
    pub max_item_count: Option<usize>,
    /// Requested TOP; the query plan's TOP wins when both are present
    #[serde(default)]
    pub top: Option<usize>,
    /// Allow the query to fan out across partitions
    #[serde(default)]
    pub enable_cross_partition_query: bool,
    /// Concurrent partition requests; `None` uses the configured default,
    /// `Some(0)` means one per active range
    #[serde(default)]
    pub max_degree_of_parallelism: Option<usize>,
    /// Session token for session consistency
    #[serde(default)]
    pub session_token: Option<String>,
    /// Pin the query to one partition key range
    #[serde(default)]
    pub partition_key_range_id: Option<String>,
    /// Change-feed mode: a "not modified" response ends the stream
    #[serde(default)]
    pub change_feed: bool,
}

impl FeedOptions {
    /// Options for a cross-partition query
    pub fn cross_partition() -> Self {
        Self {
            enable_cross_partition_query: true,
            ..Default::default()
        }
    }

    /// Set the page size
    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = Some(max_item_count);
        self
    }

    /// Set the requested TOP
    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    /// Set the degree of parallelism
    pub fn with_max_degree_of_parallelism(mut self, dop: usize) -> Self {
        self.max_degree_of_parallelism = Some(dop);
        self
    }

    /// Set the session token
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Derived copy carrying a different continuation
    pub fn with_continuation(&self, continuation: Option<String>) -> Self {
        Self {
            continuation,
            ..self.clone()
        }
    }
}

/// Effective page size for an execution
///
/// `min(requested, top ?? requested, default)`, where `requested` falls back
/// to `default` when the caller gave none (or zero).
pub fn effective_page_size(
    max_item_count: Option<usize>,
    top: Option<usize>,
    default_page_size: usize,
) -> usize {
    let requested = max_item_count
        .filter(|&n| n > 0)
        .unwrap_or(default_page_size);
    requested
        .min(top.unwrap_or(requested))
        .min(default_page_size)
}
