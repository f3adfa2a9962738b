//! Composite continuation tokens for partitioned executions
//!
//! A partitioned execution resumes from a JSON array with one entry per
//! unfinished range:
//!
//! ```text
//! [{"token": "<range continuation or null>", "range": {"min": "", "max": "80"}}, ...]
//! ```
//!
//! Entries carry key spans rather than range ids, so a token stays usable
//! after the ranges it names have split.
//!
//! An ORDER BY execution wraps the same entries together with the position
//! of the last row it emitted:
//!
//! ```text
//! {"compositeToken": [...], "orderByItems": [{"item": 3}], "_rid": "doc-017"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::Range;

use super::errors::{QueryError, QueryResult};

/// Resume point of one key span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeContinuation {
    /// Continuation within the span; `None` starts from the beginning
    pub token: Option<String>,
    pub range: Range,
}

impl RangeContinuation {
    pub fn new(token: Option<String>, range: Range) -> Self {
        Self { token, range }
    }
}

/// Resume points of every unfinished span, in key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeContinuationToken {
    pub ranges: Vec<RangeContinuation>,
}

impl CompositeContinuationToken {
    pub fn new(mut ranges: Vec<RangeContinuation>) -> Self {
        ranges.sort_by(|a, b| a.range.min.cmp(&b.range.min));
        Self { ranges }
    }

    /// Whether any span is left to resume
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Serialized token, `None` when nothing is left
    pub fn encode(&self) -> QueryResult<Option<String>> {
        if self.ranges.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.ranges)
            .map(Some)
            .map_err(|e| QueryError::invariant(format!("continuation not serializable: {}", e)))
    }

    /// Parse a token produced by [`encode`](Self::encode)
    pub fn decode(token: &str) -> QueryResult<Self> {
        let ranges: Vec<RangeContinuation> = serde_json::from_str(token)
            .map_err(|e| QueryError::InvalidContinuation(format!("not a composite token: {}", e)))?;

        if ranges.is_empty() {
            return Err(QueryError::InvalidContinuation(
                "composite token names no ranges".into(),
            ));
        }
        if let Some(bad) = ranges.iter().find(|r| r.range.min > r.range.max) {
            return Err(QueryError::InvalidContinuation(format!(
                "range min '{}' above max '{}'",
                bad.range.min, bad.range.max
            )));
        }

        Ok(Self::new(ranges))
    }
}

/// Resume point of an ORDER BY execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByContinuationToken {
    pub composite_token: Vec<RangeContinuation>,
    /// Sort keys of the last emitted row
    pub order_by_items: Vec<Value>,
    /// Document id of the last emitted row
    #[serde(rename = "_rid")]
    pub rid: Value,
}

impl OrderByContinuationToken {
    /// Token for `ranges`, resuming after the row at `position`
    pub fn new(ranges: Vec<RangeContinuation>, position: &Value) -> Self {
        let order_by_items = match position.get("orderByItems") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Self {
            composite_token: CompositeContinuationToken::new(ranges).ranges,
            order_by_items,
            rid: position.get("_rid").cloned().unwrap_or(Value::Null),
        }
    }

    /// Envelope of the last emitted row, comparable against fetched rows
    pub fn position(&self) -> Value {
        serde_json::json!({
            "orderByItems": self.order_by_items,
            "_rid": self.rid,
        })
    }

    /// Resume points of the unfinished spans
    pub fn ranges(&self) -> CompositeContinuationToken {
        CompositeContinuationToken::new(self.composite_token.clone())
    }

    pub fn encode(&self) -> QueryResult<String> {
        serde_json::to_string(self)
            .map_err(|e| QueryError::invariant(format!("continuation not serializable: {}", e)))
    }

    /// Parse a token produced by [`encode`](Self::encode)
    pub fn decode(token: &str) -> QueryResult<Self> {
        let parsed: Self = serde_json::from_str(token).map_err(|e| {
            QueryError::InvalidContinuation(format!("not an ORDER BY token: {}", e))
        })?;

        if parsed.composite_token.is_empty() {
            return Err(QueryError::InvalidContinuation(
                "ORDER BY token names no ranges".into(),
            ));
        }
        if let Some(bad) = parsed
            .composite_token
            .iter()
            .find(|r| r.range.min > r.range.max)
        {
            return Err(QueryError::InvalidContinuation(format!(
                "range min '{}' above max '{}'",
                bad.range.min, bad.range.max
            )));
        }
        if parsed.order_by_items.iter().any(|item| !item.is_object()) {
            return Err(QueryError::InvalidContinuation(
                "orderByItems entries must be objects".into(),
            ));
        }

        Ok(parsed)
    }
}
