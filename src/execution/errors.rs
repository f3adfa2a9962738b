//! Query execution error types
//!
//! Error codes:
//! - SHARDFLOW_PARTITION_GONE (ERROR, recovered by producer substitution)
//! - SHARDFLOW_CROSS_PARTITION_NOT_SERVABLE (ERROR, recovered by replanning)
//! - SHARDFLOW_QUERY_PLAN_MALFORMED (FATAL)
//! - SHARDFLOW_QUERY_PLAN_UNSUPPORTED (ERROR)
//! - SHARDFLOW_CONTINUATION_INVALID (ERROR)
//! - SHARDFLOW_TRANSPORT_FAILED (ERROR)
//! - SHARDFLOW_FETCH_AFTER_EXHAUSTION (FATAL)
//! - SHARDFLOW_INVARIANT_VIOLATED (FATAL)
//! - SHARDFLOW_OPTIONS_INVALID (ERROR)
//! - SHARDFLOW_CONFIG_INVALID (ERROR)

use std::fmt;

use thiserror::Error;

/// Severity levels for query errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The query failed but the client is healthy
    Error,
    /// Corrupted state or broken invariant; must not be retried
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Result type for query execution
pub type QueryResult<T> = Result<T, QueryError>;

/// Query execution errors
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    // ==================
    // Topology
    // ==================
    /// The target partition key range no longer exists (split or move)
    #[error("Partition key range '{range_id}' is gone")]
    PartitionGone { range_id: String },

    /// The gateway cannot serve the query without a cross-partition plan
    #[error("Cross-partition query is not servable by the gateway")]
    CrossPartitionNotServable {
        /// Raw error body; carries the query plan in `additionalErrorInfo`
        payload: String,
        /// Charge of the refused request
        request_charge: f64,
    },

    // ==================
    // Planning
    // ==================
    /// The query plan could not be parsed
    #[error("Malformed query plan: {0}")]
    MalformedQueryPlan(String),

    /// The query plan uses a feature this pipeline does not execute
    #[error("Unsupported query plan: {0}")]
    UnsupportedQueryPlan(String),

    /// A caller-supplied continuation token could not be used
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),

    /// Feed options are inconsistent
    #[error("Invalid feed options: {0}")]
    InvalidOptions(String),

    // ==================
    // Transport
    // ==================
    /// The request failed after the retry policy gave up
    #[error("Request failed with status {status}: {message}")]
    Transport { status: u16, message: String },

    // ==================
    // Invariants
    // ==================
    /// A fetch was issued on an exhausted stream
    #[error("Fetch requested after stream exhaustion")]
    FetchAfterExhaustion,

    /// Internal state became inconsistent
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // ==================
    // Configuration
    // ==================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueryError {
    /// Create a partition-gone error
    pub fn partition_gone(range_id: impl Into<String>) -> Self {
        QueryError::PartitionGone {
            range_id: range_id.into(),
        }
    }

    /// Create a cross-partition-not-servable error from the response body
    pub fn cross_partition_not_servable(payload: impl Into<String>) -> Self {
        QueryError::CrossPartitionNotServable {
            payload: payload.into(),
            request_charge: 0.0,
        }
    }

    /// Attach the charge of the failed request, where the error carries one
    pub fn with_request_charge(self, charge: f64) -> Self {
        match self {
            QueryError::CrossPartitionNotServable { payload, .. } => {
                QueryError::CrossPartitionNotServable {
                    payload,
                    request_charge: charge,
                }
            }
            other => other,
        }
    }

    /// Create a malformed query plan error
    pub fn malformed_plan(reason: impl Into<String>) -> Self {
        QueryError::MalformedQueryPlan(reason.into())
    }

    /// Create an unsupported query plan error
    pub fn unsupported_plan(reason: impl Into<String>) -> Self {
        QueryError::UnsupportedQueryPlan(reason.into())
    }

    /// Create a transport error
    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        QueryError::Transport {
            status,
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(reason: impl Into<String>) -> Self {
        QueryError::InvariantViolation(reason.into())
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::PartitionGone { .. } => "SHARDFLOW_PARTITION_GONE",
            QueryError::CrossPartitionNotServable { .. } => {
                "SHARDFLOW_CROSS_PARTITION_NOT_SERVABLE"
            }
            QueryError::MalformedQueryPlan(_) => "SHARDFLOW_QUERY_PLAN_MALFORMED",
            QueryError::UnsupportedQueryPlan(_) => "SHARDFLOW_QUERY_PLAN_UNSUPPORTED",
            QueryError::InvalidContinuation(_) => "SHARDFLOW_CONTINUATION_INVALID",
            QueryError::InvalidOptions(_) => "SHARDFLOW_OPTIONS_INVALID",
            QueryError::Transport { .. } => "SHARDFLOW_TRANSPORT_FAILED",
            QueryError::FetchAfterExhaustion => "SHARDFLOW_FETCH_AFTER_EXHAUSTION",
            QueryError::InvariantViolation(_) => "SHARDFLOW_INVARIANT_VIOLATED",
            QueryError::Config(_) => "SHARDFLOW_CONFIG_INVALID",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            QueryError::MalformedQueryPlan(_)
            | QueryError::FetchAfterExhaustion
            | QueryError::InvariantViolation(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether the error signals a partition split or move
    pub fn is_split(&self) -> bool {
        matches!(self, QueryError::PartitionGone { .. })
    }

    /// Whether the error asks the client to replan across partitions
    pub fn is_cross_partition_not_servable(&self) -> bool {
        matches!(self, QueryError::CrossPartitionNotServable { .. })
    }

    /// HTTP status the service uses for this condition
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::PartitionGone { .. } => 410,
            QueryError::CrossPartitionNotServable { .. } => 400,
            QueryError::InvalidContinuation(_) | QueryError::InvalidOptions(_) => 400,
            QueryError::Transport { status, .. } => *status,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::MalformedQueryPlan(e.to_string())
    }
}
