//! CLI-specific error types

use std::fmt;
use std::io;

use crate::execution::QueryError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Fixture file error
    FixtureError,
    /// I/O error (stdout)
    IoError,
    /// The query terminated with an error
    QueryFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "SHARDFLOW_CLI_CONFIG_ERROR",
            Self::FixtureError => "SHARDFLOW_CLI_FIXTURE_ERROR",
            Self::IoError => "SHARDFLOW_CLI_IO_ERROR",
            Self::QueryFailed => "SHARDFLOW_CLI_QUERY_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// Fixture error
    pub fn fixture_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::FixtureError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<QueryError> for CliError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Config(msg) => Self::config_error(msg),
            other => Self::new(
                CliErrorCode::QueryFailed,
                format!("{} ({})", other, other.code()),
            ),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_conversion() {
        let err: CliError = QueryError::transport(503, "unavailable").into();
        assert_eq!(err.code(), &CliErrorCode::QueryFailed);
        assert!(err.message().contains("SHARDFLOW_TRANSPORT_FAILED"));

        let err: CliError = QueryError::Config("bad".into()).into();
        assert_eq!(err.code_str(), "SHARDFLOW_CLI_CONFIG_ERROR");
    }
}
