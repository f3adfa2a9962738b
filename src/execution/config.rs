//! Pipeline configuration
//!
//! Loaded from a JSON file; every field has a default.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::observability::{log_event_with_fields, Event, Logger, Severity};

use super::errors::{QueryError, QueryResult};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on rows per page (default: 1000)
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Concurrent partition requests when the caller sets none (default: 0,
    /// one per active range)
    #[serde(default)]
    pub max_degree_of_parallelism: usize,

    /// Minimum log severity (default: "INFO")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_page_size() -> usize {
    1000
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_degree_of_parallelism: 0,
            log_level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> QueryResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("Failed to read config: {}", e)))?;

        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| QueryError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("default_page_size", &config.default_page_size.to_string()),
                ("path", &path.display().to_string()),
            ],
        );

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> QueryResult<()> {
        if self.default_page_size == 0 {
            return Err(QueryError::Config("default_page_size must be > 0".into()));
        }

        self.severity()?;

        Ok(())
    }

    /// Parsed log level
    pub fn severity(&self) -> QueryResult<Severity> {
        self.log_level
            .parse::<Severity>()
            .map_err(|e| QueryError::Config(format!("Invalid log_level: {}", e)))
    }

    /// Apply the log level to the process-wide logger
    pub fn apply_logging(&self) -> QueryResult<()> {
        Logger::set_min_severity(self.severity()?);
        Ok(())
    }

    /// Degree of parallelism for an execution with `active` ranges
    pub fn parallelism(&self, requested: Option<usize>, active: usize) -> usize {
        let dop = requested.unwrap_or(self.max_degree_of_parallelism);
        if dop == 0 {
            active.max(1)
        } else {
            dop.min(active.max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.default_page_size, 1000);
        assert_eq!(config.max_degree_of_parallelism, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"default_page_size\": 50}}").unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"default_page_size\": 0}}").unwrap();

        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert_eq!(err.code(), "SHARDFLOW_CONFIG_INVALID");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let config = PipelineConfig {
            log_level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/shardflow.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_parallelism() {
        let config = PipelineConfig::default();
        assert_eq!(config.parallelism(None, 4), 4);
        assert_eq!(config.parallelism(Some(2), 4), 2);
        assert_eq!(config.parallelism(Some(8), 3), 3);
        assert_eq!(config.parallelism(Some(0), 0), 1);
    }
}
