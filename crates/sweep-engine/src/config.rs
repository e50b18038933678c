//! Engine configuration
//!
//! Loaded from camelCase JSON, e.g.:
//!
//! ```json
//! { "maxParallel": 8, "joinFailure": "partial", "cacheDir": "/tmp/sweep-cache" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// What a join does when some of its branches failed or were blocked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinFailurePolicy {
    /// The join fails with `JoinIncomplete`
    #[default]
    Abort,
    /// Missing branches are dropped from the aggregate
    Partial,
}

/// What a join does when its iterable root produced zero branches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyJoinPolicy {
    /// The join fails with `JoinIncomplete`
    #[default]
    Fail,
    /// The join executes with empty lists
    RunEmpty,
}

fn default_max_parallel() -> usize {
    4
}

fn default_use_cache() -> bool {
    true
}

/// Runtime settings for a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Worker limit for the parallel backend
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub join_failure: JoinFailurePolicy,
    #[serde(default)]
    pub empty_join: EmptyJoinPolicy,
    /// Consult and populate the result cache
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    /// Persist cache entries under this directory instead of in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            join_failure: JoinFailurePolicy::default(),
            empty_join: EmptyJoinPolicy::default(),
            use_cache: default_use_cache(),
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading engine config from {}", path.as_ref().display());
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(EngineError::Config(
                "maxParallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.join_failure, JoinFailurePolicy::Abort);
        assert_eq!(config.empty_join, EmptyJoinPolicy::Fail);
        assert!(config.use_cache);
    }

    #[test]
    fn test_camel_case_keys() {
        let config = EngineConfig::from_json_str(
            r#"{"maxParallel": 2, "joinFailure": "partial", "emptyJoin": "runEmpty", "useCache": false}"#,
        )
        .unwrap();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.join_failure, JoinFailurePolicy::Partial);
        assert_eq!(config.empty_join, EmptyJoinPolicy::RunEmpty);
        assert!(!config.use_cache);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = EngineConfig::from_json_str(r#"{"maxParallel": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cacheDir": "/tmp/cache"}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/sweep.json").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
