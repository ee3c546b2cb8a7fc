//! Manager configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::DEFAULT_MAX_CONNECTIONS;

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transaction manager configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Allow `NESTED` scopes to open savepoints.
    pub nested_transaction_allowed: bool,
    /// Mark the shared transaction rollback-only when a participating scope
    /// rolls back.
    pub global_rollback_on_participation_failure: bool,
    /// Raise `UnexpectedRollback` already from a participating scope's
    /// commit, not only from the outermost one.
    pub fail_early_on_global_rollback_only: bool,
    /// Attempt a physical rollback when a physical commit fails.
    pub rollback_on_commit_failure: bool,
    /// Refuse to let a read-write scope join a read-only transaction.
    pub validate_existing_transaction: bool,
    /// Size of the bundled connection pool.
    pub max_connections: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            nested_transaction_allowed: true,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
            validate_existing_transaction: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ManagerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set nested_transaction_allowed flag.
    pub fn nested_transaction_allowed(mut self, value: bool) -> Self {
        self.nested_transaction_allowed = value;
        self
    }

    /// Set global_rollback_on_participation_failure flag.
    pub fn global_rollback_on_participation_failure(mut self, value: bool) -> Self {
        self.global_rollback_on_participation_failure = value;
        self
    }

    /// Set fail_early_on_global_rollback_only flag.
    pub fn fail_early_on_global_rollback_only(mut self, value: bool) -> Self {
        self.fail_early_on_global_rollback_only = value;
        self
    }

    /// Set rollback_on_commit_failure flag.
    pub fn rollback_on_commit_failure(mut self, value: bool) -> Self {
        self.rollback_on_commit_failure = value;
        self
    }

    /// Set validate_existing_transaction flag.
    pub fn validate_existing_transaction(mut self, value: bool) -> Self {
        self.validate_existing_transaction = value;
        self
    }

    /// Set the connection pool size.
    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert!(config.nested_transaction_allowed);
        assert!(config.global_rollback_on_participation_failure);
        assert!(!config.fail_early_on_global_rollback_only);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_partial_json() {
        let config = ManagerConfig::from_json(r#"{"fail_early_on_global_rollback_only": true}"#).unwrap();
        assert!(config.fail_early_on_global_rollback_only);
        assert!(config.nested_transaction_allowed);
    }

    #[test]
    fn test_invalid_pool_size() {
        let err = ManagerConfig::from_json(r#"{"max_connections": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_connections": 3, "rollback_on_commit_failure": true}}"#).unwrap();

        let config = ManagerConfig::from_file(file.path()).unwrap();
        assert_eq!(config, ManagerConfig::new().max_connections(3).rollback_on_commit_failure(true));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ManagerConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
