//! Aegis Config - Configuration Structures
//!
//! Configuration types for the historian database. Supports loading from
//! TOML files and programmatic construction, with defaults that open an
//! in-memory database suitable for development and tests.
//!
//! Key Features:
//! - Storage configuration (file path, read-only mode, cursor batching)
//! - Datastore configuration (id scope, id provider, series threshold)
//! - Full-text analyzer settings
//! - Validation of tuning values before any store is opened
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::{AegisError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Storage Configuration
// =============================================================================

/// Configuration for the underlying ordered map engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage file. `None` keeps every map in memory only.
    pub path: Option<PathBuf>,
    pub read_only: bool,
    /// Number of entries a range cursor fetches per batch.
    pub cursor_batch_size: usize,
    /// Commit after every successful public mutation.
    pub autocommit: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            cursor_batch_size: 256,
            autocommit: false,
        }
    }
}

// =============================================================================
// Datastore Configuration
// =============================================================================

/// Strategy used to allocate local ids for new entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdProviderType {
    /// Last allocated id + 1.
    #[default]
    Sequential,
    /// Hash of unique name and valid start, stable across databases.
    UidHash,
}

/// Full-text analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTextConfig {
    pub min_token_len: usize,
    /// Drop common English stop words.
    pub stop_words: bool,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            min_token_len: 1,
            stop_words: true,
        }
    }
}

/// Configuration shared by all stores of one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub id_scope: u32,
    pub id_provider: IdProviderType,
    /// Above this many selected series, record streams are interleaved
    /// round-robin instead of merged in time order.
    pub max_series_for_time_ordering: usize,
    /// Whether adding a record at an occupied (series, timestamp) replaces it.
    pub allow_record_overwrite: bool,
    pub fulltext: FullTextConfig,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            id_scope: 1,
            id_provider: IdProviderType::Sequential,
            max_series_for_time_ordering: 200,
            allow_record_overwrite: true,
            fulltext: FullTextConfig::default(),
        }
    }
}

// =============================================================================
// Historian Configuration
// =============================================================================

/// Complete historian database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    pub storage: StorageConfig,
    pub datastore: DatastoreConfig,
}

impl HistorianConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HistorianConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration with development defaults.
    pub fn development() -> Self {
        Self::default()
    }

    /// Configuration for a database persisted at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.path = Some(path.into());
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.cursor_batch_size == 0 {
            return Err(AegisError::Configuration(
                "storage.cursor_batch_size must be at least 1".to_string(),
            ));
        }
        if self.datastore.max_series_for_time_ordering == 0 {
            return Err(AegisError::Configuration(
                "datastore.max_series_for_time_ordering must be at least 1".to_string(),
            ));
        }
        if self.datastore.id_scope == 0 {
            return Err(AegisError::Configuration(
                "datastore.id_scope 0 is reserved".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HistorianConfig::development();
        assert!(config.storage.path.is_none());
        assert_eq!(config.datastore.max_series_for_time_ordering, 200);
        assert_eq!(config.datastore.id_provider, IdProviderType::Sequential);
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn test_partial_toml() {
        let config = HistorianConfig::from_toml_str(
            r#"
            [storage]
            read_only = true

            [datastore]
            id_provider = "uid_hash"
            max_series_for_time_ordering = 50
            "#,
        )
        .expect("parse should succeed");

        assert!(config.storage.read_only);
        assert_eq!(config.storage.cursor_batch_size, 256);
        assert_eq!(config.datastore.id_provider, IdProviderType::UidHash);
        assert_eq!(config.datastore.max_series_for_time_ordering, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = HistorianConfig::from_toml_str("[storage]\ncursor_batch_size = 0\n")
            .expect_err("zero batch size should fail");
        assert!(matches!(err, AegisError::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[datastore]\nid_scope = 7").expect("write config");

        let config = HistorianConfig::from_file(file.path()).expect("load should succeed");
        assert_eq!(config.datastore.id_scope, 7);
    }
}
