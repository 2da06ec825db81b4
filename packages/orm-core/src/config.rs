//! Session factory configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{classify_io_error, OrmError};

/// When pending changes are written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush before every query issued inside an active transaction, and on commit
    Auto,
    /// Flush only on commit or explicit `flush()`
    Commit,
}

/// How a batch smaller than the configured size is sent to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFetchStyle {
    /// Issue exactly the pending keys
    Natural,
    /// Pad the key list with the last key up to the batch size
    Padded,
}

/// Session factory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Batch size for lazy associations without their own (1 = no batching)
    pub default_batch_size: usize,
    /// Padding policy for partially filled batches
    pub batch_fetch_style: BatchFetchStyle,
    /// Flush mode for new sessions
    pub flush_mode: FlushMode,
    /// Log every statement sent to the driver at debug level
    pub log_statements: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 1,
            batch_fetch_style: BatchFetchStyle::Natural,
            flush_mode: FlushMode::Auto,
            log_statements: false,
        }
    }
}

impl OrmConfig {
    /// Loads configuration from a JSON file. Missing keys take their defaults.
    ///
    /// # Arguments
    /// * `path` - Path of the JSON configuration file
    ///
    /// # Returns
    /// `Result<OrmConfig, OrmError>` containing the parsed configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| classify_io_error(e, &format!("reading config {}", path.display())))?;
        let config: OrmConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the session cannot work with.
    pub fn validate(&self) -> Result<(), OrmError> {
        if self.default_batch_size == 0 {
            return Err(OrmError::InvalidConfig(
                "default_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::io::Write;

    #[timeout(1000)]
    #[test]
    fn test_defaults() {
        let config = OrmConfig::default();
        assert_eq!(config.default_batch_size, 1);
        assert_eq!(config.batch_fetch_style, BatchFetchStyle::Natural);
        assert_eq!(config.flush_mode, FlushMode::Auto);
    }

    #[timeout(1000)]
    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_batch_size": 5, "batch_fetch_style": "padded"}}"#).unwrap();

        let config = OrmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_batch_size, 5);
        assert_eq!(config.batch_fetch_style, BatchFetchStyle::Padded);
        assert_eq!(config.flush_mode, FlushMode::Auto);
    }

    #[timeout(1000)]
    #[test]
    fn test_from_file_rejects_zero_batch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_batch_size": 0}}"#).unwrap();

        let result = OrmConfig::from_file(file.path());
        assert!(matches!(result, Err(OrmError::InvalidConfig(_))));
    }

    #[timeout(1000)]
    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = OrmConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(OrmError::Io(_))));
    }
}
