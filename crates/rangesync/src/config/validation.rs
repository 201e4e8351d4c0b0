//! Configuration validation.

use super::Config;
use crate::digest::DigestRegistry;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Hash validation
    if !DigestRegistry::with_defaults().contains(&config.hash.algorithm) {
        return Err(SyncError::UnknownDigestAlgorithm(
            config.hash.algorithm.clone(),
        ));
    }

    // Row input validation
    if config.rows.delimiter.len() != 1 {
        return Err(SyncError::Config(format!(
            "rows.delimiter must be a single byte, got {:?}",
            config.rows.delimiter
        )));
    }
    if matches!(config.rows.delimiter.as_str(), "\\" | "\n" | "\r") {
        return Err(SyncError::Config(format!(
            "rows.delimiter cannot be a backslash or line break, got {:?}",
            config.rows.delimiter
        )));
    }
    if config.rows.null_marker.is_empty() {
        return Err(SyncError::Config(
            "rows.null_marker must not be empty".into(),
        ));
    }
    if config.rows.null_marker.contains(config.rows.delimiter.as_str()) {
        return Err(SyncError::Config(
            "rows.null_marker must not contain the delimiter".into(),
        ));
    }
    if config.rows.primary_key_columns.is_empty() {
        return Err(SyncError::Config(
            "rows.primary_key_columns must name at least one column".into(),
        ));
    }

    // Transfer validation
    if config.transfer.flush_threshold == 0 {
        return Err(SyncError::Config(
            "transfer.flush_threshold must be at least 1".into(),
        ));
    }
    if config.transfer.batch_size == 0 {
        return Err(SyncError::Config(
            "transfer.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}
