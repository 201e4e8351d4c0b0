//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::digest::DEFAULT_ALGORITHM;
use crate::wire::DEFAULT_FLUSH_THRESHOLD;

/// Root configuration structure. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Digest selection.
    #[serde(default)]
    pub hash: HashConfig,

    /// How delimited row input is parsed.
    #[serde(default)]
    pub rows: RowsConfig,

    /// Output buffering and batching.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Digest selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashConfig {
    /// Registered algorithm name, case-insensitive (default: md5).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
        }
    }
}

/// Delimited row input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowsConfig {
    /// Column separator, a single byte (default: tab).
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Field text that stands for NULL (default: `\N`).
    #[serde(default = "default_null_marker")]
    pub null_marker: String,

    /// Zero-based indexes of the primary key columns, in key order.
    #[serde(default = "default_primary_key_columns")]
    pub primary_key_columns: Vec<usize>,

    /// Skip the first input line.
    #[serde(default)]
    pub has_header: bool,
}

impl RowsConfig {
    /// The delimiter as a byte. Only valid after validation.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b'\t')
    }
}

impl Default for RowsConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            null_marker: default_null_marker(),
            primary_key_columns: default_primary_key_columns(),
            has_header: false,
        }
    }
}

/// Output buffering and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Bytes buffered before the output stream is written to.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Rows per batch when a rowset is produced in several passes.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

fn default_delimiter() -> String {
    "\t".to_string()
}

fn default_null_marker() -> String {
    "\\N".to_string()
}

fn default_primary_key_columns() -> Vec<usize> {
    vec![0]
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_batch_size() -> u64 {
    10_000
}
