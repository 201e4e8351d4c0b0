//! # rangesync
//!
//! Row hashing core for range-based table synchronization.
//!
//! Two endpoints hold copies of the same table. To find out which key ranges
//! differ, each side hashes the rows of a range in primary-key order and the
//! digests are compared; mismatching ranges are bisected until they are small
//! enough to transfer outright. This library provides:
//!
//! - **Canonical row encoding** shared by the hashing and transfer paths
//! - **Pluggable digests** (md5, sha256, blake3, xxh64) selected by name
//! - **Row hashing** with row counts and last-key tracking for batched scans
//! - **Row packing** with an unambiguous end-of-rowset marker
//! - **Command framing** for the HASH and ROWS exchanges
//!
//! ## Example
//!
//! ```rust
//! use rangesync::{init_registry, RowConsumer, RowHasher};
//!
//! fn main() -> rangesync::Result<()> {
//!     init_registry();
//!     let mut hasher = RowHasher::for_algorithm("md5")?.track_last_key(vec![0]);
//!     hasher.process(&vec![Some("1"), None]);
//!     hasher.process(&vec![Some("2"), Some("b")]);
//!     let (result, last_key) = hasher.finish();
//!     println!("{} rows, digest {}", result.row_count, result.digest);
//!     assert_eq!(last_key, Some(vec![b"2".to_vec()]));
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod digest;
pub mod error;
pub mod hasher;
pub mod packer;
pub mod row;
pub mod wire;

// Re-exports for convenient access
pub use command::{HashAlgorithmRequest, HashRequest, RowsRequest, Verb};
pub use config::{Config, HashConfig, RowsConfig, TransferConfig};
pub use digest::{init_registry, registry, Digest, DigestAlgorithm, DigestRegistry, DigestSink};
pub use error::{Result, SyncError};
pub use hasher::{HashResult, LastKeyTracker, RemoteHash, ResultEmitter, RowConsumer, RowHasher};
pub use packer::{RowPacker, RowStream};
pub use row::{ColumnValues, PackedRow, Row};
pub use wire::{ByteSink, Packer, StreamSink, Unpacker};
