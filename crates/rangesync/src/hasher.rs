//! Streaming row-range hashing.
//!
//! A [`RowHasher`] encodes each row it is given straight into a digest
//! accumulator, so a bucket is summarized without ever buffering its
//! serialized form. Extra bookkeeping is layered on by wrapping:
//!
//! - [`LastKeyTracker`] remembers the primary key of the last row seen
//! - [`ResultEmitter`] writes the `[digest, row_count]` reply when done
//!
//! Hashers are single-use: [`RowHasher::finish`] consumes the hasher, and the
//! accumulator is dropped with it on every exit path.

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::digest::{self, Digest, DigestAlgorithm, DigestSink};
use crate::error::{Result, SyncError};
use crate::row::{encode_row, ColumnValues, Row};
use crate::wire::{ByteSink, Packer, Unpacker};

/// Something rows are fed into, one at a time, in rowset order.
pub trait RowConsumer {
    /// Consume the next row.
    fn process<R: Row + ?Sized>(&mut self, row: &R);

    /// Rows consumed so far.
    fn row_count(&self) -> u64;
}

/// Outcome of hashing one rowset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashResult {
    /// Digest of the canonical encoding of all rows.
    pub digest: Digest,
    /// Number of rows hashed.
    pub row_count: u64,
    /// Number of encoded bytes fed to the digest.
    pub bytes_hashed: u64,
}

impl HashResult {
    /// Whether the other end computed the same digest over the same number of rows.
    pub fn matches(&self, remote: &RemoteHash) -> bool {
        self.row_count == remote.row_count && self.digest == remote.digest[..]
    }
}

/// `[digest, row_count]` as received from the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHash {
    /// Raw digest bytes.
    pub digest: Bytes,
    /// Row count reported by the peer.
    pub row_count: u64,
}

/// Digest and row count accumulator for one bucket pass.
#[derive(Debug)]
pub struct RowHasher {
    packer: Packer<DigestSink>,
    row_count: u64,
}

impl RowHasher {
    /// Start a pass using `algorithm`.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            packer: Packer::new(DigestSink::new(algorithm)),
            row_count: 0,
        }
    }

    /// Start a pass using the named algorithm from the process-wide registry.
    ///
    /// Fails if the registry hasn't been initialized or doesn't know `name`.
    pub fn for_algorithm(name: &str) -> Result<Self> {
        Ok(Self::new(digest::lookup(name)?))
    }

    /// Algorithm in use.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.packer.sink().algorithm()
    }

    /// Encoded bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.packer.sink().bytes_hashed()
    }

    /// Wrap this hasher so it also records the last primary key.
    pub fn track_last_key(self, key_columns: Vec<usize>) -> LastKeyTracker<Self> {
        LastKeyTracker::new(self, key_columns)
    }

    /// Wrap this hasher so its result is written to `output` when finished.
    pub fn emit_to<S: ByteSink>(self, output: &mut Packer<S>) -> ResultEmitter<'_, S> {
        ResultEmitter::new(self, output)
    }

    /// Finalize the digest.
    pub fn finish(self) -> HashResult {
        let bytes_hashed = self.bytes_hashed();
        let algorithm = self.algorithm().name();
        let digest = self.packer.into_inner().finish();
        debug!(
            "Hashed {} rows ({} bytes) with {}: {:x}",
            self.row_count, bytes_hashed, algorithm, digest
        );
        HashResult {
            digest,
            row_count: self.row_count,
            bytes_hashed,
        }
    }
}

impl RowConsumer for RowHasher {
    #[inline]
    fn process<R: Row + ?Sized>(&mut self, row: &R) {
        self.row_count += 1;
        encode_row(&mut self.packer, row);
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }
}

/// Records the primary-key values of the most recent row.
///
/// Wraps any [`RowConsumer`]: the hasher, when the caller needs the true
/// upper bound of an open-ended bucket, or the row packer, when a long range
/// is sent in batches.
#[derive(Debug)]
pub struct LastKeyTracker<S> {
    inner: S,
    key_columns: Vec<usize>,
    last_key: Option<ColumnValues>,
}

impl<S> LastKeyTracker<S> {
    /// Track `key_columns` (column indexes, in key order) around `inner`.
    pub fn new(inner: S, key_columns: Vec<usize>) -> Self {
        Self {
            inner,
            key_columns,
            last_key: None,
        }
    }

    /// Primary key of the last row processed, or `None` if no rows were seen.
    pub fn last_key(&self) -> Option<&[Vec<u8>]> {
        self.last_key.as_deref()
    }

    /// Tracked key column indexes.
    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// The wrapped consumer.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The wrapped consumer, mutably.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the wrapped consumer and the last key.
    pub fn into_parts(self) -> (S, Option<ColumnValues>) {
        (self.inner, self.last_key)
    }
}

impl LastKeyTracker<RowHasher> {
    /// Finalize the wrapped hasher.
    pub fn finish(self) -> (HashResult, Option<ColumnValues>) {
        let (hasher, last_key) = self.into_parts();
        (hasher.finish(), last_key)
    }
}

impl<S: RowConsumer> RowConsumer for LastKeyTracker<S> {
    #[inline]
    fn process<R: Row + ?Sized>(&mut self, row: &R) {
        self.inner.process(row);

        // overwrite in place; the key buffers are reused from row to row
        let key = self.last_key.get_or_insert_with(Vec::new);
        key.resize_with(self.key_columns.len(), Vec::new);
        for (value, &column) in key.iter_mut().zip(&self.key_columns) {
            value.clear();
            value.extend_from_slice(row.string_value(column));
        }
    }

    fn row_count(&self) -> u64 {
        self.inner.row_count()
    }
}

/// Write `[digest, row_count]`.
///
/// Positional rather than a named map: this is the most frequent message in
/// the protocol, and extensions go through the protocol version instead.
pub fn emit_hash_result<S: ByteSink>(output: &mut Packer<S>, result: &HashResult) {
    output.encode_array_length(2);
    output.encode_string(result.digest.as_bytes());
    output.encode_uint(result.row_count);
}

/// Read the `[digest, row_count]` written by [`emit_hash_result`].
pub fn read_hash_result(input: &mut Unpacker) -> Result<RemoteHash> {
    let offset = input.position();
    let len = input.next_array_length()?;
    if len != 2 {
        return Err(SyncError::decode(
            offset,
            format!("expected [digest, row_count], got array of {}", len),
        ));
    }
    let digest = input.next_string()?;
    let row_count = input.next_uint()?;
    Ok(RemoteHash { digest, row_count })
}

/// Hasher that reports its result to an output stream when finished.
pub struct ResultEmitter<'a, S> {
    hasher: RowHasher,
    output: &'a mut Packer<S>,
}

impl<'a, S: ByteSink> ResultEmitter<'a, S> {
    /// Wrap `hasher`, writing to `output` on finish.
    pub fn new(hasher: RowHasher, output: &'a mut Packer<S>) -> Self {
        Self { hasher, output }
    }

    /// The wrapped hasher.
    pub fn hasher(&self) -> &RowHasher {
        &self.hasher
    }

    /// Finalize, write `[digest, row_count]` and return the result.
    pub fn finish(self) -> HashResult {
        let result = self.hasher.finish();
        emit_hash_result(self.output, &result);
        result
    }

    /// Run `body` against this emitter, then finish.
    ///
    /// The result is written whether `body` succeeds or fails, so the stream
    /// always carries exactly one reply for the request.
    pub fn scope<T, E>(
        mut self,
        body: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<(T, HashResult), E> {
        let outcome = body(&mut self);
        let result = self.finish();
        outcome.map(|value| (value, result))
    }
}

impl<S: ByteSink> RowConsumer for ResultEmitter<'_, S> {
    #[inline]
    fn process<R: Row + ?Sized>(&mut self, row: &R) {
        self.hasher.process(row);
    }

    fn row_count(&self) -> u64 {
        self.hasher.row_count()
    }
}
