//! Transfer path: streaming full rows instead of their digest.
//!
//! Once bisection has narrowed a mismatch down far enough, the rows in the
//! range are sent as-is. Each row uses the same canonical encoding the
//! hasher digests, and the rowset ends with a zero-length array. A real row
//! always has at least one column, so the empty array can only mean "no
//! more rows".

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::hasher::{LastKeyTracker, RowConsumer};
use crate::row::{encode_row, PackedRow, Row};
use crate::wire::{ByteSink, Packer, Unpacker};

/// Writes rows to an output stream, then the end-of-rowset marker.
pub struct RowPacker<'a, S> {
    output: &'a mut Packer<S>,
    row_count: u64,
    total_rows: u64,
}

impl<'a, S: ByteSink> RowPacker<'a, S> {
    /// Start a rowset on `output`.
    pub fn new(output: &'a mut Packer<S>) -> Self {
        Self {
            output,
            row_count: 0,
            total_rows: 0,
        }
    }

    /// Wrap this packer so it also records the last primary key.
    pub fn track_last_key(self, key_columns: Vec<usize>) -> LastKeyTracker<Self> {
        LastKeyTracker::new(self, key_columns)
    }

    /// The output packer, e.g. to flush a [`StreamSink`](crate::wire::StreamSink)
    /// between rows.
    pub fn output_mut(&mut self) -> &mut Packer<S> {
        self.output
    }

    /// Restart the per-batch row count.
    ///
    /// Used when one rowset is filled by several bounded queries: the count
    /// tells the caller whether the last query came back full.
    pub fn reset_row_count(&mut self) {
        self.row_count = 0;
    }

    /// Rows written across all batches.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Write the end-of-rowset marker. Returns the total rows written.
    pub fn finish(self) -> u64 {
        self.output.encode_array_length(0);
        debug!("Packed {} rows", self.total_rows);
        self.total_rows
    }

    /// Run `body` against this packer, then finish.
    ///
    /// The end-of-rowset marker is written whether `body` succeeds or fails,
    /// so the receiver never waits on an unterminated rowset.
    pub fn scope<T, E>(
        mut self,
        body: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<(T, u64), E> {
        let outcome = body(&mut self);
        let total = self.finish();
        outcome.map(|value| (value, total))
    }
}

impl<S: ByteSink> RowConsumer for RowPacker<'_, S> {
    #[inline]
    fn process<R: Row + ?Sized>(&mut self, row: &R) {
        assert!(
            row.column_count() > 0,
            "zero-column rows would read back as end-of-rowset"
        );
        self.row_count += 1;
        self.total_rows += 1;
        encode_row(self.output, row);
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }
}

impl<'a, S: ByteSink> LastKeyTracker<RowPacker<'a, S>> {
    /// Finish the wrapped packer, returning total rows and the last key.
    pub fn finish(self) -> (u64, Option<crate::row::ColumnValues>) {
        let (packer, last_key) = self.into_parts();
        (packer.finish(), last_key)
    }

    /// Restart the wrapped packer's per-batch row count.
    pub fn reset_row_count(&mut self) {
        self.inner_mut().reset_row_count();
    }
}

/// Reads a packed rowset back, one row at a time, up to the end marker.
///
/// Every row in a rowset must have the same number of columns as the first;
/// a change of arity is reported as a decode error.
pub struct RowStream<'a> {
    input: &'a mut Unpacker,
    columns: Option<usize>,
    rows_read: u64,
    done: bool,
}

impl<'a> RowStream<'a> {
    /// Read rows from `input`.
    pub fn new(input: &'a mut Unpacker) -> Self {
        Self {
            input,
            columns: None,
            rows_read: 0,
            done: false,
        }
    }

    /// Read rows that must have exactly `columns` columns.
    pub fn with_columns(input: &'a mut Unpacker, columns: usize) -> Self {
        Self {
            columns: Some(columns),
            ..Self::new(input)
        }
    }

    /// Rows read so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Whether the end-of-rowset marker has been consumed.
    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn read_row(&mut self) -> Result<Option<PackedRow>> {
        let offset = self.input.position();
        let len = self.input.next_array_length()?;
        if len == 0 {
            self.done = true;
            return Ok(None);
        }
        match self.columns {
            Some(expected) if expected != len => {
                return Err(SyncError::decode(
                    offset,
                    format!("row has {} columns, expected {}", len, expected),
                ));
            }
            Some(_) => {}
            None => self.columns = Some(len),
        }
        // every column takes at least one byte
        if len > self.input.remaining() {
            return Err(SyncError::decode(
                offset,
                format!(
                    "row claims {} columns but only {} bytes remain",
                    len,
                    self.input.remaining()
                ),
            ));
        }

        let mut values = Vec::with_capacity(len.min(self.input.remaining()));
        for _ in 0..len {
            values.push(self.input.next_nullable_string()?);
        }
        self.rows_read += 1;
        Ok(Some(PackedRow::new(values)))
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<PackedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                // a broken stream can't be resynchronized
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestRegistry;
    use crate::hasher::RowHasher;

    fn rows() -> Vec<Vec<Option<&'static str>>> {
        vec![
            vec![Some("2"), Some("10"), Some("test")],
            vec![Some("4"), None, Some("foo")],
            vec![Some("5"), None, None],
        ]
    }

    #[test]
    fn test_rowset_is_rows_then_sentinel() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        packer.process(&vec![Some("1")]);
        assert_eq!(packer.finish(), 1);

        assert_eq!(output.into_inner(), vec![0x91, 0xa1, b'1', 0x90]);
    }

    #[test]
    fn test_empty_rowset_is_just_sentinel() {
        let mut output = Packer::new(Vec::new());
        assert_eq!(RowPacker::new(&mut output).finish(), 0);
        assert_eq!(output.into_inner(), vec![0x90]);
    }

    #[test]
    fn test_sentinel_never_starts_a_row() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        for row in rows() {
            packer.process(&row);
        }
        packer.finish();
        let bytes = output.into_inner();

        let mut input = Unpacker::new(bytes);
        let mut headers = Vec::new();
        loop {
            let len = input.next_array_length().unwrap();
            headers.push(len);
            if len == 0 {
                break;
            }
            for _ in 0..len {
                input.next_nullable_string().unwrap();
            }
        }
        assert_eq!(headers, vec![3, 3, 3, 0]);
        assert!(input.is_empty());
    }

    #[test]
    fn test_packed_bytes_equal_hashed_bytes() {
        let md5 = DigestRegistry::with_defaults().lookup("md5").unwrap();

        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        let mut hasher = RowHasher::new(md5);
        for row in rows() {
            packer.process(&row);
            hasher.process(&row);
        }
        packer.finish();
        let mut bytes = output.into_inner();
        bytes.pop(); // sentinel

        let result = hasher.finish();
        assert_eq!(result.bytes_hashed, bytes.len() as u64);
        assert_eq!(result.digest, md5.digest(&bytes));
    }

    #[test]
    fn test_stream_reads_back_rows() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        for row in rows() {
            packer.process(&row);
        }
        packer.finish();

        let mut input = Unpacker::new(output.into_inner());
        let mut stream = RowStream::new(&mut input);
        let decoded: Vec<PackedRow> = stream.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(stream.rows_read(), 3);
        assert!(stream.is_finished());

        let expected: Vec<PackedRow> = rows().iter().map(|r| PackedRow::from_strs(r)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_rehash_after_transfer_matches() {
        let md5 = DigestRegistry::with_defaults().lookup("md5").unwrap();
        let mut sender = RowHasher::new(md5);
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        for row in rows() {
            sender.process(&row);
            packer.process(&row);
        }
        packer.finish();

        let mut input = Unpacker::new(output.into_inner());
        let mut receiver = RowHasher::new(md5);
        for row in RowStream::new(&mut input) {
            receiver.process(&row.unwrap());
        }
        assert_eq!(sender.finish(), receiver.finish());
    }

    #[test]
    fn test_stream_rejects_arity_change() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        packer.process(&vec![Some("1"), Some("a")]);
        packer.process(&vec![Some("2")]);
        packer.finish();

        let mut input = Unpacker::new(output.into_inner());
        let mut stream = RowStream::new(&mut input);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_stream_with_declared_columns() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        packer.process(&vec![Some("1"), Some("a")]);
        packer.finish();

        let mut input = Unpacker::new(output.into_inner());
        let mut stream = RowStream::with_columns(&mut input, 3);
        assert!(stream.next().unwrap().is_err());
    }

    #[test]
    fn test_stream_truncated_input() {
        let mut input = Unpacker::new(vec![0x92, 0xa1, b'1']);
        let results: Vec<_> = RowStream::new(&mut input).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_stream_rejects_oversized_column_count() {
        let mut input = Unpacker::new(vec![0xdd, 0xff, 0xff, 0xff, 0xff]);
        let mut stream = RowStream::new(&mut input);
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Decode { offset: 0, .. }));
        assert!(stream.next().is_none());

        let mut input = Unpacker::new(vec![0xdc, 0x01, 0x00, 0xa1, b'x']);
        assert!(RowStream::new(&mut input).next().unwrap().is_err());
    }

    #[test]
    #[should_panic(expected = "zero-column rows")]
    fn test_zero_column_row_panics() {
        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output);
        let empty: Vec<Option<&str>> = Vec::new();
        packer.process(&empty);
    }

    #[test]
    fn test_batched_transfer_with_last_key() {
        let all: Vec<Vec<Option<String>>> = (1..=7)
            .map(|i| vec![Some(i.to_string()), Some(format!("v{}", i))])
            .collect();
        let batch_size = 3u64;

        let mut output = Packer::new(Vec::new());
        let mut packer = RowPacker::new(&mut output).track_last_key(vec![0]);
        let mut position = 0;
        loop {
            // stand-in for "SELECT ... WHERE key > prev_key LIMIT batch_size"
            for row in all.iter().skip(position).take(batch_size as usize) {
                packer.process(row);
            }
            position += packer.row_count() as usize;
            if packer.row_count() < batch_size {
                break;
            }
            assert_eq!(
                packer.last_key().unwrap(),
                &[position.to_string().into_bytes()]
            );
            packer.reset_row_count();
        }
        let (total, last_key) = packer.finish();
        assert_eq!(total, 7);
        assert_eq!(last_key, Some(vec![b"7".to_vec()]));

        let mut input = Unpacker::new(output.into_inner());
        assert_eq!(RowStream::new(&mut input).count(), 7);
    }

    #[test]
    fn test_scope_terminates_on_failure() {
        let mut output = Packer::new(Vec::new());
        let outcome: std::result::Result<((), u64), SyncError> =
            RowPacker::new(&mut output).scope(|packer| {
                packer.process(&vec![Some("1")]);
                Err(SyncError::command("connection lost"))
            });
        assert!(outcome.is_err());
        assert_eq!(output.into_inner(), vec![0x91, 0xa1, b'1', 0x90]);
    }
}
