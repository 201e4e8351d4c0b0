//! Delimited text rows in the PostgreSQL COPY text style: one row per line,
//! fields separated by a single-byte delimiter, a marker string standing for
//! NULL, and backslash escapes for bytes that would otherwise be ambiguous.
//!
//! Escapes: `\\`, `\t`, `\n`, `\r`, and a backslash before the delimiter.
//! A backslash before any other byte stands for that byte. The NULL marker
//! is matched against the raw field text, before unescaping, so a value that
//! looks like the marker is written with a leading backslash.

use rangesync::{PackedRow, RowsConfig, SyncError};
use std::io::{BufRead, Write};

/// A row read from delimited input.
pub type TextRow = Vec<Option<Vec<u8>>>;

/// Reads delimited rows from a line-oriented input.
///
/// An empty line is a row with one empty column. Every row must have as many
/// fields as the first one, and the configured key columns must exist in it.
pub struct DelimitedReader<R> {
    reader: R,
    delimiter: u8,
    null_marker: Vec<u8>,
    key_columns: Vec<usize>,
    skip_header: bool,
    columns: Option<usize>,
    line: Vec<u8>,
    offset: usize,
}

impl<R: BufRead> DelimitedReader<R> {
    pub fn new(reader: R, config: &RowsConfig) -> Self {
        Self {
            reader,
            delimiter: config.delimiter_byte(),
            null_marker: config.null_marker.as_bytes().to_vec(),
            key_columns: config.primary_key_columns.clone(),
            skip_header: config.has_header,
            columns: None,
            line: Vec::new(),
            offset: 0,
        }
    }

    /// Next row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<TextRow>, SyncError> {
        loop {
            self.line.clear();
            let start = self.offset;
            let n = self.reader.read_until(b'\n', &mut self.line)?;
            if n == 0 {
                return Ok(None);
            }
            self.offset += n;

            if self.line.last() == Some(&b'\n') {
                self.line.pop();
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
            }
            if self.skip_header {
                self.skip_header = false;
                continue;
            }

            let row: TextRow = split_fields(&self.line, self.delimiter)
                .into_iter()
                .map(|field| {
                    if field == self.null_marker.as_slice() {
                        None
                    } else {
                        Some(unescape(field))
                    }
                })
                .collect();

            match self.columns {
                Some(expected) if expected != row.len() => {
                    return Err(SyncError::decode(
                        start,
                        format!("line has {} columns, expected {}", row.len(), expected),
                    ));
                }
                Some(_) => {}
                None => {
                    if let Some(&column) = self.key_columns.iter().find(|&&c| c >= row.len()) {
                        return Err(SyncError::Config(format!(
                            "key column {} out of range for {}-column rows",
                            column,
                            row.len()
                        )));
                    }
                    self.columns = Some(row.len());
                }
            }
            return Ok(Some(row));
        }
    }
}

/// Split a line on delimiters not preceded by a backslash escape.
fn split_fields(line: &[u8], delimiter: u8) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'\\' {
            i += 2;
            continue;
        }
        if line[i] == delimiter {
            fields.push(&line[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    fields.push(&line[start.min(line.len())..]);
    fields
}

fn unescape(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut bytes = field.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b't') => out.push(b'\t'),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(&other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    out
}

fn escape(value: &[u8], delimiter: u8, null_marker: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    for &b in value {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b if b == delimiter => out.extend_from_slice(&[b'\\', b]),
            b => out.push(b),
        }
    }
    if out == null_marker {
        out.insert(0, b'\\');
    }
    out
}

/// Write `row` as one delimited line.
pub fn write_row<W: Write>(out: &mut W, row: &PackedRow, config: &RowsConfig) -> std::io::Result<()> {
    let delimiter = config.delimiter_byte();
    let null_marker = config.null_marker.as_bytes();
    for (index, value) in row.values().iter().enumerate() {
        if index > 0 {
            out.write_all(&[delimiter])?;
        }
        match value {
            Some(bytes) => out.write_all(&escape(bytes, delimiter, null_marker))?,
            None => out.write_all(null_marker)?,
        }
    }
    out.write_all(b"\n")
}
