//! Row abstraction and the canonical row encoding.
//!
//! A row is an ordered, fixed-arity list of nullable byte strings. Database
//! clients render every value to its canonical text form before handing
//! it over, so nothing here depends on native numeric layouts, locale or
//! byte order.

use bytes::Bytes;

use crate::wire::{ByteSink, Packer};

/// Primary-key values, one per key column, in key order.
pub type ColumnValues = Vec<Vec<u8>>;

/// A row as produced by a database cursor.
pub trait Row {
    /// Number of columns. Fixed for the whole rowset.
    fn column_count(&self) -> usize;

    /// Whether column `index` is SQL NULL.
    fn is_null(&self, index: usize) -> bool;

    /// Canonical string bytes of column `index`.
    ///
    /// Only meaningful when the column is not null; null columns return an
    /// empty slice.
    fn string_value(&self, index: usize) -> &[u8];
}

/// Encode one row: array header equal to the column count, then each column
/// as either the null marker or its string bytes.
///
/// This is the only place that decides the shape of an encoded row. The
/// hashing path and the transfer path both call it, so a hash computed on one
/// side always describes exactly the bytes the other side would receive.
#[inline]
pub fn encode_row<S: ByteSink, R: Row + ?Sized>(packer: &mut Packer<S>, row: &R) {
    let columns = row.column_count();
    packer.encode_array_length(columns);
    for index in 0..columns {
        if row.is_null(index) {
            packer.encode_null();
        } else {
            packer.encode_string(row.string_value(index));
        }
    }
}

/// Copy the values of `key_columns` out of `row`.
///
/// Null key columns come back as empty values; primary keys are never null
/// in practice.
pub fn primary_key_of<R: Row + ?Sized>(row: &R, key_columns: &[usize]) -> ColumnValues {
    key_columns
        .iter()
        .map(|&index| row.string_value(index).to_vec())
        .collect()
}

/// Owned row of nullable values, as decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedRow(pub Vec<Option<Bytes>>);

impl PackedRow {
    /// Create a row from decoded values.
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self(values)
    }

    /// Build a row from text values; `None` is NULL.
    pub fn from_strs(values: &[Option<&str>]) -> Self {
        Self(
            values
                .iter()
                .map(|v| v.map(|s| Bytes::copy_from_slice(s.as_bytes())))
                .collect(),
        )
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-column sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column values.
    pub fn values(&self) -> &[Option<Bytes>] {
        &self.0
    }
}

impl Row for PackedRow {
    fn column_count(&self) -> usize {
        self.0.len()
    }

    fn is_null(&self, index: usize) -> bool {
        self.0[index].is_none()
    }

    fn string_value(&self, index: usize) -> &[u8] {
        self.0[index].as_deref().unwrap_or_default()
    }
}

impl<T: AsRef<[u8]>> Row for [Option<T>] {
    fn column_count(&self) -> usize {
        self.len()
    }

    fn is_null(&self, index: usize) -> bool {
        self[index].is_none()
    }

    fn string_value(&self, index: usize) -> &[u8] {
        match &self[index] {
            Some(value) => value.as_ref(),
            None => &[],
        }
    }
}

impl<T: AsRef<[u8]>> Row for Vec<Option<T>> {
    fn column_count(&self) -> usize {
        self.as_slice().column_count()
    }

    fn is_null(&self, index: usize) -> bool {
        self.as_slice().is_null(index)
    }

    fn string_value(&self, index: usize) -> &[u8] {
        self.as_slice().string_value(index)
    }
}
