//! Decoder for the canonical wire encoding.
//!
//! Parses values written by [`Packer`](super::Packer) from an in-memory
//! buffer. Only the types the sync protocol uses are understood; any other
//! type tag is a decode error.

use bytes::{Buf, Bytes};

use super::{
    ARRAY16, ARRAY32, FIXARRAY, FIXSTR, NIL, STR16, STR32, STR8, UINT16, UINT32, UINT64, UINT8,
};
use crate::error::{Result, SyncError};

/// Cursor over an encoded byte buffer.
#[derive(Debug, Clone)]
pub struct Unpacker {
    buffer: Bytes,
    consumed: usize,
}

impl Unpacker {
    /// Create an unpacker over `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            buffer: data.into(),
            consumed: 0,
        }
    }

    /// Offset of the next unread byte from the start of the input.
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    /// True once all input has been consumed.
    pub fn is_empty(&self) -> bool {
        !self.buffer.has_remaining()
    }

    /// Look at the next type tag without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.buffer
            .first()
            .copied()
            .ok_or_else(|| SyncError::decode(self.consumed, "unexpected end of input"))
    }

    /// Read an array header and return its element count.
    pub fn next_array_length(&mut self) -> Result<usize> {
        let offset = self.consumed;
        let tag = self.take_u8()?;
        match tag {
            t if t & 0xf0 == FIXARRAY => Ok((t & 0x0f) as usize),
            ARRAY16 => Ok(self.take_u16()? as usize),
            ARRAY32 => Ok(self.take_u32()? as usize),
            other => Err(SyncError::decode(
                offset,
                format!("expected array, found type tag 0x{:02x}", other),
            )),
        }
    }

    /// Read a string or null.
    pub fn next_nullable_string(&mut self) -> Result<Option<Bytes>> {
        if self.peek_tag()? == NIL {
            self.take_u8()?;
            return Ok(None);
        }
        self.next_string().map(Some)
    }

    /// Read a string, rejecting null.
    pub fn next_string(&mut self) -> Result<Bytes> {
        let offset = self.consumed;
        let tag = self.take_u8()?;
        let len = match tag {
            t if t & 0xe0 == FIXSTR => (t & 0x1f) as usize,
            STR8 => self.take_u8()? as usize,
            STR16 => self.take_u16()? as usize,
            STR32 => self.take_u32()? as usize,
            other => {
                return Err(SyncError::decode(
                    offset,
                    format!("expected string, found type tag 0x{:02x}", other),
                ))
            }
        };
        self.take_bytes(len)
    }

    /// Read an unsigned integer.
    pub fn next_uint(&mut self) -> Result<u64> {
        let offset = self.consumed;
        let tag = self.take_u8()?;
        match tag {
            t if t < 0x80 => Ok(t as u64),
            UINT8 => Ok(self.take_u8()? as u64),
            UINT16 => Ok(self.take_u16()? as u64),
            UINT32 => Ok(self.take_u32()? as u64),
            UINT64 => {
                self.ensure(8)?;
                self.consumed += 8;
                Ok(self.buffer.get_u64())
            }
            other => Err(SyncError::decode(
                offset,
                format!("expected unsigned integer, found type tag 0x{:02x}", other),
            )),
        }
    }

    /// Read an array of non-null strings, as used for key values.
    pub fn next_column_values(&mut self) -> Result<Vec<Vec<u8>>> {
        let len = self.next_array_length()?;
        let mut values = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            values.push(self.next_string()?.to_vec());
        }
        Ok(values)
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buffer.remaining() < needed {
            return Err(SyncError::decode(
                self.consumed,
                format!(
                    "truncated input: need {} bytes, have {}",
                    needed,
                    self.buffer.remaining()
                ),
            ));
        }
        Ok(())
    }

    fn take_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.buffer.get_u8())
    }

    fn take_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        self.consumed += 2;
        Ok(self.buffer.get_u16())
    }

    fn take_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buffer.get_u32())
    }

    fn take_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        self.consumed += len;
        Ok(self.buffer.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Packer;

    fn encoded(f: impl FnOnce(&mut Packer<Vec<u8>>)) -> Unpacker {
        let mut packer = Packer::new(Vec::new());
        f(&mut packer);
        Unpacker::new(packer.into_inner())
    }

    #[test]
    fn test_reads_mixed_sequence() {
        let mut input = encoded(|p| {
            p.encode_array_length(3);
            p.encode_null();
            p.encode_string(b"");
            p.encode_uint(70_000);
        });

        assert_eq!(input.next_array_length().unwrap(), 3);
        assert_eq!(input.next_nullable_string().unwrap(), None);
        assert_eq!(
            input.next_nullable_string().unwrap(),
            Some(Bytes::from_static(b""))
        );
        assert_eq!(input.next_uint().unwrap(), 70_000);
        assert!(input.is_empty());
    }

    #[test]
    fn test_long_string() {
        let payload = vec![7u8; 300];
        let mut input = encoded(|p| p.encode_string(&payload));
        assert_eq!(input.next_string().unwrap(), Bytes::from(payload));
        assert_eq!(input.position(), 303);
    }

    #[test]
    fn test_large_array_header() {
        let mut input = encoded(|p| p.encode_array_length(100_000));
        assert_eq!(input.next_array_length().unwrap(), 100_000);
    }

    #[test]
    fn test_truncated_string_reports_offset() {
        let mut input = Unpacker::new(vec![0xa5, b'a', b'b']);
        let err = input.next_string().unwrap_err();
        match err {
            SyncError::Decode { offset, message } => {
                assert_eq!(offset, 1);
                assert!(message.contains("truncated"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let mut input = Unpacker::new(vec![0xc0]);
        assert!(input.next_array_length().is_err());

        let mut input = Unpacker::new(vec![0xc0]);
        assert!(input.next_string().is_err());

        let mut input = Unpacker::new(vec![0xa1, b'5']);
        assert!(input.next_uint().is_err());
    }

    #[test]
    fn test_empty_input() {
        let mut input = Unpacker::new(Vec::new());
        assert!(input.peek_tag().is_err());
        assert!(input.next_array_length().is_err());
    }

    #[test]
    fn test_column_values() {
        let key = vec![b"aa".to_vec(), b"101".to_vec()];
        let mut input = encoded(|p| p.encode_column_values(&key));
        assert_eq!(input.next_column_values().unwrap(), key);
    }
}
