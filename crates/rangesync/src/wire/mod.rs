//! Canonical wire encoding.
//!
//! Every value that crosses the wire, or is fed to a digest, is written
//! through a [`Packer`]. The format is the msgpack subset the sync protocol
//! needs, always using the smallest length form so that two endpoints
//! produce byte-identical output for the same values:
//!
//! - arrays: fixarray (`0x90 | n`), array16 (`0xdc`), array32 (`0xdd`)
//! - null: `0xc0`
//! - strings: fixstr (`0xa0 | len`), str8 (`0xd9`), str16 (`0xda`), str32 (`0xdb`)
//! - unsigned integers: positive fixint, uint8/16/32/64 (`0xcc`..`0xcf`)
//!
//! Multi-byte lengths are big-endian. The largest array or string length
//! that can be represented is [`MAX_LENGTH`].

mod decode;
mod sink;

pub use decode::Unpacker;
pub use sink::{ByteSink, StreamSink, DEFAULT_FLUSH_THRESHOLD};

/// Largest array length or string length the encoding can carry.
pub const MAX_LENGTH: usize = u32::MAX as usize;

pub(crate) const NIL: u8 = 0xc0;
pub(crate) const FIXARRAY: u8 = 0x90;
pub(crate) const ARRAY16: u8 = 0xdc;
pub(crate) const ARRAY32: u8 = 0xdd;
pub(crate) const FIXSTR: u8 = 0xa0;
pub(crate) const STR8: u8 = 0xd9;
pub(crate) const STR16: u8 = 0xda;
pub(crate) const STR32: u8 = 0xdb;
pub(crate) const UINT8: u8 = 0xcc;
pub(crate) const UINT16: u8 = 0xcd;
pub(crate) const UINT32: u8 = 0xce;
pub(crate) const UINT64: u8 = 0xcf;

/// Length check shared by arrays and strings.
///
/// A length that doesn't fit would be written truncated and desynchronize
/// the reader, so it is treated as a programming error.
#[inline]
fn checked_length(len: usize, what: &str) -> u32 {
    match u32::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!(
            "{} length {} exceeds wire limit of {} bytes",
            what, len, MAX_LENGTH
        ),
    }
}

/// Encoder writing canonical values into a [`ByteSink`].
///
/// The packer has no idea whether its sink is a network buffer or a digest
/// accumulator; that is what lets the hashing and transfer paths share one
/// encoding.
#[derive(Debug, Default)]
pub struct Packer<S> {
    sink: S,
}

impl<S: ByteSink> Packer<S> {
    /// Create a packer writing into `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Access the underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the underlying sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Unwrap the packer, returning its sink.
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Write an array header announcing `len` elements.
    #[inline]
    pub fn encode_array_length(&mut self, len: usize) {
        let len = checked_length(len, "array");
        if len < 16 {
            self.sink.put(&[FIXARRAY | len as u8]);
        } else if len <= u16::MAX as u32 {
            let be = (len as u16).to_be_bytes();
            self.sink.put(&[ARRAY16, be[0], be[1]]);
        } else {
            let be = len.to_be_bytes();
            self.sink.put(&[ARRAY32, be[0], be[1], be[2], be[3]]);
        }
    }

    /// Write the null marker.
    #[inline]
    pub fn encode_null(&mut self) {
        self.sink.put(&[NIL]);
    }

    /// Write a length-prefixed raw byte string.
    ///
    /// The payload is copied as-is: no escaping, no text validation and no
    /// attempt to spot numeric-looking values.
    #[inline]
    pub fn encode_string(&mut self, bytes: &[u8]) {
        let len = checked_length(bytes.len(), "string");
        if len < 32 {
            self.sink.put(&[FIXSTR | len as u8]);
        } else if len <= u8::MAX as u32 {
            self.sink.put(&[STR8, len as u8]);
        } else if len <= u16::MAX as u32 {
            let be = (len as u16).to_be_bytes();
            self.sink.put(&[STR16, be[0], be[1]]);
        } else {
            let be = len.to_be_bytes();
            self.sink.put(&[STR32, be[0], be[1], be[2], be[3]]);
        }
        self.sink.put(bytes);
    }

    /// Write either the null marker or the string, for a nullable value.
    #[inline]
    pub fn encode_nullable(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => self.encode_string(bytes),
            None => self.encode_null(),
        }
    }

    /// Write an unsigned integer (row counts, verbs, block sizes).
    ///
    /// Column values never go through here; they are always strings.
    pub fn encode_uint(&mut self, value: u64) {
        if value < 128 {
            self.sink.put(&[value as u8]);
        } else if value <= u8::MAX as u64 {
            self.sink.put(&[UINT8, value as u8]);
        } else if value <= u16::MAX as u64 {
            let be = (value as u16).to_be_bytes();
            self.sink.put(&[UINT16, be[0], be[1]]);
        } else if value <= u32::MAX as u64 {
            let be = (value as u32).to_be_bytes();
            self.sink.put(&[UINT32, be[0], be[1], be[2], be[3]]);
        } else {
            self.sink.put(&[UINT64]);
            self.sink.put(&value.to_be_bytes());
        }
    }

    /// Write a list of key values as an array of strings.
    pub fn encode_column_values(&mut self, values: &[Vec<u8>]) {
        self.encode_array_length(values.len());
        for value in values {
            self.encode_string(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(f: impl FnOnce(&mut Packer<Vec<u8>>)) -> Vec<u8> {
        let mut packer = Packer::new(Vec::new());
        f(&mut packer);
        packer.into_inner()
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    #[test]
    fn test_array_length_forms() {
        assert_eq!(packed(|p| p.encode_array_length(0)), vec![0x90]);
        assert_eq!(packed(|p| p.encode_array_length(15)), vec![0x9f]);
        assert_eq!(packed(|p| p.encode_array_length(16)), vec![0xdc, 0x00, 0x10]);
        assert_eq!(
            packed(|p| p.encode_array_length(65_535)),
            vec![0xdc, 0xff, 0xff]
        );
        assert_eq!(
            packed(|p| p.encode_array_length(65_536)),
            vec![0xdd, 0x00, 0x01, 0x00, 0x00]
        );
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    #[test]
    fn test_null_is_single_reserved_byte() {
        assert_eq!(packed(|p| p.encode_null()), vec![0xc0]);
    }

    #[test]
    fn test_empty_string_differs_from_null() {
        assert_eq!(packed(|p| p.encode_string(b"")), vec![0xa0]);
        assert_ne!(packed(|p| p.encode_string(b"")), packed(|p| p.encode_null()));
    }

    #[test]
    fn test_string_length_forms() {
        let short = packed(|p| p.encode_string(b"abc"));
        assert_eq!(short, vec![0xa3, b'a', b'b', b'c']);

        let s31 = vec![b'x'; 31];
        assert_eq!(packed(|p| p.encode_string(&s31))[0], 0xbf);

        let s32 = vec![b'x'; 32];
        let out = packed(|p| p.encode_string(&s32));
        assert_eq!(&out[..2], &[0xd9, 32]);
        assert_eq!(out.len(), 34);

        let s256 = vec![b'x'; 256];
        let out = packed(|p| p.encode_string(&s256));
        assert_eq!(&out[..3], &[0xda, 0x01, 0x00]);

        let s70k = vec![b'x'; 70_000];
        let out = packed(|p| p.encode_string(&s70k));
        assert_eq!(&out[..5], &[0xdb, 0x00, 0x01, 0x11, 0x70]);
        assert_eq!(out.len(), 70_005);
    }

    #[test]
    fn test_numeric_looking_strings_stay_strings() {
        assert_eq!(packed(|p| p.encode_string(b"5")), vec![0xa1, b'5']);
        assert_ne!(packed(|p| p.encode_string(b"5")), packed(|p| p.encode_uint(5)));
    }

    #[test]
    fn test_binary_payload_is_opaque() {
        let raw = [0x00, 0xff, 0xc0, 0x90];
        assert_eq!(
            packed(|p| p.encode_string(&raw)),
            vec![0xa4, 0x00, 0xff, 0xc0, 0x90]
        );
    }

    #[test]
    fn test_uint_forms() {
        assert_eq!(packed(|p| p.encode_uint(0)), vec![0x00]);
        assert_eq!(packed(|p| p.encode_uint(127)), vec![0x7f]);
        assert_eq!(packed(|p| p.encode_uint(128)), vec![0xcc, 0x80]);
        assert_eq!(packed(|p| p.encode_uint(1000)), vec![0xcd, 0x03, 0xe8]);
        assert_eq!(
            packed(|p| p.encode_uint(100_000)),
            vec![0xce, 0x00, 0x01, 0x86, 0xa0]
        );
        assert_eq!(
            packed(|p| p.encode_uint(u64::MAX)),
            vec![0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_column_values() {
        let key = vec![b"aa".to_vec(), b"101".to_vec()];
        assert_eq!(
            packed(|p| p.encode_column_values(&key)),
            vec![0x92, 0xa2, b'a', b'a', 0xa3, b'1', b'0', b'1']
        );
        assert_eq!(packed(|p| p.encode_column_values(&[])), vec![0x90]);
    }
}
