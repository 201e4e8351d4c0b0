//! Byte sinks the encoder writes into.

use std::io::Write;

use bytes::BytesMut;

/// Default size at which a [`StreamSink`] hands its buffer to the writer (~64KB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024;

/// Anything that accepts appended bytes.
///
/// Writes are infallible: sinks either buffer in memory or feed a hash
/// accumulator. Fallible transports are reached through [`StreamSink`],
/// which buffers and reports I/O errors when flushed.
pub trait ByteSink {
    /// Append `bytes` to the sink.
    fn put(&mut self, bytes: &[u8]);
}

impl ByteSink for Vec<u8> {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl ByteSink for BytesMut {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        (**self).put(bytes);
    }
}

/// Buffered sink in front of an [`std::io::Write`] stream.
///
/// Encoded bytes accumulate in a `BytesMut` and are written out in chunks,
/// either explicitly via [`flush`](Self::flush) or when the caller checks
/// [`flush_if_full`](Self::flush_if_full) between rows.
pub struct StreamSink<W: Write> {
    writer: W,
    buffer: BytesMut,
    threshold: usize,
    bytes_written: u64,
}

impl<W: Write> StreamSink<W> {
    /// Create a sink flushing at [`DEFAULT_FLUSH_THRESHOLD`].
    pub fn new(writer: W) -> Self {
        Self::with_threshold(writer, DEFAULT_FLUSH_THRESHOLD)
    }

    /// Create a sink flushing once `threshold` bytes are buffered.
    pub fn with_threshold(writer: W, threshold: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(threshold.max(1)),
            threshold: threshold.max(1),
            bytes_written: 0,
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes handed to the writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the buffer out if it has reached the threshold.
    pub fn flush_if_full(&mut self) -> std::io::Result<()> {
        if self.buffer.len() >= self.threshold {
            self.write_buffer()?;
        }
        Ok(())
    }

    /// Write out everything buffered and flush the writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.write_buffer()?;
        self.writer.flush()
    }

    /// Flush and return the writer.
    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.flush()?;
        Ok(self.writer)
    }

    fn write_buffer(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buffer)?;
        self.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write> ByteSink for StreamSink<W> {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}
