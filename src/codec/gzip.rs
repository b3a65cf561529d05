//! gzip codec implementation.

use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::FinishWrite;

/// gzip decoder.
///
/// Accepts multi-member streams; concatenated gzip files decode as one
/// continuous payload, matching command-line `gzip -d`.
pub struct GzipDecoder<R> {
    inner: MultiGzDecoder<R>,
}

impl<R> std::fmt::Debug for GzipDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecoder").finish_non_exhaustive()
    }
}

impl<R: Read> GzipDecoder<R> {
    /// Creates a new gzip decoder over compressed input.
    pub fn new(input: R) -> Self {
        Self {
            inner: MultiGzDecoder::new(input),
        }
    }
}

impl<R: Read> Read for GzipDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// gzip encoder.
pub struct GzipEncoder<W: Write> {
    inner: GzEncoder<W>,
}

impl<W: Write> std::fmt::Debug for GzipEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipEncoder").finish_non_exhaustive()
    }
}

impl<W: Write> GzipEncoder<W> {
    /// Creates a new gzip encoder writing to `output`.
    pub fn new(output: W) -> Self {
        Self {
            inner: GzEncoder::new(output, Compression::default()),
        }
    }

    /// Finishes encoding and returns the underlying writer.
    pub fn try_finish(self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for GzipEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> FinishWrite for GzipEncoder<Box<dyn FinishWrite + 'a>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let inner = self.inner.finish()?;
        inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"Hello, World! This is a test of gzip compression.";

        let mut compressed = Vec::new();
        {
            let mut encoder = GzipEncoder::new(&mut compressed);
            encoder.write_all(data).unwrap();
            encoder.try_finish().unwrap();
        }

        let mut decoder = GzipDecoder::new(Cursor::new(&compressed));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_gzip_multi_member() {
        let mut compressed = Vec::new();
        for part in [b"first " as &[u8], b"second"] {
            let mut encoder = GzipEncoder::new(&mut compressed);
            encoder.write_all(part).unwrap();
            encoder.try_finish().unwrap();
        }

        let mut decoder = GzipDecoder::new(Cursor::new(&compressed));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, b"first second");
    }

    #[test]
    fn test_gzip_empty_payload() {
        let mut compressed = Vec::new();
        {
            let encoder = GzipEncoder::new(&mut compressed);
            encoder.try_finish().unwrap();
        }
        assert!(!compressed.is_empty()); // header + trailer

        let mut decoder = GzipDecoder::new(Cursor::new(&compressed));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert!(decompressed.is_empty());
    }
}
