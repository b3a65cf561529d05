//! bzip2 codec implementation.

use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use super::FinishWrite;

/// bzip2 decoder.
pub struct Bzip2Decoder<R> {
    inner: BzDecoder<R>,
}

impl<R> std::fmt::Debug for Bzip2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read> Bzip2Decoder<R> {
    /// Creates a new bzip2 decoder over compressed input.
    pub fn new(input: R) -> Self {
        Self {
            inner: BzDecoder::new(input),
        }
    }
}

impl<R: Read> Read for Bzip2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// bzip2 encoder.
pub struct Bzip2Encoder<W: Write> {
    inner: BzEncoder<W>,
}

impl<W: Write> std::fmt::Debug for Bzip2Encoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Encoder").finish_non_exhaustive()
    }
}

impl<W: Write> Bzip2Encoder<W> {
    /// Creates a new bzip2 encoder writing to `output`.
    pub fn new(output: W) -> Self {
        Self {
            inner: BzEncoder::new(output, Compression::best()),
        }
    }

    /// Finishes encoding and returns the underlying writer.
    pub fn try_finish(self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for Bzip2Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> FinishWrite for Bzip2Encoder<Box<dyn FinishWrite + 'a>> {
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
    fn test_bzip2_roundtrip() {
        let data = b"Hello, World! This is a test of bzip2 compression.";

        let mut compressed = Vec::new();
        {
            let mut encoder = Bzip2Encoder::new(&mut compressed);
            encoder.write_all(data).unwrap();
            encoder.try_finish().unwrap();
        }

        let mut decoder = Bzip2Decoder::new(Cursor::new(&compressed));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_bzip2_compresses_repetition() {
        let data = vec![9u8; 100_000];
        let mut compressed = Vec::new();
        {
            let mut encoder = Bzip2Encoder::new(&mut compressed);
            encoder.write_all(&data).unwrap();
            encoder.try_finish().unwrap();
        }
        assert!(compressed.len() < data.len() / 10);
    }
}
