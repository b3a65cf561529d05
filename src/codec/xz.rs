//! xz codec implementation.

use std::io::{self, Read, Write};

use xz2::read::XzDecoder as RawXzDecoder;
use xz2::write::XzEncoder as RawXzEncoder;

use super::FinishWrite;

/// Default xz preset (matches the `xz` command-line default).
const XZ_LEVEL: u32 = 6;

/// xz decoder.
pub struct XzDecoder<R: Read> {
    inner: RawXzDecoder<R>,
}

impl<R: Read> std::fmt::Debug for XzDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XzDecoder").finish_non_exhaustive()
    }
}

impl<R: Read> XzDecoder<R> {
    /// Creates a new xz decoder over compressed input.
    pub fn new(input: R) -> Self {
        Self {
            inner: RawXzDecoder::new(input),
        }
    }
}

impl<R: Read> Read for XzDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// xz encoder.
pub struct XzEncoder<W: Write> {
    inner: RawXzEncoder<W>,
}

impl<W: Write> std::fmt::Debug for XzEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XzEncoder").finish_non_exhaustive()
    }
}

impl<W: Write> XzEncoder<W> {
    /// Creates a new xz encoder writing to `output`.
    pub fn new(output: W) -> Self {
        Self {
            inner: RawXzEncoder::new(output, XZ_LEVEL),
        }
    }

    /// Finishes encoding and returns the underlying writer.
    pub fn try_finish(self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for XzEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> FinishWrite for XzEncoder<Box<dyn FinishWrite + 'a>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let inner = self.inner.finish()?;
        inner.finish()
    }
}
