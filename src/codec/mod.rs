//! Streaming compression codecs.
//!
//! This module provides the codec layer between raw archive bytes and plain
//! container bytes. Formats such as `.tar.gz` are a container (TAR) behind a
//! codec (gzip); bare `.gz`/`.bz2`/`.xz` files are a codec behind the trivial
//! single-entry container.
//!
//! Codecs compose into chains. A chain lists codecs outermost-first with
//! respect to the raw bytes: decoding applies them left to right, encoding
//! applies them right to left. Encoding never needs the final size up front;
//! trailers are written by [`ChainEncoder::finish`].

pub mod gzip;

#[cfg(feature = "bzip2")]
pub mod bzip2;

#[cfg(feature = "xz")]
pub mod xz;

use std::io::{self, Read, Write};

use crate::{Error, Result};

/// A compression codec supported by the chain layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Codec {
    /// gzip (RFC 1952) via `flate2`.
    Gzip,
    /// bzip2 via the `bzip2` crate.
    #[cfg(feature = "bzip2")]
    Bzip2,
    /// xz via `xz2` (liblzma).
    #[cfg(feature = "xz")]
    Xz,
}

impl Codec {
    /// Looks up a codec by name (`"gzip"`, `"bzip2"`, `"xz"`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for unknown names and for codecs
    /// whose cargo feature is disabled in this build.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "gzip" | "gz" => Ok(Codec::Gzip),
            #[cfg(feature = "bzip2")]
            "bzip2" | "bz2" => Ok(Codec::Bzip2),
            #[cfg(feature = "xz")]
            "xz" => Ok(Codec::Xz),
            other => Err(Error::UnsupportedFormat {
                extension: other.to_string(),
            }),
        }
    }

    /// Returns the canonical codec name.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => "bzip2",
            #[cfg(feature = "xz")]
            Codec::Xz => "xz",
        }
    }

    fn wrap_decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        match self {
            Codec::Gzip => Box::new(gzip::GzipDecoder::new(input)),
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => Box::new(bzip2::Bzip2Decoder::new(input)),
            #[cfg(feature = "xz")]
            Codec::Xz => Box::new(xz::XzDecoder::new(input)),
        }
    }

    fn wrap_encoder<'a>(&self, output: Box<dyn FinishWrite + 'a>) -> Box<dyn FinishWrite + 'a> {
        match self {
            Codec::Gzip => Box::new(gzip::GzipEncoder::new(output)),
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => Box::new(bzip2::Bzip2Encoder::new(output)),
            #[cfg(feature = "xz")]
            Codec::Xz => Box::new(xz::XzEncoder::new(output)),
        }
    }
}

/// A writer that must be explicitly finished to flush codec trailers.
///
/// Implemented by every encoder stage and by the plain sink adapter, so
/// encoder chains can finish recursively from the outside in.
pub trait FinishWrite: Write {
    /// Flushes remaining data and writes any trailer, consuming the stage.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Adapter giving a plain `Write` a no-op [`FinishWrite`] impl.
struct PlainSink<'a>(&'a mut dyn Write);

impl Write for PlainSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FinishWrite for PlainSink<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

/// Wraps `raw` in the decoders for `codecs`, yielding plain bytes.
///
/// An empty chain returns `raw` unchanged. Corrupt input surfaces as an I/O
/// error on the first read that cannot produce output; callers translate
/// that into a format error with archive context.
pub fn decode_chain<'a>(codecs: &[Codec], raw: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
    let mut reader = raw;
    for codec in codecs {
        reader = codec.wrap_decoder(reader);
    }
    reader
}

/// An encoder chain over a borrowed sink.
///
/// Call [`ChainEncoder::finish`] after the last write; dropping the chain
/// without finishing loses buffered data and trailers.
pub struct ChainEncoder<'a> {
    top: Option<Box<dyn FinishWrite + 'a>>,
}

impl<'a> ChainEncoder<'a> {
    /// Builds the encoder chain for `codecs` over `sink`.
    ///
    /// An empty chain passes bytes through, flushing on finish.
    pub fn new(codecs: &[Codec], sink: &'a mut dyn Write) -> Self {
        let mut writer: Box<dyn FinishWrite + 'a> = Box::new(PlainSink(sink));
        // Innermost codec (closest to the raw bytes) wraps last.
        for codec in codecs.iter().rev() {
            writer = codec.wrap_encoder(writer);
        }
        Self { top: Some(writer) }
    }

    /// Finishes every stage, flushing codec trailers into the sink.
    pub fn finish(mut self) -> io::Result<()> {
        match self.top.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }
}

impl Write for ChainEncoder<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.top {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "encoder chain already finished",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.top {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codecs: &[Codec], data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        let mut enc = ChainEncoder::new(codecs, &mut raw);
        enc.write_all(data).unwrap();
        enc.finish().unwrap();
        assert!(!raw.is_empty() || data.is_empty());

        let mut plain = Vec::new();
        decode_chain(codecs, Box::new(io::Cursor::new(raw)))
            .read_to_end(&mut plain)
            .unwrap();
        plain
    }

    #[test]
    fn test_empty_chain_passthrough() {
        let data = b"no codec at all";
        assert_eq!(roundtrip(&[], data), data);
    }

    #[test]
    fn test_gzip_chain_roundtrip() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        assert_eq!(roundtrip(&[Codec::Gzip], &data), data);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_bzip2_chain_roundtrip() {
        let data = vec![42u8; 4096];
        assert_eq!(roundtrip(&[Codec::Bzip2], &data), data);
    }

    #[cfg(feature = "xz")]
    #[test]
    fn test_xz_chain_roundtrip() {
        let data = b"xz roundtrip payload".repeat(100);
        assert_eq!(roundtrip(&[Codec::Xz], &data), data);
    }

    #[cfg(all(feature = "bzip2", feature = "xz"))]
    #[test]
    fn test_layered_chain_roundtrip() {
        // Nonsense layering in practice, but the chain must compose.
        let data = b"layered".repeat(50);
        assert_eq!(roundtrip(&[Codec::Xz, Codec::Bzip2], &data), data);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Codec::from_name("gzip").unwrap(), Codec::Gzip);
        assert_eq!(Codec::from_name("gz").unwrap(), Codec::Gzip);
        assert!(matches!(
            Codec::from_name("zstd"),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_corrupt_gzip_fails_on_read() {
        let garbage = b"definitely not gzip data";
        let mut out = Vec::new();
        let result = decode_chain(&[Codec::Gzip], Box::new(io::Cursor::new(garbage.to_vec())))
            .read_to_end(&mut out);
        assert!(result.is_err());
    }
}
