//! Hybrid in-memory / temp-file byte buffers.
//!
//! Staged overlay contents, decoded archive bytes, and write streams all pass
//! through a spool: bytes accumulate in memory until the configured
//! `global_buffer_size` threshold, then transparently migrate to a uniquely
//! named temp file. A finished [`Spool`] is immutable, cheaply cloneable, and
//! can hand out any number of independent readers.
//!
//! Temp files are created in the configured temp directory with an `arcfs-`
//! prefix and are deleted when the last clone of the owning spool is dropped.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::{Config, Result};

/// A combined `Read + Seek` object-safe trait.
///
/// Backing stream suppliers yield fresh `Box<dyn ReadSeek>` instances so
/// handlers can both scan sequentially and jump to member offsets.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// `Arc<Vec<u8>>` with the `AsRef<[u8]>` impl `Cursor` wants.
#[derive(Clone)]
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An immutable, re-readable byte store.
///
/// Clones share the same storage; dropping the last clone removes any
/// backing temp file.
#[derive(Clone)]
pub struct Spool {
    inner: SpoolInner,
}

#[derive(Clone)]
enum SpoolInner {
    Memory(Arc<Vec<u8>>),
    Temp { file: Arc<NamedTempFile>, len: u64 },
}

impl std::fmt::Debug for Spool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            SpoolInner::Memory(b) => f.debug_struct("Spool").field("memory", &b.len()).finish(),
            SpoolInner::Temp { len, .. } => f.debug_struct("Spool").field("temp", len).finish(),
        }
    }
}

impl Spool {
    /// Creates an empty spool.
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Creates a spool over an in-memory byte buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: SpoolInner::Memory(Arc::new(bytes.into())),
        }
    }

    /// Returns the logical length in bytes.
    pub fn len(&self) -> u64 {
        match &self.inner {
            SpoolInner::Memory(b) => b.len() as u64,
            SpoolInner::Temp { len, .. } => *len,
        }
    }

    /// Returns `true` if the spool holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a fresh independent reader positioned at the start.
    pub fn reader(&self) -> Result<Box<dyn ReadSeek>> {
        match &self.inner {
            SpoolInner::Memory(b) => Ok(Box::new(Cursor::new(SharedBytes(Arc::clone(b))))),
            SpoolInner::Temp { file, .. } => {
                let reopened: File = file.reopen()?;
                Ok(Box::new(reopened))
            }
        }
    }

    /// Reads the entire spool into a `Vec<u8>`.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        match &self.inner {
            SpoolInner::Memory(b) => Ok(b.as_ref().clone()),
            SpoolInner::Temp { .. } => {
                let mut out = Vec::with_capacity(self.len() as usize);
                self.reader()?.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// A write-side buffer that spills to a temp file past a size threshold.
///
/// Finish with [`SpoolWriter::finish`] to obtain the immutable [`Spool`].
pub struct SpoolWriter {
    state: WriterState,
    threshold: usize,
    temp_dir: PathBuf,
}

enum WriterState {
    Memory(Vec<u8>),
    Temp { file: NamedTempFile, len: u64 },
}

impl SpoolWriter {
    /// Creates a writer using the configured spill threshold and temp dir.
    pub fn new(config: &Config) -> Self {
        Self::with_threshold(config.global_buffer_size, &config.temp_dir)
    }

    /// Creates a writer with an explicit threshold and temp directory.
    pub fn with_threshold(threshold: usize, temp_dir: &Path) -> Self {
        Self {
            state: WriterState::Memory(Vec::new()),
            threshold,
            temp_dir: temp_dir.to_path_buf(),
        }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> u64 {
        match &self.state {
            WriterState::Memory(b) => b.len() as u64,
            WriterState::Temp { len, .. } => *len,
        }
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the buffer has spilled to a temp file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.state, WriterState::Temp { .. })
    }

    fn spill(&mut self) -> io::Result<()> {
        let WriterState::Memory(buffered) = &mut self.state else {
            return Ok(());
        };
        let mut file = tempfile::Builder::new()
            .prefix("arcfs-")
            .suffix(".spool")
            .tempfile_in(&self.temp_dir)?;
        file.write_all(buffered)?;
        let len = buffered.len() as u64;
        self.state = WriterState::Temp { file, len };
        Ok(())
    }

    /// Seals the buffer into an immutable [`Spool`].
    pub fn finish(self) -> Result<Spool> {
        match self.state {
            WriterState::Memory(b) => Ok(Spool::from_bytes(b)),
            WriterState::Temp { mut file, len } => {
                file.flush()?;
                Ok(Spool {
                    inner: SpoolInner::Temp {
                        file: Arc::new(file),
                        len,
                    },
                })
            }
        }
    }
}

impl Write for SpoolWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let WriterState::Memory(buffered) = &self.state {
            if buffered.len() + buf.len() > self.threshold {
                self.spill()?;
            }
        }
        match &mut self.state {
            WriterState::Memory(buffered) => {
                buffered.extend_from_slice(buf);
                Ok(buf.len())
            }
            WriterState::Temp { file, len } => {
                let n = file.write(buf)?;
                *len += n as u64;
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            WriterState::Memory(_) => Ok(()),
            WriterState::Temp { file, .. } => file.flush(),
        }
    }
}

/// Copies `reader` into `writer` in `chunk_size` blocks, returning the byte
/// count.
pub(crate) fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(512)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(threshold: usize) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new()
            .global_buffer_size(threshold)
            .temp_dir(dir.path());
        (dir, config)
    }

    #[test]
    fn test_memory_roundtrip() {
        let (_dir, config) = temp_config(1024);
        let mut writer = SpoolWriter::new(&config);
        writer.write_all(b"hello spool").unwrap();
        assert!(!writer.is_spilled());

        let spool = writer.finish().unwrap();
        assert_eq!(spool.len(), 11);
        assert_eq!(spool.to_vec().unwrap(), b"hello spool");
    }

    #[test]
    fn test_spills_past_threshold() {
        let (_dir, config) = temp_config(16);
        let mut writer = SpoolWriter::new(&config);
        writer.write_all(b"0123456789").unwrap();
        assert!(!writer.is_spilled());
        writer.write_all(b"0123456789").unwrap();
        assert!(writer.is_spilled());

        let spool = writer.finish().unwrap();
        assert_eq!(spool.len(), 20);
        assert_eq!(spool.to_vec().unwrap(), b"01234567890123456789");
    }

    #[test]
    fn test_spilled_readers_are_independent() {
        let (_dir, config) = temp_config(4);
        let mut writer = SpoolWriter::new(&config);
        writer.write_all(b"abcdefgh").unwrap();
        let spool = writer.finish().unwrap();

        let mut r1 = spool.reader().unwrap();
        let mut r2 = spool.reader().unwrap();
        let mut a = [0u8; 4];
        let mut b = [0u8; 8];
        r1.read_exact(&mut a).unwrap();
        r2.read_exact(&mut b).unwrap();
        assert_eq!(&a, b"abcd");
        assert_eq!(&b, b"abcdefgh");
    }

    #[test]
    fn test_reader_seek() {
        let spool = Spool::from_bytes(b"0123456789".to_vec());
        let mut r = spool.reader().unwrap();
        r.seek(io::SeekFrom::Start(5)).unwrap();
        let mut rest = String::new();
        r.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "56789");
    }

    #[test]
    fn test_empty() {
        let spool = Spool::empty();
        assert!(spool.is_empty());
        assert_eq!(spool.to_vec().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_clone_shares_storage() {
        let (_dir, config) = temp_config(2);
        let mut writer = SpoolWriter::new(&config);
        writer.write_all(b"shared").unwrap();
        let spool = writer.finish().unwrap();
        let clone = spool.clone();
        drop(spool);
        assert_eq!(clone.to_vec().unwrap(), b"shared");
    }

    #[test]
    fn test_copy_chunked() {
        let spool = Spool::from_bytes(vec![7u8; 5000]);
        let mut out = Vec::new();
        let n = copy_chunked(&mut *spool.reader().unwrap(), &mut out, 512).unwrap();
        assert_eq!(n, 5000);
        assert_eq!(out, vec![7u8; 5000]);
    }
}
