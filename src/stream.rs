//! File-like streams over composite paths.
//!
//! [`ArcReader`] reads a physical file or an archive entry, decoding lazily
//! through any codec chain. Seeking forward skips; seeking backward
//! re-opens the entry from its backing rather than buffering everything
//! (full materialization is never required, because nested and
//! codec-backed archives are already spooled by resolution).
//!
//! [`ArcWriter`] accumulates bytes in a spill-to-temp spool; closing it
//! stages the bytes as an overlay in the owning entry store and marks the
//! resolution chain dirty. Rebuild happens at session commit, or
//! immediately for writers opened on the facade.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::warn;

use crate::handle::BackingDescriptor;
use crate::handler::registry::Registration;
use crate::handler::{entry_reader, SourceFn};
use crate::session::Core;
use crate::spool::{ReadSeek, Spool, SpoolWriter};
use crate::store::Entry;
use crate::{Config, Error, Result};

/// Re-opens an archive entry's byte stream without borrowing the session.
pub(crate) enum EntryOpener {
    /// Staged overlay bytes.
    Spool(Spool),
    /// Bytes in the original archive; the handler is re-created on demand.
    Original {
        backing: BackingDescriptor,
        registration: Registration,
        file_name: String,
        config: Config,
        entry: Entry,
    },
}

impl EntryOpener {
    pub(crate) fn open(&self) -> Result<Box<dyn Read>> {
        match self {
            EntryOpener::Spool(spool) => Ok(Box::new(spool.reader()?)),
            EntryOpener::Original {
                backing,
                registration,
                file_name,
                config,
                entry,
            } => {
                let handler = registration.make_handler(file_name, config);
                let supplier = move || backing.open();
                entry_reader(handler.as_ref(), Some(&supplier as &SourceFn<'_>), entry)
            }
        }
    }
}

enum ReaderKind {
    /// Natively seekable: a physical file or an overlay spool.
    Seekable(Box<dyn ReadSeek>),
    /// Sequential decode; backward seeks re-open.
    Entry {
        inner: Box<dyn Read>,
        opener: EntryOpener,
    },
}

/// A readable, seekable stream over a composite path.
pub struct ArcReader {
    kind: ReaderKind,
    pos: u64,
    len: u64,
}

impl ArcReader {
    pub(crate) fn from_seekable(inner: Box<dyn ReadSeek>, len: u64) -> Self {
        Self {
            kind: ReaderKind::Seekable(inner),
            pos: 0,
            len,
        }
    }

    pub(crate) fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self::from_seekable(Box::new(file), len))
    }

    pub(crate) fn from_entry(opener: EntryOpener, len: u64) -> Result<Self> {
        // Overlay spools seek natively; only original entries need the
        // re-open fallback.
        if let EntryOpener::Spool(spool) = &opener {
            let reader = spool.reader()?;
            return Ok(Self::from_seekable(reader, spool.len()));
        }
        let inner = opener.open()?;
        Ok(Self {
            kind: ReaderKind::Entry { inner, opener },
            pos: 0,
            len,
        })
    }

    /// Reads the remaining stream to its end.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }

    fn skip_forward(inner: &mut Box<dyn Read>, mut n: u64) -> io::Result<()> {
        let mut buf = [0u8; 8192];
        while n > 0 {
            let take = n.min(buf.len() as u64) as usize;
            let read = inner.read(&mut buf[..take])?;
            if read == 0 {
                break; // seeking past the end is allowed; reads return 0
            }
            n -= read as u64;
        }
        Ok(())
    }
}

impl Read for ArcReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.kind {
            ReaderKind::Seekable(inner) => inner.read(buf)?,
            ReaderKind::Entry { inner, .. } => inner.read(buf)?,
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ArcReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.len as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = target as u64;

        match &mut self.kind {
            ReaderKind::Seekable(inner) => {
                self.pos = inner.seek(SeekFrom::Start(target))?;
            }
            ReaderKind::Entry { inner, opener } => {
                if target >= self.pos {
                    Self::skip_forward(inner, target - self.pos)?;
                } else {
                    let fresh = opener
                        .open()
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                    *inner = fresh;
                    Self::skip_forward(inner, target)?;
                }
                self.pos = target;
            }
        }
        Ok(self.pos)
    }
}

enum WriterInner {
    /// Streams straight to an OS file.
    Physical(File),
    /// Spools bytes; close stages them into the entry store.
    Entry {
        spool: SpoolWriter,
        core: Core,
        path: String,
        autocommit: bool,
    },
}

/// A writable stream over a composite path.
///
/// Must be finished with [`close`](ArcWriter::close); dropping an unclosed
/// entry writer discards its bytes.
pub struct ArcWriter {
    inner: Option<WriterInner>,
    closed: bool,
}

impl ArcWriter {
    pub(crate) fn physical(file: File) -> Self {
        Self {
            inner: Some(WriterInner::Physical(file)),
            closed: false,
        }
    }

    pub(crate) fn entry(spool: SpoolWriter, core: Core, path: String, autocommit: bool) -> Self {
        Self {
            inner: Some(WriterInner::Entry {
                spool,
                core,
                path,
                autocommit,
            }),
            closed: false,
        }
    }

    /// Writes a full string, for text-flavored callers.
    pub fn write_str(&mut self, text: &str) -> Result<()> {
        self.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Commits the stream.
    ///
    /// For archive entries this stages the bytes as an overlay and marks
    /// the archive chain dirty; the rebuild itself runs at session commit
    /// (or immediately for facade-opened writers).
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        match self.inner.take() {
            Some(WriterInner::Physical(mut file)) => {
                file.flush()?;
                Ok(())
            }
            Some(WriterInner::Entry {
                spool,
                core,
                path,
                autocommit,
            }) => {
                let spool = spool.finish()?;
                core.stage_spool(&path, spool, None, None)?;
                if autocommit {
                    core.commit_all()?;
                }
                Ok(())
            }
            None => Err(Error::State("writer already closed".into())),
        }
    }
}

impl Write for ArcWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Some(WriterInner::Physical(file)) => file.write(buf),
            Some(WriterInner::Entry { spool, .. }) => spool.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer already closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Some(WriterInner::Physical(file)) => file.flush(),
            Some(WriterInner::Entry { spool, .. }) => spool.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ArcWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Some(WriterInner::Entry { path, .. }) = &self.inner {
                warn!(path, "entry writer dropped without close; staged bytes discarded");
            }
        }
    }
}
