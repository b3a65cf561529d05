//! Archive format handlers.
//!
//! A handler implements one container format over a *backing stream
//! supplier*: a closure yielding fresh readable streams over the archive's
//! current plain bytes (codec chains are peeled off before a handler ever
//! sees the data). Handlers are stateless beyond their construction
//! parameters, so they can be re-created cheaply from their
//! [`Registration`](registry::Registration).

pub mod registry;
pub mod single;
pub mod tar;
pub mod zip;

use std::io::{self, Read, Write};

use crate::spool::ReadSeek;
use crate::store::{ContentSource, Entry, EntryStore};
use crate::{Error, Result};

/// A backing stream supplier: yields a fresh reader over the archive's
/// current plain bytes on every call.
pub type SourceFn<'a> = dyn Fn() -> Result<Box<dyn ReadSeek>> + 'a;

/// What a format implementation can and cannot do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Entries can be opened at arbitrary positions without a full decode
    /// (ZIP: yes; TAR: yes once offsets are indexed; codec-single: no).
    pub random_read: bool,
    /// The format supports appending without a rebuild (none of ours do).
    pub append_in_place: bool,
}

/// A uniform read/enumerate/serialize contract over container formats.
pub trait ArchiveHandler {
    /// Short format name for diagnostics (`"zip"`, `"tar"`, ...).
    fn format_name(&self) -> &'static str;

    /// Reports this format's capabilities.
    fn capabilities(&self) -> Capabilities;

    /// For single-entry containers, the name of the sole synthetic entry.
    ///
    /// Formats with real member tables return `None` (the default). The
    /// facade uses this to read and write bare compression streams
    /// transparently: `read("note.txt.gz")` addresses the decoded entry,
    /// not the raw stream.
    fn sole_entry(&self) -> Option<&str> {
        None
    }

    /// Parses the archive's member table from a fresh backing stream.
    ///
    /// Content sources in the returned store reference offsets in the
    /// backing stream; no member bytes are loaded.
    fn load(&self, source: &SourceFn<'_>) -> Result<EntryStore>;

    /// Opens a member for reading from its original location.
    ///
    /// Only meaningful for entries with a
    /// [`ContentSource::Original`] source; overlay entries are
    /// read from their spool by [`entry_reader`].
    fn open_entry(&self, source: &SourceFn<'_>, entry: &Entry) -> Result<Box<dyn Read>>;

    /// Writes a fresh archive containing the store's live entries, in order.
    ///
    /// `source` supplies the *current* backing stream for entries whose
    /// bytes still live in the original archive; `None` is valid only for
    /// stores without such entries (freshly created archives).
    fn serialize(
        &self,
        source: Option<&SourceFn<'_>>,
        store: &EntryStore,
        sink: &mut dyn Write,
    ) -> Result<()>;
}

/// Opens a reader over an entry's current bytes, wherever they live.
pub fn entry_reader(
    handler: &dyn ArchiveHandler,
    source: Option<&SourceFn<'_>>,
    entry: &Entry,
) -> Result<Box<dyn Read>> {
    match &entry.source {
        ContentSource::Overlay(spool) => Ok(Box::new(spool.reader()?)),
        ContentSource::Original { .. } => {
            let source = source.ok_or_else(|| {
                Error::State(format!(
                    "entry '{}' references original bytes but the archive has no backing stream",
                    entry.path
                ))
            })?;
            handler.open_entry(source, entry)
        }
        ContentSource::Deleted => Err(Error::State(format!(
            "attempted to read tombstoned entry '{}'",
            entry.path
        ))),
    }
}

/// A `Write` adapter that counts bytes, used by serializers that need to
/// record member offsets without seeking.
pub(crate) struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl<'a> CountingWriter<'a> {
    pub(crate) fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, written: 0 }
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
