//! Open archive handles and the session mount tree.
//!
//! An [`ArchiveHandle`] is one open archive: its raw backing bytes (an OS
//! file for the outermost archive, a spool for nested ones), the codec
//! chain between raw and plain container bytes, the parsed entry store,
//! and a dirty flag. Handles hold no persistent OS file handle; every
//! access opens a fresh reader through the backing supplier.
//!
//! Within a session, open handles form a [`Mount`] tree keyed by the entry
//! path of each nested archive in its parent, so sibling nested archives
//! share their parent handle and dirtiness can propagate rootward.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::codec::{decode_chain, ChainEncoder, Codec};
use crate::handler::registry::Registration;
use crate::handler::{entry_reader, ArchiveHandler, SourceFn};
use crate::spool::{copy_chunked, ReadSeek, Spool, SpoolWriter};
use crate::store::{Entry, EntryStore};
use crate::{Config, Error, Result};

/// Where an archive's raw (encoded) bytes currently live.
pub(crate) enum RawBacking {
    /// An OS file, re-opened per access.
    File(PathBuf),
    /// Bytes extracted from the enclosing archive.
    Spool(Spool),
    /// A freshly created archive with no bytes yet.
    Empty,
}

/// One open archive.
pub(crate) struct ArchiveHandle {
    pub(crate) file_name: String,
    pub(crate) registration: Registration,
    pub(crate) handler: Box<dyn ArchiveHandler>,
    raw: RawBacking,
    /// Codec-decoded plain bytes, cached once per handle.
    plain: Option<Spool>,
    pub(crate) store: EntryStore,
    pub(crate) dirty: bool,
    config: Config,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("file_name", &self.file_name)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl ArchiveHandle {
    /// Opens an existing archive over its raw backing.
    pub(crate) fn open(
        file_name: &str,
        registration: Registration,
        raw: RawBacking,
        config: &Config,
    ) -> Result<Self> {
        let handler = registration.make_handler(file_name, config);
        let mut handle = Self {
            file_name: file_name.to_string(),
            registration,
            handler,
            raw,
            plain: None,
            store: EntryStore::new(),
            dirty: false,
            config: config.clone(),
        };

        if !handle.registration.codecs().is_empty() {
            handle.plain = Some(handle.decode_to_spool()?);
        }
        let store = {
            let source = handle.plain_source();
            handle.handler.load(&source as &SourceFn<'_>)?
        };
        handle.store = store;
        debug!(archive = %handle.file_name, "opened archive handle");
        Ok(handle)
    }

    /// Creates a handle for a new, empty archive. The handle starts dirty
    /// so commit materializes a valid empty container.
    pub(crate) fn create_empty(
        file_name: &str,
        registration: Registration,
        config: &Config,
    ) -> Self {
        let handler = registration.make_handler(file_name, config);
        debug!(archive = %file_name, "staged new empty archive");
        Self {
            file_name: file_name.to_string(),
            registration,
            handler,
            raw: RawBacking::Empty,
            plain: None,
            store: EntryStore::new(),
            dirty: true,
            config: config.clone(),
        }
    }

    fn raw_reader(&self) -> Result<Box<dyn ReadSeek>> {
        match &self.raw {
            RawBacking::File(path) => {
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            RawBacking::Spool(spool) => spool.reader(),
            RawBacking::Empty => Ok(Box::new(Cursor::new(Vec::new()))),
        }
    }

    fn decode_to_spool(&self) -> Result<Spool> {
        let mut writer = SpoolWriter::new(&self.config);
        let raw: Box<dyn Read> = Box::new(self.raw_reader()?);
        let mut decoder = decode_chain(self.registration.codecs(), raw);
        let chunk = self.codec_chunk_size();
        copy_chunked(&mut *decoder, &mut writer, chunk).map_err(|e| match e {
            Error::Io(io_err) => Error::format(
                &self.file_name,
                format!("compressed stream is corrupt: {}", io_err),
            ),
            other => other,
        })?;
        writer.finish()
    }

    fn codec_chunk_size(&self) -> usize {
        match self.registration.codecs().first() {
            Some(Codec::Gzip) => self.config.gzip_buffer_size,
            #[cfg(feature = "bzip2")]
            Some(Codec::Bzip2) => self.config.bzip2_buffer_size,
            #[cfg(feature = "xz")]
            Some(Codec::Xz) => self.config.xz_buffer_size,
            None => self.config.gzip_buffer_size,
        }
    }

    /// Returns a supplier of fresh readers over the archive's plain
    /// container bytes.
    pub(crate) fn plain_source(&self) -> impl Fn() -> Result<Box<dyn ReadSeek>> + '_ {
        move || match &self.plain {
            Some(spool) => spool.reader(),
            None => self.raw_reader(),
        }
    }

    /// Opens a reader over one entry's current bytes.
    pub(crate) fn open_entry_reader(&self, entry: &Entry) -> Result<Box<dyn Read>> {
        let source = self.plain_source();
        entry_reader(self.handler.as_ref(), Some(&source as &SourceFn<'_>), entry)
    }

    /// Serializes the live entries as plain container bytes.
    pub(crate) fn serialize_plain(&self, sink: &mut dyn Write) -> Result<()> {
        let source = self.plain_source();
        self.handler
            .serialize(Some(&source as &SourceFn<'_>), &self.store, sink)
    }

    /// Serializes and re-encodes through the codec chain into `sink`.
    pub(crate) fn serialize_encoded(&self, sink: &mut dyn Write) -> Result<()> {
        let mut chain = ChainEncoder::new(self.registration.codecs(), sink);
        self.serialize_plain(&mut chain)?;
        chain.finish()?;
        Ok(())
    }

    /// Describes the plain backing for stream re-opening, free of borrows.
    pub(crate) fn backing_descriptor(&self) -> BackingDescriptor {
        if let Some(spool) = &self.plain {
            return BackingDescriptor::Spool(spool.clone());
        }
        match &self.raw {
            RawBacking::File(path) => BackingDescriptor::File(path.clone()),
            RawBacking::Spool(spool) => BackingDescriptor::Spool(spool.clone()),
            RawBacking::Empty => BackingDescriptor::Spool(Spool::empty()),
        }
    }
}

/// An owned, borrow-free description of a handle's plain backing, used by
/// streams that outlive the resolution that produced them.
#[derive(Clone)]
pub(crate) enum BackingDescriptor {
    File(PathBuf),
    Spool(Spool),
}

impl BackingDescriptor {
    pub(crate) fn open(&self) -> Result<Box<dyn ReadSeek>> {
        match self {
            BackingDescriptor::File(path) => {
                let file = File::open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            BackingDescriptor::Spool(spool) => spool.reader(),
        }
    }
}

/// A node in the session mount tree: one open archive plus any nested
/// archives opened beneath it, keyed by their entry path in this store.
pub(crate) struct Mount {
    pub(crate) handle: ArchiveHandle,
    pub(crate) children: HashMap<String, Mount>,
}

impl Mount {
    pub(crate) fn new(handle: ArchiveHandle) -> Self {
        Self {
            handle,
            children: HashMap::new(),
        }
    }

    /// Navigates to the node at the end of `chain`.
    pub(crate) fn node_mut(&mut self, chain: &[String]) -> Option<&mut Mount> {
        let mut node = self;
        for key in chain {
            node = node.children.get_mut(key)?;
        }
        Some(node)
    }

    /// Navigates immutably to the node at the end of `chain`.
    pub(crate) fn node(&self, chain: &[String]) -> Option<&Mount> {
        let mut node = self;
        for key in chain {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    /// Marks every node along `chain` (including the root and the final
    /// node) dirty.
    pub(crate) fn mark_dirty(&mut self, chain: &[String]) {
        let mut node = self;
        node.handle.dirty = true;
        for key in chain {
            match node.children.get_mut(key) {
                Some(child) => node = child,
                None => return,
            }
            node.handle.dirty = true;
        }
    }

    /// Returns `true` if this node or any descendant is dirty.
    pub(crate) fn subtree_dirty(&self) -> bool {
        self.handle.dirty || self.children.values().any(Mount::subtree_dirty)
    }
}
