//! Archive entry index with staged overlays.
//!
//! An [`EntryStore`] is the in-memory view of one archive: every member the
//! handler found at load time, plus staged mutations (new or replaced
//! contents, deletions) that have not been committed yet. Insertion order is
//! preserved so rebuilds are deterministic.
//!
//! Invariants maintained here:
//!
//! - no two live entries share a normalized name;
//! - every proper prefix of a live entry is either absent (an implicit
//!   directory) or an explicit directory entry;
//! - tombstones only exist between staging and commit, and are invisible to
//!   all read operations.

use std::collections::{HashMap, HashSet};

use crate::spool::Spool;
use crate::{EntryPath, Error, Result, Timestamp};

/// The kind of an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link, carried through opaquely and never followed.
    Symlink {
        /// The link target exactly as stored in the archive.
        target: String,
    },
}

impl EntryKind {
    /// Returns `true` for regular files.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Dir)
    }

    /// Returns `true` for symbolic links.
    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink { .. })
    }
}

/// Where an entry's bytes come from.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Bytes live in the original archive stream.
    Original {
        /// Format-specific offset (ZIP: local header; TAR: payload start).
        offset: u64,
        /// Stored (possibly compressed) byte count.
        compressed_size: u64,
        /// Format-specific storage method (ZIP: 0 store / 8 deflate).
        method: u16,
        /// Stored CRC-32, verified at end of entry reads when present.
        crc: Option<u32>,
    },
    /// Staged bytes not yet committed.
    Overlay(Spool),
    /// A tombstone: the name existed in the original and is deleted.
    Deleted,
}

/// One member of an archive.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Normalized entry path.
    pub path: EntryPath,
    /// File, directory, or opaque symlink.
    pub kind: EntryKind,
    /// Logical (uncompressed) size in bytes.
    pub size: u64,
    /// Modification time, whole seconds.
    pub modified: Timestamp,
    /// Unix permission bits, when the format carries them.
    pub mode: Option<u32>,
    /// Where the bytes come from.
    pub source: ContentSource,
}

impl Entry {
    /// Creates a staged file entry backed by overlay bytes.
    pub fn overlay_file(path: EntryPath, spool: Spool, modified: Timestamp) -> Self {
        Self {
            path,
            kind: EntryKind::File,
            size: spool.len(),
            modified,
            mode: None,
            source: ContentSource::Overlay(spool),
        }
    }

    /// Creates a staged directory entry.
    pub fn dir(path: EntryPath, modified: Timestamp) -> Self {
        Self {
            path,
            kind: EntryKind::Dir,
            size: 0,
            modified,
            mode: None,
            source: ContentSource::Overlay(Spool::empty()),
        }
    }

    /// Returns `true` if this entry is a tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self.source, ContentSource::Deleted)
    }
}

/// Insertion-ordered index of an archive's entries.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    /// Names present when the archive was loaded; deleting one of these
    /// leaves a tombstone instead of dropping the slot.
    original: HashSet<String>,
}

impl EntryStore {
    /// Creates an empty store (a freshly created archive).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from entries parsed out of an archive.
    ///
    /// Later duplicates replace earlier ones, matching the
    /// last-one-wins reading of sequential formats.
    pub fn from_loaded(entries: Vec<Entry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            let name = entry.path.as_str().to_string();
            match store.index.get(&name) {
                Some(&idx) => store.entries[idx] = entry,
                None => {
                    store.index.insert(name.clone(), store.entries.len());
                    store.entries.push(entry);
                }
            }
            store.original.insert(name);
        }
        store
    }

    /// Returns the live entry with this name, if any.
    ///
    /// Tombstoned names are absent.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.index
            .get(name)
            .map(|&idx| &self.entries[idx])
            .filter(|e| !e.is_deleted())
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.iter_live().count()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.iter_live().next().is_none()
    }

    /// Inserts or replaces an entry, clearing any tombstone on its name.
    ///
    /// # Errors
    ///
    /// - [`Error::NotADirectory`] if a proper prefix of the path is a live
    ///   non-directory entry.
    /// - [`Error::IsADirectory`] if a non-directory entry would replace a
    ///   live directory or a name with live descendants.
    /// - [`Error::AlreadyExists`] if a directory entry would replace a live
    ///   non-directory entry.
    pub fn put(&mut self, entry: Entry) -> Result<()> {
        self.check_prefixes(&entry.path)?;

        let name = entry.path.as_str();
        if let Some(existing) = self.get(name) {
            match (existing.kind.is_dir(), entry.kind.is_dir()) {
                (true, false) => {
                    return Err(Error::IsADirectory { path: name.into() });
                }
                (false, true) => {
                    return Err(Error::AlreadyExists { path: name.into() });
                }
                _ => {}
            }
        }
        if !entry.kind.is_dir() && self.has_live_descendants(name) {
            return Err(Error::IsADirectory { path: name.into() });
        }

        match self.index.get(name) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Deletes a live entry by name.
    ///
    /// Names loaded from the original archive become tombstones; staged-only
    /// names are dropped outright.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no live entry has this name.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let Some(&idx) = self.index.get(name) else {
            return Err(Error::not_found(name));
        };
        if self.entries[idx].is_deleted() {
            return Err(Error::not_found(name));
        }

        if self.original.contains(name) {
            self.entries[idx].source = ContentSource::Deleted;
        } else {
            self.entries.remove(idx);
            self.reindex();
        }
        Ok(())
    }

    /// Deletes every live entry at or beneath `dir`.
    pub fn delete_subtree(&mut self, dir: &str) -> Result<()> {
        let names: Vec<String> = self
            .iter_live()
            .filter(|e| e.path.is_inside(dir))
            .map(|e| e.path.as_str().to_string())
            .collect();
        for name in names {
            self.delete(&name)?;
        }
        Ok(())
    }

    /// Iterates live entries in insertion order.
    pub fn iter_live(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_deleted())
    }

    /// Returns the immediate child names of `dir` (empty string = root).
    ///
    /// Includes directories implied by deeper entries; excludes tombstones;
    /// first-appearance order, no duplicates.
    pub fn children(&self, dir: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for entry in self.iter_live() {
            if let Some((child, _)) = entry.path.child_of(dir) {
                if seen.insert(child.to_string()) {
                    names.push(child.to_string());
                }
            }
        }
        names
    }

    /// Returns the kind at `name`, counting implicit directories.
    ///
    /// `None` means nothing exists there; `Some(Dir)` may be an explicit
    /// entry or a directory implied by deeper entries.
    pub fn kind_of(&self, name: &str) -> Option<EntryKind> {
        if let Some(entry) = self.get(name) {
            return Some(entry.kind.clone());
        }
        if self.has_live_descendants(name) {
            return Some(EntryKind::Dir);
        }
        None
    }

    /// Returns `true` if any live entry lies strictly beneath `name`.
    pub fn has_live_descendants(&self, name: &str) -> bool {
        self.iter_live()
            .any(|e| e.path.as_str() != name && e.path.is_inside(name))
    }

    /// Returns `true` if `name` was present when the archive was loaded.
    pub(crate) fn is_original(&self, name: &str) -> bool {
        self.original.contains(name)
    }

    fn check_prefixes(&self, path: &EntryPath) -> Result<()> {
        let mut prefix = String::new();
        let segments: Vec<&str> = path.components().collect();
        for segment in &segments[..segments.len() - 1] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if let Some(existing) = self.get(&prefix) {
                if !existing.kind.is_dir() {
                    return Err(Error::NotADirectory {
                        path: prefix.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.path.as_str().to_string(), idx);
        }
    }
}
