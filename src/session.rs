//! Sessions and transactions: scoped deferral of commits.
//!
//! A [`Session`] caches resolved archive handles in a mount tree, stages
//! every mutation as an overlay, and rebuilds once on [`commit`](Session::commit).
//! Reads within the session see staged writes. Dropping a session without
//! committing discards the overlays and removes any spill temp files.
//!
//! A [`Transaction`] is a session whose commit replaces its outer files
//! all-or-nothing: every target's replacement bytes are fully written to
//! sibling temp files before the first rename, and a failure before the
//! rename phase leaves every target untouched.
//!
//! The [`Core`] type carries the operation implementations shared by
//! sessions, transactions, and the one-shot facade methods on
//! [`ArcFs`](crate::ArcFs).

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::fs::{FileInfo, FileKind, Walk};
use crate::handle::Mount;
use crate::handler::registry::{HandlerRegistry, Registration};
use crate::rebuild;
use crate::resolve::{split_composite, ResolveMode, Resolver, Target};
use crate::spool::{Spool, SpoolWriter};
use crate::store::{ContentSource, Entry, EntryKind};
use crate::stream::{ArcReader, ArcWriter, EntryOpener};
use crate::{Config, EntryPath, Error, Result, Timestamp};

/// Mutable state shared by a session and the streams it hands out.
pub(crate) struct SessionState {
    pub(crate) mounts: HashMap<PathBuf, Mount>,
    pub(crate) closed: bool,
}

/// The shared operation core.
///
/// Cloning shares the underlying state; the facade creates a fresh core
/// per operation, sessions keep one for their whole scope.
#[derive(Clone)]
pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) registry: HandlerRegistry,
    pub(crate) state: Rc<RefCell<SessionState>>,
}

fn node_mut<'a>(
    mounts: &'a mut HashMap<PathBuf, Mount>,
    outer: &Path,
    chain: &[String],
) -> Result<&'a mut Mount> {
    mounts
        .get_mut(outer)
        .and_then(|mount| mount.node_mut(chain))
        .ok_or_else(|| Error::State("mount tree out of sync with resolution".into()))
}

fn phys_metadata(path: &Path, original: &str) -> Result<fs::Metadata> {
    fs::metadata(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::not_found(original)
        } else {
            e.into()
        }
    })
}

#[cfg(unix)]
fn phys_mode(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn phys_mode(_meta: &fs::Metadata) -> Option<u32> {
    None
}

impl Core {
    pub(crate) fn new(config: Config, registry: HandlerRegistry) -> Self {
        Self {
            config,
            registry,
            state: Rc::new(RefCell::new(SessionState {
                mounts: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Rewrites paths ending at a single-entry container to address its
    /// sole entry, making bare compression streams read/write transparent.
    fn effective_path<'p>(&self, path: &'p str) -> Result<Cow<'p, str>> {
        let (_, segments) = split_composite(path)?;
        if let Some(last) = segments.last() {
            if let Some(registration) = self.registry.lookup(last) {
                let handler = registration.make_handler(last, &self.config);
                if let Some(inner) = handler.sole_entry() {
                    return Ok(Cow::Owned(format!("{}/{}", path.trim_end_matches('/'), inner)));
                }
            }
        }
        Ok(Cow::Borrowed(path))
    }

    fn guard(state: &SessionState) -> Result<()> {
        if state.closed {
            return Err(Error::State("session is closed".into()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub(crate) fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.open_read(path)?.read_all()
    }

    pub(crate) fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("'{}' is not valid UTF-8: {}", path, e),
            ))
        })
    }

    pub(crate) fn open_read(&self, path: &str) -> Result<ArcReader> {
        let path = self.effective_path(path)?;
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(&path, ResolveMode::Read, false)?;

        match target {
            Target::Physical(p) => {
                let meta = phys_metadata(&p, &path)?;
                if meta.is_dir() {
                    return Err(Error::IsADirectory {
                        path: path.into_owned(),
                    });
                }
                ArcReader::from_file(File::open(&p)?)
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                let Some(entry) = node.handle.store.get(ep.as_str()) else {
                    if node.handle.store.kind_of(ep.as_str()).is_some() {
                        return Err(Error::IsADirectory {
                            path: path.into_owned(),
                        });
                    }
                    return Err(Error::not_found(path));
                };
                if entry.kind.is_dir() {
                    return Err(Error::IsADirectory {
                        path: path.into_owned(),
                    });
                }
                let opener = match &entry.source {
                    ContentSource::Overlay(spool) => EntryOpener::Spool(spool.clone()),
                    _ => EntryOpener::Original {
                        backing: node.handle.backing_descriptor(),
                        registration: node.handle.registration.clone(),
                        file_name: node.handle.file_name.clone(),
                        config: self.config.clone(),
                        entry: entry.clone(),
                    },
                };
                ArcReader::from_entry(opener, entry.size)
            }
            Target::Entry { entry: None, .. } => Err(Error::IsADirectory {
                path: path.into_owned(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub(crate) fn write_bytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut spool = SpoolWriter::new(&self.config);
        spool.write_all(data)?;
        self.stage_spool(path, spool.finish()?, None, None)
    }

    pub(crate) fn append_bytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = self.effective_path(path)?;
        // Physical appends stream straight to the file.
        if let Target::Physical(p) = self.peek_target(&path)? {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = OpenOptions::new().append(true).create(true).open(&p)?;
            file.write_all(data)?;
            return Ok(());
        }

        // Entry appends are read-modify-write through the staged overlay.
        let existing = match self.read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut spool = SpoolWriter::new(&self.config);
        spool.write_all(&existing)?;
        spool.write_all(data)?;
        self.stage_spool(&path, spool.finish()?, None, None)
    }

    /// Resolves in create mode without touching the target, to decide
    /// physical-vs-entry routing.
    fn peek_target(&self, path: &str) -> Result<Target> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Create, false)
    }

    /// Stages finished bytes at `path`: a direct file write for physical
    /// targets, an overlay entry plus dirty marks inside archives.
    pub(crate) fn stage_spool(
        &self,
        path: &str,
        spool: Spool,
        modified: Option<Timestamp>,
        mode: Option<u32>,
    ) -> Result<()> {
        let path = self.effective_path(path)?;
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(&path, ResolveMode::Create, false)?;

        match target {
            Target::Physical(p) => {
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let mut file = File::create(&p)?;
                io::copy(&mut spool.reader()?, &mut file)?;
                file.flush()?;
                drop(file);
                if let Some(ts) = modified {
                    if let Err(e) = File::options()
                        .write(true)
                        .open(&p)
                        .and_then(|f| f.set_modified(ts.as_system_time()))
                    {
                        warn!(path = %p.display(), error = %e, "could not preserve mtime");
                    }
                }
                Ok(())
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                let mut entry =
                    Entry::overlay_file(ep, spool, modified.unwrap_or_else(Timestamp::now));
                entry.mode = mode;
                node.handle.store.put(entry)?;
                if let Some(mount) = state.mounts.get_mut(&outer) {
                    mount.mark_dirty(&chain);
                }
                debug!(path = %path, "staged overlay write");
                Ok(())
            }
            Target::Entry { entry: None, .. } => Err(Error::IsADirectory {
                path: path.into_owned(),
            }),
        }
    }

    pub(crate) fn open_write(&self, path: &str, autocommit: bool) -> Result<ArcWriter> {
        let path = self.effective_path(path)?;
        if let Target::Physical(p) = self.peek_target(&path)? {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            return Ok(ArcWriter::physical(File::create(&p)?));
        }
        Ok(ArcWriter::entry(
            SpoolWriter::new(&self.config),
            self.clone(),
            path.into_owned(),
            autocommit,
        ))
    }

    pub(crate) fn open_append(&self, path: &str, autocommit: bool) -> Result<ArcWriter> {
        let path = self.effective_path(path)?;
        if let Target::Physical(p) = self.peek_target(&path)? {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().append(true).create(true).open(&p)?;
            return Ok(ArcWriter::physical(file));
        }

        let mut spool = SpoolWriter::new(&self.config);
        match self.read(&path) {
            Ok(existing) => spool.write_all(&existing)?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Ok(ArcWriter::entry(
            spool,
            self.clone(),
            path.into_owned(),
            autocommit,
        ))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub(crate) fn exists(&self, path: &str) -> bool {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return false;
        };
        if state.closed {
            return false;
        }
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, false);

        match target {
            Ok(Target::Physical(p)) => p.exists() || state.mounts.contains_key(&p),
            Ok(Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            }) => node_mut(&mut state.mounts, &outer, &chain)
                .map(|node| node.handle.store.kind_of(ep.as_str()).is_some())
                .unwrap_or(false),
            Ok(Target::Entry { entry: None, .. }) => true,
            Err(_) => false,
        }
    }

    pub(crate) fn info(&self, path: &str) -> Result<FileInfo> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, false)?;

        match target {
            Target::Physical(p) => {
                let meta = phys_metadata(&p, path)?;
                Ok(FileInfo {
                    size: meta.len(),
                    modified: meta
                        .modified()
                        .map(Timestamp::from_system_time)
                        .unwrap_or_default(),
                    kind: if meta.is_dir() {
                        FileKind::Dir
                    } else {
                        FileKind::File
                    },
                    mode: phys_mode(&meta),
                })
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                if let Some(entry) = node.handle.store.get(ep.as_str()) {
                    Ok(FileInfo {
                        size: entry.size,
                        modified: entry.modified,
                        kind: match &entry.kind {
                            EntryKind::File => FileKind::File,
                            EntryKind::Dir => FileKind::Dir,
                            EntryKind::Symlink { .. } => FileKind::Symlink,
                        },
                        mode: entry.mode,
                    })
                } else if node.handle.store.kind_of(ep.as_str()).is_some() {
                    // Implicit directory.
                    Ok(FileInfo {
                        size: 0,
                        modified: Timestamp::default(),
                        kind: FileKind::Dir,
                        mode: None,
                    })
                } else {
                    Err(Error::not_found(path))
                }
            }
            Target::Entry { entry: None, .. } => Ok(FileInfo {
                size: 0,
                modified: Timestamp::default(),
                kind: FileKind::Dir,
                mode: None,
            }),
        }
    }

    pub(crate) fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .list_children_kinds(path)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Lists immediate children with a directory flag, the shared
    /// implementation behind `list_dir` and `walk`.
    pub(crate) fn list_children_kinds(&self, path: &str) -> Result<Vec<(String, bool)>> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, true)?;

        match target {
            Target::Physical(p) => {
                let meta = phys_metadata(&p, path)?;
                if !meta.is_dir() {
                    return Err(Error::NotADirectory {
                        path: path.to_string(),
                    });
                }
                let mut children = Vec::new();
                for dirent in fs::read_dir(&p)? {
                    let dirent = dirent?;
                    let name = dirent.file_name().to_string_lossy().into_owned();
                    let is_dir = dirent.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    children.push((name, is_dir));
                }
                children.sort();
                Ok(children)
            }
            Target::Entry {
                outer,
                chain,
                entry,
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                let dir = match &entry {
                    None => "",
                    Some(ep) => match node.handle.store.kind_of(ep.as_str()) {
                        Some(EntryKind::Dir) => ep.as_str(),
                        Some(_) => {
                            return Err(Error::NotADirectory {
                                path: path.to_string(),
                            });
                        }
                        None => return Err(Error::not_found(path)),
                    },
                };
                let children = node
                    .handle
                    .store
                    .children(dir)
                    .into_iter()
                    .map(|name| {
                        let full = if dir.is_empty() {
                            name.clone()
                        } else {
                            format!("{}/{}", dir, name)
                        };
                        let is_dir = matches!(
                            node.handle.store.kind_of(&full),
                            Some(EntryKind::Dir)
                        );
                        (name, is_dir)
                    })
                    .collect();
                Ok(children)
            }
        }
    }

    pub(crate) fn walk(&self, path: &str) -> Walk {
        Walk::new(self.clone(), path)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub(crate) fn remove(&self, path: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, false)?;

        match target {
            Target::Physical(p) => {
                let meta = phys_metadata(&p, path)?;
                if meta.is_dir() {
                    return Err(Error::IsADirectory {
                        path: path.to_string(),
                    });
                }
                fs::remove_file(&p)?;
                Ok(())
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                match node.handle.store.kind_of(ep.as_str()) {
                    None => return Err(Error::not_found(path)),
                    Some(EntryKind::Dir) => {
                        return Err(Error::IsADirectory {
                            path: path.to_string(),
                        });
                    }
                    Some(_) => node.handle.store.delete(ep.as_str())?,
                }
                if let Some(mount) = state.mounts.get_mut(&outer) {
                    mount.mark_dirty(&chain);
                }
                debug!(path, "staged entry removal");
                Ok(())
            }
            Target::Entry { entry: None, .. } => Err(Error::IsADirectory {
                path: path.to_string(),
            }),
        }
    }

    pub(crate) fn mkdir(&self, path: &str, create_parents: bool) -> Result<()> {
        let mode = if create_parents {
            ResolveMode::Create
        } else {
            ResolveMode::Read
        };
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, mode, false)?;

        match target {
            Target::Physical(p) => {
                if p.exists() {
                    if create_parents && p.is_dir() {
                        return Ok(());
                    }
                    return Err(Error::AlreadyExists {
                        path: path.to_string(),
                    });
                }
                let result = if create_parents {
                    fs::create_dir_all(&p)
                } else {
                    fs::create_dir(&p)
                };
                result.map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => Error::not_found(path),
                    io::ErrorKind::AlreadyExists => Error::AlreadyExists {
                        path: path.to_string(),
                    },
                    _ => e.into(),
                })
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                match node.handle.store.kind_of(ep.as_str()) {
                    Some(EntryKind::Dir) => {
                        if create_parents {
                            return Ok(()); // idempotent with parents
                        }
                        return Err(Error::AlreadyExists {
                            path: path.to_string(),
                        });
                    }
                    Some(_) => {
                        return Err(Error::AlreadyExists {
                            path: path.to_string(),
                        });
                    }
                    None => {}
                }

                if create_parents {
                    let mut prefix = String::new();
                    for segment in ep.components() {
                        if !prefix.is_empty() {
                            prefix.push('/');
                        }
                        prefix.push_str(segment);
                        if node.handle.store.get(&prefix).is_none() {
                            node.handle
                                .store
                                .put(Entry::dir(EntryPath::new(&prefix)?, Timestamp::now()))?;
                        }
                    }
                } else {
                    if let Some(parent) = ep.parent() {
                        match node.handle.store.kind_of(parent.as_str()) {
                            Some(EntryKind::Dir) => {}
                            Some(_) => {
                                return Err(Error::NotADirectory {
                                    path: parent.as_str().to_string(),
                                });
                            }
                            None => return Err(Error::not_found(parent.as_str())),
                        }
                    }
                    node.handle.store.put(Entry::dir(ep, Timestamp::now()))?;
                }
                if let Some(mount) = state.mounts.get_mut(&outer) {
                    mount.mark_dirty(&chain);
                }
                Ok(())
            }
            Target::Entry { entry: None, .. } => {
                if create_parents {
                    Ok(())
                } else {
                    Err(Error::AlreadyExists {
                        path: path.to_string(),
                    })
                }
            }
        }
    }

    pub(crate) fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, false)?;

        match target {
            Target::Physical(p) => {
                let meta = phys_metadata(&p, path)?;
                if !meta.is_dir() {
                    return Err(Error::NotADirectory {
                        path: path.to_string(),
                    });
                }
                if recursive {
                    fs::remove_dir_all(&p)?;
                } else {
                    if fs::read_dir(&p)?.next().is_some() {
                        return Err(Error::DirectoryNotEmpty {
                            path: path.to_string(),
                        });
                    }
                    fs::remove_dir(&p)?;
                }
                Ok(())
            }
            Target::Entry {
                outer,
                chain,
                entry: Some(ep),
            } => {
                let node = node_mut(&mut state.mounts, &outer, &chain)?;
                match node.handle.store.kind_of(ep.as_str()) {
                    None => return Err(Error::not_found(path)),
                    Some(EntryKind::Dir) => {}
                    Some(_) => {
                        return Err(Error::NotADirectory {
                            path: path.to_string(),
                        });
                    }
                }
                let has_children = !node.handle.store.children(ep.as_str()).is_empty();
                if has_children && !recursive {
                    return Err(Error::DirectoryNotEmpty {
                        path: path.to_string(),
                    });
                }
                if recursive {
                    node.handle.store.delete_subtree(ep.as_str())?;
                } else {
                    // Empty directory; an explicit entry must exist.
                    node.handle.store.delete(ep.as_str())?;
                }
                if let Some(mount) = state.mounts.get_mut(&outer) {
                    mount.mark_dirty(&chain);
                }
                Ok(())
            }
            Target::Entry { entry: None, .. } => Err(Error::State(
                "cannot rmdir an archive root; remove the archive file instead".into(),
            )),
        }
    }

    pub(crate) fn create_archive(&self, path: &str, format: Option<&str>) -> Result<()> {
        if self.exists(path) {
            return Err(Error::AlreadyExists {
                path: path.to_string(),
            });
        }
        let override_reg: Option<Registration> = match format {
            Some(ext) => Some(self.registry.by_extension(ext).cloned().ok_or_else(|| {
                Error::UnsupportedFormat {
                    extension: ext.to_string(),
                }
            })?),
            None => None,
        };

        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let target = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve_with_format(path, ResolveMode::Create, true, override_reg.as_ref())?;

        match target {
            Target::Entry {
                outer,
                chain,
                entry: None,
            } => {
                if let Some(mount) = state.mounts.get_mut(&outer) {
                    mount.mark_dirty(&chain);
                }
                debug!(path, "staged empty archive");
                Ok(())
            }
            _ => Err(Error::UnsupportedFormat {
                extension: path.rsplit('/').next().unwrap_or(path).to_string(),
            }),
        }
    }

    pub(crate) fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let info = self.info(src)?;
        if info.kind == FileKind::Dir {
            return Err(Error::IsADirectory {
                path: src.to_string(),
            });
        }
        let mut reader = self.open_read(src)?;
        let mut spool = SpoolWriter::new(&self.config);
        io::copy(&mut reader, &mut spool)?;
        self.stage_spool(dst, spool.finish()?, Some(info.modified), info.mode)
    }

    pub(crate) fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.copy(src, dst)?;
        self.remove(src)
    }

    // ------------------------------------------------------------------
    // Commit and teardown
    // ------------------------------------------------------------------

    pub(crate) fn commit_all(&self) -> Result<()> {
        let mounts = {
            let mut state = self.state.borrow_mut();
            Self::guard(&state)?;
            state.closed = true;
            std::mem::take(&mut state.mounts)
        };
        rebuild::commit_all(&self.config, mounts)
    }

    pub(crate) fn commit_two_phase(&self) -> Result<()> {
        let mounts = {
            let mut state = self.state.borrow_mut();
            Self::guard(&state)?;
            state.closed = true;
            std::mem::take(&mut state.mounts)
        };
        rebuild::commit_all_two_phase(&self.config, mounts)
    }

    pub(crate) fn discard(&self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.mounts.clear();
    }

    /// Warms the mount cache for a declared transaction target. Missing
    /// targets are fine (they may be created inside the transaction).
    fn prefetch(&self, path: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        Self::guard(&state)?;
        let state = &mut *state;
        let result = Resolver {
            config: &self.config,
            registry: &self.registry,
            mounts: &mut state.mounts,
        }
        .resolve(path, ResolveMode::Read, true);
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A scoped batch of operations committed (or discarded) together.
///
/// Operations mirror the [`ArcFs`](crate::ArcFs) facade but defer every
/// rebuild until [`commit`](Session::commit). Reads observe staged writes.
/// Dropping the session without committing discards all staged changes.
///
/// # Example
///
/// ```rust,no_run
/// use arcfs::ArcFs;
///
/// # fn main() -> arcfs::Result<()> {
/// let fs = ArcFs::new();
/// let session = fs.batch_session();
/// for i in 0..5 {
///     session.write(&format!("bundle.zip/file{}.txt", i), b"data")?;
/// }
/// session.commit()?; // one rebuild, not five
/// # Ok(())
/// # }
/// ```
pub struct Session {
    core: Core,
    finished: bool,
}

impl Session {
    pub(crate) fn new(config: Config, registry: HandlerRegistry) -> Self {
        Self {
            core: Core::new(config, registry),
            finished: false,
        }
    }

    /// Reads an entire file.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.core.read(path)
    }

    /// Reads an entire file as UTF-8 text.
    pub fn read_to_string(&self, path: &str) -> Result<String> {
        self.core.read_to_string(path)
    }

    /// Stages a full overwrite of `path`.
    pub fn write(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        self.core.write_bytes(path, data.as_ref())
    }

    /// Stages an append to `path`, creating it if absent.
    pub fn append(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        self.core.append_bytes(path, data.as_ref())
    }

    /// Opens a read stream.
    pub fn open_read(&self, path: &str) -> Result<ArcReader> {
        self.core.open_read(path)
    }

    /// Opens a write stream; closing it stages the bytes in this session.
    pub fn open_write(&self, path: &str) -> Result<ArcWriter> {
        self.core.open_write(path, false)
    }

    /// Opens an append stream; closing it stages the bytes in this session.
    pub fn open_append(&self, path: &str) -> Result<ArcWriter> {
        self.core.open_append(path, false)
    }

    /// Returns whether `path` exists, observing staged writes.
    pub fn exists(&self, path: &str) -> bool {
        self.core.exists(path)
    }

    /// Stages removal of a file entry.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.core.remove(path)
    }

    /// Copies a file, preserving its modification time on a best-effort
    /// basis.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.core.copy(src, dst)
    }

    /// Moves a file (copy then remove).
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.core.rename(src, dst)
    }

    /// Stages a directory entry.
    pub fn mkdir(&self, path: &str, create_parents: bool) -> Result<()> {
        self.core.mkdir(path, create_parents)
    }

    /// Stages removal of a directory.
    pub fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        self.core.rmdir(path, recursive)
    }

    /// Lists the immediate children of a directory or archive.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.core.list_dir(path)
    }

    /// Walks a tree lazily, yielding `(dir, subdirs, files)`.
    pub fn walk(&self, path: &str) -> Walk {
        self.core.walk(path)
    }

    /// Returns size, mtime, kind, and permissions for a path.
    pub fn info(&self, path: &str) -> Result<FileInfo> {
        self.core.info(path)
    }

    /// Stages a new empty archive at `path`.
    pub fn create_archive(&self, path: &str, format: Option<&str>) -> Result<()> {
        self.core.create_archive(path, format)
    }

    /// Commits every staged change, rebuilding each dirty archive once.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.core.commit_all()
    }

    /// Discards every staged change.
    pub fn discard(mut self) {
        self.finished = true;
        self.core.discard();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finished {
            debug!("session dropped without commit; discarding staged changes");
            self.core.discard();
        }
    }
}

/// A session whose commit replaces its outer files all-or-nothing.
///
/// Rebuilds run in two phases: every target's replacement is fully
/// serialized to a sibling temp file, then all targets are renamed. A
/// failure before the rename phase leaves every original untouched.
/// Cross-file atomicity is best-effort beyond that: a crash mid-rename
/// may leave some files new and some old, never torn.
pub struct Transaction {
    core: Core,
    finished: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        config: Config,
        registry: HandlerRegistry,
        paths: &[&str],
    ) -> Result<Self> {
        let core = Core::new(config, registry);
        for path in paths {
            core.prefetch(path)?;
        }
        Ok(Self {
            core,
            finished: false,
        })
    }

    /// Reads an entire file.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.core.read(path)
    }

    /// Reads an entire file as UTF-8 text.
    pub fn read_to_string(&self, path: &str) -> Result<String> {
        self.core.read_to_string(path)
    }

    /// Stages a full overwrite of `path`.
    pub fn write(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        self.core.write_bytes(path, data.as_ref())
    }

    /// Stages an append to `path`, creating it if absent.
    pub fn append(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        self.core.append_bytes(path, data.as_ref())
    }

    /// Returns whether `path` exists, observing staged writes.
    pub fn exists(&self, path: &str) -> bool {
        self.core.exists(path)
    }

    /// Stages removal of a file entry.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.core.remove(path)
    }

    /// Copies a file between composite paths.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.core.copy(src, dst)
    }

    /// Stages a directory entry.
    pub fn mkdir(&self, path: &str, create_parents: bool) -> Result<()> {
        self.core.mkdir(path, create_parents)
    }

    /// Lists the immediate children of a directory or archive.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.core.list_dir(path)
    }

    /// Stages a new empty archive at `path`.
    pub fn create_archive(&self, path: &str, format: Option<&str>) -> Result<()> {
        self.core.create_archive(path, format)
    }

    /// Commits all staged changes with two-phase replacement.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.core.commit_two_phase()
    }

    /// Discards every staged change, leaving all targets untouched.
    pub fn discard(mut self) {
        self.finished = true;
        self.core.discard();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!("transaction dropped without commit; discarding staged changes");
            self.core.discard();
        }
    }
}
