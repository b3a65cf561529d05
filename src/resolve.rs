//! Composite path resolution.
//!
//! A composite path crosses archive boundaries: `dir/outer.zip/inner.tar.gz/a.txt`
//! names a file inside a tar.gz inside a zip inside an OS directory. The
//! resolver walks the physical prefix first, then descends through nested
//! archives, materializing interior archive bytes into spools and opening
//! handles on demand. Opened handles land in the session's mount tree so
//! repeated operations amortize load cost.
//!
//! Classification rules: a segment is an archive boundary only when its
//! name matches a registered format *and* it resolves to a file (a
//! directory named `backups.zip` is a directory). In create mode, missing
//! interior archives are synthesized as empty, staged containers. The
//! final segment of a path is entered as an archive only for
//! directory-flavored operations (`enter_final`).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::handle::{ArchiveHandle, Mount, RawBacking};
use crate::handler::registry::{HandlerRegistry, Registration};
use crate::spool::{Spool, SpoolWriter};
use crate::store::{ContentSource, Entry, EntryKind};
use crate::{Config, EntryPath, Error, Result, Timestamp};

/// How a path is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolveMode {
    /// Everything along the path must already exist.
    Read,
    /// Missing interior archives and directories are synthesized.
    Create,
}

/// The outcome of resolution.
#[derive(Debug)]
pub(crate) enum Target {
    /// The path never crosses an archive boundary.
    Physical(PathBuf),
    /// The path lands inside an open archive.
    Entry {
        /// Mount-map key of the outermost archive.
        outer: PathBuf,
        /// Entry paths of the nested archives descended through.
        chain: Vec<String>,
        /// Remaining path within the innermost archive; `None` means the
        /// archive root itself.
        entry: Option<EntryPath>,
    },
}

/// Splits a composite path into normalized segments.
///
/// Returns the absolute flag and the segment list. `..` and NUL are
/// rejected; empty and `.` segments are dropped.
pub(crate) fn split_composite(path: &str) -> Result<(bool, Vec<String>)> {
    if path.contains('\0') {
        return Err(Error::InvalidPath("contains NUL byte".into()));
    }
    let converted = path.replace('\\', "/");
    let absolute = converted.starts_with('/');
    let mut segments = Vec::new();
    for segment in converted.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(Error::InvalidPath(
                "'..' segment not allowed (path traversal)".into(),
            ));
        }
        segments.push(segment.to_string());
    }
    Ok((absolute, segments))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Resolves composite paths against a session's mount tree.
pub(crate) struct Resolver<'a> {
    pub(crate) config: &'a Config,
    pub(crate) registry: &'a HandlerRegistry,
    pub(crate) mounts: &'a mut HashMap<PathBuf, Mount>,
}

impl Resolver<'_> {
    /// Resolves `path`, entering a final archive segment only when
    /// `enter_final` is set.
    pub(crate) fn resolve(
        &mut self,
        path: &str,
        mode: ResolveMode,
        enter_final: bool,
    ) -> Result<Target> {
        self.resolve_with_format(path, mode, enter_final, None)
    }

    /// Like [`resolve`](Self::resolve), with an explicit format override
    /// for the final segment (used by `create_archive` with a `type`
    /// argument, where the file name alone need not imply a format).
    pub(crate) fn resolve_with_format(
        &mut self,
        path: &str,
        mode: ResolveMode,
        enter_final: bool,
        final_format: Option<&Registration>,
    ) -> Result<Target> {
        let (absolute, segments) = split_composite(path)?;
        if segments.is_empty() {
            if absolute {
                return Ok(Target::Physical(PathBuf::from("/")));
            }
            return Err(Error::InvalidPath("empty path".into()));
        }
        trace!(path, ?mode, enter_final, "resolving composite path");

        let (idx, walk, create_new) =
            self.find_outer_boundary(path, &segments, absolute, mode, enter_final, final_format)?;
        let outer = match walk {
            OuterWalk::Physical(p) => return Ok(Target::Physical(p)),
            OuterWalk::Boundary(p) => p,
        };

        self.ensure_outer_mount(&segments, idx, &outer, create_new, final_format)?;
        self.descend(path, &segments, idx, outer, mode, enter_final, final_format)
    }

    /// Walks the physical prefix, returning either a final physical target
    /// or the index and path of the outermost archive boundary. The bool
    /// flags a boundary that must be created rather than opened.
    #[allow(clippy::type_complexity)]
    fn find_outer_boundary(
        &mut self,
        path: &str,
        segments: &[String],
        absolute: bool,
        mode: ResolveMode,
        enter_final: bool,
        final_format: Option<&Registration>,
    ) -> Result<(usize, OuterWalk, bool)> {
        let mut phys = if absolute {
            PathBuf::from("/")
        } else {
            PathBuf::new()
        };

        for (i, segment) in segments.iter().enumerate() {
            let candidate = phys.join(segment);
            let is_last = i + 1 == segments.len();
            let descend_ok = !is_last || enter_final;
            let archive_name = self.registry.is_archive_name(segment)
                || (is_last && final_format.is_some());

            // A mount staged earlier in the session counts as an existing
            // archive even before its first commit reaches the disk.
            if descend_ok && self.mounts.contains_key(&candidate) {
                return Ok((i, OuterWalk::Boundary(candidate), false));
            }

            match fs::metadata(&candidate) {
                Ok(meta) if meta.is_dir() => {
                    phys = candidate;
                }
                Ok(meta) if meta.is_file() => {
                    if descend_ok && archive_name {
                        return Ok((i, OuterWalk::Boundary(candidate), false));
                    }
                    if is_last {
                        return Ok((i, OuterWalk::Physical(candidate), false));
                    }
                    return Err(Error::NotADirectory {
                        path: display(&candidate),
                    });
                }
                Ok(_) => {
                    if is_last {
                        return Ok((i, OuterWalk::Physical(candidate), false));
                    }
                    return Err(Error::NotADirectory {
                        path: display(&candidate),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if descend_ok && archive_name && mode == ResolveMode::Create {
                        return Ok((i, OuterWalk::Boundary(candidate), true));
                    }
                    if is_last {
                        return Ok((i, OuterWalk::Physical(candidate), false));
                    }
                    if mode == ResolveMode::Create {
                        // Missing middle directories materialize at write time.
                        phys = candidate;
                        continue;
                    }
                    return Err(Error::not_found(path));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((segments.len() - 1, OuterWalk::Physical(phys), false))
    }

    fn ensure_outer_mount(
        &mut self,
        segments: &[String],
        idx: usize,
        outer: &Path,
        create_new: bool,
        final_format: Option<&Registration>,
    ) -> Result<()> {
        if self.mounts.contains_key(outer) {
            return Ok(());
        }
        let file_name = &segments[idx];
        let is_final_segment = idx + 1 == segments.len();
        let registration =
            pick_registration(self.registry, file_name, is_final_segment, final_format)?;

        let handle = if create_new {
            if let Some(parent) = outer.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            ArchiveHandle::create_empty(file_name, registration, self.config)
        } else {
            ArchiveHandle::open(
                file_name,
                registration,
                RawBacking::File(outer.to_path_buf()),
                self.config,
            )?
        };
        self.mounts.insert(outer.to_path_buf(), Mount::new(handle));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &mut self,
        path: &str,
        segments: &[String],
        idx: usize,
        outer: PathBuf,
        mode: ResolveMode,
        enter_final: bool,
        final_format: Option<&Registration>,
    ) -> Result<Target> {
        // Split the borrow: `node` walks mutably through the mount tree
        // while the registry and config stay readable.
        let config = self.config;
        let registry = self.registry;
        let mut node = self
            .mounts
            .get_mut(&outer)
            .expect("outer mount inserted during resolution");
        let mut chain: Vec<String> = Vec::new();
        let mut prefix = String::new();

        for (j, segment) in segments[idx + 1..].iter().enumerate() {
            let is_last = idx + 1 + j + 1 == segments.len();
            let descend_ok = !is_last || enter_final;
            let full = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{}/{}", prefix, segment)
            };
            let archive_name =
                registry.is_archive_name(segment) || (is_last && final_format.is_some());
            let kind = node.handle.store.kind_of(&full);

            if archive_name && descend_ok {
                match kind {
                    Some(EntryKind::File) => {
                        if !node.children.contains_key(&full) {
                            let registration =
                                pick_registration(registry, segment, is_last, final_format)?;
                            let child =
                                open_nested(&node.handle, segment, &full, registration, config)?;
                            node.children.insert(full.clone(), child);
                        }
                        chain.push(full.clone());
                        prefix.clear();
                        node = node
                            .children
                            .get_mut(chain.last().expect("chain just extended"))
                            .expect("child mount just ensured");
                        continue;
                    }
                    Some(EntryKind::Dir) => {
                        prefix = full;
                        continue;
                    }
                    Some(EntryKind::Symlink { .. }) => {
                        return Err(Error::NotADirectory {
                            path: path.to_string(),
                        });
                    }
                    None => {
                        if mode == ResolveMode::Create {
                            let registration =
                                pick_registration(registry, segment, is_last, final_format)?;
                            // Stage a placeholder so the new archive is
                            // visible to reads before commit; commit
                            // replaces it with the serialized bytes.
                            node.handle.store.put(Entry::overlay_file(
                                EntryPath::new(&full)?,
                                Spool::empty(),
                                Timestamp::now(),
                            ))?;
                            let child = Mount::new(ArchiveHandle::create_empty(
                                segment,
                                registration,
                                config,
                            ));
                            node.children.insert(full.clone(), child);
                            chain.push(full.clone());
                            prefix.clear();
                            node = node
                                .children
                                .get_mut(chain.last().expect("chain just extended"))
                                .expect("child mount just inserted");
                            continue;
                        }
                        return Err(Error::not_found(path));
                    }
                }
            }

            if is_last {
                return Ok(Target::Entry {
                    outer,
                    chain,
                    entry: Some(EntryPath::new(&full)?),
                });
            }
            match kind {
                Some(EntryKind::Dir) => prefix = full,
                Some(_) => {
                    return Err(Error::NotADirectory {
                        path: path.to_string(),
                    });
                }
                None => {
                    if mode == ResolveMode::Create {
                        prefix = full;
                    } else {
                        return Err(Error::not_found(path));
                    }
                }
            }
        }

        Ok(Target::Entry {
            outer,
            chain,
            entry: None,
        })
    }

}

/// Chooses the registration for an archive segment, honoring a final
/// format override.
fn pick_registration(
    registry: &HandlerRegistry,
    file_name: &str,
    is_final_segment: bool,
    final_format: Option<&Registration>,
) -> Result<Registration> {
    if is_final_segment {
        if let Some(registration) = final_format {
            return Ok(registration.clone());
        }
    }
    registry
        .lookup(file_name)
        .cloned()
        .ok_or_else(|| Error::UnsupportedFormat {
            extension: file_name.to_string(),
        })
}

enum OuterWalk {
    Physical(PathBuf),
    Boundary(PathBuf),
}

/// Materializes a nested archive's raw bytes and opens a handle over them.
fn open_nested(
    parent: &ArchiveHandle,
    file_name: &str,
    entry_path: &str,
    registration: Registration,
    config: &Config,
) -> Result<Mount> {
    let entry = parent
        .store
        .get(entry_path)
        .ok_or_else(|| Error::not_found(entry_path))?;

    let raw = match &entry.source {
        ContentSource::Overlay(spool) => RawBacking::Spool(spool.clone()),
        _ => {
            let mut writer = SpoolWriter::new(config);
            let mut reader = parent.open_entry_reader(entry)?;
            io::copy(&mut reader, &mut writer)?;
            RawBacking::Spool(writer.finish()?)
        }
    };

    let handle = ArchiveHandle::open(file_name, registration, raw, config)?;
    Ok(Mount::new(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_composite_basic() {
        let (abs, segments) = split_composite("a/b.zip/c.txt").unwrap();
        assert!(!abs);
        assert_eq!(segments, vec!["a", "b.zip", "c.txt"]);
    }

    #[test]
    fn test_split_composite_absolute() {
        let (abs, segments) = split_composite("/data/x.tar").unwrap();
        assert!(abs);
        assert_eq!(segments, vec!["data", "x.tar"]);
    }

    #[test]
    fn test_split_composite_normalizes() {
        let (_, segments) = split_composite("a//b/./c").unwrap();
        assert_eq!(segments, vec!["a", "b", "c"]);

        let (_, segments) = split_composite("a\\b\\c").unwrap();
        assert_eq!(segments, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_composite_rejects_traversal() {
        assert!(matches!(
            split_composite("a/../b"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            split_composite("x\0y"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_split_composite_root() {
        let (abs, segments) = split_composite("/").unwrap();
        assert!(abs);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_resolver_physical_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        let config = Config::default();
        let registry = HandlerRegistry::with_defaults();
        let mut mounts = HashMap::new();
        let mut resolver = Resolver {
            config: &config,
            registry: &registry,
            mounts: &mut mounts,
        };

        let path = file.to_str().unwrap();
        match resolver.resolve(path, ResolveMode::Read, false).unwrap() {
            Target::Physical(p) => assert_eq!(p, file),
            _ => panic!("expected physical target"),
        }
    }

    #[test]
    fn test_resolver_missing_middle_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let registry = HandlerRegistry::with_defaults();
        let mut mounts = HashMap::new();
        let mut resolver = Resolver {
            config: &config,
            registry: &registry,
            mounts: &mut mounts,
        };

        let path = format!("{}/missing/file.txt", dir.path().display());
        let err = resolver.resolve(&path, ResolveMode::Read, false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolver_creates_outer_archive_mount() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let registry = HandlerRegistry::with_defaults();
        let mut mounts = HashMap::new();
        let mut resolver = Resolver {
            config: &config,
            registry: &registry,
            mounts: &mut mounts,
        };

        let path = format!("{}/new.zip/hello.txt", dir.path().display());
        match resolver.resolve(&path, ResolveMode::Create, false).unwrap() {
            Target::Entry { chain, entry, .. } => {
                assert!(chain.is_empty());
                assert_eq!(entry.unwrap().as_str(), "hello.txt");
            }
            _ => panic!("expected entry target"),
        }
        assert_eq!(mounts.len(), 1);
    }

    #[test]
    fn test_resolver_read_mode_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let registry = HandlerRegistry::with_defaults();
        let mut mounts = HashMap::new();
        let mut resolver = Resolver {
            config: &config,
            registry: &registry,
            mounts: &mut mounts,
        };

        let path = format!("{}/absent.zip/f.txt", dir.path().display());
        let err = resolver.resolve(&path, ResolveMode::Read, false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_directory_named_like_archive_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("data.zip");
        fs::create_dir(&fake).unwrap();
        fs::write(fake.join("inside.txt"), b"d").unwrap();

        let config = Config::default();
        let registry = HandlerRegistry::with_defaults();
        let mut mounts = HashMap::new();
        let mut resolver = Resolver {
            config: &config,
            registry: &registry,
            mounts: &mut mounts,
        };

        let path = format!("{}/data.zip/inside.txt", dir.path().display());
        match resolver.resolve(&path, ResolveMode::Read, false).unwrap() {
            Target::Physical(p) => assert!(p.ends_with("data.zip/inside.txt")),
            _ => panic!("directory should not be treated as an archive"),
        }
        assert!(mounts.is_empty());
    }
}
