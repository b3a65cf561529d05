//! The archive file system facade.
//!
//! [`ArcFs`] presents archives as ordinary directories: any path segment
//! naming a recognized archive format is entered transparently, to
//! arbitrary nesting depth.
//!
//! ```rust,no_run
//! use arcfs::ArcFs;
//!
//! # fn main() -> arcfs::Result<()> {
//! let fs = ArcFs::new();
//!
//! // Write straight into a (possibly missing) archive
//! fs.write("backups/data.zip/reports/q3.csv", b"a,b,c\n")?;
//!
//! // Read through nested archives
//! let bytes = fs.read("outer.zip/inner.tar.gz/deep.txt")?;
//!
//! // Enumerate archive contents like a directory
//! for name in fs.list_dir("backups/data.zip")? {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Each facade method resolves, operates, and commits on its own. To batch
//! mutations into a single rebuild per archive, use
//! [`batch_session`](ArcFs::batch_session); for all-or-nothing replacement
//! of several outer files, use [`transaction`](ArcFs::transaction).

use std::collections::VecDeque;

use crate::codec::Codec;
use crate::handler::registry::{HandlerFactory, HandlerRegistry, Registration};
use crate::session::{Core, Session, Transaction};
use crate::stream::{ArcReader, ArcWriter};
use crate::{Config, Result, Timestamp};

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file (or archive file addressed as a file).
    File,
    /// A directory, explicit or implied.
    Dir,
    /// A symbolic link entry, carried opaquely.
    Symlink,
}

/// Metadata for a composite path.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Logical size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub modified: Timestamp,
    /// File, directory, or symlink.
    pub kind: FileKind,
    /// Unix permission bits, when known.
    pub mode: Option<u32>,
}

/// One step of a [`Walk`]: a directory, its subdirectory names, and its
/// file names.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Composite path of the directory being visited.
    pub dir: String,
    /// Immediate subdirectory names, in deterministic order.
    pub subdirs: Vec<String>,
    /// Immediate file names, in deterministic order.
    pub files: Vec<String>,
}

/// A lazy, top-down traversal of a composite tree.
///
/// Yields `(dir, subdirs, files)` per directory. Order is entry insertion
/// order inside archives and name order on the OS file system. Nested
/// archives appear as files and are not descended into; walk them
/// explicitly by starting a new walk at their path.
pub struct Walk {
    core: Core,
    queue: VecDeque<String>,
    failed: bool,
}

impl Walk {
    pub(crate) fn new(core: Core, root: &str) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(root.to_string());
        Self {
            core,
            queue,
            failed: false,
        }
    }
}

impl Iterator for Walk {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let dir = self.queue.pop_front()?;
        match self.core.list_children_kinds(&dir) {
            Ok(children) => {
                let mut subdirs = Vec::new();
                let mut files = Vec::new();
                for (name, is_dir) in children {
                    if is_dir {
                        subdirs.push(name);
                    } else {
                        files.push(name);
                    }
                }
                for sub in &subdirs {
                    self.queue.push_back(format!("{}/{}", dir, sub));
                }
                Some(Ok(WalkEntry { dir, subdirs, files }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// The transparent archive file system.
///
/// Operations are synchronous and strictly sequential per instance; an
/// instance holds no cross-operation state beyond its configuration and
/// handler registry, so it is cheap to create and freely movable.
/// Instances must not target overlapping outer files from multiple
/// threads; the system performs no file locking.
pub struct ArcFs {
    config: Config,
    registry: HandlerRegistry,
}

impl ArcFs {
    /// Creates an instance with default configuration and the default
    /// format registry.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an instance with explicit configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            registry: HandlerRegistry::with_defaults(),
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers an archive format, shadowing any default for the same
    /// extension. Affects only this instance.
    ///
    /// The factory receives the archive's file name and the effective
    /// configuration; `codecs` lists the chain between raw file bytes and
    /// the bytes the handler parses (empty for uncompressed containers).
    pub fn register_handler(
        &mut self,
        extension: &str,
        codecs: Vec<Codec>,
        factory: HandlerFactory,
    ) {
        self.registry
            .register(Registration::new(extension, codecs, factory));
    }

    fn core(&self) -> Core {
        Core::new(self.config.clone(), self.registry.clone())
    }

    /// Reads an entire file, crossing archive boundaries as needed.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.core().read(path)
    }

    /// Reads an entire file as UTF-8 text (strict; no replacement).
    pub fn read_to_string(&self, path: &str) -> Result<String> {
        self.core().read_to_string(path)
    }

    /// Writes `data` to `path` with overwrite semantics, creating
    /// intermediate directories and archives as needed, then commits.
    pub fn write(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let core = self.core();
        core.write_bytes(path, data.as_ref())?;
        core.commit_all()
    }

    /// Appends `data` to `path` (read-modify-write through the staged
    /// overlay for archive entries), then commits.
    pub fn append(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let core = self.core();
        core.append_bytes(path, data.as_ref())?;
        core.commit_all()
    }

    /// Opens a read stream supporting `read` and `seek`.
    pub fn open_read(&self, path: &str) -> Result<ArcReader> {
        self.core().open_read(path)
    }

    /// Opens a write stream. Closing the stream commits it.
    pub fn open_write(&self, path: &str) -> Result<ArcWriter> {
        self.core().open_write(path, true)
    }

    /// Opens an append stream. Closing the stream commits it.
    pub fn open_append(&self, path: &str) -> Result<ArcWriter> {
        self.core().open_append(path, true)
    }

    /// Returns whether a path exists. Never fails; malformed paths are
    /// simply absent.
    pub fn exists(&self, path: &str) -> bool {
        self.core().exists(path)
    }

    /// Removes a file or archive entry, then commits. Directories are
    /// refused with [`IsADirectory`](crate::Error::IsADirectory).
    pub fn remove(&self, path: &str) -> Result<()> {
        let core = self.core();
        core.remove(path)?;
        core.commit_all()
    }

    /// Copies `src` to `dst`, streaming across archive boundaries and
    /// preserving the modification time on a best-effort basis.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let core = self.core();
        core.copy(src, dst)?;
        core.commit_all()
    }

    /// Moves `src` to `dst` (copy then remove); both sides commit.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let core = self.core();
        core.rename(src, dst)?;
        core.commit_all()
    }

    /// Creates a directory. With `create_parents`, missing ancestors are
    /// created and the call is idempotent.
    pub fn mkdir(&self, path: &str, create_parents: bool) -> Result<()> {
        let core = self.core();
        core.mkdir(path, create_parents)?;
        core.commit_all()
    }

    /// Removes a directory; refuses non-empty directories unless
    /// `recursive`.
    pub fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        let core = self.core();
        core.rmdir(path, recursive)?;
        core.commit_all()
    }

    /// Lists the immediate children of a directory or archive, excluding
    /// staged deletions and including implied directories.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.core().list_dir(path)
    }

    /// Walks a tree lazily, yielding `(dir, subdirs, files)` per
    /// directory in deterministic order.
    pub fn walk(&self, path: &str) -> Walk {
        self.core().walk(path)
    }

    /// Returns size, modification time, kind, and permissions for a path.
    pub fn info(&self, path: &str) -> Result<FileInfo> {
        self.core().info(path)
    }

    /// Creates an empty archive at `path`, then commits. The format comes
    /// from the extension, or from `format` (e.g. `Some("zip")`) when the
    /// name alone does not imply one.
    pub fn create_archive(&self, path: &str, format: Option<&str>) -> Result<()> {
        let core = self.core();
        core.create_archive(path, format)?;
        core.commit_all()
    }

    /// Starts a batch session: operations stage, reads see staged writes,
    /// and each dirty archive rebuilds once at
    /// [`commit`](Session::commit).
    pub fn batch_session(&self) -> Session {
        Session::new(self.config.clone(), self.registry.clone())
    }

    /// Starts a transaction over the given outer paths with all-or-nothing
    /// replacement at [`commit`](Transaction::commit).
    pub fn transaction(&self, paths: &[&str]) -> Result<Transaction> {
        Transaction::new(self.config.clone(), self.registry.clone(), paths)
    }
}

impl Default for ArcFs {
    fn default() -> Self {
        Self::new()
    }
}
