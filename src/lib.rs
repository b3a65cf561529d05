//! # arcfs
//!
//! A transparent archive file system: ZIP and TAR containers, compressed
//! TAR variants, and bare compression streams presented as one hierarchical
//! namespace. Any path segment that names a recognized archive behaves as a
//! directory, to arbitrary nesting depth:
//!
//! ```text
//! project/backups.zip/2024/data.tar.gz/metrics/january.csv
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arcfs::{ArcFs, Result};
//!
//! fn main() -> Result<()> {
//!     let fs = ArcFs::new();
//!
//!     // Archives spring into existence on write
//!     fs.write("reports.zip/2024/summary.txt", b"all good")?;
//!
//!     // and read back like directories
//!     assert_eq!(fs.list_dir("reports.zip")?, vec!["2024"]);
//!     let text = fs.read_to_string("reports.zip/2024/summary.txt")?;
//!     assert_eq!(text, "all good");
//!     Ok(())
//! }
//! ```
//!
//! ## Batching and atomicity
//!
//! The supported formats cannot be mutated in place, so every change
//! rebuilds its archive. Facade methods commit per call; a
//! [`Session`] batches many changes into one rebuild per archive, and a
//! [`Transaction`] replaces several outer files all-or-nothing:
//!
//! ```rust,no_run
//! # fn main() -> arcfs::Result<()> {
//! let fs = arcfs::ArcFs::new();
//!
//! let session = fs.batch_session();
//! session.write("bundle.zip/a.txt", b"1")?;
//! session.write("bundle.zip/b.txt", b"2")?;
//! session.remove("bundle.zip/old.txt")?;
//! session.commit()?; // single rebuild of bundle.zip
//! # Ok(())
//! # }
//! ```
//!
//! Commits write a sibling temp file and rename over the target, so a
//! failed rebuild never leaves a half-written archive.
//!
//! ## Formats
//!
//! | Extension | Container | Codec |
//! |-----------|-----------|-------|
//! | `.zip` `.jar` `.war` `.ear` `.apk` | ZIP | per-member deflate |
//! | `.tar` | TAR | none |
//! | `.tar.gz` `.tgz` | TAR | gzip |
//! | `.tar.bz2` `.tbz2` | TAR | bzip2 (feature `bzip2`) |
//! | `.tar.xz` `.txz` | TAR | xz (feature `xz`) |
//! | `.gz` `.bz2` `.xz` | single entry | respective codec |
//!
//! Bare compression streams are transparent: `read("note.txt.gz")`
//! returns the decoded bytes, and `list_dir("note.txt.gz")` lists the
//! single entry `note.txt`. Custom formats plug in through
//! [`ArcFs::register_handler`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `bzip2` | Yes | bzip2 codec (`.bz2`, `.tar.bz2`, `.tbz2`) |
//! | `xz` | Yes | xz codec (`.xz`, `.tar.xz`, `.txz`) |
//!
//! ## Concurrency
//!
//! Instances are single-threaded and strictly sequential; reads observe
//! earlier writes in program order (through staged overlays, even before
//! commit). No file locking is performed; do not target overlapping outer
//! files from concurrent writers.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod config;
pub mod entry_path;
pub mod error;
pub mod fs;
pub mod handler;
pub mod session;
pub mod store;
pub mod stream;
pub mod timestamp;

pub(crate) mod handle;
pub(crate) mod rebuild;
pub(crate) mod resolve;
pub(crate) mod spool;

pub use config::Config;
pub use entry_path::EntryPath;
pub use error::{Error, Result};
pub use timestamp::Timestamp;

pub use fs::{ArcFs, FileInfo, FileKind, Walk, WalkEntry};
pub use session::{Session, Transaction};
pub use stream::{ArcReader, ArcWriter};

pub use codec::Codec;
pub use handler::registry::{HandlerFactory, HandlerRegistry, Registration};
pub use handler::{ArchiveHandler, Capabilities, SourceFn};
pub use store::{ContentSource, Entry, EntryKind, EntryStore};

// Re-export the spool types used by overlay content sources and custom
// handler implementations.
pub use spool::{ReadSeek, Spool};
