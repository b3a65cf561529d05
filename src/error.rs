//! Error types for archive file system operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when resolving, reading, or rebuilding archives, along with
//! a convenient [`Result<T>`] type alias.
//!
//! All fallible operations in this crate return `Result<T, Error>`:
//!
//! ```rust,no_run
//! use arcfs::{ArcFs, Result};
//!
//! fn first_line(fs: &ArcFs) -> Result<String> {
//!     let text = fs.read_to_string("logs.tar.gz/app.log")?;
//!     Ok(text.lines().next().unwrap_or_default().to_string())
//! }
//! ```
//!
//! For fine-grained handling, match on specific variants:
//!
//! ```rust,no_run
//! use arcfs::{ArcFs, Error};
//!
//! fn read_or_default(fs: &ArcFs, path: &str) -> Vec<u8> {
//!     match fs.read(path) {
//!         Ok(data) => data,
//!         Err(Error::NotFound { .. }) => Vec::new(),
//!         Err(e) => panic!("unexpected error: {e}"),
//!     }
//! }
//! ```

use std::io;

/// The main error type for archive file system operations.
///
/// Each variant includes enough context to diagnose the failing path or
/// archive. Variants map onto the familiar file system error kinds
/// (`NotFound`, `AlreadyExists`, ...) plus archive-specific failures
/// (`UnsupportedFormat`, `Format`).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A path or archive entry does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The composite path or entry path that was not found.
        path: String,
    },

    /// A create-style operation targeted a path that already exists.
    #[error("already exists: {path}")]
    AlreadyExists {
        /// The path that already exists.
        path: String,
    },

    /// A file operation targeted a directory (or an archive treated as one).
    #[error("is a directory: {path}")]
    IsADirectory {
        /// The offending path.
        path: String,
    },

    /// A directory operation targeted a regular file, or a non-final path
    /// segment resolved to a non-archive file.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// A directory could not be removed because it still has children.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The non-empty directory.
        path: String,
    },

    /// A composite path or entry path is malformed.
    ///
    /// Paths must not contain NUL bytes, `..` segments, or (for entry paths)
    /// be absolute. The string describes the specific violation.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No handler is registered for an extension, or a codec is unknown.
    #[error("unsupported format: {extension}")]
    UnsupportedFormat {
        /// The extension or codec name that has no registered handler.
        extension: String,
    },

    /// An archive's structure is corrupt, truncated, or fails a checksum.
    #[error("format error in '{archive}': {reason}")]
    Format {
        /// File name of the archive that failed to parse or verify.
        archive: String,
        /// A description of the corruption.
        reason: String,
    },

    /// An underlying file system operation failed.
    ///
    /// Wraps [`std::io::Error`]; permission problems surface here with
    /// [`std::io::ErrorKind::PermissionDenied`].
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation was attempted on a finished session, transaction, or
    /// closed stream.
    #[error("invalid state: {0}")]
    State(String),
}

impl Error {
    /// Returns `true` if this error means the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns `true` if this is a kind mismatch (`IsADirectory` /
    /// `NotADirectory` / `DirectoryNotEmpty`).
    pub fn is_kind_mismatch(&self) -> bool {
        matches!(
            self,
            Error::IsADirectory { .. }
                | Error::NotADirectory { .. }
                | Error::DirectoryNotEmpty { .. }
        )
    }

    /// Returns `true` if the error indicates corrupt or unreadable archive
    /// data rather than a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Format { .. })
    }

    /// Returns the path associated with this error, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::NotFound { path }
            | Error::AlreadyExists { path }
            | Error::IsADirectory { path }
            | Error::NotADirectory { path }
            | Error::DirectoryNotEmpty { path } => Some(path),
            Error::Format { archive, .. } => Some(archive),
            _ => None,
        }
    }

    /// Creates a `NotFound` error for the given path.
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Creates a `Format` error for the given archive.
    pub(crate) fn format(archive: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Format {
            archive: archive.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for archive file system operations.
pub type Result<T> = std::result::Result<T, Error>;
