//! Normalized entry paths for archive members.
//!
//! Every name that enters an [`EntryStore`](crate::store::EntryStore),
//! whether parsed from an archive or supplied by a caller, passes through
//! [`EntryPath`], so the rest of the crate can assume POSIX-form relative
//! paths with no `.`/`..` segments and no redundant separators.

use std::fmt;

use crate::{Error, Result};

/// Maximum length for entry paths (in bytes).
///
/// Well above any real file system limit; guards against archives that
/// declare absurdly long names.
const MAX_PATH_LENGTH: usize = 32768;

/// A validated, normalized path of an entry inside an archive.
///
/// Construction normalizes rather than rejects the benign irregularities that
/// show up in real archives and user input:
///
/// - OS separators (`\`) are converted to `/`
/// - consecutive slashes collapse (`a//b` becomes `a/b`)
/// - `.` segments and a trailing slash are stripped
///
/// Genuinely dangerous or meaningless input is rejected:
///
/// - `..` segments (path traversal)
/// - absolute paths
/// - NUL bytes
/// - paths that normalize to nothing
///
/// # Examples
///
/// ```
/// use arcfs::EntryPath;
///
/// let path = EntryPath::new("./dir//file.txt").unwrap();
/// assert_eq!(path.as_str(), "dir/file.txt");
///
/// assert!(EntryPath::new("../escape").is_err());
/// assert!(EntryPath::new("/absolute").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryPath(String);

impl EntryPath {
    /// Creates a new `EntryPath`, normalizing and validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path contains NUL bytes or `..`
    /// segments, is absolute, exceeds the length limit, or is empty after
    /// normalization.
    pub fn new(s: &str) -> Result<Self> {
        Ok(Self(normalize(s)?))
    }

    /// Returns the path as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins this path with a further relative path.
    pub fn join(&self, other: &str) -> Result<Self> {
        Self::new(&format!("{}/{}", self.0, other))
    }

    /// Returns the parent directory, or `None` for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Returns the final segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns an iterator over the path segments.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns `true` if `prefix` is a whole-segment prefix of this path.
    ///
    /// `"foo/bar"` is inside `"foo"`, but `"foobar"` is not.
    pub fn is_inside(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        match self.0.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Returns the immediate child segment of this path beneath `dir`, if
    /// this path lies inside `dir`.
    ///
    /// An empty `dir` means the archive root. The returned tuple flags
    /// whether the child is this path itself (`true`) or an intermediate
    /// directory implied by it (`false`).
    pub(crate) fn child_of<'a>(&'a self, dir: &str) -> Option<(&'a str, bool)> {
        let rest = if dir.is_empty() {
            self.0.as_str()
        } else {
            match self.0.strip_prefix(dir) {
                Some(r) => r.strip_prefix('/')?,
                None => return None,
            }
        };
        if rest.is_empty() {
            return None;
        }
        match rest.find('/') {
            Some(idx) => Some((&rest[..idx], false)),
            None => Some((rest, true)),
        }
    }
}

/// Normalizes a path string into canonical entry-path form.
fn normalize(s: &str) -> Result<String> {
    if s.contains('\0') {
        return Err(Error::InvalidPath("contains NUL byte".into()));
    }
    if s.len() > MAX_PATH_LENGTH {
        return Err(Error::InvalidPath(format!(
            "path exceeds maximum length of {} bytes",
            MAX_PATH_LENGTH
        )));
    }

    let converted = s.replace('\\', "/");
    if converted.starts_with('/') {
        return Err(Error::InvalidPath("absolute path not allowed".into()));
    }

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
        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(Error::InvalidPath("empty path".into()));
    }

    Ok(segments.join("/"))
}

impl AsRef<str> for EntryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for EntryPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
