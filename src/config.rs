//! Configuration for an [`ArcFs`](crate::ArcFs) instance.

use std::path::PathBuf;

/// Default in-memory staging limit before spilling to a temp file (64 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default per-handler I/O chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tunable options for archive access.
///
/// Uses the builder pattern; all setters consume and return `self`.
///
/// # Example
///
/// ```
/// use arcfs::Config;
///
/// let config = Config::new()
///     .global_buffer_size(8 * 1024 * 1024)
///     .temp_dir("/var/tmp");
/// assert_eq!(config.global_buffer_size, 8 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes staged in memory before a buffer spills to a temp file.
    ///
    /// Applies to write streams, staged overlays, and decoded archive
    /// caches alike.
    pub global_buffer_size: usize,

    /// Directory for spill and commit temp files.
    ///
    /// Commit temps for the outermost archive are an exception: they are
    /// created next to the target file so the final rename stays atomic.
    pub temp_dir: PathBuf,

    /// I/O chunk size for the ZIP handler.
    pub zip_buffer_size: usize,

    /// I/O chunk size for the TAR handler.
    pub tar_buffer_size: usize,

    /// I/O chunk size for the gzip codec.
    pub gzip_buffer_size: usize,

    /// I/O chunk size for the bzip2 codec.
    pub bzip2_buffer_size: usize,

    /// I/O chunk size for the xz codec.
    pub xz_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global_buffer_size: DEFAULT_BUFFER_SIZE,
            temp_dir: std::env::temp_dir(),
            zip_buffer_size: DEFAULT_CHUNK_SIZE,
            tar_buffer_size: DEFAULT_CHUNK_SIZE,
            gzip_buffer_size: DEFAULT_CHUNK_SIZE,
            bzip2_buffer_size: DEFAULT_CHUNK_SIZE,
            xz_buffer_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-memory staging limit in bytes.
    pub fn global_buffer_size(mut self, bytes: usize) -> Self {
        // A zero threshold would spill on every write; keep a floor.
        self.global_buffer_size = bytes.max(1);
        self
    }

    /// Sets the temp file directory.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets the ZIP handler chunk size.
    pub fn zip_buffer_size(mut self, bytes: usize) -> Self {
        self.zip_buffer_size = bytes.max(512);
        self
    }

    /// Sets the TAR handler chunk size.
    pub fn tar_buffer_size(mut self, bytes: usize) -> Self {
        self.tar_buffer_size = bytes.max(512);
        self
    }

    /// Sets the gzip codec chunk size.
    pub fn gzip_buffer_size(mut self, bytes: usize) -> Self {
        self.gzip_buffer_size = bytes.max(512);
        self
    }

    /// Sets the bzip2 codec chunk size.
    pub fn bzip2_buffer_size(mut self, bytes: usize) -> Self {
        self.bzip2_buffer_size = bytes.max(512);
        self
    }

    /// Sets the xz codec chunk size.
    pub fn xz_buffer_size(mut self, bytes: usize) -> Self {
        self.xz_buffer_size = bytes.max(512);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.global_buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.zip_buffer_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.temp_dir, std::env::temp_dir());
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::new()
            .global_buffer_size(1024)
            .tar_buffer_size(4096)
            .temp_dir("/tmp/arcfs-test");
        assert_eq!(config.global_buffer_size, 1024);
        assert_eq!(config.tar_buffer_size, 4096);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/arcfs-test"));
    }

    #[test]
    fn test_floors() {
        let config = Config::new().global_buffer_size(0).zip_buffer_size(1);
        assert_eq!(config.global_buffer_size, 1);
        assert_eq!(config.zip_buffer_size, 512);
    }
}
