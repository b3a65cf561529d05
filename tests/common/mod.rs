//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test
//! file compiles as a separate crate and may only use a subset of these
//! helpers.

#![allow(dead_code)]

use arcfs::{ArcFs, Config};
use tempfile::TempDir;

/// Creates an `ArcFs` whose spill temp files live inside a fresh temp dir.
///
/// The temp dir doubles as scratch space for the archives under test; keep
/// the returned guard alive for the duration of the test.
pub fn test_fs() -> (TempDir, ArcFs) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = Config::new().temp_dir(dir.path());
    (dir, ArcFs::with_config(config))
}

/// Composes a composite path rooted in the test directory.
pub fn path_in(dir: &TempDir, rel: &str) -> String {
    format!("{}/{}", dir.path().display(), rel)
}

/// Reads the raw on-disk bytes of an outer archive file.
pub fn disk_bytes(dir: &TempDir, rel: &str) -> Vec<u8> {
    std::fs::read(dir.path().join(rel)).expect("read archive from disk")
}
