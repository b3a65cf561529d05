//! The rebuild/write engine.
//!
//! None of the supported formats mutate in place, so commit serializes
//! dirty archives from the inside out: a post-order walk of each mount
//! tree serializes every dirty nested archive through its codec chain into
//! its parent's overlay slot, then the outermost archive is serialized to
//! a temp file beside its target and renamed over it. The rename is the
//! only step that touches the target; any earlier failure deletes the temp
//! and leaves the original byte-identical.
//!
//! Transactions batch commits in two phases: first every target's temp is
//! fully written, then all renames run. A failure in phase one drops every
//! temp without replacing anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::handle::Mount;
use crate::spool::SpoolWriter;
use crate::store::Entry;
use crate::{Config, EntryPath, Result, Timestamp};

/// Commits each dirty mount independently: build temp, rename, next.
pub(crate) fn commit_all(config: &Config, mut mounts: HashMap<PathBuf, Mount>) -> Result<()> {
    for (target, mut mount) in mounts.drain() {
        if !mount.subtree_dirty() {
            continue;
        }
        let temp = build_target_temp(config, &target, &mut mount)?;
        persist(temp, &target)?;
    }
    Ok(())
}

/// Commits all dirty mounts with two-phase replacement: every temp is
/// written before any target is renamed. A serialize failure deletes all
/// temps and leaves every target untouched.
pub(crate) fn commit_all_two_phase(
    config: &Config,
    mut mounts: HashMap<PathBuf, Mount>,
) -> Result<()> {
    let mut staged: Vec<(NamedTempFile, PathBuf)> = Vec::new();
    for (target, mut mount) in mounts.drain() {
        if !mount.subtree_dirty() {
            continue;
        }
        let temp = build_target_temp(config, &target, &mut mount)?;
        staged.push((temp, target));
    }
    // Rename ordering is unspecified; per-file atomicity only.
    for (temp, target) in staged {
        persist(temp, &target)?;
    }
    Ok(())
}

/// Serializes a mount tree into a temp file adjacent to `target`.
fn build_target_temp(
    config: &Config,
    target: &Path,
    mount: &mut Mount,
) -> Result<NamedTempFile> {
    flush_children(config, mount)?;

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let base = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix("arcfs-")
        .suffix(&format!("-{}", base))
        .tempfile_in(dir)?;

    mount.handle.serialize_encoded(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    debug!(target = %target.display(), "serialized archive to temp file");
    Ok(temp)
}

/// Serializes dirty children innermost-first into their parent's overlay
/// slots, so each outer rebuild sees the new bytes of its children.
fn flush_children(config: &Config, mount: &mut Mount) -> Result<()> {
    let keys: Vec<String> = mount.children.keys().cloned().collect();
    for key in keys {
        let mut child = mount
            .children
            .remove(&key)
            .expect("child key enumerated from the map");
        flush_children(config, &mut child)?;

        if child.handle.dirty {
            let mut writer = SpoolWriter::new(config);
            child.handle.serialize_encoded(&mut writer)?;
            let spool = writer.finish()?;
            debug!(
                archive = %child.handle.file_name,
                bytes = spool.len(),
                "rebuilt nested archive into parent overlay"
            );
            mount
                .handle
                .store
                .put(Entry::overlay_file(
                    EntryPath::new(&key)?,
                    spool,
                    Timestamp::now(),
                ))?;
            mount.handle.dirty = true;
        }
    }
    Ok(())
}

fn persist(temp: NamedTempFile, target: &Path) -> Result<()> {
    match temp.persist(target) {
        Ok(_) => {
            debug!(target = %target.display(), "atomically replaced archive");
            Ok(())
        }
        // Dropping the temp inside the error removes it.
        Err(e) => Err(e.error.into()),
    }
}
