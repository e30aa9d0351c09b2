//! Tree walk producing a [`PackageSnapshot`].

use crate::core::snapshot::{PackageSnapshot, SnapshotEntry};
use crate::error::{PkgTriageError, Result};
use crate::io::IOUtils;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Walk `root` recursively and snapshot every regular file.
///
/// Entries are visited in file-name order so the same tree always yields the
/// same snapshot. Symlinks are not followed.
pub fn build_snapshot(root: &Path, max_member_bytes: u64) -> Result<PackageSnapshot> {
    let mut snapshot = PackageSnapshot::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| PkgTriageError::extraction(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);
        let name = rel.to_string_lossy().replace('\\', "/");

        let read = IOUtils::read_member(path, max_member_bytes)?;
        snapshot.insert(SnapshotEntry::from_member(name, read.data, read.truncated));
    }
    debug!(root = ?root, members = snapshot.len(), "Snapshot built");
    Ok(snapshot)
}
