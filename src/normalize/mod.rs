//! Archive normalizer.
//!
//! Turns an archive or a directory into a canonical [`PackageSnapshot`]
//! written as JSON under the request's scratch tree.
//!
//! # Invariants
//! - A missing input or an unsupported suffix is rejected before any
//!   directory is created.
//! - The extraction directory is destroyed and recreated on every run, so
//!   normalizing the same archive twice yields the same snapshot.
//! - Directory inputs are walked in place; nothing is extracted.
//! - Clones of one normalizer share a lock; runs for the same request never
//!   overlap on its extraction directory.

pub mod archive;
pub mod scratch;
pub mod walk;

pub use archive::ArchiveKind;
pub use scratch::{RequestScratch, ScratchLayout};

use crate::config::SnapshotConfig;
use crate::core::id::ClassificationId;
use crate::core::snapshot::PackageSnapshot;
use crate::error::{PkgTriageError, Result};
use archive::ExtractionLimits;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Outcome of one normalization.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Location of the written snapshot JSON
    pub snapshot_path: PathBuf,
    /// Tree the snapshot was built from
    pub source_root: PathBuf,
    /// Archive kind, `None` for directory input
    pub kind: Option<ArchiveKind>,
    pub snapshot: PackageSnapshot,
}

/// Builds snapshots for one request.
#[derive(Debug, Clone)]
pub struct Normalizer {
    layout: ScratchLayout,
    request: ClassificationId,
    max_member_bytes: u64,
    limits: ExtractionLimits,
    lock: Arc<Mutex<()>>,
}

impl Normalizer {
    pub fn new(layout: ScratchLayout, request: ClassificationId, config: &SnapshotConfig) -> Self {
        Self {
            layout,
            request,
            max_member_bytes: config.max_member_bytes,
            limits: ExtractionLimits::from(config),
            lock: Arc::new(Mutex::new(())),
        }
    }

    // Guards no data; poisoning is ignored.
    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Normalize an archive or a directory.
    pub fn normalize(&self, input: &Path) -> Result<Normalized> {
        if !input.exists() {
            return Err(PkgTriageError::NotFound {
                path: input.to_path_buf(),
            });
        }
        let _guard = self.serialize();
        if input.is_dir() {
            self.folder_locked(input)
        } else {
            self.archive_locked(input)
        }
    }

    /// Extract an archive into the scratch tree and snapshot it.
    pub fn normalize_archive(&self, input: &Path) -> Result<Normalized> {
        let _guard = self.serialize();
        self.archive_locked(input)
    }

    /// Snapshot a directory without extraction.
    pub fn normalize_folder(&self, input: &Path) -> Result<Normalized> {
        let _guard = self.serialize();
        self.folder_locked(input)
    }

    fn archive_locked(&self, input: &Path) -> Result<Normalized> {
        if !input.is_file() {
            return Err(PkgTriageError::NotFound {
                path: input.to_path_buf(),
            });
        }
        let name = file_name(input);
        let (base, kind) =
            archive::strip_archive_suffix(&name).ok_or_else(|| PkgTriageError::UnsupportedFormat {
                suffix: archive::reported_suffix(&name),
                supported: ArchiveKind::supported_suffixes(),
            })?;
        let base = if base.is_empty() { "package" } else { base };

        let dest = self.layout.extraction_dir(&self.request, base);
        if dest.exists() {
            debug!("Recreating extraction directory {:?}", dest);
            std::fs::remove_dir_all(&dest)?;
        }
        std::fs::create_dir_all(&dest)?;
        let extracted = archive::extract(kind, input, &dest, base, self.limits)?;

        let normalized = self.snapshot_tree(&dest, base, Some(kind))?;
        info!(
            kind = %kind,
            entries = extracted.entries,
            bytes = extracted.bytes,
            members = normalized.snapshot.len(),
            digest = %normalized.snapshot.digest(),
            "Archive extraction and formatting completed"
        );
        Ok(normalized)
    }

    fn folder_locked(&self, input: &Path) -> Result<Normalized> {
        if !input.is_dir() {
            return Err(PkgTriageError::NotFound {
                path: input.to_path_buf(),
            });
        }
        let name = file_name(input);
        let base = if name.is_empty() { "package" } else { name.as_str() };
        let normalized = self.snapshot_tree(input, base, None)?;
        info!(
            members = normalized.snapshot.len(),
            "Folder extraction and formatting completed"
        );
        Ok(normalized)
    }

    fn snapshot_tree(
        &self,
        root: &Path,
        base: &str,
        kind: Option<ArchiveKind>,
    ) -> Result<Normalized> {
        let snapshot = walk::build_snapshot(root, self.max_member_bytes)?;
        let snapshot_path = self.layout.snapshot_path(&self.request, base);
        snapshot.write(&snapshot_path)?;
        Ok(Normalized {
            snapshot_path,
            source_root: root.to_path_buf(),
            kind,
            snapshot,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
