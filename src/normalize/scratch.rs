//! Per-request scratch directory layout.
//!
//! Every path is namespaced by the request identifier, so two concurrent
//! requests for archives with the same base name never share a directory.

use crate::core::id::ClassificationId;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PACKAGES_DIR: &str = "packages";
const PLAIN_DIR: &str = "plain";
const UPLOADS_DIR: &str = "uploads";

/// Directory layout under the scratch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    root: PathBuf,
}

impl ScratchLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/packages/<request>/<base>`
    pub fn extraction_dir(&self, request: &ClassificationId, base: &str) -> PathBuf {
        self.root
            .join(PACKAGES_DIR)
            .join(request.path_component())
            .join(base)
    }

    /// `<root>/plain/<request>/<base>_dump.json`
    pub fn snapshot_path(&self, request: &ClassificationId, base: &str) -> PathBuf {
        self.root
            .join(PLAIN_DIR)
            .join(request.path_component())
            .join(format!("{base}_dump.json"))
    }

    /// `<root>/uploads/<request>`
    pub fn upload_dir(&self, request: &ClassificationId) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(request.path_component())
    }

    /// Every directory a request may create.
    pub fn request_dirs(&self, request: &ClassificationId) -> [PathBuf; 3] {
        let component = request.path_component();
        [
            self.root.join(PACKAGES_DIR).join(&component),
            self.root.join(PLAIN_DIR).join(&component),
            self.root.join(UPLOADS_DIR).join(&component),
        ]
    }
}

/// Owns a request's scratch directories and removes them when dropped.
#[derive(Debug)]
pub struct RequestScratch {
    layout: ScratchLayout,
    request: ClassificationId,
    keep: bool,
}

impl RequestScratch {
    pub fn new(layout: ScratchLayout, request: ClassificationId, keep: bool) -> Self {
        Self {
            layout,
            request,
            keep,
        }
    }

    pub fn layout(&self) -> &ScratchLayout {
        &self.layout
    }

    pub fn request(&self) -> &ClassificationId {
        &self.request
    }

    /// Remove every directory owned by the request. Missing directories are fine.
    pub fn cleanup(&self) -> io::Result<()> {
        for dir in self.layout.request_dirs(&self.request) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Removed scratch directory {:?}", dir),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for RequestScratch {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = self.cleanup() {
            warn!(request_id = %self.request, error = %e, "Scratch cleanup failed");
        }
    }
}
