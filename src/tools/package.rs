//! Package-level tools: format check, unpacking, metadata and file counts.

use crate::core::context::{AnalysisContext, ContextDelta, FileInventory, PackageMetadata};
use crate::core::snapshot::PackageSnapshot;
use crate::error::PkgTriageError;
use crate::normalize::{archive, Normalized, Normalizer};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Metadata members, in lookup order.
pub const METADATA_MEMBERS: [&str; 2] = ["PKG-INFO", "METADATA"];

/// Whether `path` names an archive, or is a directory directly holding one.
pub fn is_archive_input(path: &Path) -> bool {
    if path.is_dir() {
        return std::fs::read_dir(path)
            .map(|entries| {
                entries.flatten().any(|entry| {
                    entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                        && archive::looks_like_archive(&entry.file_name().to_string_lossy())
                })
            })
            .unwrap_or(false);
    }
    path.file_name()
        .map(|name| archive::looks_like_archive(&name.to_string_lossy()))
        .unwrap_or(false)
}

fn normalization_failure(err: PkgTriageError) -> (Value, ContextDelta) {
    warn!(error = %err, "Normalization failed");
    let message = err.to_string();
    let delta = ContextDelta {
        error: Some(message.clone()),
        failure: Some(err),
        ..Default::default()
    };
    (json!({ "error": message }), delta)
}

fn normalized_output(normalized: &Normalized) -> Value {
    json!({
        "package_formatted_path": normalized.snapshot_path,
        "members": normalized.snapshot.len(),
    })
}

/// Unpack an archive and record the snapshot location.
pub fn unpack_archive(normalizer: &Normalizer, path: &Path) -> (Value, ContextDelta) {
    let result = if path.exists() {
        normalizer.normalize_archive(path)
    } else {
        Err(PkgTriageError::NotFound {
            path: path.to_path_buf(),
        })
    };
    match result {
        Ok(normalized) => {
            let delta = ContextDelta {
                package_formatted_path: Some(normalized.snapshot_path.clone()),
                ..Default::default()
            }
            .with_message("Archive extraction and formatting completed");
            (normalized_output(&normalized), delta)
        }
        Err(e) => normalization_failure(e),
    }
}

/// Snapshot a folder; the snapshot becomes the package location.
pub fn unpack_folder(normalizer: &Normalizer, path: &Path) -> (Value, ContextDelta) {
    match normalizer.normalize_folder(path) {
        Ok(normalized) => {
            let delta = ContextDelta {
                package_formatted_path: Some(normalized.snapshot_path.clone()),
                package_location: Some(normalized.snapshot_path.clone()),
                ..Default::default()
            }
            .with_message("Folder extraction and formatting completed");
            (normalized_output(&normalized), delta)
        }
        Err(e) => normalization_failure(e),
    }
}

fn snapshot_location(ctx: &AnalysisContext, explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| ctx.package_formatted_path.clone())
}

fn load_snapshot(path: Option<PathBuf>) -> Result<PackageSnapshot, String> {
    let Some(path) = path else {
        return Err("File does not exist: no package snapshot recorded".to_string());
    };
    if !path.is_file() {
        return Err(format!("File does not exist: {}", path.display()));
    }
    PackageSnapshot::load(&path)
        .map_err(|e| format!("Error decoding JSON from the package file: {e}"))
}

/// Parse `key: value` headers. Parsing stops at the first blank line; a
/// non-empty body fills `description` when no header did.
pub fn parse_metadata(raw: &str) -> PackageMetadata {
    let mut metadata = PackageMetadata::unknown();
    let mut lines = raw.lines();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            metadata.set_header(&key.trim().to_ascii_lowercase(), value.trim());
        }
    }
    let body = lines.collect::<Vec<_>>().join("\n");
    let body = body.trim();
    if !body.is_empty() && crate::core::context::is_unknown(&metadata.description) {
        metadata.description = body.to_string();
    }
    metadata
}

/// Fill the metadata fields from the snapshot's metadata member.
///
/// Every failure is soft: the error slot is set and fields stay "NA".
pub fn extract_metadata(ctx: &AnalysisContext, explicit: Option<PathBuf>) -> (Value, ContextDelta) {
    let snapshot = match load_snapshot(snapshot_location(ctx, explicit)) {
        Ok(snapshot) => snapshot,
        Err(message) => {
            warn!("{}", message);
            return (json!({ "error": message }), ContextDelta::default().with_error(message));
        }
    };

    let Some(member) = METADATA_MEMBERS
        .iter()
        .find_map(|name| snapshot.resolve(name))
    else {
        let message = "metadata details of the package is not found";
        warn!("{}", message);
        return (json!({ "error": message }), ContextDelta::default().with_error(message));
    };

    if member.content.trim().is_empty() {
        let message = "Metadata content is empty, continuing without package information";
        return (json!({ "message": message }), ContextDelta::default().with_message(message));
    }

    let metadata = parse_metadata(&member.content);
    info!(package = %metadata.name, "Package metadata extracted");
    let output = json!({ "source": member.file_path, "metadata": metadata });
    let delta = ContextDelta {
        metadata: Some(metadata),
        ..Default::default()
    }
    .with_message("Package extraction completed successfully");
    (output, delta)
}

/// Count snapshot members and list the Python ones in walk order.
pub fn file_inventory(snapshot: &PackageSnapshot) -> FileInventory {
    let python_files = snapshot.python_files();
    FileInventory {
        total_files: snapshot.len(),
        python_files_count: python_files.len(),
        python_files,
    }
}

pub fn extract_file_info(ctx: &AnalysisContext, explicit: Option<PathBuf>) -> (Value, ContextDelta) {
    match load_snapshot(snapshot_location(ctx, explicit)) {
        Ok(snapshot) => {
            let inventory = file_inventory(&snapshot);
            let output = json!(inventory);
            let delta = ContextDelta {
                files: Some(inventory),
                ..Default::default()
            }
            .with_message("Information about files in the package extracted");
            (output, delta)
        }
        Err(message) => {
            warn!("{}", message);
            (json!({ "error": message }), ContextDelta::default().with_error(message))
        }
    }
}
