//! Archive kind detection and extraction.
//!
//! Detection is case-insensitive and suffix-based. Compound suffixes
//! (`.tar.gz`, `.tar.bz2`) are checked before their single-suffix tails so a
//! gzip-tar is never mistaken for a lone gzip stream.

use crate::config::SnapshotConfig;
use crate::error::{PkgTriageError, Result};
use crate::io::BoundedReader;
use bzip2::read::BzDecoder;
use flate2::read::{GzDecoder, MultiGzDecoder};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Archive kinds the normalizer can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// Plain zip or Python wheel
    Zip,
    /// gzip-compressed tar
    TarGz,
    /// bzip2-compressed tar
    TarBz2,
    /// Single gzip-compressed file
    Gzip,
    /// 7-zip
    SevenZip,
}

/// Ordered so that compound suffixes win.
const SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".tar.gz", ArchiveKind::TarGz),
    (".tar.bz2", ArchiveKind::TarBz2),
    (".tgz", ArchiveKind::TarGz),
    (".zip", ArchiveKind::Zip),
    (".whl", ArchiveKind::Zip),
    (".gz", ArchiveKind::Gzip),
    (".7z", ArchiveKind::SevenZip),
];

/// Suffixes reported as "an archive" by the format check, including container
/// formats the normalizer does not unpack.
const ARCHIVE_LIKE_SUFFIXES: &[&str] = &[
    ".zip", ".whl", ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tbz", ".tar.xz", ".gz",
    ".7z",
];

fn ends_with_ignore_ascii_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.as_bytes()[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

impl ArchiveKind {
    /// Detect by file name, returning the kind and the matched suffix length.
    pub fn detect_name(name: &str) -> Option<(ArchiveKind, usize)> {
        SUFFIXES
            .iter()
            .find(|(suffix, _)| ends_with_ignore_ascii_case(name, suffix))
            .map(|(suffix, kind)| (*kind, suffix.len()))
    }

    /// Comma-separated list of accepted suffixes.
    pub fn supported_suffixes() -> String {
        SUFFIXES
            .iter()
            .map(|(suffix, _)| *suffix)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn label(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::Gzip => "gzip",
            ArchiveKind::SevenZip => "7z",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Name with its archive suffix removed, or `None` for unsupported names.
pub fn strip_archive_suffix(name: &str) -> Option<(&str, ArchiveKind)> {
    let (kind, len) = ArchiveKind::detect_name(name)?;
    Some((&name[..name.len() - len], kind))
}

/// The trailing suffix used in an unsupported-format report.
pub fn reported_suffix(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_ascii_lowercase(),
        _ => name.to_string(),
    }
}

/// Whether a name looks like an archive, supported or not.
pub fn looks_like_archive(name: &str) -> bool {
    ARCHIVE_LIKE_SUFFIXES
        .iter()
        .any(|suffix| ends_with_ignore_ascii_case(name, suffix))
}

/// Caps on what one archive may expand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Total bytes written across all entries
    pub max_bytes: u64,
    /// Entries of any kind, directories included
    pub max_entries: u64,
}

impl From<&SnapshotConfig> for ExtractionLimits {
    fn from(config: &SnapshotConfig) -> Self {
        Self {
            max_bytes: config.max_extracted_bytes,
            max_entries: config.max_entries,
        }
    }
}

/// Totals of a completed extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extracted {
    pub entries: u64,
    pub bytes: u64,
}

/// Running totals charged against [`ExtractionLimits`]. Accounting saturates.
struct ExtractionBudget {
    limits: ExtractionLimits,
    used: Extracted,
}

impl ExtractionBudget {
    fn new(limits: ExtractionLimits) -> Self {
        Self {
            limits,
            used: Extracted::default(),
        }
    }

    fn note_entry(&mut self) -> std::result::Result<(), String> {
        self.used.entries = self.used.entries.saturating_add(1);
        if self.used.entries > self.limits.max_entries {
            return Err(format!(
                "archive has more than {} entries",
                self.limits.max_entries
            ));
        }
        Ok(())
    }

    fn remaining_bytes(&self) -> u64 {
        self.limits.max_bytes.saturating_sub(self.used.bytes)
    }

    fn charge_bytes(&mut self, n: u64) -> std::result::Result<(), String> {
        self.used.bytes = self.used.bytes.saturating_add(n);
        if self.used.bytes > self.limits.max_bytes {
            return Err(format!(
                "archive expands beyond {} bytes",
                self.limits.max_bytes
            ));
        }
        Ok(())
    }
}

/// Relative path for an archive entry name.
///
/// `None` when the name is empty, absolute, or climbs out of the extraction
/// root through `..`. Backslashes are treated as separators.
pub fn entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn unsafe_entry(name: &str) -> String {
    format!("entry '{name}' escapes the extraction directory")
}

/// Copy one entry to `target`, charging what was written to the budget.
fn write_capped<R: Read>(
    reader: R,
    target: &Path,
    budget: &mut ExtractionBudget,
) -> std::result::Result<(), String> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let mut out = File::create(target).map_err(|e| e.to_string())?;
    let mut bounded = BoundedReader::new(reader, budget.remaining_bytes().saturating_add(1));
    let written = io::copy(&mut bounded, &mut out).map_err(|e| e.to_string())?;
    budget.charge_bytes(written)
}

fn create_dir(target: &Path) -> std::result::Result<(), String> {
    fs::create_dir_all(target).map_err(|e| e.to_string())
}

/// Unpack `src` into the existing directory `dest`.
///
/// A single gzip stream is written to `dest/<base>`. Entries whose names
/// leave `dest` are rejected; tar links and other special entries are
/// skipped.
pub fn extract(
    kind: ArchiveKind,
    src: &Path,
    dest: &Path,
    base: &str,
    limits: ExtractionLimits,
) -> Result<Extracted> {
    debug!(kind = %kind, src = ?src, dest = ?dest, "Extracting archive");
    let file = File::open(src)?;
    let mut budget = ExtractionBudget::new(limits);
    let outcome = match kind {
        ArchiveKind::Zip => unpack_zip(file, dest, &mut budget),
        ArchiveKind::TarGz => unpack_tar(GzDecoder::new(file), dest, &mut budget),
        ArchiveKind::TarBz2 => unpack_tar(BzDecoder::new(file), dest, &mut budget),
        ArchiveKind::Gzip => budget
            .note_entry()
            .and_then(|()| write_capped(MultiGzDecoder::new(file), &dest.join(base), &mut budget)),
        ArchiveKind::SevenZip => return extract_7z(src, dest, &mut budget),
    };
    outcome.map_err(|message| PkgTriageError::extraction(src, message))?;
    Ok(budget.used)
}

fn unpack_zip(
    file: File,
    dest: &Path,
    budget: &mut ExtractionBudget,
) -> std::result::Result<(), String> {
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| e.to_string())?;
        budget.note_entry()?;
        let name = entry.name().to_string();
        let rel = entry_path(&name).ok_or_else(|| unsafe_entry(&name))?;
        if entry.is_dir() {
            create_dir(&dest.join(rel))?;
        } else {
            write_capped(&mut entry, &dest.join(rel), budget)?;
        }
    }
    Ok(())
}

fn unpack_tar<R: Read>(
    reader: R,
    dest: &Path,
    budget: &mut ExtractionBudget,
) -> std::result::Result<(), String> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        budget.note_entry()?;
        let name = entry
            .path()
            .map_err(|e| e.to_string())?
            .to_string_lossy()
            .into_owned();
        let rel = entry_path(&name).ok_or_else(|| unsafe_entry(&name))?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            create_dir(&dest.join(rel))?;
        } else if entry_type.is_file() {
            write_capped(&mut entry, &dest.join(rel), budget)?;
        } else {
            debug!(entry = %name, ?entry_type, "Skipping non-regular tar entry");
        }
    }
    Ok(())
}

#[cfg(feature = "sevenz")]
fn extract_7z(src: &Path, dest: &Path, budget: &mut ExtractionBudget) -> Result<Extracted> {
    let mut failure: Option<String> = None;
    sevenz_rust::decompress_file_with_extract_fn(
        src,
        dest,
        |entry: &sevenz_rust::SevenZArchiveEntry, reader: &mut dyn Read, _joined: &PathBuf| {
            if failure.is_some() {
                return Ok(false);
            }
            let step = budget.note_entry().and_then(|()| {
                let rel = entry_path(entry.name()).ok_or_else(|| unsafe_entry(entry.name()))?;
                if entry.is_directory {
                    create_dir(&dest.join(rel))
                } else {
                    write_capped(reader, &dest.join(rel), budget)
                }
            });
            match step {
                Ok(()) => Ok(true),
                Err(message) => {
                    failure = Some(message);
                    Ok(false)
                }
            }
        },
    )
    .map_err(|e| PkgTriageError::extraction(src, e))?;
    match failure {
        Some(message) => Err(PkgTriageError::extraction(src, message)),
        None => Ok(budget.used),
    }
}

#[cfg(not(feature = "sevenz"))]
fn extract_7z(_src: &Path, _dest: &Path, _budget: &mut ExtractionBudget) -> Result<Extracted> {
    Err(PkgTriageError::MissingDecompressor {
        kind: ArchiveKind::SevenZip.label().to_string(),
    })
}
