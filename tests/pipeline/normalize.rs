//! Normalizer behaviour across archive kinds.

use crate::common::*;
use pkgtriage::config::SnapshotConfig;
use pkgtriage::core::id::ClassificationId;
use pkgtriage::error::ErrorClass;
use pkgtriage::normalize::{Normalizer, ScratchLayout};
use pkgtriage::PkgTriageError;
use std::path::Path;
use tempfile::TempDir;

fn normalizer(root: &Path) -> Normalizer {
    Normalizer::new(
        ScratchLayout::new(root),
        ClassificationId::from_string("req-1"),
        &SnapshotConfig::default(),
    )
}

fn assert_two_members(archive: &Path, scratch: &Path) {
    let normalized = normalizer(scratch).normalize(archive).unwrap();
    let snapshot = &normalized.snapshot;
    assert_eq!(snapshot.len(), 2, "archive {archive:?}");
    assert_eq!(snapshot.get("a.py").unwrap().content, "print('a')\n");
    assert_eq!(snapshot.get("b/c.txt").unwrap().content, "nested text\n");
    assert!(normalized.snapshot_path.is_file());
}

#[test]
fn test_every_archive_kind_yields_same_members() {
    let inputs = TempDir::new().unwrap();
    let archives = [
        zip_package(inputs.path(), "pkg.zip", TWO_FILES),
        zip_package(inputs.path(), "pkg-1.0-py3-none-any.whl", TWO_FILES),
        tar_gz_package(inputs.path(), "pkg-1.0.tar.gz", TWO_FILES),
        tar_gz_package(inputs.path(), "pkg-1.0.tgz", TWO_FILES),
        tar_bz2_package(inputs.path(), "pkg-1.0.tar.bz2", TWO_FILES),
    ];
    for archive in &archives {
        let scratch = TempDir::new().unwrap();
        assert_two_members(archive, scratch.path());
    }
}

#[cfg(feature = "sevenz")]
#[test]
fn test_sevenz_yields_same_members() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = sevenz_package(inputs.path(), "pkg-1.0.7z", TWO_FILES);
    assert_two_members(&archive, scratch.path());
}

#[cfg(feature = "sevenz")]
#[test]
fn test_sevenz_traversal_rejected() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = sevenz_package(
        inputs.path(),
        "evil.7z",
        &[("ok.py", "x = 1\n"), ("../../../escaped.txt", "pwned\n")],
    );

    let err = normalizer(scratch.path()).normalize(&archive).unwrap_err();
    assert!(matches!(err, PkgTriageError::Extraction { ref message, .. } if message.contains("escapes")));
    assert_eq!(err.class(), ErrorClass::Extraction);
    // extraction lands in <scratch>/packages/req-1/evil
    assert!(!scratch.path().join("escaped.txt").exists());
    assert!(!scratch.path().join("packages/escaped.txt").exists());
}

#[test]
fn test_zip_traversal_rejected() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(
        inputs.path(),
        "evil.zip",
        &[("../../../escaped.txt", "pwned\n")],
    );

    let err = normalizer(scratch.path()).normalize(&archive).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Extraction);
    assert!(!scratch.path().join("escaped.txt").exists());
}

#[test]
fn test_extraction_limits_from_config() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = tar_gz_package(inputs.path(), "pkg-1.0.tar.gz", TWO_FILES);
    let config = SnapshotConfig {
        max_entries: 1,
        ..SnapshotConfig::default()
    };
    let normalizer = Normalizer::new(
        ScratchLayout::new(scratch.path()),
        ClassificationId::from_string("req-1"),
        &config,
    );

    let err = normalizer.normalize(&archive).unwrap_err();
    assert!(matches!(err, PkgTriageError::Extraction { ref message, .. } if message.contains("entries")));

    let config = SnapshotConfig {
        max_extracted_bytes: 8,
        ..SnapshotConfig::default()
    };
    let normalizer = Normalizer::new(
        ScratchLayout::new(scratch.path()),
        ClassificationId::from_string("req-1"),
        &config,
    );
    let err = normalizer.normalize(&archive).unwrap_err();
    assert!(matches!(err, PkgTriageError::Extraction { ref message, .. } if message.contains("bytes")));
}

#[test]
fn test_single_gzip_member() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let gz = gz_file(inputs.path(), "notes.txt.gz", "hello\n");

    let normalized = normalizer(scratch.path()).normalize(&gz).unwrap();
    assert_eq!(normalized.snapshot.len(), 1);
    assert_eq!(normalized.snapshot.get("notes.txt").unwrap().content, "hello\n");
}

#[test]
fn test_normalizing_twice_is_identical() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = tar_gz_package(inputs.path(), "pkg-1.0.tar.gz", TWO_FILES);
    let normalizer = normalizer(scratch.path());

    let first = normalizer.normalize(&archive).unwrap();
    let first_json = std::fs::read_to_string(&first.snapshot_path).unwrap();
    let second = normalizer.normalize(&archive).unwrap();
    let second_json = std::fs::read_to_string(&second.snapshot_path).unwrap();

    assert_eq!(first.snapshot_path, second.snapshot_path);
    assert_eq!(first_json, second_json);
    assert_eq!(first.snapshot.digest(), second.snapshot.digest());
}

#[test]
fn test_unsupported_suffix_creates_nothing() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let rar = inputs.path().join("pkg.rar");
    std::fs::write(&rar, b"Rar!").unwrap();

    let err = normalizer(scratch.path()).normalize(&rar).unwrap_err();
    assert!(matches!(err, PkgTriageError::UnsupportedFormat { ref suffix, .. } if suffix == ".rar"));
    assert_eq!(err.class(), ErrorClass::Extraction);
    assert!(!err.is_retryable());
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_archive_is_extraction_error() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let bad = inputs.path().join("broken.zip");
    std::fs::write(&bad, b"not a zip at all").unwrap();

    let err = normalizer(scratch.path()).normalize(&bad).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Extraction);
}

#[test]
fn test_folder_is_walked_in_place() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let pkg = inputs.path().join("demo");
    std::fs::create_dir_all(pkg.join("b")).unwrap();
    std::fs::write(pkg.join("a.py"), "print('a')\n").unwrap();
    std::fs::write(pkg.join("b/c.txt"), "nested text\n").unwrap();

    let normalized = normalizer(scratch.path()).normalize(&pkg).unwrap();
    assert_eq!(normalized.snapshot.len(), 2);
    assert_eq!(normalized.source_root, pkg);
    assert!(normalized.kind.is_none());
}
