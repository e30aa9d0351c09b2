//! End-to-end classification with scripted engines.

use crate::common::*;
use async_trait::async_trait;
use pkgtriage::config::PipelineConfig;
use pkgtriage::core::id::ClassificationId;
use pkgtriage::core::record::Classification;
use pkgtriage::core::snapshot::PackageSnapshot;
use pkgtriage::engine::scripted::{ScriptedEngine, Step};
use pkgtriage::engine::{DecisionEngine, EngineTurn, Exchange, StageRequest};
use pkgtriage::normalize::ScratchLayout;
use pkgtriage::{Classifier, PkgTriageError, Result};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Fails its first `failures` turns with a transient engine error.
struct FlakyEngine {
    inner: ScriptedEngine,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyEngine {
    fn new(inner: ScriptedEngine, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DecisionEngine for FlakyEngine {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn next_turn(&self, request: &StageRequest, transcript: &[Exchange]) -> Result<EngineTurn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PkgTriageError::Engine("upstream unavailable".into()));
        }
        self.inner.next_turn(request, transcript).await
    }
}

fn classifier(engine: impl DecisionEngine + 'static, config: PipelineConfig) -> Classifier {
    Classifier::new(Arc::new(engine), config)
}

#[tokio::test]
async fn test_follows_one_import_and_flags_known_files() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());
    let mut config = test_config(scratch.path());
    config.scratch.keep_artifacts = true;

    let result = classifier(archive_engine(follow_imports_script()), config.clone())
        .classify(&archive, None)
        .await
        .unwrap();

    assert_eq!(result.classification, Classification::Malicious);
    assert_eq!(result.package_name, "demo");
    assert_eq!(result.package_version, "0.1.0");
    assert_eq!(result.attempts, 1);

    let inspected = &result.package_metadata.inspected_files;
    assert_eq!(inspected, &vec!["setup.py".to_string(), "helper.py".to_string()]);
    let extra = inspected
        .iter()
        .filter(|f| !config.inspection.is_entry_point(f))
        .count();
    assert!(extra <= 1);

    let snapshot_path = result.package_metadata.package_formatted_path.clone().unwrap();
    let snapshot = PackageSnapshot::load(&snapshot_path).unwrap();
    assert!(!result.suspicious_files.is_empty());
    for file in &result.suspicious_files {
        assert!(snapshot.contains(file), "{file} not in snapshot");
    }
    assert!(result
        .messages
        .iter()
        .any(|m| m == "Archive extraction and formatting completed"));
}

#[tokio::test]
async fn test_missing_metadata_is_soft() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = tar_gz_package(
        inputs.path(),
        "nometa-0.2.tar.gz",
        &[("setup.py", "print('x')\n"), ("README", "readme\n")],
    );

    let result = classifier(archive_engine(benign_answer()), test_config(scratch.path()))
        .classify(&archive, Some("PyPI typosquats are common"))
        .await
        .unwrap();

    assert_eq!(result.classification, Classification::Benign);
    assert_eq!(result.package_name, "nometa-0.2");
    assert_eq!(result.package_version, "NA");
    assert_eq!(result.package_metadata.metadata.author, "NA");
    let error = result.package_metadata.error.clone().unwrap();
    assert!(error.contains("metadata details of the package is not found"));
}

#[tokio::test]
async fn test_file_inventory_counts() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(
        inputs.path(),
        "five.zip",
        &[
            ("setup.py", "x = 1\n"),
            ("pkg/__init__.py", ""),
            ("pkg/data.json", "{}"),
            ("README.md", "# five\n"),
            ("LICENSE", "MIT\n"),
        ],
    );

    let result = classifier(archive_engine(benign_answer()), test_config(scratch.path()))
        .classify(&archive, None)
        .await
        .unwrap();

    let files = &result.package_metadata.files;
    assert_eq!(files.total_files, 5);
    assert_eq!(files.python_files_count, 2);
    assert!(files.python_files.contains(&"pkg/__init__.py".to_string()));
}

#[tokio::test]
async fn test_folder_input() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let pkg = inputs.path().join("demo");
    std::fs::create_dir_all(&pkg).unwrap();
    for (name, body) in demo_package() {
        std::fs::write(pkg.join(name), body).unwrap();
    }

    let result = classifier(folder_engine(follow_imports_script()), test_config(scratch.path()))
        .classify(&pkg, None)
        .await
        .unwrap();
    assert_eq!(result.package_name, "demo");
    assert_eq!(result.suspicious_files, vec!["helper.py"]);
}

#[tokio::test]
async fn test_transient_failures_are_retried_under_one_id() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());
    let engine = FlakyEngine::new(archive_engine(benign_answer()), 2);
    let id = ClassificationId::new();

    let result = classifier(engine, test_config(scratch.path()))
        .classify_with_id(id.clone(), &archive, None)
        .await
        .unwrap();

    assert_eq!(result.classification_id, id);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.classification, Classification::Benign);
}

#[tokio::test]
async fn test_exhausted_retries_report_attempts() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());
    let engine = archive_engine(vec![Step::answer(json!({ "classification": "maybe" }))]);
    let mut config = test_config(scratch.path());
    config.retry.max_attempts = 2;
    config.stages.classify = 2;

    let err = classifier(engine, config)
        .classify(&archive, None)
        .await
        .unwrap_err();

    match err {
        PkgTriageError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, PkgTriageError::StageExhausted { rounds: 2, .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_archive_fails_fast_and_cleans_up() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let rar = inputs.path().join("pkg-1.0.rar");
    std::fs::write(&rar, b"Rar!").unwrap();
    let engine = Arc::new(FlakyEngine::new(archive_engine(benign_answer()), 0));
    let id = ClassificationId::new();

    let err = Classifier::new(engine.clone(), test_config(scratch.path()))
        .classify_with_id(id.clone(), &rar, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PkgTriageError::UnsupportedFormat { .. }));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    for dir in ScratchLayout::new(scratch.path()).request_dirs(&id) {
        assert!(!dir.exists(), "{dir:?} left behind");
    }
}

#[tokio::test]
async fn test_scratch_removed_after_success() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());
    let id = ClassificationId::new();

    let result = classifier(archive_engine(benign_answer()), test_config(scratch.path()))
        .classify_with_id(id.clone(), &archive, None)
        .await
        .unwrap();

    assert!(!result
        .package_metadata
        .package_formatted_path
        .unwrap()
        .exists());
    for dir in ScratchLayout::new(scratch.path()).request_dirs(&id) {
        assert!(!dir.exists());
    }
}
