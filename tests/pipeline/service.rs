//! Request intake and persistence through the classification service.

use crate::common::*;
use pkgtriage::core::id::ClassificationId;
use pkgtriage::core::record::Classification;
use pkgtriage::ingress::{ClassificationService, ClassifyRequest};
use pkgtriage::store::{ClassificationStore, MemoryStore, SqliteStore, CLASSIFIER_AGENT_GROUP};
use pkgtriage::{Classifier, PkgTriageError};
use std::sync::Arc;
use tempfile::TempDir;

fn service(store: Arc<dyn ClassificationStore>, scratch: &TempDir) -> ClassificationService {
    let classifier = Classifier::new(
        Arc::new(archive_engine(follow_imports_script())),
        test_config(scratch.path()),
    );
    ClassificationService::new(classifier, store).with_experiment_id("exp-7")
}

#[tokio::test]
async fn test_two_submissions_are_persisted() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let store: Arc<dyn ClassificationStore> =
        Arc::new(SqliteStore::open(&db.path().join("triage.sqlite")).unwrap());
    let prompt = store.register_prompt(CLASSIFIER_AGENT_GROUP, "classify carefully").unwrap();
    let service = service(store, &scratch);

    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());
    let bytes = std::fs::read(&archive).unwrap();
    let first = service
        .submit(ClassifyRequest::upload("demo-0.1.0.zip", bytes.clone()).with_dataset("ds-1"))
        .await
        .unwrap();
    let second = service
        .submit(ClassifyRequest::upload("demo-0.1.0.zip", bytes))
        .await
        .unwrap();
    assert_ne!(first.classification_id, second.classification_id);

    let record = service.get(&first.classification_id).unwrap();
    assert_eq!(record.package_name, "demo");
    assert_eq!(record.classification, Classification::Malicious);
    assert_eq!(record.suspicious_files, vec!["helper.py"]);
    assert_eq!(record.prompt_id, prompt.prompt_id);
    assert_eq!(record.experiment_id.as_deref(), Some("exp-7"));
    assert_eq!(record.dataset_id.as_deref(), Some("ds-1"));
    assert_eq!(record.model, "scripted-test");
    let blob: serde_json::Value = serde_json::from_str(&record.package_metadata).unwrap();
    assert_eq!(blob["metadata"]["name"], "demo");

    let listed = service.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].classification_id, first.classification_id);
    assert_eq!(listed[1].classification_id, second.classification_id);
}

#[tokio::test]
async fn test_source_file_upload_is_classified() {
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.register_prompt(CLASSIFIER_AGENT_GROUP, "v1").unwrap();
    let classifier = Classifier::new(
        Arc::new(archive_engine(benign_answer())),
        test_config(scratch.path()),
    );
    let service = ClassificationService::new(classifier, store);

    let result = service
        .submit(ClassifyRequest::upload("setup.py", SETUP_PY.as_bytes().to_vec()))
        .await
        .unwrap();
    assert_eq!(result.package_name, "setup.py");
    assert_eq!(result.package_metadata.files.total_files, 1);
}

#[tokio::test]
async fn test_malformed_requests_are_client_errors() {
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.register_prompt(CLASSIFIER_AGENT_GROUP, "v1").unwrap();
    let service = service(store, &scratch);

    let neither = service.submit(ClassifyRequest::default()).await.unwrap_err();
    assert_eq!(neither.http_status(), 400);

    let mut both = ClassifyRequest::upload("demo.zip", vec![]);
    both.folder_path = Some(scratch.path().to_path_buf());
    assert_eq!(service.submit(both).await.unwrap_err().http_status(), 400);

    let text = service
        .submit(ClassifyRequest::upload("notes.txt", b"hi".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(text.http_status(), 400);
}

#[tokio::test]
async fn test_no_active_prompt_is_server_error() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let service = service(Arc::new(MemoryStore::new()), &scratch);
    let archive = zip_package(inputs.path(), "demo-0.1.0.zip", &demo_package());

    let err = service
        .submit(ClassifyRequest::folder(inputs.path()).with_guidelines("n/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, PkgTriageError::NoActivePrompt { .. }));
    assert_eq!(err.http_status(), 500);
    assert!(archive.exists());
    assert!(service.list().unwrap().is_empty());
}

#[test]
fn test_unknown_record_is_not_found() {
    let scratch = TempDir::new().unwrap();
    let service = service(Arc::new(MemoryStore::new()), &scratch);
    let err = service.get(&ClassificationId::from_string("missing")).unwrap_err();
    assert_eq!(err.http_status(), 404);
}
