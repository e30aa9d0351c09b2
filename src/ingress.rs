//! Request intake: staging of uploads and folders, classification and
//! persistence of the resulting record.

use crate::classify::Classifier;
use crate::core::id::ClassificationId;
use crate::core::record::{ClassificationRecord, ClassificationResult, RecordSummary};
use crate::error::{PkgTriageError, Result};
use crate::normalize::archive::ArchiveKind;
use crate::normalize::{RequestScratch, ScratchLayout};
use crate::store::{ClassificationStore, CLASSIFIER_AGENT_GROUP};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A classification request. Exactly one of `upload` and `folder_path` must be set.
#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
    pub upload: Option<Upload>,
    pub folder_path: Option<PathBuf>,
    pub guidelines: Option<String>,
    pub dataset_id: Option<String>,
}

impl ClassifyRequest {
    pub fn upload(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            upload: Some(Upload {
                filename: filename.into(),
                content_type: None,
                bytes,
            }),
            ..Self::default()
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            folder_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_guidelines(mut self, guidelines: impl Into<String>) -> Self {
        self.guidelines = Some(guidelines.into());
        self
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        match (&self.upload, &self.folder_path) {
            (Some(_), Some(_)) => Err(PkgTriageError::InvalidRequest(
                "provide either a file or a folder path, not both".into(),
            )),
            (None, None) => Err(PkgTriageError::InvalidRequest(
                "provide a file upload or a folder path".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Place the request's input under the upload directory and return the path
/// the classifier should analyse.
pub fn stage_request(
    layout: &ScratchLayout,
    id: &ClassificationId,
    request: &ClassifyRequest,
) -> Result<PathBuf> {
    request.validate()?;
    let dir = layout.upload_dir(id);
    fs::create_dir_all(&dir)?;
    match (&request.upload, &request.folder_path) {
        (Some(upload), None) => stage_upload(&dir, upload),
        (None, Some(folder)) => stage_folder(&dir, folder),
        _ => Err(PkgTriageError::Internal("request validated twice".into())),
    }
}

fn upload_name(filename: &str) -> Result<String> {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| PkgTriageError::InvalidRequest(format!("invalid file name '{filename}'")))
}

fn stage_upload(dir: &Path, upload: &Upload) -> Result<PathBuf> {
    let name = upload_name(&upload.filename)?;
    if ArchiveKind::detect_name(&name).is_some() {
        let dest = dir.join(&name);
        fs::write(&dest, &upload.bytes)?;
        debug!(path = ?dest, content_type = ?upload.content_type, "Staged archive upload");
        return Ok(dest);
    }
    if name.to_ascii_lowercase().ends_with(".py") {
        return wrap_source_file(dir, &name, &upload.bytes);
    }
    Err(PkgTriageError::InvalidRequest(format!(
        "unsupported upload '{name}': expected a .py file or one of {}",
        ArchiveKind::supported_suffixes()
    )))
}

/// Wrap a lone source file into `<name>.zip` with the file as its only entry.
fn wrap_source_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dest = dir.join(format!("{name}.zip"));
    let file = fs::File::create(&dest)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, options)
        .map_err(|e| PkgTriageError::extraction(&dest, e))?;
    zip.write_all(bytes)?;
    zip.finish()
        .map_err(|e| PkgTriageError::extraction(&dest, e))?;
    debug!(path = ?dest, "Wrapped source file into archive");
    Ok(dest)
}

fn stage_folder(dir: &Path, folder: &Path) -> Result<PathBuf> {
    if !folder.is_dir() {
        return Err(PkgTriageError::InvalidRequest(format!(
            "folder path {} is not an existing directory",
            folder.display()
        )));
    }
    let name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    let dest = dir.join(name);
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = entry.map_err(|e| PkgTriageError::InvalidRequest(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(folder)
            .map_err(|e| PkgTriageError::Internal(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    debug!(from = ?folder, to = ?dest, "Staged folder");
    Ok(dest)
}

/// Ties staging, classification and persistence together.
pub struct ClassificationService {
    classifier: Classifier,
    store: Arc<dyn ClassificationStore>,
    experiment_id: Option<String>,
}

impl ClassificationService {
    /// Also installs the tracing subscriber described by the classifier's
    /// logging config, unless one is already in place.
    pub fn new(classifier: Classifier, store: Arc<dyn ClassificationStore>) -> Self {
        crate::logging::init_with(&classifier.config().logging);
        Self {
            classifier,
            store,
            experiment_id: None,
        }
    }

    pub fn with_experiment_id(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn ClassificationStore> {
        &self.store
    }

    /// Stage, classify and persist one request.
    pub async fn submit(&self, request: ClassifyRequest) -> Result<ClassificationResult> {
        request.validate()?;
        let prompt = self
            .store
            .active_prompt(CLASSIFIER_AGENT_GROUP)?
            .ok_or_else(crate::store::no_active_prompt)?;

        let id = ClassificationId::new();
        let config = self.classifier.config();
        let layout = ScratchLayout::new(&config.scratch.root);
        let _scratch = RequestScratch::new(layout.clone(), id.clone(), config.scratch.keep_artifacts);
        let input = stage_request(&layout, &id, &request)?;

        let result = self
            .classifier
            .classify_with_id(id, &input, request.guidelines.as_deref())
            .await?;

        let record = ClassificationRecord {
            classification_id: result.classification_id.clone(),
            package_name: result.package_name.clone(),
            package_version: result.package_version.clone(),
            package_metadata: serde_json::to_string(&result.package_metadata)?,
            classification: result.classification,
            justification: result.justification.clone(),
            suspicious_files: result.suspicious_files.clone(),
            prompt_id: prompt.prompt_id,
            experiment_id: self.experiment_id.clone(),
            dataset_id: request.dataset_id,
            model: self.classifier.model().to_string(),
            created_at: Utc::now(),
        };
        self.store.insert(&record)?;
        info!(classification_id = %record.classification_id, "Classification stored");
        Ok(result)
    }

    pub fn get(&self, id: &ClassificationId) -> Result<ClassificationRecord> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<RecordSummary>> {
        self.store.list()
    }
}
