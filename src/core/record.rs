//! Stage outputs, assembled results and persisted records.

use crate::core::context::{FileInventory, PackageMetadata};
use crate::core::id::ClassificationId;
use crate::error::PkgTriageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Verdict for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Malicious,
    Benign,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Malicious => "malicious",
            Classification::Benign => "benign",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = PkgTriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "malicious" => Ok(Classification::Malicious),
            "benign" => Ok(Classification::Benign),
            other => Err(PkgTriageError::Serialization(format!(
                "unknown classification '{other}'"
            ))),
        }
    }
}

/// Final output of the ingest stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestOutput {
    pub package_formatted_path: PathBuf,
}

/// Final output of the metadata stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataOutput(pub PackageMetadata);

/// Final output of the classification stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationOutput {
    pub classification: Classification,
    pub justification: String,
    /// Most suspicious first
    pub suspicious_files: Vec<String>,
}

/// Metadata blob stored alongside a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBlob {
    pub metadata: PackageMetadata,
    pub files: FileInventory,
    pub package_location: PathBuf,
    pub package_formatted_path: Option<PathBuf>,
    /// Soft error left in the context, if any
    pub error: Option<String>,
    /// Files the classification stage fetched
    pub inspected_files: Vec<String>,
}

/// Result handed back to the caller of a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification_id: ClassificationId,
    pub package_name: String,
    pub package_version: String,
    pub classification: Classification,
    pub justification: String,
    pub suspicious_files: Vec<String>,
    pub package_metadata: MetadataBlob,
    /// Trace log of the successful attempt
    pub messages: Vec<String>,
    /// Pipeline attempts used, including the successful one
    pub attempts: u32,
}

/// One persisted classification row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub classification_id: ClassificationId,
    pub package_name: String,
    pub package_version: String,
    /// JSON-encoded [`MetadataBlob`]
    pub package_metadata: String,
    pub classification: Classification,
    pub justification: String,
    pub suspicious_files: Vec<String>,
    pub prompt_id: String,
    pub experiment_id: Option<String>,
    pub dataset_id: Option<String>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            classification_id: self.classification_id.clone(),
            package_name: self.package_name.clone(),
            classification: self.classification,
            justification: self.justification.clone(),
            suspicious_files: self.suspicious_files.clone(),
        }
    }
}

/// Condensed projection returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub classification_id: ClassificationId,
    pub package_name: String,
    pub classification: Classification,
    pub justification: String,
    pub suspicious_files: Vec<String>,
}

/// Versioned instruction text an agent group runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub prompt_id: String,
    pub agent_group: String,
    pub version: u32,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
