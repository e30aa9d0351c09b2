//! Error types for the package triage pipeline.
//!
//! This module provides structured error handling using thiserror. Every
//! variant maps onto one [`ErrorClass`], which decides whether a failure is
//! reported immediately or retried by the pipeline. Metadata problems never
//! surface here; they are recorded in the analysis context's error slot.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PkgTriageError {
    /// Input path does not exist
    #[error("Path not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Malformed classification request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Archive suffix not recognised by the normalizer
    #[error("Unsupported archive format {suffix}. Supported: {supported}")]
    UnsupportedFormat { suffix: String, supported: String },

    /// Corrupt archive or failed decompression
    #[error("Extraction failed for {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    /// Archive kind recognised but its decompressor is compiled out
    #[error("No decompressor available for {kind} archives")]
    MissingDecompressor { kind: String },

    /// A stage used its whole round budget without a valid output
    #[error("Stage '{stage}' exhausted its budget of {rounds} rounds")]
    StageExhausted { stage: String, rounds: u32 },

    /// Persistence layer failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Insert attempted without an active classification prompt
    #[error("No active prompt found for agent group '{agent_group}'")]
    NoActivePrompt { agent_group: String },

    /// Lookup by identifier found nothing
    #[error("Classification result not found: {0}")]
    RecordNotFound(String),

    /// Remote round trip timeout
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Decision engine failure (transport, protocol, refusal)
    #[error("Decision engine error: {0}")]
    Engine(String),

    /// Every pipeline attempt failed
    #[error("Pipeline failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<PkgTriageError>,
    },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PkgTriageError>;

/// Coarse failure classes driving retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Input,
    Extraction,
    StageExhausted,
    Persistence,
    Transient,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorClass::*;
        match self {
            Input => write!(f, "InputError"),
            Extraction => write!(f, "ExtractionError"),
            StageExhausted => write!(f, "StageExhausted"),
            Persistence => write!(f, "PersistenceError"),
            Transient => write!(f, "TransientError"),
        }
    }
}

impl PkgTriageError {
    pub fn class(&self) -> ErrorClass {
        use PkgTriageError::*;
        match self {
            NotFound { .. } | InvalidRequest(_) => ErrorClass::Input,
            UnsupportedFormat { .. } | Extraction { .. } | MissingDecompressor { .. } => {
                ErrorClass::Extraction
            }
            StageExhausted { .. } => ErrorClass::StageExhausted,
            Persistence(_) | NoActivePrompt { .. } | RecordNotFound(_) => ErrorClass::Persistence,
            RetriesExhausted { last, .. } => last.class(),
            Timeout { .. } | Engine(_) | Io(_) | Serialization(_) | Internal(_) => {
                ErrorClass::Transient
            }
        }
    }

    /// Whether the whole pipeline may be re-run after this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PkgTriageError::RetriesExhausted { .. })
            && matches!(
                self.class(),
                ErrorClass::StageExhausted | ErrorClass::Transient
            )
    }

    /// Status code the ingress layer reports for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            PkgTriageError::RecordNotFound(_) => 404,
            e if e.class() == ErrorClass::Input => 400,
            _ => 500,
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        PkgTriageError::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for PkgTriageError {
    fn from(err: serde_json::Error) -> Self {
        PkgTriageError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for PkgTriageError {
    fn from(err: rusqlite::Error) -> Self {
        PkgTriageError::Persistence(err.to_string())
    }
}

/// Per-stage round budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StageBudgets {
    /// Rounds allowed for the ingest stage
    pub ingest: u32,
    /// Rounds allowed for the metadata stage
    pub metadata: u32,
    /// Rounds allowed for the classification stage
    pub classify: u32,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            ingest: 5,
            metadata: 5,
            classify: 15,
        }
    }
}

impl fmt::Display for StageBudgets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Budget: {} ingest rounds, {} metadata rounds, {} classify rounds",
            self.ingest, self.metadata, self.classify
        )
    }
}
