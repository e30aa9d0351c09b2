//! Classification entry point: retry wrapper and result assembly.
//!
//! One identifier is issued per request and reused by every internal
//! attempt. Each attempt starts from a fresh context; only retry-eligible
//! failures are retried, after a fixed delay.

use crate::config::{PipelineConfig, RetryConfig};
use crate::core::context::is_unknown;
use crate::core::id::ClassificationId;
use crate::core::record::{ClassificationResult, MetadataBlob};
use crate::engine::DecisionEngine;
use crate::error::{PkgTriageError, Result};
use crate::log_error;
use crate::normalize::{archive, RequestScratch};
use crate::stages::{Pipeline, PipelineOutcome};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Runs the pipeline with retries and assembles the caller-facing result.
#[derive(Clone)]
pub struct Classifier {
    pipeline: Pipeline,
}

impl Classifier {
    pub fn new(engine: Arc<dyn DecisionEngine>, config: PipelineConfig) -> Self {
        Self {
            pipeline: Pipeline::new(engine, config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Model identifier of the underlying engine.
    pub fn model(&self) -> &str {
        self.pipeline.engine().model()
    }

    /// Classify the package at `path` under a fresh identifier.
    pub async fn classify(
        &self,
        path: &Path,
        guidelines: Option<&str>,
    ) -> Result<ClassificationResult> {
        self.classify_with_id(ClassificationId::new(), path, guidelines)
            .await
    }

    /// Classify under a caller-issued identifier. The request's scratch tree
    /// is removed when this returns, whatever the outcome.
    pub async fn classify_with_id(
        &self,
        id: ClassificationId,
        path: &Path,
        guidelines: Option<&str>,
    ) -> Result<ClassificationResult> {
        let span = info_span!("classify", request_id = %id, path = ?path);
        async {
            let config = self.pipeline.config();
            let _scratch = RequestScratch::new(
                self.pipeline.layout(),
                id.clone(),
                config.scratch.keep_artifacts,
            );
            let (outcome, attempts) = self.run_with_retry(&id, path, guidelines, &config.retry).await?;
            let result = assemble(id.clone(), path, outcome, attempts);
            info!(
                package = %result.package_name,
                classification = %result.classification,
                attempts,
                "Classification completed"
            );
            Ok::<_, PkgTriageError>(result)
        }
        .instrument(span)
        .await
    }

    async fn run_with_retry(
        &self,
        id: &ClassificationId,
        path: &Path,
        guidelines: Option<&str>,
        retry: &RetryConfig,
    ) -> Result<(PipelineOutcome, u32)> {
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.pipeline.run(id, path, guidelines).await {
                Ok(outcome) => return Ok((outcome, attempt)),
                Err(e) if !e.is_retryable() => {
                    return Err(log_error!(e, "classification failed without retry"));
                }
                Err(e) if attempt >= max_attempts => {
                    let err = PkgTriageError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    };
                    return Err(log_error!(err));
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        class = %e.class(),
                        "Pipeline attempt failed, retrying in {:?}",
                        retry.delay()
                    );
                    tokio::time::sleep(retry.delay()).await;
                }
            }
        }
    }
}

/// Name used when no metadata name was recovered: the input's base name
/// without its archive suffix.
pub fn fallback_package_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match archive::strip_archive_suffix(&name) {
        Some((base, _)) if !base.is_empty() => base.to_string(),
        _ => name,
    }
}

fn assemble(
    id: ClassificationId,
    input: &Path,
    outcome: PipelineOutcome,
    attempts: u32,
) -> ClassificationResult {
    let PipelineOutcome { context, output } = outcome;
    let package_name = if is_unknown(&context.metadata.name) {
        fallback_package_name(input)
    } else {
        context.metadata.name.clone()
    };
    let package_version = context.metadata.version.clone();

    ClassificationResult {
        classification_id: id,
        package_name,
        package_version,
        classification: output.classification,
        justification: output.justification,
        suspicious_files: output.suspicious_files,
        package_metadata: MetadataBlob {
            metadata: context.metadata,
            files: context.files,
            package_location: context.package_location,
            package_formatted_path: context.package_formatted_path,
            error: context.error,
            inspected_files: context.inspected_files,
        },
        messages: context.messages,
        attempts,
    }
}
