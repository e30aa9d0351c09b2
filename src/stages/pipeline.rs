//! One attempt of the three-stage pipeline.

use super::runner::{StageOutput, StageRunner};
use super::{prompts, StageKind};
use crate::config::PipelineConfig;
use crate::core::context::AnalysisContext;
use crate::core::id::ClassificationId;
use crate::core::record::ClassificationOutput;
use crate::engine::DecisionEngine;
use crate::error::{PkgTriageError, Result};
use crate::normalize::{Normalizer, ScratchLayout};
use crate::tools::ToolSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Context and classification of a completed attempt.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub context: AnalysisContext,
    pub output: ClassificationOutput,
}

/// Runs ingest, metadata and classify in order over a fresh context.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn DecisionEngine>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn DecisionEngine>, config: PipelineConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn DecisionEngine> {
        &self.engine
    }

    pub fn layout(&self) -> ScratchLayout {
        ScratchLayout::new(&self.config.scratch.root)
    }

    /// Run all three stages once.
    pub async fn run(
        &self,
        request_id: &ClassificationId,
        input: &Path,
        guidelines: Option<&str>,
    ) -> Result<PipelineOutcome> {
        let mut ctx = AnalysisContext::new(
            request_id.clone(),
            input,
            guidelines.map(str::to_string),
        );
        let normalizer = Normalizer::new(self.layout(), request_id.clone(), &self.config.snapshot);
        let runner = StageRunner::new(
            Arc::clone(&self.engine),
            Arc::new(ToolSet::new(normalizer)),
            Duration::from_secs(self.config.engine.round_timeout_secs),
            self.config.inspection.clone(),
        );
        let budgets = &self.config.stages;

        let stage = StageKind::Ingest;
        let input_msg = prompts::ingest_input(&ctx);
        runner
            .run(stage, &mut ctx, stage.budget(budgets), prompts::ingest_instructions(), input_msg)
            .await?;
        info!(snapshot = ?ctx.package_formatted_path, "Package ingested");

        let stage = StageKind::Metadata;
        let input_msg = prompts::metadata_input(&ctx);
        runner
            .run(stage, &mut ctx, stage.budget(budgets), prompts::metadata_instructions(), input_msg)
            .await?;
        info!(package = %ctx.metadata.name, files = ctx.files.total_files, "Metadata extracted");

        let stage = StageKind::Classify;
        let instructions = prompts::classify_instructions(&self.config.inspection, ctx.guidelines.as_deref());
        let input_msg = prompts::classify_input(&ctx);
        let output = match runner
            .run(stage, &mut ctx, stage.budget(budgets), instructions, input_msg)
            .await?
        {
            StageOutput::Classify(output) => output,
            other => {
                return Err(PkgTriageError::Internal(format!(
                    "classify stage produced {other:?}"
                )))
            }
        };
        info!(classification = %output.classification, "Package classified");

        Ok(PipelineOutcome {
            context: ctx,
            output,
        })
    }
}
