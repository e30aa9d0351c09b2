//! Bounded round loop for one stage.
//!
//! # Invariants
//! - The engine is consulted at most `max_rounds` times per stage.
//! - A final answer that fails validation is fed back and consumes its round.
//! - Tool deltas are merged in call order after every round.

use super::StageKind;
use crate::config::InspectionPolicy;
use crate::core::context::AnalysisContext;
use crate::core::record::{ClassificationOutput, IngestOutput, MetadataOutput};
use crate::core::snapshot::PackageSnapshot;
use crate::engine::{DecisionEngine, EngineTurn, Exchange, StageRequest};
use crate::error::{PkgTriageError, Result};
use crate::timeout::{with_timeout, TimeoutConfig};
use crate::tools::ToolSet;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// A validated stage answer.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Ingest(IngestOutput),
    Metadata(MetadataOutput),
    Classify(ClassificationOutput),
}

/// Drives stages against one engine and one tool set.
pub struct StageRunner {
    engine: Arc<dyn DecisionEngine>,
    tools: Arc<ToolSet>,
    round_timeout: Duration,
    policy: InspectionPolicy,
}

impl StageRunner {
    pub fn new(
        engine: Arc<dyn DecisionEngine>,
        tools: Arc<ToolSet>,
        round_timeout: Duration,
        policy: InspectionPolicy,
    ) -> Self {
        Self {
            engine,
            tools,
            round_timeout,
            policy,
        }
    }

    /// Run `stage` until it produces a valid answer or exhausts `max_rounds`.
    pub async fn run(
        &self,
        stage: StageKind,
        ctx: &mut AnalysisContext,
        max_rounds: u32,
        instructions: String,
        input: String,
    ) -> Result<StageOutput> {
        let span = crate::span_trace!("stage", stage = %stage, max_rounds);
        self.run_rounds(stage, ctx, max_rounds, instructions, input)
            .instrument(span)
            .await
    }

    async fn run_rounds(
        &self,
        stage: StageKind,
        ctx: &mut AnalysisContext,
        max_rounds: u32,
        instructions: String,
        input: String,
    ) -> Result<StageOutput> {
        let tool_specs: Vec<_> = stage.tools().iter().map(|k| k.spec()).collect();
        let mut transcript: Vec<Exchange> = Vec::new();
        let mut normalization_failure: Option<PkgTriageError> = None;
        let mut overrun_logged = false;

        for round in 1..=max_rounds {
            let request = StageRequest {
                stage,
                instructions: instructions.clone(),
                input: input.clone(),
                tools: tool_specs.clone(),
                output_schema: stage.output_schema(),
                context: ctx.prompt_view(),
                max_rounds,
                round,
            };
            let timeout = TimeoutConfig::from_duration(
                self.round_timeout,
                format!("{stage} round {round}"),
            );
            let turn = with_timeout(timeout, self.engine.next_turn(&request, &transcript)).await?;

            match turn {
                EngineTurn::ToolCalls(calls) => {
                    if calls.is_empty() {
                        transcript.push(Exchange::Rejected {
                            output: Value::Null,
                            reason: "empty turn: call a tool or give the final answer".to_string(),
                        });
                        continue;
                    }
                    debug!(round, calls = calls.len(), "Executing tool calls");
                    let shared = Arc::new(ctx.clone());
                    let outcomes = self.tools.invoke_all(&calls, stage.tools(), shared).await;
                    let mut results = Vec::with_capacity(outcomes.len());
                    for (result, delta) in outcomes {
                        if let Some(failure) = ctx.apply(delta) {
                            normalization_failure = Some(failure);
                        }
                        results.push(result);
                    }
                    if stage == StageKind::Classify && !overrun_logged {
                        overrun_logged = self.log_inspection_overrun(ctx);
                    }
                    transcript.push(Exchange::Tools { calls, results });
                }
                EngineTurn::Final(value) => match validate(stage, &value, ctx) {
                    Ok(output) => {
                        info!(round, "Stage completed");
                        return Ok(output);
                    }
                    Err(reason) => {
                        if stage == StageKind::Ingest && ctx.package_formatted_path.is_none() {
                            if let Some(failure) = normalization_failure.take() {
                                return Err(failure);
                            }
                        }
                        warn!(round, reason = %reason, "Stage output rejected");
                        transcript.push(Exchange::Rejected {
                            output: value,
                            reason,
                        });
                    }
                },
            }
        }

        if stage == StageKind::Ingest && ctx.package_formatted_path.is_none() {
            if let Some(failure) = normalization_failure {
                return Err(failure);
            }
        }
        warn!("Stage exhausted its round budget");
        Err(PkgTriageError::StageExhausted {
            stage: stage.name().to_string(),
            rounds: max_rounds,
        })
    }

    /// Warn once when classification has read more non-entry-point files than
    /// the policy allows. Returns whether a warning was emitted.
    fn log_inspection_overrun(&self, ctx: &AnalysisContext) -> bool {
        let extra: Vec<&String> = ctx
            .inspected_files
            .iter()
            .filter(|f| !self.policy.is_entry_point(f))
            .collect();
        if extra.len() > self.policy.max_files {
            warn!(
                inspected = ?extra,
                limit = self.policy.max_files,
                "Classification inspected more files than the inspection policy allows"
            );
            return true;
        }
        false
    }
}

fn parse<T: DeserializeOwned>(value: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("output does not match schema: {e}"))
}

/// Schema and semantic validation of a final answer. On success the answer's
/// effects are merged into the context.
fn validate(
    stage: StageKind,
    value: &Value,
    ctx: &mut AnalysisContext,
) -> std::result::Result<StageOutput, String> {
    match stage {
        StageKind::Ingest => {
            let output: IngestOutput = parse(value)?;
            let recorded = ctx
                .package_formatted_path
                .as_ref()
                .ok_or_else(|| "no package snapshot has been produced yet".to_string())?;
            if &output.package_formatted_path != recorded {
                return Err(format!(
                    "package_formatted_path must be {}",
                    recorded.display()
                ));
            }
            if !output.package_formatted_path.is_file() {
                return Err(format!(
                    "snapshot {} does not exist",
                    output.package_formatted_path.display()
                ));
            }
            Ok(StageOutput::Ingest(output))
        }
        StageKind::Metadata => {
            let output: MetadataOutput = parse(value)?;
            ctx.metadata.fill_missing(&output.0);
            Ok(StageOutput::Metadata(output))
        }
        StageKind::Classify => {
            let mut output: ClassificationOutput = parse(value)?;
            if output.justification.trim().is_empty() {
                return Err("justification must not be empty".to_string());
            }
            if !output.suspicious_files.is_empty() {
                let path = ctx
                    .package_formatted_path
                    .as_ref()
                    .ok_or_else(|| "no package snapshot to check suspicious files against".to_string())?;
                let snapshot = PackageSnapshot::load(path)
                    .map_err(|e| format!("cannot read package snapshot: {e}"))?;
                let mut resolved = Vec::with_capacity(output.suspicious_files.len());
                for name in &output.suspicious_files {
                    match snapshot.resolve(name) {
                        Some(entry) => {
                            if !resolved.contains(&entry.file_path) {
                                resolved.push(entry.file_path.clone());
                            }
                        }
                        None => return Err(format!("suspicious file '{name}' is not in the package")),
                    }
                }
                output.suspicious_files = resolved;
            }
            Ok(StageOutput::Classify(output))
        }
    }
}
