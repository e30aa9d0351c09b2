//! Deterministic engine replaying fixed per-stage steps.
//!
//! Step `n` of a stage is played in round `n + 1`. Once a stage's script runs
//! out, its last step repeats. A stage without a script fails with an engine
//! error.

use super::{DecisionEngine, EngineTurn, Exchange, StageRequest};
use crate::error::{PkgTriageError, Result};
use crate::stages::StageKind;
use crate::tools::ToolCall;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type StepFn = dyn Fn(&StageRequest, &[Exchange]) -> Result<EngineTurn> + Send + Sync;

/// One scripted engine decision.
#[derive(Clone)]
pub enum Step {
    Turn(EngineTurn),
    /// Decision computed from the live request, e.g. to echo the snapshot path
    Computed(Arc<StepFn>),
}

impl Step {
    pub fn tools(calls: Vec<ToolCall>) -> Self {
        Step::Turn(EngineTurn::ToolCalls(calls))
    }

    pub fn answer(output: Value) -> Self {
        Step::Turn(EngineTurn::Final(output))
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&StageRequest, &[Exchange]) -> Result<EngineTurn> + Send + Sync + 'static,
    {
        Step::Computed(Arc::new(f))
    }

    fn play(&self, request: &StageRequest, transcript: &[Exchange]) -> Result<EngineTurn> {
        match self {
            Step::Turn(turn) => Ok(turn.clone()),
            Step::Computed(f) => f(request, transcript),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Turn(turn) => f.debug_tuple("Turn").field(turn).finish(),
            Step::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Engine that replays scripts keyed by stage.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    model: String,
    scripts: HashMap<StageKind, Vec<Step>>,
}

impl ScriptedEngine {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            scripts: HashMap::new(),
        }
    }

    /// Set the script for `stage`.
    pub fn with_stage(mut self, stage: StageKind, steps: Vec<Step>) -> Self {
        self.scripts.insert(stage, steps);
        self
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn next_turn(
        &self,
        request: &StageRequest,
        transcript: &[Exchange],
    ) -> Result<EngineTurn> {
        let steps = self
            .scripts
            .get(&request.stage)
            .filter(|steps| !steps.is_empty())
            .ok_or_else(|| {
                PkgTriageError::Engine(format!("no script for stage '{}'", request.stage))
            })?;
        let idx = std::cmp::min(transcript.len(), steps.len() - 1);
        steps[idx].play(request, transcript)
    }
}
