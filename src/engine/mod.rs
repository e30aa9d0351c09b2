//! Decision engine interface.
//!
//! A stage is a small state machine whose transition function lives behind
//! [`DecisionEngine`]. The stage runner owns the round loop and the budget;
//! the engine only decides, given the request and the transcript so far,
//! whether to call tools or to answer.

pub mod scripted;

pub use scripted::{ScriptedEngine, Step};

use crate::error::Result;
use crate::stages::StageKind;
use crate::tools::{ToolCall, ToolResult, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the engine is told about the stage it is driving.
#[derive(Debug, Clone, Serialize)]
pub struct StageRequest {
    pub stage: StageKind,
    pub instructions: String,
    /// Stage input message
    pub input: String,
    pub tools: Vec<ToolSpec>,
    /// JSON schema the final answer must satisfy
    pub output_schema: Value,
    /// Engine-facing view of the analysis context
    pub context: Value,
    pub max_rounds: u32,
    /// 1-based round about to be played
    pub round: u32,
}

/// What happened in one earlier round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exchange {
    /// Tool calls and their results, in call order
    Tools {
        calls: Vec<ToolCall>,
        results: Vec<ToolResult>,
    },
    /// A final answer that failed validation
    Rejected { output: Value, reason: String },
}

/// One engine decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EngineTurn {
    ToolCalls(Vec<ToolCall>),
    Final(Value),
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Model identifier recorded with every classification.
    fn model(&self) -> &str;

    async fn next_turn(&self, request: &StageRequest, transcript: &[Exchange])
        -> Result<EngineTurn>;
}
