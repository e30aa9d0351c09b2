//! Stage orchestration.
//!
//! Three stages run strictly in order over one analysis context: ingest
//! produces the snapshot, metadata fills the package facts, classify reads
//! source and decides. Each stage is bounded by its round budget.

pub mod pipeline;
pub mod prompts;
pub mod runner;

pub use pipeline::{Pipeline, PipelineOutcome};
pub use runner::{StageOutput, StageRunner};

use crate::config::StageBudgets;
use crate::tools::ToolKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const INGEST_TOOLS: [ToolKind; 3] = [
    ToolKind::CheckArchive,
    ToolKind::UnpackArchive,
    ToolKind::UnpackFolder,
];
const METADATA_TOOLS: [ToolKind; 2] = [ToolKind::ExtractMetadata, ToolKind::FileInfo];
const CLASSIFY_TOOLS: [ToolKind; 3] = [
    ToolKind::FetchScript,
    ToolKind::SplitFunctions,
    ToolKind::ListImports,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Ingest,
    Metadata,
    Classify,
}

impl StageKind {
    /// Execution order.
    pub const ORDER: [StageKind; 3] = [StageKind::Ingest, StageKind::Metadata, StageKind::Classify];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Ingest => "ingest",
            StageKind::Metadata => "metadata",
            StageKind::Classify => "classify",
        }
    }

    /// Tools the stage may call.
    pub fn tools(self) -> &'static [ToolKind] {
        match self {
            StageKind::Ingest => &INGEST_TOOLS,
            StageKind::Metadata => &METADATA_TOOLS,
            StageKind::Classify => &CLASSIFY_TOOLS,
        }
    }

    pub fn budget(self, budgets: &StageBudgets) -> u32 {
        match self {
            StageKind::Ingest => budgets.ingest,
            StageKind::Metadata => budgets.metadata,
            StageKind::Classify => budgets.classify,
        }
    }

    /// JSON schema of the stage's final answer.
    pub fn output_schema(self) -> Value {
        match self {
            StageKind::Ingest => json!({
                "type": "object",
                "properties": {
                    "package_formatted_path": { "type": "string" }
                },
                "required": ["package_formatted_path"],
                "additionalProperties": false
            }),
            StageKind::Metadata => {
                let fields = [
                    "name",
                    "version",
                    "author",
                    "author_email",
                    "home_page",
                    "summary",
                    "description",
                    "metadata_version",
                ];
                let properties: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|f| (f.to_string(), json!({ "type": "string" })))
                    .collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": fields,
                    "additionalProperties": false
                })
            }
            StageKind::Classify => json!({
                "type": "object",
                "properties": {
                    "classification": { "type": "string", "enum": ["malicious", "benign"] },
                    "justification": { "type": "string" },
                    "suspicious_files": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["classification", "justification", "suspicious_files"],
                "additionalProperties": false
            }),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
