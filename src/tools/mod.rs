//! Capability tools available to the decision stages.
//!
//! Tools are narrow operations over the analysis context and explicit
//! arguments. A tool never mutates the context: it returns its output for the
//! engine together with a [`ContextDelta`] the stage runner merges.

pub mod package;
pub mod source;

use crate::core::context::{AnalysisContext, ContextDelta};
use crate::normalize::Normalizer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// The eight tools, by stable wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolKind {
    #[serde(rename = "check_user_input_is_archive")]
    CheckArchive,
    #[serde(rename = "unpack_archive_tool")]
    UnpackArchive,
    #[serde(rename = "unpack_folders")]
    UnpackFolder,
    #[serde(rename = "extract_package_information")]
    ExtractMetadata,
    #[serde(rename = "get_number_of_package_files")]
    FileInfo,
    #[serde(rename = "get_python_script")]
    FetchScript,
    #[serde(rename = "get_functions_python_script")]
    SplitFunctions,
    #[serde(rename = "get_imported_libraries")]
    ListImports,
}

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        ToolKind::CheckArchive,
        ToolKind::UnpackArchive,
        ToolKind::UnpackFolder,
        ToolKind::ExtractMetadata,
        ToolKind::FileInfo,
        ToolKind::FetchScript,
        ToolKind::SplitFunctions,
        ToolKind::ListImports,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::CheckArchive => "check_user_input_is_archive",
            ToolKind::UnpackArchive => "unpack_archive_tool",
            ToolKind::UnpackFolder => "unpack_folders",
            ToolKind::ExtractMetadata => "extract_package_information",
            ToolKind::FileInfo => "get_number_of_package_files",
            ToolKind::FetchScript => "get_python_script",
            ToolKind::SplitFunctions => "get_functions_python_script",
            ToolKind::ListImports => "get_imported_libraries",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            ToolKind::CheckArchive => {
                "Check whether the given path is an archive, or a folder directly containing one."
            }
            ToolKind::UnpackArchive => {
                "Unpack the archive at the given path and build the package snapshot."
            }
            ToolKind::UnpackFolder => "Walk the folder at the given path and build the package snapshot.",
            ToolKind::ExtractMetadata => {
                "Extract name, version, author, email, homepage, summary, description and metadata version from the package snapshot."
            }
            ToolKind::FileInfo => {
                "Count the files in the package snapshot and list the Python files."
            }
            ToolKind::FetchScript => "Return the content of a file in the package snapshot.",
            ToolKind::SplitFunctions => "Split Python source into its function definitions.",
            ToolKind::ListImports => "List the modules imported by Python source.",
        }
    }

    fn parameters(self) -> Value {
        fn object(name: &str, description: &str, required: bool) -> Value {
            let required: Vec<&str> = if required { vec![name] } else { Vec::new() };
            json!({
                "type": "object",
                "properties": { name: { "type": "string", "description": description } },
                "required": required,
                "additionalProperties": false,
            })
        }
        match self {
            ToolKind::CheckArchive | ToolKind::UnpackArchive | ToolKind::UnpackFolder => {
                object("path", "Filesystem path of the package input", true)
            }
            ToolKind::ExtractMetadata | ToolKind::FileInfo => object(
                "path",
                "Snapshot location; defaults to the one recorded in the context",
                false,
            ),
            ToolKind::FetchScript => object("file_name", "Path or file name inside the package", true),
            ToolKind::SplitFunctions | ToolKind::ListImports => {
                object("source", "Python source text", true)
            }
        }
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tool description published to the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, kind: ToolKind, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: kind.name().to_string(),
            arguments,
        }
    }
}

/// What the engine observes for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: Value,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
        }
    }

    fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PathArgs {
    path: PathBuf,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OptionalPathArgs {
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileArgs {
    file_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceArgs {
    source: String,
}

fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| format!("invalid arguments: {e}"))
}

/// Tool dispatcher for one request.
#[derive(Debug, Clone)]
pub struct ToolSet {
    normalizer: Normalizer,
}

impl ToolSet {
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    /// Run one call against `ctx`. Calls outside `allowed` are refused.
    pub fn invoke(
        &self,
        call: &ToolCall,
        allowed: &[ToolKind],
        ctx: &AnalysisContext,
    ) -> (ToolResult, ContextDelta) {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return (
                ToolResult::error(call, format!("unknown tool '{}'", call.name)),
                ContextDelta::default(),
            );
        };
        if !allowed.contains(&kind) {
            warn!(tool = %kind, "Tool not available in this stage");
            return (
                ToolResult::error(call, format!("tool '{kind}' is not available in this stage")),
                ContextDelta::default(),
            );
        }

        debug!(tool = %kind, call_id = %call.id, "Invoking tool");
        match self.dispatch(kind, call, ctx) {
            Ok((output, delta)) => {
                let is_error = delta.failure.is_some();
                let mut result = ToolResult::ok(call, output);
                result.is_error = is_error;
                (result, delta)
            }
            Err(message) => (ToolResult::error(call, message), ContextDelta::default()),
        }
    }

    fn dispatch(
        &self,
        kind: ToolKind,
        call: &ToolCall,
        ctx: &AnalysisContext,
    ) -> Result<(Value, ContextDelta), String> {
        let out = match kind {
            ToolKind::CheckArchive => {
                let args: PathArgs = parse_args(&call.arguments)?;
                (
                    json!(package::is_archive_input(&args.path)),
                    ContextDelta::default(),
                )
            }
            ToolKind::UnpackArchive => {
                let args: PathArgs = parse_args(&call.arguments)?;
                package::unpack_archive(&self.normalizer, &args.path)
            }
            ToolKind::UnpackFolder => {
                let args: PathArgs = parse_args(&call.arguments)?;
                package::unpack_folder(&self.normalizer, &args.path)
            }
            ToolKind::ExtractMetadata => {
                let args: OptionalPathArgs = parse_args(&call.arguments)?;
                package::extract_metadata(ctx, args.path)
            }
            ToolKind::FileInfo => {
                let args: OptionalPathArgs = parse_args(&call.arguments)?;
                package::extract_file_info(ctx, args.path)
            }
            ToolKind::FetchScript => {
                let args: FileArgs = parse_args(&call.arguments)?;
                let (content, delta) = source::fetch_script(ctx, &args.file_name);
                (json!(content), delta)
            }
            ToolKind::SplitFunctions => {
                let args: SourceArgs = parse_args(&call.arguments)?;
                let functions = source::split_functions(&args.source);
                if functions.is_empty() {
                    (json!(source::NO_FUNCTIONS), ContextDelta::default())
                } else {
                    (
                        json!(source::render_functions(&functions)),
                        ContextDelta::default(),
                    )
                }
            }
            ToolKind::ListImports => {
                let args: SourceArgs = parse_args(&call.arguments)?;
                let imports = source::list_imports(&args.source);
                if imports.is_empty() {
                    (json!(source::NO_IMPORTS), ContextDelta::default())
                } else {
                    (json!(imports), ContextDelta::default())
                }
            }
        };
        Ok(out)
    }

    /// Run a round's calls concurrently on the blocking pool against a
    /// shared copy of the context. Results come back in call order.
    pub async fn invoke_all(
        self: &Arc<Self>,
        calls: &[ToolCall],
        allowed: &'static [ToolKind],
        ctx: Arc<AnalysisContext>,
    ) -> Vec<(ToolResult, ContextDelta)> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let tools = Arc::clone(self);
                let ctx = Arc::clone(&ctx);
                let fallback = call.clone();
                let handle =
                    tokio::task::spawn_blocking(move || tools.invoke(&call, allowed, &ctx));
                (fallback, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (call, handle) in handles {
            match handle.await {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool task failed");
                    results.push((
                        ToolResult::error(&call, format!("tool task failed: {e}")),
                        ContextDelta::default(),
                    ));
                }
            }
        }
        results
    }
}
