//! Shared analysis context threaded through the pipeline stages.
//!
//! The context is owned by the stage runner. Tools see an immutable copy and
//! describe their effects as a [`ContextDelta`]; the runner merges deltas in
//! call order, so concurrent tool calls within a round never lose updates.

use crate::core::id::ClassificationId;
use crate::error::PkgTriageError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Placeholder for metadata fields that could not be recovered.
pub const NOT_AVAILABLE: &str = "NA";

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Package metadata as parsed from `PKG-INFO` / `METADATA`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub author_email: String,
    pub home_page: String,
    pub summary: String,
    pub description: String,
    pub metadata_version: String,
}

impl Default for PackageMetadata {
    fn default() -> Self {
        Self::unknown()
    }
}

impl PackageMetadata {
    /// Every field set to "NA".
    pub fn unknown() -> Self {
        Self {
            name: not_available(),
            version: not_available(),
            author: not_available(),
            author_email: not_available(),
            home_page: not_available(),
            summary: not_available(),
            description: not_available(),
            metadata_version: not_available(),
        }
    }

    /// Assign a field from a lowercased metadata header. Unknown keys are ignored.
    pub fn set_header(&mut self, key: &str, value: &str) -> bool {
        let slot = match key {
            "name" => &mut self.name,
            "version" => &mut self.version,
            "author" => &mut self.author,
            "author-email" => &mut self.author_email,
            "home-page" => &mut self.home_page,
            "summary" => &mut self.summary,
            "description" => &mut self.description,
            "metadata-version" => &mut self.metadata_version,
            _ => return false,
        };
        *slot = value.to_string();
        true
    }

    /// Fill fields still at "NA" from `other`.
    pub fn fill_missing(&mut self, other: &PackageMetadata) {
        fn fill(slot: &mut String, value: &str) {
            if is_unknown(slot) && !is_unknown(value) {
                *slot = value.to_string();
            }
        }
        fill(&mut self.name, &other.name);
        fill(&mut self.version, &other.version);
        fill(&mut self.author, &other.author);
        fill(&mut self.author_email, &other.author_email);
        fill(&mut self.home_page, &other.home_page);
        fill(&mut self.summary, &other.summary);
        fill(&mut self.description, &other.description);
        fill(&mut self.metadata_version, &other.metadata_version);
    }
}

/// True for the "NA" sentinel and blank values.
pub fn is_unknown(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == NOT_AVAILABLE
}

/// File counts recovered from a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInventory {
    pub total_files: usize,
    pub python_files_count: usize,
    /// Python members in walk order
    pub python_files: Vec<String>,
}

/// Mutable record carried across the three stages of one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub request_id: ClassificationId,
    pub package_location: PathBuf,
    /// Snapshot JSON location once normalization has run
    pub package_formatted_path: Option<PathBuf>,
    pub metadata: PackageMetadata,
    pub files: FileInventory,
    /// Append-only trace log
    pub messages: Vec<String>,
    /// Latest failure; overwritten by each new one
    pub error: Option<String>,
    pub guidelines: Option<String>,
    /// Files fetched during classification, in fetch order
    pub inspected_files: Vec<String>,
}

impl AnalysisContext {
    pub fn new(
        request_id: ClassificationId,
        package_location: impl Into<PathBuf>,
        guidelines: Option<String>,
    ) -> Self {
        Self {
            request_id,
            package_location: package_location.into(),
            package_formatted_path: None,
            metadata: PackageMetadata::unknown(),
            files: FileInventory::default(),
            messages: Vec::new(),
            error: None,
            guidelines: guidelines.filter(|g| !g.trim().is_empty()),
            inspected_files: Vec::new(),
        }
    }

    /// Merge a tool's effects. A carried normalization failure is handed back
    /// to the caller instead of being stored.
    pub fn apply(&mut self, delta: ContextDelta) -> Option<PkgTriageError> {
        let ContextDelta {
            package_location,
            package_formatted_path,
            metadata,
            files,
            messages,
            error,
            inspected,
            failure,
        } = delta;

        if let Some(location) = package_location {
            self.package_location = location;
        }
        if let Some(path) = package_formatted_path {
            self.package_formatted_path = Some(path);
        }
        if let Some(metadata) = metadata {
            self.metadata = metadata;
        }
        if let Some(files) = files {
            self.files = files;
        }
        self.messages.extend(messages);
        if let Some(error) = error {
            self.error = Some(error);
        }
        if let Some(file) = inspected {
            if !self.inspected_files.contains(&file) {
                self.inspected_files.push(file);
            }
        }
        failure
    }

    /// Engine-facing projection: extracted facts without the trace log or
    /// error slot.
    pub fn prompt_view(&self) -> Value {
        json!({
            "package_location": self.package_location,
            "package_formatted_path": self.package_formatted_path,
            "metadata": self.metadata,
            "files": self.files,
            "inspected_files": self.inspected_files,
        })
    }
}

/// Effects of one tool invocation.
#[derive(Debug, Default)]
pub struct ContextDelta {
    pub package_location: Option<PathBuf>,
    pub package_formatted_path: Option<PathBuf>,
    pub metadata: Option<PackageMetadata>,
    pub files: Option<FileInventory>,
    pub messages: Vec<String>,
    pub error: Option<String>,
    pub inspected: Option<String>,
    /// Normalization failure the runner reports if ingest yields no snapshot
    pub failure: Option<PkgTriageError>,
}

impl ContextDelta {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.package_location.is_none()
            && self.package_formatted_path.is_none()
            && self.metadata.is_none()
            && self.files.is_none()
            && self.messages.is_empty()
            && self.error.is_none()
            && self.inspected.is_none()
            && self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new(ClassificationId::from_string("r"), "/pkg.zip", None)
    }

    #[test]
    fn test_new_context_defaults() {
        let c = ctx();
        assert_eq!(c.metadata, PackageMetadata::unknown());
        assert!(c.package_formatted_path.is_none());
        assert!(c.error.is_none());

        let blank = AnalysisContext::new(ClassificationId::new(), "/x", Some("  ".into()));
        assert!(blank.guidelines.is_none());
    }

    #[test]
    fn test_apply_merges_in_order() {
        let mut c = ctx();
        let first = ContextDelta::default()
            .with_message("one")
            .with_error("first failure");
        let second = ContextDelta {
            package_formatted_path: Some(PathBuf::from("/s.json")),
            ..Default::default()
        }
        .with_message("two")
        .with_error("second failure");

        assert!(c.apply(first).is_none());
        assert!(c.apply(second).is_none());
        assert_eq!(c.messages, vec!["one", "two"]);
        assert_eq!(c.error.as_deref(), Some("second failure"));
        assert_eq!(c.package_formatted_path, Some(PathBuf::from("/s.json")));
    }

    #[test]
    fn test_apply_returns_failure() {
        let mut c = ctx();
        let delta = ContextDelta {
            failure: Some(PkgTriageError::NotFound {
                path: PathBuf::from("/pkg.zip"),
            }),
            ..Default::default()
        };
        assert!(matches!(c.apply(delta), Some(PkgTriageError::NotFound { .. })));
    }

    #[test]
    fn test_inspected_files_deduplicated() {
        let mut c = ctx();
        for name in ["setup.py", "helper.py", "setup.py"] {
            c.apply(ContextDelta {
                inspected: Some(name.to_string()),
                ..Default::default()
            });
        }
        assert_eq!(c.inspected_files, vec!["setup.py", "helper.py"]);
    }

    #[test]
    fn test_set_header_and_fill_missing() {
        let mut m = PackageMetadata::unknown();
        assert!(m.set_header("author-email", "a@example.com"));
        assert!(!m.set_header("license", "MIT"));
        assert_eq!(m.author_email, "a@example.com");

        let mut other = PackageMetadata::unknown();
        other.name = "demo".into();
        other.author_email = "b@example.com".into();
        m.fill_missing(&other);
        assert_eq!(m.name, "demo");
        assert_eq!(m.author_email, "a@example.com");
    }

    #[test]
    fn test_prompt_view_hides_trace() {
        let mut c = ctx();
        c.apply(ContextDelta::default().with_message("m").with_error("e"));
        let view = c.prompt_view();
        assert!(view.get("messages").is_none());
        assert!(view.get("error").is_none());
        assert_eq!(view["metadata"]["name"], "NA");
    }
}
