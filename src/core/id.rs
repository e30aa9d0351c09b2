//! Identifier types for classification requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier issued once per externally visible classification request.
///
/// The same identifier names the request's scratch tree and its persisted
/// record, independent of how many internal attempts the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationId(String);

impl ClassificationId {
    /// Generate a fresh random (UUID v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form usable as a single path component.
    pub fn path_component(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

impl Default for ClassificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClassificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
