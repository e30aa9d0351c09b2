//! Canonical package snapshot.
//!
//! A snapshot is a JSON object mapping each member's path (relative to the
//! package root, `/`-separated) to `{file_path, content, encoding}`. Member
//! order is the order the normalizer walked the tree and survives a JSON
//! round trip. A secondary basename index answers lookups by bare file name;
//! when two members share a basename the later one wins that index.

use crate::error::{PkgTriageError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// How a member's content is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Content decoded as UTF-8 text
    #[default]
    Utf8,
    /// Raw bytes, base64 encoded (text decoding failed)
    Base64,
}

/// One package member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Path relative to the package root
    pub file_path: String,
    /// UTF-8 text or base64 of the raw bytes
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
    /// Member was larger than the read limit and content was cut
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl SnapshotEntry {
    /// Build an entry from raw bytes, falling back to base64 when the bytes
    /// are not valid UTF-8.
    pub fn from_bytes(file_path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::from_member(file_path, bytes, false)
    }

    /// Like [`SnapshotEntry::from_bytes`] for a member read up to a limit.
    ///
    /// When `truncated` is set and the only invalid sequence is a multibyte
    /// character cut at the end, the valid prefix is kept as text.
    pub fn from_member(file_path: impl Into<String>, bytes: Vec<u8>, truncated: bool) -> Self {
        let decoded = match String::from_utf8(bytes) {
            Err(e) if truncated && e.utf8_error().error_len().is_none() => {
                let valid = e.utf8_error().valid_up_to();
                let mut bytes = e.into_bytes();
                bytes.truncate(valid);
                String::from_utf8(bytes)
            }
            other => other,
        };
        let (content, encoding) = match decoded {
            Ok(text) => (text, ContentEncoding::Utf8),
            Err(e) => (BASE64.encode(e.as_bytes()), ContentEncoding::Base64),
        };
        Self {
            file_path: file_path.into(),
            content,
            encoding,
            truncated,
        }
    }

    pub fn text(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            encoding: ContentEncoding::Utf8,
            truncated: false,
        }
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        basename(&self.file_path)
    }

    /// Raw bytes regardless of encoding.
    pub fn decoded_bytes(&self) -> Result<Vec<u8>> {
        match self.encoding {
            ContentEncoding::Utf8 => Ok(self.content.as_bytes().to_vec()),
            ContentEncoding::Base64 => BASE64
                .decode(&self.content)
                .map_err(|e| PkgTriageError::Serialization(e.to_string())),
        }
    }
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Ordered collection of package members keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSnapshot {
    entries: Vec<SnapshotEntry>,
    by_path: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl PackageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member; an existing member at the same path is replaced in place.
    pub fn insert(&mut self, entry: SnapshotEntry) {
        let name = entry.file_name().to_string();
        let idx = match self.by_path.get(&entry.file_path) {
            Some(&idx) => {
                self.entries[idx] = entry;
                idx
            }
            None => {
                let idx = self.entries.len();
                self.by_path.insert(entry.file_path.clone(), idx);
                self.entries.push(entry);
                idx
            }
        };
        self.by_name.insert(name, idx);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.file_path.as_str())
    }

    /// Exact lookup by relative path.
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Lookup by bare file name through the basename index.
    pub fn get_by_name(&self, name: &str) -> Option<&SnapshotEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Path lookup first, then basename.
    pub fn resolve(&self, name: &str) -> Option<&SnapshotEntry> {
        let trimmed = name.trim().trim_start_matches("./");
        self.get(trimmed).or_else(|| self.get_by_name(trimmed))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Members whose name carries a `.py` suffix, in walk order.
    pub fn python_files(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.file_path.ends_with(".py"))
            .map(|e| e.file_path.clone())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write the snapshot, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// SHA-256 over paths and contents in walk order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.file_path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl Serialize for PackageSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.file_path, entry)?;
        }
        map.end()
    }
}

struct SnapshotVisitor;

impl<'de> Visitor<'de> for SnapshotVisitor {
    type Value = PackageSnapshot;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of member path to {file_path, content}")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut snapshot = PackageSnapshot::new();
        while let Some((key, mut entry)) = access.next_entry::<String, SnapshotEntry>()? {
            if entry.file_path.is_empty() {
                entry.file_path = key;
            }
            snapshot.insert(entry);
        }
        Ok(snapshot)
    }
}

impl<'de> Deserialize<'de> for PackageSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SnapshotVisitor)
    }
}
