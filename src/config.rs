//! Configuration for the classification pipeline.
//!
//! Provides centralized configuration for all pipeline components with
//! sensible defaults. Partial JSON documents are accepted; missing sections
//! and keys fall back to their defaults.

use crate::error::Result;
pub use crate::error::StageBudgets;
pub use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Master configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scratch directory layout and cleanup.
    pub scratch: ScratchConfig,
    /// Round budgets per stage.
    pub stages: StageBudgets,
    /// Whole-pipeline retry policy.
    pub retry: RetryConfig,
    /// Decision engine settings.
    pub engine: EngineConfig,
    /// Snapshot building limits.
    pub snapshot: SnapshotConfig,
    /// Content inspection policy handed to the classification stage.
    pub inspection: InspectionPolicy,
    /// Tracing output format and default filter.
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Same configuration with every scratch tree placed under `root`.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch.root = root.into();
        self
    }
}

/// Scratch directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Root of all per-request scratch trees (default: ".temp").
    pub root: PathBuf,
    /// Keep extracted trees and snapshots after the request finishes.
    pub keep_artifacts: bool,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".temp"),
            keep_artifacts: false,
        }
    }
}

/// Retry policy for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3).
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds (default: 4000).
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 4000,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Decision engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a single engine round trip in seconds (default: 120).
    pub round_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_timeout_secs: crate::timeout::DEFAULT_ROUND_TIMEOUT_SECONDS,
        }
    }
}

/// Snapshot building limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Maximum bytes read from a single package member (default: 10MB).
    pub max_member_bytes: u64,
    /// Maximum bytes an archive may inflate to on disk (default: 512MB).
    pub max_extracted_bytes: u64,
    /// Maximum number of archive entries (default: 10000).
    pub max_entries: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_member_bytes: crate::io::DEFAULT_MEMBER_LIMIT,
            max_extracted_bytes: 512 * 1024 * 1024,
            max_entries: 10_000,
        }
    }
}

/// Which files the classification stage may open.
///
/// Only the round budget is enforced mechanically; this policy reaches the
/// engine as instructions and overruns are logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionPolicy {
    /// Files inspected first.
    pub entry_points: Vec<String>,
    /// Additional files that may be opened beyond the entry points (default: 3).
    pub max_files: usize,
    /// Import hops followed from the entry points (default: 1).
    pub max_import_hops: usize,
}

impl Default for InspectionPolicy {
    fn default() -> Self {
        Self {
            entry_points: vec!["setup.py".to_string(), "__init__.py".to_string()],
            max_files: 3,
            max_import_hops: 1,
        }
    }
}

impl InspectionPolicy {
    pub fn is_entry_point(&self, name: &str) -> bool {
        let base = name.rsplit('/').next().unwrap_or(name);
        self.entry_points.iter().any(|e| e == base)
    }
}
