//! Persistence of classification records.
//!
//! One row per classification. Inserting requires an active prompt for the
//! classifier agent group; the record references that prompt's identifier.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::core::id::ClassificationId;
use crate::core::record::{ClassificationRecord, PromptRecord, RecordSummary};
use crate::error::{PkgTriageError, Result};
use std::sync::{Mutex, MutexGuard};

/// Agent group whose active prompt every classification references.
pub const CLASSIFIER_AGENT_GROUP: &str = "classifier";

pub trait ClassificationStore: Send + Sync {
    /// Add a new prompt version for `agent_group` and make it the active one.
    fn register_prompt(&self, agent_group: &str, content: &str) -> Result<PromptRecord>;

    fn active_prompt(&self, agent_group: &str) -> Result<Option<PromptRecord>>;

    /// Fails with `NoActivePrompt` when the classifier group has no active prompt.
    fn insert(&self, record: &ClassificationRecord) -> Result<()>;

    /// Fails with `RecordNotFound` for unknown identifiers.
    fn get(&self, id: &ClassificationId) -> Result<ClassificationRecord>;

    /// Condensed projection of every record, oldest first.
    fn list(&self) -> Result<Vec<RecordSummary>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PkgTriageError::Persistence("store lock poisoned".to_string()))
}

pub(crate) fn no_active_prompt() -> PkgTriageError {
    PkgTriageError::NoActivePrompt {
        agent_group: CLASSIFIER_AGENT_GROUP.to_string(),
    }
}
