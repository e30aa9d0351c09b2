use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::{lock, no_active_prompt, ClassificationStore, CLASSIFIER_AGENT_GROUP};
use crate::core::id::ClassificationId;
use crate::core::record::{ClassificationRecord, PromptRecord, RecordSummary};
use crate::error::{PkgTriageError, Result};

/// In-memory store for tests and single-process runs. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    prompts: Vec<PromptRecord>,
    records: HashMap<String, ClassificationRecord>,
    order: Vec<ClassificationId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClassificationStore for MemoryStore {
    fn register_prompt(&self, agent_group: &str, content: &str) -> Result<PromptRecord> {
        let mut inner = lock(&self.inner)?;
        let version = inner
            .prompts
            .iter()
            .filter(|p| p.agent_group == agent_group)
            .map(|p| p.version)
            .max()
            .unwrap_or(0)
            + 1;
        for prompt in inner.prompts.iter_mut().filter(|p| p.agent_group == agent_group) {
            prompt.active = false;
        }
        let prompt = PromptRecord {
            prompt_id: Uuid::new_v4().to_string(),
            agent_group: agent_group.to_string(),
            version,
            content: content.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        inner.prompts.push(prompt.clone());
        Ok(prompt)
    }

    fn active_prompt(&self, agent_group: &str) -> Result<Option<PromptRecord>> {
        let inner = lock(&self.inner)?;
        Ok(inner
            .prompts
            .iter()
            .find(|p| p.agent_group == agent_group && p.active)
            .cloned())
    }

    fn insert(&self, record: &ClassificationRecord) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        if !inner
            .prompts
            .iter()
            .any(|p| p.agent_group == CLASSIFIER_AGENT_GROUP && p.active)
        {
            return Err(no_active_prompt());
        }
        let key = record.classification_id.as_str().to_string();
        if inner.records.contains_key(&key) {
            return Err(PkgTriageError::Persistence(format!(
                "classification {key} already exists"
            )));
        }
        inner.records.insert(key, record.clone());
        inner.order.push(record.classification_id.clone());
        Ok(())
    }

    fn get(&self, id: &ClassificationId) -> Result<ClassificationRecord> {
        let inner = lock(&self.inner)?;
        inner
            .records
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| PkgTriageError::RecordNotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<RecordSummary>> {
        let inner = lock(&self.inner)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id.as_str()))
            .map(ClassificationRecord::summary)
            .collect())
    }
}
