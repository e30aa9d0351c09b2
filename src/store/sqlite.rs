use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::{lock, no_active_prompt, ClassificationStore, CLASSIFIER_AGENT_GROUP};
use crate::core::id::ClassificationId;
use crate::core::record::{ClassificationRecord, PromptRecord, RecordSummary};
use crate::error::{PkgTriageError, Result};

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// SQLite-backed store. One connection guarded by a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before text columns are decoded.
struct RawRecord {
    classification_id: String,
    package_name: String,
    package_version: String,
    package_metadata: String,
    classification: String,
    justification: String,
    suspicious_files: String,
    prompt_id: String,
    experiment_id: Option<String>,
    dataset_id: Option<String>,
    model: String,
    created_at: String,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PkgTriageError::Persistence(format!("bad timestamp '{raw}': {e}")))
}

impl RawRecord {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            classification_id: r.get(0)?,
            package_name: r.get(1)?,
            package_version: r.get(2)?,
            package_metadata: r.get(3)?,
            classification: r.get(4)?,
            justification: r.get(5)?,
            suspicious_files: r.get(6)?,
            prompt_id: r.get(7)?,
            experiment_id: r.get(8)?,
            dataset_id: r.get(9)?,
            model: r.get(10)?,
            created_at: r.get(11)?,
        })
    }

    fn decode(self) -> Result<ClassificationRecord> {
        Ok(ClassificationRecord {
            classification_id: ClassificationId::from_string(self.classification_id),
            package_name: self.package_name,
            package_version: self.package_version,
            package_metadata: self.package_metadata,
            classification: self.classification.parse()?,
            justification: self.justification,
            suspicious_files: serde_json::from_str(&self.suspicious_files)?,
            prompt_id: self.prompt_id,
            experiment_id: self.experiment_id,
            dataset_id: self.dataset_id,
            model: self.model,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

const RECORD_COLUMNS: &str = "classification_id, package_name, package_version, package_metadata, \
     classification, justification, suspicious_files, prompt_id, experiment_id, dataset_id, model, created_at";

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))
            .map_err(|e| PkgTriageError::Persistence(format!("{e:#}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Prompt row as stored, before version and timestamp are checked.
struct RawPrompt {
    prompt_id: String,
    agent_group: String,
    version: i64,
    content: String,
    active: bool,
    created_at: String,
}

impl RawPrompt {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            prompt_id: r.get(0)?,
            agent_group: r.get(1)?,
            version: r.get(2)?,
            content: r.get(3)?,
            active: r.get::<_, i64>(4)? != 0,
            created_at: r.get(5)?,
        })
    }

    fn decode(self) -> Result<PromptRecord> {
        Ok(PromptRecord {
            version: prompt_version(self.version)?,
            created_at: parse_time(&self.created_at)?,
            prompt_id: self.prompt_id,
            agent_group: self.agent_group,
            content: self.content,
            active: self.active,
        })
    }
}

fn prompt_version(raw: i64) -> Result<u32> {
    u32::try_from(raw)
        .map_err(|_| PkgTriageError::Persistence(format!("prompt version {raw} out of range")))
}

impl ClassificationStore for SqliteStore {
    fn register_prompt(&self, agent_group: &str, content: &str) -> Result<PromptRecord> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let current: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM prompts WHERE agent_group = ?1",
            params![agent_group],
            |r| r.get(0),
        )?;
        tx.execute(
            "UPDATE prompts SET active = 0 WHERE agent_group = ?1",
            params![agent_group],
        )?;
        let prompt = PromptRecord {
            prompt_id: Uuid::new_v4().to_string(),
            agent_group: agent_group.to_string(),
            version: prompt_version(current + 1)?,
            content: content.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO prompts(prompt_id, agent_group, version, content, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                prompt.prompt_id,
                prompt.agent_group,
                prompt.version as i64,
                prompt.content,
                prompt.created_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;
        debug!(agent_group, version = prompt.version, "Registered prompt");
        Ok(prompt)
    }

    fn active_prompt(&self, agent_group: &str) -> Result<Option<PromptRecord>> {
        let conn = lock(&self.conn)?;
        let row = conn
            .query_row(
                "SELECT prompt_id, agent_group, version, content, active, created_at
                 FROM prompts WHERE agent_group = ?1 AND active = 1
                 ORDER BY version DESC LIMIT 1",
                params![agent_group],
                RawPrompt::from_row,
            )
            .optional()?;
        row.map(RawPrompt::decode).transpose()
    }

    fn insert(&self, record: &ClassificationRecord) -> Result<()> {
        if self.active_prompt(CLASSIFIER_AGENT_GROUP)?.is_none() {
            return Err(no_active_prompt());
        }
        let suspicious = serde_json::to_string(&record.suspicious_files)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!("INSERT INTO classifications({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                record.classification_id.as_str(),
                record.package_name,
                record.package_version,
                record.package_metadata,
                record.classification.as_str(),
                record.justification,
                suspicious,
                record.prompt_id,
                record.experiment_id,
                record.dataset_id,
                record.model,
                record.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &ClassificationId) -> Result<ClassificationRecord> {
        let conn = lock(&self.conn)?;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM classifications WHERE classification_id = ?1"),
                params![id.as_str()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.ok_or_else(|| PkgTriageError::RecordNotFound(id.to_string()))?
            .decode()
    }

    fn list(&self) -> Result<Vec<RecordSummary>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM classifications ORDER BY seq"
        ))?;
        let rows = stmt.query_map([], RawRecord::from_row)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?.decode()?.summary());
        }
        Ok(out)
    }
}
