//! SQLite persistence for investigation tasks and workflow checkpoints.

use chrono::{DateTime, SecondsFormat, Utc};
use intel_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{CheckpointStore, TaskRepository};
use crate::domain::{FailureCode, InvestigationTask, TaskId, TaskRecord, TaskStatus, TaskType};

const TASK_COLUMNS: &str = "id, task_type, query, status, progress, agent_steps, result, result_type, \
     error_message, error_code, created_at, updated_at, completed_at";

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| Error::Storage("database connection lock poisoned".into()))
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("invalid timestamp {:?}: {}", raw, e)))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(-1)
}

// ============================================================================
// Task Repository
// ============================================================================

/// SQLite-backed [`TaskRepository`].
pub struct SqliteTaskRepository {
    conn: SharedConnection,
}

impl SqliteTaskRepository {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::Storage(format!("Failed to open database at {:?}: {}", path, e))
        })?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.init_schema()?;

        info!(path = ?path, "Task store opened");
        Ok(repo)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.init_schema()?;

        debug!("In-memory task store created");
        Ok(repo)
    }

    /// Checkpoint store sharing this database connection.
    pub fn checkpoint_store(&self) -> SqliteCheckpointStore {
        SqliteCheckpointStore {
            conn: Arc::clone(&self.conn),
        }
    }

    fn init_schema(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS investigation_tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                query TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                agent_steps TEXT NOT NULL DEFAULT '[]',
                result TEXT,
                result_type TEXT,
                error_message TEXT,
                error_code TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                key TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON investigation_tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_created ON investigation_tasks(created_at);
            "#,
        )
        .map_err(db_err)?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn query_tasks(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<InvestigationTask>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, TaskRow::from_row)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

impl TaskRepository for SqliteTaskRepository {
    fn save(&self, task: &InvestigationTask) -> Result<()> {
        let record = task.to_record()?;
        let agent_steps = serde_json::to_string(&record.agent_steps)?;
        let result = record.result.as_ref().map(serde_json::to_string).transpose()?;

        let conn = lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO investigation_tasks
                (id, task_type, query, status, progress, agent_steps, result, result_type,
                 error_message, error_code, created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.task_id.to_string(),
                record.task_type.as_str(),
                record.query,
                record.status.as_str(),
                record.progress,
                agent_steps,
                result,
                record.result_type,
                record.error_message,
                record.error_code.map(|c| c.as_str()),
                format_ts(record.created_at),
                format_ts(record.updated_at),
                record.completed_at.map(format_ts),
            ],
        )
        .map_err(db_err)?;

        debug!(task_id = %record.task_id, status = %record.status, "Task saved");
        Ok(())
    }

    fn find_by_id(&self, id: &TaskId) -> Result<Option<InvestigationTask>> {
        let conn = lock(&self.conn)?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM investigation_tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.to_string()],
                TaskRow::from_row,
            )
            .optional()
            .map_err(db_err)?;
        drop(conn);

        row.map(TaskRow::into_task).transpose()
    }

    fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<InvestigationTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM investigation_tasks WHERE status = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                TASK_COLUMNS
            ),
            &[&status.as_str(), &sql_limit(limit)],
        )
    }

    fn find_recent(&self, limit: usize, offset: usize) -> Result<Vec<InvestigationTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM investigation_tasks \
                 ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                TASK_COLUMNS
            ),
            &[&sql_limit(limit), &sql_limit(offset).max(0)],
        )
    }

    fn delete(&self, id: &TaskId) -> Result<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn
            .execute(
                "DELETE FROM investigation_tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(db_err)?;

        debug!(task_id = %id, removed, "Task deleted");
        Ok(removed > 0)
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM investigation_tasks WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    fn find_stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<InvestigationTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM investigation_tasks WHERE status = 'running' AND updated_at < ?1 \
                 ORDER BY created_at ASC",
                TASK_COLUMNS
            ),
            &[&format_ts(older_than)],
        )
    }
}

/// Raw column values, decoded outside the rusqlite row callback.
struct TaskRow {
    id: String,
    task_type: String,
    query: String,
    status: String,
    progress: i64,
    agent_steps: String,
    result: Option<String>,
    result_type: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            query: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            agent_steps: row.get(5)?,
            result: row.get(6)?,
            result_type: row.get(7)?,
            error_message: row.get(8)?,
            error_code: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn into_task(self) -> Result<InvestigationTask> {
        let task_id = TaskId::parse(&self.id)
            .map_err(|_| Error::Storage(format!("invalid task id in database: {}", self.id)))?;
        let task_type = TaskType::parse(&self.task_type)
            .ok_or_else(|| Error::Storage(format!("unknown task type: {}", self.task_type)))?;
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| Error::Storage(format!("unknown task status: {}", self.status)))?;
        let error_code = self
            .error_code
            .map(|c| {
                FailureCode::parse(&c)
                    .ok_or_else(|| Error::Storage(format!("unknown error code: {}", c)))
            })
            .transpose()?;
        let progress = u8::try_from(self.progress)
            .map_err(|_| Error::Storage(format!("progress out of range: {}", self.progress)))?;

        let record = TaskRecord {
            task_id,
            task_type,
            query: self.query,
            status,
            progress,
            agent_steps: serde_json::from_str(&self.agent_steps)?,
            result_type: self.result_type,
            result: self.result.map(|r| serde_json::from_str(&r)).transpose()?,
            error_message: self.error_message,
            error_code,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
        };

        InvestigationTask::rehydrate(record)
    }
}

// ============================================================================
// Checkpoint Store
// ============================================================================

/// SQLite-backed [`CheckpointStore`].
pub struct SqliteCheckpointStore {
    conn: SharedConnection,
}

impl SqliteCheckpointStore {
    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(SqliteTaskRepository::in_memory()?.checkpoint_store())
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, key: &str, state: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(state)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO workflow_checkpoints (key, state, updated_at) VALUES (?1, ?2, ?3)",
            params![key, body, format_ts(Utc::now())],
        )
        .map_err(db_err)?;

        debug!(key, "Checkpoint saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = lock(&self.conn)?;
        let body: Option<String> = conn
            .query_row(
                "SELECT state FROM workflow_checkpoints WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM workflow_checkpoints WHERE key = ?1", params![key])
            .map_err(db_err)?;

        debug!(key, "Checkpoint deleted");
        Ok(())
    }
}
