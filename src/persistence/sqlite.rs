//! SQLite 存储（rusqlite）
//!
//! 单连接放在 Mutex 后，所有访问经 spawn_blocking 执行，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::core::task::{Task, TaskEvent, TaskOutcome, TaskStatus};
use crate::core::{HiveError, Result};
use crate::memory::{ExperienceKind, ExperienceRecord};
use crate::persistence::TaskStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    goal TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL,
    result_summary TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS task_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id);

CREATE TABLE IF NOT EXISTS experiences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (reference_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_experiences_kind ON experiences(kind);
";

const TASK_COLUMNS: &str = "id, name, goal, status, metadata, result_summary, error_message, \
                            created_at, started_at, finished_at";

/// tasks 表的一行（JSON 列仍为文本）
struct TaskRow {
    id: String,
    name: String,
    goal: String,
    status: String,
    metadata: String,
    result_summary: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            goal: row.get(2)?,
            status: row.get(3)?,
            metadata: row.get(4)?,
            result_summary: row.get(5)?,
            error_message: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = HiveError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            name: row.name,
            goal: row.goal,
            status: row.status.parse()?,
            metadata: serde_json::from_str(&row.metadata)?,
            result_summary: row
                .result_summary
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

struct ExperienceRow {
    reference_id: String,
    kind: String,
    title: String,
    content: String,
    metadata: String,
    embedding: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExperienceRow> for ExperienceRecord {
    type Error = HiveError;

    fn try_from(row: ExperienceRow) -> Result<Self> {
        Ok(ExperienceRecord {
            reference_id: row.reference_id,
            kind: row.kind.parse()?,
            title: row.title,
            content: row.content,
            metadata: serde_json::from_str(&row.metadata)?,
            embedding: serde_json::from_str(&row.embedding)?,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn current_status(conn: &Connection, task_id: &str) -> Result<Option<TaskStatus>> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM tasks WHERE id = ?1", params![task_id], |row| row.get(0))
        .optional()?;
    status.map(|s| s.parse()).transpose()
}

/// CAS 未命中时给出具体原因
fn transition_error(conn: &Connection, task_id: &str, to: TaskStatus) -> HiveError {
    match current_status(conn, task_id) {
        Ok(Some(from)) => HiveError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
        },
        Ok(None) => HiveError::TaskNotFound(task_id.to_string()),
        Err(e) => e,
    }
}

/// 基于 rusqlite 的 TaskStore
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "SQLite task store opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| HiveError::Internal("sqlite connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| HiveError::Internal(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        let metadata = serde_json::to_string(&task.metadata)?;
        let result_summary = task
            .result_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    task.id,
                    task.name,
                    task.goal,
                    task.status.as_str(),
                    metadata,
                    result_summary,
                    task.error_message,
                    task.created_at,
                    task.started_at,
                    task.finished_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![task_id],
                    TaskRow::from_row,
                )
                .optional()?;
            row.map(Task::try_from).transpose()
        })
        .await
    }

    async fn claim_task(&self, task_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?2, started_at = ?3 WHERE id = ?1 AND status = ?4",
                params![
                    task_id,
                    TaskStatus::Running.as_str(),
                    started_at,
                    TaskStatus::Pending.as_str()
                ],
            )?;
            if changed == 1 {
                Ok(())
            } else {
                Err(transition_error(conn, &task_id, TaskStatus::Running))
            }
        })
        .await
    }

    async fn finish_task(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let task_id = task_id.to_string();
        let status = outcome.status();
        let (result_summary, error_message) = match outcome {
            TaskOutcome::Completed { result_summary } => {
                (Some(serde_json::to_string(&result_summary)?), None)
            }
            TaskOutcome::Failed {
                error_message,
                result_summary,
            } => (
                result_summary.as_ref().map(serde_json::to_string).transpose()?,
                Some(error_message),
            ),
        };
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?2, result_summary = ?3, error_message = ?4, finished_at = ?5 \
                 WHERE id = ?1 AND status = ?6",
                params![
                    task_id,
                    status.as_str(),
                    result_summary,
                    error_message,
                    finished_at,
                    TaskStatus::Running.as_str()
                ],
            )?;
            if changed == 1 {
                Ok(())
            } else {
                Err(transition_error(conn, &task_id, status))
            }
        })
        .await
    }

    async fn append_event(&self, task_id: &str, event: &TaskEvent) -> Result<()> {
        let task_id = task_id.to_string();
        let event_type = event.event_type.clone();
        let payload = serde_json::to_string(&event.payload)?;
        let created_at = event.created_at;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO task_events (task_id, event_type, payload, created_at) \
                 SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM tasks WHERE id = ?1)",
                params![task_id, event_type, payload, created_at],
            )?;
            if inserted == 0 {
                return Err(HiveError::TaskNotFound(task_id));
            }
            Ok(())
        })
        .await
    }

    async fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, payload, created_at FROM task_events \
                 WHERE task_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                ))
            })?;
            let mut events = Vec::new();
            for row in rows {
                let (event_type, payload, created_at) = row?;
                events.push(TaskEvent {
                    event_type,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                });
            }
            Ok(events)
        })
        .await
    }

    async fn insert_experience(&self, record: &ExperienceRecord) -> Result<()> {
        let record = record.clone();
        let metadata = serde_json::to_string(&record.metadata)?;
        let embedding = serde_json::to_string(&record.embedding)?;
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO experiences \
                 (reference_id, kind, title, content, metadata, embedding, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.reference_id,
                    record.kind.as_str(),
                    record.title,
                    record.content,
                    metadata,
                    embedding,
                    record.created_at,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(HiveError::DuplicateExperience {
                    reference_id: record.reference_id,
                    kind: record.kind,
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list_experiences(&self, kind: Option<ExperienceKind>) -> Result<Vec<ExperienceRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT reference_id, kind, title, content, metadata, embedding, created_at \
                 FROM experiences WHERE (?1 IS NULL OR kind = ?1) ORDER BY id",
            )?;
            let rows = stmt.query_map(params![kind.map(|k| k.as_str())], |row| {
                Ok(ExperienceRow {
                    reference_id: row.get(0)?,
                    kind: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                    metadata: row.get(4)?,
                    embedding: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;
            let mut records = Vec::new();
            for row in rows {
                records.push(ExperienceRecord::try_from(row?)?);
            }
            Ok(records)
        })
        .await
    }
}
