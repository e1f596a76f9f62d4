//! Engagement Store
//!
//! Append-only record of every task execution, queried by the analyzer.
//! Reads take a snapshot: a write that lands mid-read may or may not be
//! included, but never corrupts the result.
//!
//! Two backends:
//! - [`MemoryEngagementStore`]: in-process, for tests and ephemeral runs
//! - [`SqliteEngagementStore`]: durable, one row per execution

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::agent::{FailureReason, Metric, Outcome, TaskExecution, TaskId};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Append-only execution log
pub trait EngagementStore: Send + Sync {
    /// Append one immutable execution record
    fn append(&self, execution: &TaskExecution) -> Result<(), StoreError>;

    /// Executions started at or after `since`, keeping at most the most recent
    /// `per_task_limit` per task, oldest first
    fn window(
        &self,
        since: DateTime<Utc>,
        per_task_limit: usize,
    ) -> Result<Vec<TaskExecution>, StoreError>;

    /// Number of successful runs of `task` started at or after `since`
    fn count_successes_since(&self, task: &TaskId, since: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Total number of records
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryEngagementStore {
    records: RwLock<Vec<TaskExecution>>,
}

impl MemoryEngagementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record, in append order
    pub fn snapshot(&self) -> Vec<TaskExecution> {
        self.records.read().clone()
    }
}

impl EngagementStore for MemoryEngagementStore {
    fn append(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        self.records.write().push(execution.clone());
        Ok(())
    }

    fn window(
        &self,
        since: DateTime<Utc>,
        per_task_limit: usize,
    ) -> Result<Vec<TaskExecution>, StoreError> {
        let snapshot: Vec<TaskExecution> = self
            .records
            .read()
            .iter()
            .filter(|e| e.started_at >= since)
            .cloned()
            .collect();

        let mut by_task: HashMap<TaskId, Vec<TaskExecution>> = HashMap::new();
        for exec in snapshot {
            by_task.entry(exec.task_id.clone()).or_default().push(exec);
        }

        let mut window = Vec::new();
        for (_, mut execs) in by_task {
            execs.sort_by_key(|e| e.started_at);
            let skip = execs.len().saturating_sub(per_task_limit);
            window.extend(execs.into_iter().skip(skip));
        }
        window.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(window)
    }

    fn count_successes_since(&self, task: &TaskId, since: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|e| &e.task_id == task && e.started_at >= since && e.outcome.is_success())
            .count())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().len())
    }
}

/// SQLite-backed store
pub struct SqliteEngagementStore {
    conn: Mutex<Connection>,
}

impl SqliteEngagementStore {
    /// Create or open the store at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory database (same schema)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS task_executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                reason_kind TEXT,
                reason TEXT,
                metric_value REAL,
                metric_unit TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_exec_task_time ON task_executions(task_id, started_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawExecution> {
        Ok(RawExecution {
            id: row.get(0)?,
            task_id: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            outcome: row.get(4)?,
            reason_kind: row.get(5)?,
            reason: row.get(6)?,
            metric_value: row.get(7)?,
            metric_unit: row.get(8)?,
        })
    }
}

/// Row as stored, before decoding
struct RawExecution {
    id: String,
    task_id: String,
    started_at: i64,
    finished_at: i64,
    outcome: String,
    reason_kind: Option<String>,
    reason: Option<String>,
    metric_value: Option<f64>,
    metric_unit: Option<String>,
}

impl RawExecution {
    fn decode(self) -> Result<TaskExecution, StoreError> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        let outcome = match self.outcome.as_str() {
            "success" => Outcome::Success {
                metric: match (self.metric_value, self.metric_unit.as_deref()) {
                    (Some(value), Some(unit)) => Some(Metric::new(value, unit)),
                    _ => None,
                },
            },
            "skipped_overlap" => Outcome::SkippedOverlap,
            "failure" => Outcome::Failure {
                reason: match self.reason_kind.as_deref() {
                    Some("timeout") => FailureReason::Timeout,
                    Some("shutdown") => FailureReason::Shutdown,
                    Some("behavior") => FailureReason::Behavior(self.reason.clone().unwrap_or_default()),
                    _ => return Err(corrupt("unknown failure kind")),
                },
            },
            _ => return Err(corrupt("unknown outcome")),
        };

        let started_at = Utc
            .timestamp_millis_opt(self.started_at)
            .single()
            .ok_or_else(|| corrupt("bad start time"))?;
        let finished_at = Utc
            .timestamp_millis_opt(self.finished_at)
            .single()
            .ok_or_else(|| corrupt("bad finish time"))?;

        Ok(TaskExecution {
            id: self.id,
            task_id: TaskId::from(self.task_id),
            started_at,
            finished_at,
            outcome,
        })
    }
}

fn reason_columns(outcome: &Outcome) -> (Option<&'static str>, Option<String>) {
    match outcome {
        Outcome::Failure { reason } => match reason {
            FailureReason::Behavior(msg) => (Some("behavior"), Some(msg.clone())),
            FailureReason::Timeout => (Some("timeout"), None),
            FailureReason::Shutdown => (Some("shutdown"), None),
        },
        _ => (None, None),
    }
}

impl EngagementStore for SqliteEngagementStore {
    fn append(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        let (reason_kind, reason) = reason_columns(&execution.outcome);
        let metric = execution.outcome.metric();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_executions
             (id, task_id, started_at, finished_at, outcome, reason_kind, reason, metric_value, metric_unit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                execution.id,
                execution.task_id.as_str(),
                execution.started_at.timestamp_millis(),
                execution.finished_at.timestamp_millis(),
                execution.outcome.as_str(),
                reason_kind,
                reason,
                metric.map(|m| m.value),
                metric.map(|m| m.unit.as_str()),
            ],
        )?;
        debug!("Recorded {} for {}", execution.outcome.as_str(), execution.task_id);
        Ok(())
    }

    fn window(
        &self,
        since: DateTime<Utc>,
        per_task_limit: usize,
    ) -> Result<Vec<TaskExecution>, StoreError> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, task_id, started_at, finished_at, outcome, reason_kind, reason, metric_value, metric_unit
                 FROM (
                    SELECT *, ROW_NUMBER() OVER (PARTITION BY task_id ORDER BY started_at DESC, rowid DESC) AS rn
                    FROM task_executions
                    WHERE started_at >= ?1
                 )
                 WHERE rn <= ?2
                 ORDER BY started_at ASC, task_id ASC",
            )?;
            let limit = i64::try_from(per_task_limit).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![since.timestamp_millis(), limit], Self::row_to_execution)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        raws.into_iter().map(RawExecution::decode).collect()
    }

    fn count_successes_since(&self, task: &TaskId, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_executions
             WHERE task_id = ?1 AND started_at >= ?2 AND outcome = 'success'",
            params![task.as_str(), since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM task_executions", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn exec(task: TaskId, at: DateTime<Utc>, outcome: Outcome) -> TaskExecution {
        TaskExecution::new(task, at, at + Duration::seconds(2), outcome)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn check_window_limits(store: &dyn EngagementStore) {
        for i in 0..5 {
            store
                .append(&exec(
                    TaskId::InteractionCheck,
                    base() + Duration::minutes(i),
                    Outcome::Success { metric: Some(Metric::replies(i as u64)) },
                ))
                .unwrap();
        }
        store
            .append(&exec(
                TaskId::ContentGeneration,
                base() - Duration::hours(30),
                Outcome::SkippedOverlap,
            ))
            .unwrap();

        let window = store.window(base() - Duration::hours(24), 3).unwrap();
        assert_eq!(window.len(), 3);
        assert!(window.iter().all(|e| e.task_id == TaskId::InteractionCheck));
        // the three most recent, oldest first
        assert_eq!(window[0].outcome.metric().unwrap().value, 2.0);
        assert_eq!(window[2].outcome.metric().unwrap().value, 4.0);
        assert_eq!(store.len().unwrap(), 6);
    }

    #[test]
    fn test_memory_window_limits() {
        check_window_limits(&MemoryEngagementStore::new());
    }

    #[test]
    fn test_sqlite_window_limits() {
        check_window_limits(&SqliteEngagementStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_outcomes_survive_storage() {
        let store = SqliteEngagementStore::open_in_memory().unwrap();
        let outcomes = vec![
            Outcome::Success { metric: Some(Metric::posts(1)) },
            Outcome::Success { metric: None },
            Outcome::Failure { reason: FailureReason::Behavior("api down".into()) },
            Outcome::Failure { reason: FailureReason::Timeout },
            Outcome::Failure { reason: FailureReason::Shutdown },
            Outcome::SkippedOverlap,
        ];
        for (i, outcome) in outcomes.iter().enumerate() {
            store
                .append(&exec(TaskId::ContentGeneration, base() + Duration::minutes(i as i64), outcome.clone()))
                .unwrap();
        }

        let window = store.window(base(), 100).unwrap();
        let stored: Vec<Outcome> = window.into_iter().map(|e| e.outcome).collect();
        assert_eq!(stored, outcomes);
    }

    #[test]
    fn test_count_successes_since() {
        let store = MemoryEngagementStore::new();
        store
            .append(&exec(TaskId::ContentGeneration, base(), Outcome::Success { metric: None }))
            .unwrap();
        store
            .append(&exec(
                TaskId::ContentGeneration,
                base(),
                Outcome::Failure { reason: FailureReason::Timeout },
            ))
            .unwrap();
        store
            .append(&exec(
                TaskId::ContentGeneration,
                base() - Duration::days(1),
                Outcome::Success { metric: None },
            ))
            .unwrap();

        assert_eq!(store.count_successes_since(&TaskId::ContentGeneration, base()).unwrap(), 1);
        assert_eq!(store.count_successes_since(&TaskId::InteractionCheck, base()).unwrap(), 0);
    }
}
