//! SQLite-backed job store implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ToSql};

use super::{ErrorKind, JobError, JobFilter, JobRecord, JobSpec, JobStatus, JobStore, JobStoreError};
use crate::stage::StageOutput;

const JOB_COLUMNS: &str = "id, pipeline, input, priority, status, percent, current_stage, \
     output_path, error_kind, error_message, retry_count, created_at, updated_at, started_at, \
     finished_at";

const NON_TERMINAL: &str = "('queued', 'running', 'paused')";

/// SQLite-backed job store.
///
/// The connection is locked per call and never held across an await point.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) a database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                input TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL
                    CHECK (status IN ('queued', 'running', 'paused', 'completed', 'failed', 'canceled')),
                percent INTEGER NOT NULL DEFAULT 0 CHECK (percent BETWEEN 0 AND 100),
                current_stage TEXT,
                output_path TEXT,
                error_kind TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                CHECK ((status = 'completed') = (output_path IS NOT NULL)),
                CHECK ((status = 'failed') = (error_kind IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs(priority DESC, created_at ASC);
            CREATE INDEX IF NOT EXISTS idx_jobs_finished_at ON jobs(finished_at);

            CREATE TABLE IF NOT EXISTS job_stage_outputs (
                job_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                output TEXT NOT NULL,
                artifact TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_id, stage)
            );
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref pipeline) = filter.pipeline {
            conditions.push("pipeline = ?");
            params.push(Box::new(pipeline.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        match conn.query_row(&sql, params![id], Self::row_to_job) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Run a guarded UPDATE and return the resulting record.
    ///
    /// Zero affected rows means the job is missing or its status did not match the guard.
    fn transition(
        &self,
        id: &str,
        operation: &str,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<JobRecord, JobStoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(sql, params).map_err(db_err)?;

        match Self::fetch(&conn, id)? {
            None => Err(JobStoreError::NotFound(id.to_string())),
            Some(job) if rows == 0 => Err(JobStoreError::InvalidState {
                job_id: id.to_string(),
                status: job.status,
                operation: operation.to_string(),
            }),
            Some(job) => Ok(job),
        }
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let input_json: String = row.get(2)?;
        let input = serde_json::from_str(&input_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        let status_str: String = row.get(4)?;
        let status: JobStatus = status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;

        let error_kind: Option<String> = row.get(8)?;
        let error = match error_kind {
            Some(kind) => {
                let kind: ErrorKind = kind.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into())
                })?;
                let message: Option<String> = row.get(9)?;
                Some(JobError::new(kind, message.unwrap_or_default()))
            }
            None => None,
        };

        Ok(JobRecord {
            id: row.get(0)?,
            pipeline: row.get(1)?,
            input,
            priority: row.get(3)?,
            status,
            percent: row.get(5)?,
            current_stage: row.get(6)?,
            output_path: row.get(7)?,
            error,
            retry_count: row.get(10)?,
            created_at: parse_timestamp(row, 11)?,
            updated_at: parse_timestamp(row, 12)?,
            started_at: parse_optional_timestamp(row, 13)?,
            finished_at: parse_optional_timestamp(row, 14)?,
        })
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, spec: &JobSpec) -> Result<JobRecord, JobStoreError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let input_json =
            serde_json::to_string(&spec.input).map_err(|e| JobStoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, pipeline, input, priority, status, percent, retry_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'queued', 0, 0, ?, ?)",
            params![
                id,
                spec.pipeline,
                input_json,
                spec.priority,
                format_timestamp(now),
                format_timestamp(now),
            ],
        )
        .map_err(db_err)?;

        Self::fetch(&conn, &id)?.ok_or(JobStoreError::NotFound(id))
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(db_err)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(db_err)?);
        }
        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn list_active(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM jobs WHERE status IN {} ORDER BY priority DESC, created_at ASC, rowid ASC",
            JOB_COLUMNS, NON_TERMINAL
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([], Self::row_to_job).map_err(db_err)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(db_err)?);
        }
        Ok(jobs)
    }

    fn claim(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let conn = self.lock()?;
        let now = format_timestamp(Utc::now());

        let rows = conn
            .execute(
                "UPDATE jobs SET status = 'running', started_at = COALESCE(started_at, ?1), updated_at = ?1 \
                 WHERE id = ?2 AND status = 'queued'",
                params![now, id],
            )
            .map_err(db_err)?;

        if rows == 1 {
            Self::fetch(&conn, id)
        } else {
            Ok(None)
        }
    }

    fn update_progress(
        &self,
        id: &str,
        percent: u8,
        stage: Option<&str>,
    ) -> Result<bool, JobStoreError> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE jobs SET percent = MAX(percent, ?1), current_stage = COALESCE(?2, current_stage), updated_at = ?3 \
                 WHERE id = ?4 AND status = 'running'",
                params![percent.min(100), stage, format_timestamp(Utc::now()), id],
            )
            .map_err(db_err)?;

        Ok(rows == 1)
    }

    fn complete(&self, id: &str, output_path: &str) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        self.transition(
            id,
            "complete",
            "UPDATE jobs SET status = 'completed', output_path = ?1, percent = 100, current_stage = NULL, \
             error_kind = NULL, error_message = NULL, updated_at = ?2, finished_at = ?2 \
             WHERE id = ?3 AND status = 'running'",
            params![output_path, now, id],
        )
    }

    fn fail(&self, id: &str, error: &JobError) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        let sql = format!(
            "UPDATE jobs SET status = 'failed', error_kind = ?1, error_message = ?2, output_path = NULL, \
             updated_at = ?3, finished_at = ?3 WHERE id = ?4 AND status IN {}",
            NON_TERMINAL
        );
        self.transition(
            id,
            "fail",
            &sql,
            params![error.kind.as_str(), error.message, now, id],
        )
    }

    fn cancel(&self, id: &str) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        let sql = format!(
            "UPDATE jobs SET status = 'canceled', output_path = NULL, error_kind = NULL, error_message = NULL, \
             updated_at = ?1, finished_at = ?1 WHERE id = ?2 AND status IN {}",
            NON_TERMINAL
        );
        self.transition(id, "cancel", &sql, params![now, id])
    }

    fn pause(&self, id: &str) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        self.transition(
            id,
            "pause",
            "UPDATE jobs SET status = 'paused', updated_at = ?1 WHERE id = ?2 AND status IN ('queued', 'running')",
            params![now, id],
        )
    }

    fn requeue(&self, id: &str) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        self.transition(
            id,
            "resume",
            "UPDATE jobs SET status = 'queued', updated_at = ?1 WHERE id = ?2 AND status = 'paused'",
            params![now, id],
        )
    }

    fn increment_retry_count(&self, id: &str) -> Result<JobRecord, JobStoreError> {
        let now = format_timestamp(Utc::now());
        let sql = format!(
            "UPDATE jobs SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2 AND status IN {}",
            NON_TERMINAL
        );
        self.transition(id, "retry", &sql, params![now, id])
    }

    fn save_stage_output(
        &self,
        id: &str,
        stage: &str,
        output: &StageOutput,
    ) -> Result<(), JobStoreError> {
        let conn = self.lock()?;
        let value_json = serde_json::to_string(&output.value)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO job_stage_outputs (job_id, stage, output, artifact, updated_at) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(job_id, stage) DO UPDATE SET output = excluded.output, artifact = excluded.artifact, \
             updated_at = excluded.updated_at",
            params![id, stage, value_json, output.artifact, format_timestamp(Utc::now())],
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn stage_outputs(&self, id: &str) -> Result<BTreeMap<String, StageOutput>, JobStoreError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT stage, output, artifact FROM job_stage_outputs WHERE job_id = ?")
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![id], |row| {
                let stage: String = row.get(0)?;
                let output_json: String = row.get(1)?;
                let value = serde_json::from_str(&output_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                })?;
                let artifact: Option<String> = row.get(2)?;
                Ok((stage, StageOutput { value, artifact }))
            })
            .map_err(db_err)?;

        let mut outputs = BTreeMap::new();
        for row in rows {
            let (stage, output) = row.map_err(db_err)?;
            outputs.insert(stage, output);
        }
        Ok(outputs)
    }

    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut conn = self.lock()?;
        let cutoff = format_timestamp(cutoff);

        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM job_stage_outputs WHERE job_id IN \
             (SELECT id FROM jobs WHERE status IN ('completed', 'failed', 'canceled') AND finished_at < ?1)",
            params![cutoff],
        )
        .map_err(db_err)?;
        let purged = tx
            .execute(
                "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'canceled') AND finished_at < ?1",
                params![cutoff],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(purged)
    }
}

fn db_err(e: rusqlite::Error) -> JobStoreError {
    JobStoreError::Database(e.to_string())
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_test_spec() -> JobSpec {
        JobSpec::new("video", json!({"brief": "a short film about rust"}))
    }

    #[test]
    fn test_create_job() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        assert!(!job.id.is_empty());
        assert_eq!(job.pipeline, "video");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.percent, 0);
        assert_eq!(job.input["brief"], "a short film about rust");
        assert!(job.output_path.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_list_priority_ordering() {
        let store = create_test_store();

        for priority in [10, 100, 50] {
            store
                .create(&create_test_spec().with_priority(priority))
                .unwrap();
        }

        let jobs = store.list(&JobFilter::new()).unwrap();
        let priorities: Vec<i32> = jobs.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![100, 50, 10]);
    }

    #[test]
    fn test_list_same_priority_is_fifo() {
        let store = create_test_store();
        let first = store.create(&create_test_spec()).unwrap();
        let second = store.create(&create_test_spec()).unwrap();

        let jobs = store.list(&JobFilter::new()).unwrap();
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(jobs[1].id, second.id);
    }

    #[test]
    fn test_list_with_status_filter_and_pagination() {
        let store = create_test_store();
        for _ in 0..5 {
            store.create(&create_test_spec()).unwrap();
        }
        let canceled = store.create(&create_test_spec()).unwrap();
        store.cancel(&canceled.id).unwrap();

        let queued = JobFilter::new().with_status(JobStatus::Queued);
        assert_eq!(store.count(&queued).unwrap(), 5);
        assert_eq!(store.list(&queued.clone().with_limit(2)).unwrap().len(), 2);
        assert_eq!(
            store
                .list(&queued.with_limit(2).with_offset(4))
                .unwrap()
                .len(),
            1
        );

        let filter = JobFilter::new().with_status(JobStatus::Canceled);
        let jobs = store.list(&filter).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, canceled.id);
    }

    #[test]
    fn test_claim_has_single_winner() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        let claimed = store.claim(&job.id).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        assert!(store.claim(&job.id).unwrap().is_none());
        assert!(store.claim("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_update_progress_is_monotonic() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        // Not running yet.
        assert!(!store.update_progress(&job.id, 10, Some("script")).unwrap());

        store.claim(&job.id).unwrap();
        assert!(store.update_progress(&job.id, 40, Some("narration")).unwrap());
        assert!(store.update_progress(&job.id, 25, None).unwrap());

        let job = store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.percent, 40);
        assert_eq!(job.current_stage.as_deref(), Some("narration"));
    }

    #[test]
    fn test_complete_sets_output_atomically() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();
        store.claim(&job.id).unwrap();

        let done = store.complete(&job.id, "/renders/out.mp4").unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output_path.as_deref(), Some("/renders/out.mp4"));
        assert_eq!(done.percent, 100);
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_complete_requires_running() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        let result = store.complete(&job.id, "/renders/out.mp4");
        assert!(matches!(
            result,
            Err(JobStoreError::InvalidState {
                status: JobStatus::Queued,
                ..
            })
        ));
    }

    #[test]
    fn test_terminal_writes_are_write_once() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();
        store.claim(&job.id).unwrap();
        store
            .fail(&job.id, &JobError::new(ErrorKind::Transient, "provider timeout"))
            .unwrap();

        assert!(matches!(
            store.complete(&job.id, "/renders/out.mp4"),
            Err(JobStoreError::InvalidState { .. })
        ));
        assert!(matches!(
            store.cancel(&job.id),
            Err(JobStoreError::InvalidState { .. })
        ));
        assert!(!store.update_progress(&job.id, 99, None).unwrap());

        let job = store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Transient);
        assert_eq!(error.message, "provider timeout");
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_cancel_queued_job_records_no_error() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        let canceled = store.cancel(&job.id).unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);
        assert!(canceled.error.is_none());
        assert!(canceled.output_path.is_none());
    }

    #[test]
    fn test_transition_nonexistent_job() {
        let store = create_test_store();
        assert!(matches!(
            store.cancel("nonexistent-id"),
            Err(JobStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.fail("nonexistent-id", &JobError::internal("boom")),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_schema_rejects_completed_without_output() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        let conn = store.conn.lock().unwrap();
        let result = conn.execute(
            "UPDATE jobs SET status = 'completed' WHERE id = ?",
            params![job.id],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "UPDATE jobs SET output_path = '/tmp/x' WHERE id = ?",
            params![job.id],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pause_and_requeue() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();
        store.claim(&job.id).unwrap();

        let paused = store.pause(&job.id).unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(store.claim(&job.id).unwrap().is_none());

        let queued = store.requeue(&job.id).unwrap();
        assert_eq!(queued.status, JobStatus::Queued);
        assert!(matches!(
            store.requeue(&job.id),
            Err(JobStoreError::InvalidState { .. })
        ));

        assert_eq!(store.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_increment_retry_count() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        store.increment_retry_count(&job.id).unwrap();
        let job = store.increment_retry_count(&job.id).unwrap();
        assert_eq!(job.retry_count, 2);
    }

    #[test]
    fn test_stage_outputs_roundtrip_and_overwrite() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();

        store
            .save_stage_output(&job.id, "script", &StageOutput::new(json!({"scenes": 3})))
            .unwrap();
        store
            .save_stage_output(
                &job.id,
                "render",
                &StageOutput::new(json!(null)).with_artifact("/renders/a.mp4"),
            )
            .unwrap();
        store
            .save_stage_output(&job.id, "script", &StageOutput::new(json!({"scenes": 4})))
            .unwrap();

        let outputs = store.stage_outputs(&job.id).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["script"].value, json!({"scenes": 4}));
        assert_eq!(outputs["render"].artifact.as_deref(), Some("/renders/a.mp4"));

        assert!(store.stage_outputs("other-job").unwrap().is_empty());
    }

    #[test]
    fn test_purge_finished_before() {
        let store = create_test_store();
        let finished = store.create(&create_test_spec()).unwrap();
        store.cancel(&finished.id).unwrap();
        store
            .save_stage_output(&finished.id, "script", &StageOutput::new(json!(1)))
            .unwrap();
        let active = store.create(&create_test_spec()).unwrap();

        let purged = store
            .purge_finished_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&finished.id).unwrap().is_none());
        assert!(store.stage_outputs(&finished.id).unwrap().is_empty());
        assert!(store.get(&active.id).unwrap().is_some());
    }

    #[test]
    fn test_purge_keeps_recent_records() {
        let store = create_test_store();
        let job = store.create(&create_test_spec()).unwrap();
        store.cancel(&job.id).unwrap();

        let purged = store
            .purge_finished_before(Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(purged, 0);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let id = {
            let store = SqliteJobStore::new(&db_path).unwrap();
            store.create(&create_test_spec()).unwrap().id
        };

        assert!(db_path.exists());
        let store = SqliteJobStore::new(&db_path).unwrap();
        assert!(store.get(&id).unwrap().is_some());
    }
}
