//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{
    AcquisitionJob, CreateJobRequest, JobError, JobFilter, JobStatus, JobStore, Transition,
};
use crate::torrent_client::TorrentSource;

const COLUMNS: &str = "id, correlation_key, display_name, owner, status, source, progress, \
     missing_polls, hint_path, destination_path, last_error, created_at, status_updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::from_connection(conn)
    }

    /// In-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, JobError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                correlation_key TEXT,
                display_name TEXT NOT NULL,
                display_key TEXT NOT NULL,
                owner TEXT NOT NULL,
                status TEXT NOT NULL,
                source TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                missing_polls INTEGER NOT NULL DEFAULT 0,
                hint_path TEXT,
                destination_path TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                status_updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, status_updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_jobs_display_key ON jobs(display_key);
            CREATE INDEX IF NOT EXISTS idx_jobs_correlation_key ON jobs(correlation_key);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_sync_pending_title
                ON jobs(owner, display_key) WHERE status = 'sync_pending';
            "#,
        )
        .map_err(db_error)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<AcquisitionJob>, JobError> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_error)
    }

    fn fetch_existing(conn: &Connection, id: &str) -> Result<AcquisitionJob, JobError> {
        Self::fetch(conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AcquisitionJob>, JobError> {
        let mut stmt = conn.prepare(sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params, Self::row_to_job)
            .map_err(db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref owner) = filter.owner {
            conditions.push("owner = ?");
            params.push(Box::new(owner.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<AcquisitionJob> {
        let status: String = row.get(4)?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| conversion_error(4, e))?;
        let source: String = row.get(5)?;
        let source: TorrentSource =
            serde_json::from_str(&source).map_err(|e| conversion_error(5, e))?;

        Ok(AcquisitionJob {
            id: row.get(0)?,
            correlation_key: row.get(1)?,
            display_name: row.get(2)?,
            owner: row.get(3)?,
            status,
            source,
            progress: row.get(6)?,
            missing_polls: row.get(7)?,
            hint_path: row.get(8)?,
            destination_path: row.get(9)?,
            last_error: row.get(10)?,
            created_at: parse_timestamp(row, 11)?,
            status_updated_at: parse_timestamp(row, 12)?,
        })
    }
}

/// Case-folded title used for duplicate detection and exact lookups.
fn display_key(display_name: &str) -> String {
    display_name.trim().to_lowercase()
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A stamp strictly after `previous`, even if the wall clock went backwards.
fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    now().max(previous + Duration::microseconds(1))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn db_error(e: rusqlite::Error) -> JobError {
    JobError::Database(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<AcquisitionJob, JobError> {
        let display_name = request.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(JobError::InvalidRequest("display_name is empty".to_string()));
        }
        if request.owner.trim().is_empty() {
            return Err(JobError::InvalidRequest("owner is empty".to_string()));
        }

        let key = display_key(&display_name);
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM jobs WHERE owner = ? AND display_key = ? \
                 AND status IN ('queued', 'downloading', 'seeding', 'sync_pending') LIMIT 1",
                params![request.owner, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if let Some(existing_id) = existing {
            return Err(JobError::Duplicate {
                display_name,
                existing_id,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        let source_json =
            serde_json::to_string(&request.source).map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, display_name, display_key, owner, status, source, created_at, status_updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                display_name,
                key,
                request.owner,
                JobStatus::Queued.as_str(),
                source_json,
                format_timestamp(&created_at),
                format_timestamp(&created_at),
            ],
        )
        .map_err(db_error)?;

        Ok(AcquisitionJob {
            id,
            correlation_key: None,
            display_name,
            owner: request.owner,
            status: JobStatus::Queued,
            source: request.source,
            progress: 0.0,
            missing_polls: 0,
            hint_path: None,
            destination_path: None,
            last_error: None,
            created_at,
            status_updated_at: created_at,
        })
    }

    fn get(&self, id: &str) -> Result<Option<AcquisitionJob>, JobError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<AcquisitionJob>, JobError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {COLUMNS} FROM jobs {where_clause} \
             ORDER BY status_updated_at DESC, created_at DESC LIMIT ? OFFSET ?"
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Self::query_jobs(&conn, &sql, &param_refs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {where_clause}");
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_error)
    }

    fn find_by_display_name(
        &self,
        status: JobStatus,
        display_name: &str,
    ) -> Result<Vec<AcquisitionJob>, JobError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = ? AND display_key = ? \
             ORDER BY status_updated_at DESC"
        );
        Self::query_jobs(
            &conn,
            &sql,
            params![status.as_str(), display_key(display_name)],
        )
    }

    fn attach_correlation_key(&self, id: &str, key: &str) -> Result<AcquisitionJob, JobError> {
        let conn = self.conn()?;
        let mut job = Self::fetch_existing(&conn, id)?;
        let key = key.to_lowercase();

        if let Some(existing) = job.correlation_key.clone() {
            if existing == key {
                return Ok(job);
            }
            return Err(JobError::KeyAlreadySet {
                job_id: id.to_string(),
                existing,
            });
        }

        conn.execute(
            "UPDATE jobs SET correlation_key = ? WHERE id = ? AND correlation_key IS NULL",
            params![key, id],
        )
        .map_err(db_error)?;

        job.correlation_key = Some(key);
        Ok(job)
    }

    fn transition(
        &self,
        id: &str,
        from: JobStatus,
        transition: Transition,
    ) -> Result<AcquisitionJob, JobError> {
        let conn = self.conn()?;
        let current = Self::fetch_existing(&conn, id)?;

        if current.status != from {
            return Err(JobError::StatusMismatch {
                job_id: id.to_string(),
                expected: from,
                actual: current.status,
            });
        }
        if !from.can_transition_to(transition.to) {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from,
                to: transition.to,
            });
        }
        if transition.to == JobStatus::Downloading && current.correlation_key.is_none() {
            return Err(JobError::MissingCorrelationKey(id.to_string()));
        }

        let stamp = next_stamp(current.status_updated_at);
        let last_error = (transition.to == JobStatus::Failed).then(|| {
            transition
                .last_error
                .unwrap_or_else(|| "unknown error".to_string())
        });
        let hint_path = transition.hint_path.or(current.hint_path);
        let destination_path = transition.destination_path.or(current.destination_path);

        let changed = conn
            .execute(
                "UPDATE jobs SET status = ?, status_updated_at = ?, last_error = ?, \
                 hint_path = ?, destination_path = ? WHERE id = ? AND status = ?",
                params![
                    transition.to.as_str(),
                    format_timestamp(&stamp),
                    last_error,
                    hint_path,
                    destination_path,
                    id,
                    from.as_str(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    JobError::Duplicate {
                        display_name: current.display_name.clone(),
                        existing_id: "another sync_pending job".to_string(),
                    }
                } else {
                    db_error(e)
                }
            })?;

        if changed == 0 {
            let actual = Self::fetch_existing(&conn, id)?.status;
            return Err(JobError::StatusMismatch {
                job_id: id.to_string(),
                expected: from,
                actual,
            });
        }

        Ok(AcquisitionJob {
            status: transition.to,
            status_updated_at: stamp,
            last_error,
            hint_path,
            destination_path,
            ..current
        })
    }

    fn record_progress(&self, id: &str, progress: f64) -> Result<(), JobError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET progress = ?, missing_polls = 0 WHERE id = ?",
                params![progress.clamp(0.0, 1.0), id],
            )
            .map_err(db_error)?;
        if changed == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_missing(&self, id: &str) -> Result<u32, JobError> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE jobs SET missing_polls = missing_polls + 1 WHERE id = ? RETURNING missing_polls",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?
        .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn list_retirable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AcquisitionJob>, JobError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status IN ('notified', 'failed') \
             AND status_updated_at < ? ORDER BY status_updated_at ASC LIMIT ?"
        );
        Self::query_jobs(&conn, &sql, params![format_timestamp(&cutoff), limit])
    }

    fn delete(&self, id: &str) -> Result<AcquisitionJob, JobError> {
        let conn = self.conn()?;
        let job = Self::fetch_existing(&conn, id)?;
        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])
            .map_err(db_error)?;
        Ok(job)
    }
}
