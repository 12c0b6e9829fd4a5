//! Log of completion reports received from the sync agent.
//!
//! Keyed by `(filename, local_path)`. A resolved entry makes replays of the
//! same report a no-op; unresolved entries count how often the agent has
//! retried.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::job::JobError;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub filename: String,
    pub local_path: String,
    /// Job the report was applied to; `None` while unresolved.
    pub job_id: Option<String>,
    pub attempts: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

pub trait ReportLog: Send + Sync {
    fn lookup(&self, filename: &str, local_path: &str) -> Result<Option<ReportRecord>, JobError>;

    /// Mark the report as applied to `job_id`.
    fn record_resolved(&self, filename: &str, local_path: &str, job_id: &str)
        -> Result<(), JobError>;

    /// Count one more unresolved delivery; returns the attempt count.
    fn record_unresolved(&self, filename: &str, local_path: &str) -> Result<u32, JobError>;

    /// Drop entries pointing at a job that no longer exists.
    fn purge_job(&self, job_id: &str) -> Result<usize, JobError>;
}

pub struct SqliteReportLog {
    conn: Mutex<Connection>,
}

impl SqliteReportLog {
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, JobError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_error)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_reports (
                filename TEXT NOT NULL,
                local_path TEXT NOT NULL,
                job_id TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                PRIMARY KEY (filename, local_path)
            );

            CREATE INDEX IF NOT EXISTS idx_sync_reports_job ON sync_reports(job_id);
            "#,
        )
        .map_err(db_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }
}

fn db_error(e: rusqlite::Error) -> JobError {
    JobError::Database(e.to_string())
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl ReportLog for SqliteReportLog {
    fn lookup(&self, filename: &str, local_path: &str) -> Result<Option<ReportRecord>, JobError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT filename, local_path, job_id, attempts, first_seen_at, last_seen_at \
             FROM sync_reports WHERE filename = ? AND local_path = ?",
            params![filename, local_path],
            |row| {
                let first: String = row.get(4)?;
                let last: String = row.get(5)?;
                Ok(ReportRecord {
                    filename: row.get(0)?,
                    local_path: row.get(1)?,
                    job_id: row.get(2)?,
                    attempts: row.get(3)?,
                    first_seen_at: parse_time(&first),
                    last_seen_at: parse_time(&last),
                })
            },
        )
        .optional()
        .map_err(db_error)
    }

    fn record_resolved(
        &self,
        filename: &str,
        local_path: &str,
        job_id: &str,
    ) -> Result<(), JobError> {
        let conn = self.conn()?;
        let now = now_string();
        conn.execute(
            "INSERT INTO sync_reports (filename, local_path, job_id, attempts, first_seen_at, last_seen_at) \
             VALUES (?1, ?2, ?3, 1, ?4, ?4) \
             ON CONFLICT(filename, local_path) DO UPDATE SET \
                job_id = excluded.job_id, attempts = attempts + 1, last_seen_at = excluded.last_seen_at",
            params![filename, local_path, job_id, now],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn record_unresolved(&self, filename: &str, local_path: &str) -> Result<u32, JobError> {
        let conn = self.conn()?;
        let now = now_string();
        conn.query_row(
            "INSERT INTO sync_reports (filename, local_path, job_id, attempts, first_seen_at, last_seen_at) \
             VALUES (?1, ?2, NULL, 1, ?3, ?3) \
             ON CONFLICT(filename, local_path) DO UPDATE SET \
                attempts = attempts + 1, last_seen_at = excluded.last_seen_at \
             RETURNING attempts",
            params![filename, local_path, now],
            |row| row.get(0),
        )
        .map_err(db_error)
    }

    fn purge_job(&self, job_id: &str) -> Result<usize, JobError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sync_reports WHERE job_id = ?", params![job_id])
            .map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_attempts_accumulate() {
        let log = SqliteReportLog::in_memory().unwrap();
        assert_eq!(log.record_unresolved("Arrival", "/media/Arrival").unwrap(), 1);
        assert_eq!(log.record_unresolved("Arrival", "/media/Arrival").unwrap(), 2);
        assert_eq!(log.record_unresolved("Arrival", "/media/other").unwrap(), 1);

        let record = log.lookup("Arrival", "/media/Arrival").unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert!(record.job_id.is_none());
        assert!(record.last_seen_at >= record.first_seen_at);
    }

    #[test]
    fn test_resolution_recorded_after_retries() {
        let log = SqliteReportLog::in_memory().unwrap();
        log.record_unresolved("Dune", "/media/Dune").unwrap();
        log.record_resolved("Dune", "/media/Dune", "job-1").unwrap();

        let record = log.lookup("Dune", "/media/Dune").unwrap().unwrap();
        assert_eq!(record.job_id.as_deref(), Some("job-1"));
        assert_eq!(record.attempts, 2);
    }

    #[test]
    fn test_purge_job() {
        let log = SqliteReportLog::in_memory().unwrap();
        log.record_resolved("Dune", "/media/Dune", "job-1").unwrap();
        log.record_unresolved("Other", "/media/Other").unwrap();

        assert_eq!(log.purge_job("job-1").unwrap(), 1);
        assert!(log.lookup("Dune", "/media/Dune").unwrap().is_none());
        assert!(log.lookup("Other", "/media/Other").unwrap().is_some());
    }
}
