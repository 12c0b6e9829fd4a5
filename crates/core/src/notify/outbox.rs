//! Durable notification outbox.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{DeliveryState, Notification, NotifyError};
use crate::job::JobStatus;

const COLUMNS: &str =
    "job_id, status, owner, text, state, attempts, last_error, created_at, updated_at";

/// Queue of per-transition messages, unique by `(job_id, status)`.
pub trait NotificationOutbox: Send + Sync {
    /// Queue a message. Returns `false` if one already exists for this
    /// transition, whatever its state.
    fn enqueue(
        &self,
        job_id: &str,
        status: JobStatus,
        owner: &str,
        text: &str,
    ) -> Result<bool, NotifyError>;

    fn get(&self, job_id: &str, status: JobStatus) -> Result<Option<Notification>, NotifyError>;

    /// Move a pending row to `sending` and count the attempt. `None` if the
    /// row is missing or not pending.
    fn claim(&self, job_id: &str, status: JobStatus) -> Result<Option<Notification>, NotifyError>;

    /// Settle a claimed row: `Pending` puts it back in the queue.
    fn settle(
        &self,
        job_id: &str,
        status: JobStatus,
        state: DeliveryState,
        error: Option<&str>,
    ) -> Result<(), NotifyError>;

    /// Pending rows, oldest first.
    fn list_pending(&self, limit: usize) -> Result<Vec<Notification>, NotifyError>;

    /// Return rows stuck in `sending` since before `cutoff` to `pending`.
    fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, NotifyError>;

    fn delete_for_job(&self, job_id: &str) -> Result<usize, NotifyError>;
}

pub struct SqliteOutbox {
    conn: Mutex<Connection>,
}

impl SqliteOutbox {
    pub fn new(path: &Path) -> Result<Self, NotifyError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, NotifyError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, NotifyError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_error)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                job_id TEXT NOT NULL,
                status TEXT NOT NULL,
                owner TEXT NOT NULL,
                text TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_id, status)
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_state
                ON notifications(state, created_at);
            "#,
        )
        .map_err(db_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, NotifyError> {
        self.conn
            .lock()
            .map_err(|_| NotifyError::Store("connection mutex poisoned".to_string()))
    }
}

fn db_error(e: rusqlite::Error) -> NotifyError {
    NotifyError::Store(e.to_string())
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

struct RawNotification {
    job_id: String,
    status: String,
    owner: String,
    text: String,
    state: String,
    attempts: u32,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawNotification {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            status: row.get(1)?,
            owner: row.get(2)?,
            text: row.get(3)?,
            state: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_notification(self) -> Result<Notification, NotifyError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| NotifyError::Store(e.to_string()))?;
        Ok(Notification {
            job_id: self.job_id,
            status,
            owner: self.owner,
            text: self.text,
            state: self.state.parse()?,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
        })
    }
}

impl NotificationOutbox for SqliteOutbox {
    fn enqueue(
        &self,
        job_id: &str,
        status: JobStatus,
        owner: &str,
        text: &str,
    ) -> Result<bool, NotifyError> {
        let conn = self.conn()?;
        let now = stamp(Utc::now());
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO notifications \
                 (job_id, status, owner, text, state, attempts, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
                params![job_id, status.as_str(), owner, text, now],
            )
            .map_err(db_error)?;
        Ok(inserted == 1)
    }

    fn get(&self, job_id: &str, status: JobStatus) -> Result<Option<Notification>, NotifyError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM notifications WHERE job_id = ?1 AND status = ?2"),
                params![job_id, status.as_str()],
                RawNotification::from_row,
            )
            .optional()
            .map_err(db_error)?;
        raw.map(RawNotification::into_notification).transpose()
    }

    fn claim(&self, job_id: &str, status: JobStatus) -> Result<Option<Notification>, NotifyError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "UPDATE notifications SET state = 'sending', attempts = attempts + 1, \
                     updated_at = ?3 \
                     WHERE job_id = ?1 AND status = ?2 AND state = 'pending' \
                     RETURNING {COLUMNS}"
                ),
                params![job_id, status.as_str(), stamp(Utc::now())],
                RawNotification::from_row,
            )
            .optional()
            .map_err(db_error)?;
        raw.map(RawNotification::into_notification).transpose()
    }

    fn settle(
        &self,
        job_id: &str,
        status: JobStatus,
        state: DeliveryState,
        error: Option<&str>,
    ) -> Result<(), NotifyError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE notifications SET state = ?3, last_error = COALESCE(?4, last_error), \
             updated_at = ?5 \
             WHERE job_id = ?1 AND status = ?2 AND state = 'sending'",
            params![
                job_id,
                status.as_str(),
                state.as_str(),
                error,
                stamp(Utc::now())
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<Notification>, NotifyError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM notifications WHERE state = 'pending' \
                 ORDER BY created_at ASC LIMIT ?1"
            ))
            .map_err(db_error)?;
        let rows = stmt
            .query_map(params![limit as i64], RawNotification::from_row)
            .map_err(db_error)?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row.map_err(db_error)?.into_notification()?);
        }
        Ok(pending)
    }

    fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, NotifyError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE notifications SET state = 'pending', updated_at = ?2 \
             WHERE state = 'sending' AND updated_at < ?1",
            params![stamp(cutoff), stamp(Utc::now())],
        )
        .map_err(db_error)
    }

    fn delete_for_job(&self, job_id: &str) -> Result<usize, NotifyError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM notifications WHERE job_id = ?1",
            params![job_id],
        )
        .map_err(db_error)
    }
}
