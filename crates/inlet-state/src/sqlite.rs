//! `SQLite`-backed implementation of [`WatermarkStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use inlet_types::job::{JobId, RunStats, RunStatus};
use rusqlite::Connection;

use crate::backend::WatermarkStore;
use crate::error::{self, StateError};

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS high_watermarks (
    job TEXT NOT NULL,
    signature TEXT NOT NULL,
    high_watermark INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (job, signature)
);

CREATE TABLE IF NOT EXISTS job_flags (
    job TEXT PRIMARY KEY,
    full_extract INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pull_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    signature TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_pulled INTEGER DEFAULT 0,
    pages_fetched INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_pull_runs_job ON pull_runs (job, signature);
";

/// `SQLite`-backed watermark storage.
///
/// Create with [`SqliteWatermarkStore::open`] for file-backed persistence
/// or [`SqliteWatermarkStore::in_memory`] for tests.
pub struct SqliteWatermarkStore {
    conn: Mutex<Connection>,
}

impl SqliteWatermarkStore {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created, or
    /// [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't be
    /// initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn read_high_watermarks(&self, job: &JobId) -> error::Result<HashMap<String, i64>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT signature, high_watermark FROM high_watermarks WHERE job = ?1")?;
        let rows = stmt.query_map([job.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut watermarks = HashMap::new();
        for row in rows {
            let (signature, millis) = row?;
            watermarks.insert(signature, millis);
        }
        Ok(watermarks)
    }

    fn set_high_watermark(
        &self,
        job: &JobId,
        signature: &str,
        millis: i64,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO high_watermarks (job, signature, high_watermark, updated_at) \
             VALUES (?1, ?2, ?3, datetime('now')) \
             ON CONFLICT(job, signature) \
             DO UPDATE SET high_watermark = MAX(high_watermark, excluded.high_watermark), \
                           updated_at = excluded.updated_at",
            rusqlite::params![job.as_str(), signature, millis],
        )?;
        Ok(())
    }

    fn full_extract_flag(&self, job: &JobId) -> error::Result<Option<bool>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT full_extract FROM job_flags WHERE job = ?1",
            [job.as_str()],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(value) => Ok(Some(value != 0)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_full_extract_flag(&self, job: &JobId, value: bool) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO job_flags (job, full_extract, updated_at) \
             VALUES (?1, ?2, datetime('now')) \
             ON CONFLICT(job) \
             DO UPDATE SET full_extract = excluded.full_extract, \
                           updated_at = excluded.updated_at",
            rusqlite::params![job.as_str(), i64::from(value)],
        )?;
        Ok(())
    }

    fn start_run(&self, job: &JobId, signature: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pull_runs (job, signature, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![job.as_str(), signature, RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pull_runs SET status = ?1, finished_at = datetime('now'), \
             records_pulled = ?2, pages_fetched = ?3, error_message = ?4 \
             WHERE id = ?5",
            rusqlite::params![
                status.as_str(),
                stats.records_pulled as i64,
                stats.pages_fetched as i64,
                stats.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobId {
        JobId::new(name)
    }

    #[test]
    fn watermarks_roundtrip() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        assert!(store.read_high_watermarks(&job("j")).unwrap().is_empty());

        store.set_high_watermark(&job("j"), "sig-a", 1000).unwrap();
        store.set_high_watermark(&job("j"), "sig-b", 2000).unwrap();

        let map = store.read_high_watermarks(&job("j")).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["sig-a"], 1000);
        assert_eq!(map["sig-b"], 2000);
    }

    #[test]
    fn watermark_only_moves_forward() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        store.set_high_watermark(&job("j"), "sig", 5000).unwrap();
        // A failed run resuming from its low watermark writes a lower
        // value; the stored maximum must survive.
        store.set_high_watermark(&job("j"), "sig", 1000).unwrap();

        let map = store.read_high_watermarks(&job("j")).unwrap();
        assert_eq!(map["sig"], 5000);

        store.set_high_watermark(&job("j"), "sig", 9000).unwrap();
        let map = store.read_high_watermarks(&job("j")).unwrap();
        assert_eq!(map["sig"], 9000);
    }

    #[test]
    fn different_jobs_independent() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        store.set_high_watermark(&job("a"), "sig", 1).unwrap();
        store.set_high_watermark(&job("b"), "sig", 2).unwrap();

        assert_eq!(store.read_high_watermarks(&job("a")).unwrap()["sig"], 1);
        assert_eq!(store.read_high_watermarks(&job("b")).unwrap()["sig"], 2);
    }

    #[test]
    fn full_extract_flag_roundtrip() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        assert_eq!(store.full_extract_flag(&job("j")).unwrap(), None);

        store.set_full_extract_flag(&job("j"), true).unwrap();
        assert_eq!(store.full_extract_flag(&job("j")).unwrap(), Some(true));

        store.set_full_extract_flag(&job("j"), false).unwrap();
        assert_eq!(store.full_extract_flag(&job("j")).unwrap(), Some(false));
    }

    #[test]
    fn run_lifecycle() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        let run_id = store.start_run(&job("j"), "sig").unwrap();
        assert!(run_id > 0);

        store
            .complete_run(
                run_id,
                RunStatus::Completed,
                &RunStats {
                    records_pulled: 1000,
                    pages_fetched: 10,
                    error_message: None,
                },
            )
            .unwrap();

        let conn = store.lock_conn().unwrap();
        let (status, records): (String, i64) = conn
            .query_row(
                "SELECT status, records_pulled FROM pull_runs WHERE id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "completed");
        assert_eq!(records, 1000);
    }

    #[test]
    fn run_failure_records_error() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        let run_id = store.start_run(&job("j"), "sig").unwrap();
        store
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunStats {
                    records_pulled: 50,
                    pages_fetched: 1,
                    error_message: Some("connection reset".into()),
                },
            )
            .unwrap();

        let conn = store.lock_conn().unwrap();
        let (status, error): (String, Option<String>) = conn
            .query_row(
                "SELECT status, error_message FROM pull_runs WHERE id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error, Some("connection reset".into()));
    }

    #[test]
    fn multiple_runs_get_distinct_ids() {
        let store = SqliteWatermarkStore::in_memory().unwrap();
        let run1 = store.start_run(&job("j"), "sig").unwrap();
        let run2 = store.start_run(&job("j"), "sig").unwrap();
        assert_ne!(run1, run2);
        assert!(run2 > run1);
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("inlet.db");

        {
            let store = SqliteWatermarkStore::open(&path).unwrap();
            store.set_high_watermark(&job("j"), "sig", 42).unwrap();
        }

        let store = SqliteWatermarkStore::open(&path).unwrap();
        assert_eq!(store.read_high_watermarks(&job("j")).unwrap()["sig"], 42);
    }
}
