//! Durable table of pending jobs.
//!
//! Holds only jobs that have not been handed to the dispatcher yet. A row is
//! removed the moment it is loaded as due and re-inserted only if the job
//! needs a further retry.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};

use crate::error::{Error, Result};

/// One pending job as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub job_id: i64,
    /// Epoch millis at which the job becomes eligible for dispatch.
    pub due_at: i64,
    pub handler: String,
    /// Encoded [`JobState`](crate::codec::JobState).
    pub state: Vec<u8>,
}

/// Query and mutation contract the scheduler relies on.
///
/// Implementations are shared as one instance and must serialize access
/// internally. Row sequences are always ascending by `due_at`.
pub trait JobStore: Send + Sync {
    /// Append a row. No uniqueness is enforced.
    fn insert(&self, row: &JobRow) -> Result<()>;

    /// All rows with `due_at < timestamp`.
    fn query_due_before(&self, timestamp: i64) -> Result<Vec<JobRow>>;

    /// Delete every row matching both fields. Returns the number deleted.
    fn delete_by_handler_and_id(&self, handler: &str, job_id: i64) -> Result<usize>;

    /// Delete every row with `due_at < timestamp`. Returns the number deleted.
    fn delete_due_before(&self, timestamp: i64) -> Result<usize>;

    /// Query and delete the rows due before `timestamp`.
    ///
    /// The default runs the two steps back to back; implementations that
    /// can do it atomically should override it.
    fn take_due_before(&self, timestamp: i64) -> Result<Vec<JobRow>> {
        let rows = self.query_due_before(timestamp)?;
        self.delete_due_before(timestamp)?;
        Ok(rows)
    }

    /// Earliest pending due time, if any.
    fn next_due_at(&self) -> Result<Option<i64>>;

    /// Every pending row.
    fn list(&self) -> Result<Vec<JobRow>>;

    fn count(&self) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite-backed store. Owns a single connection behind a mutex.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL so a second process (the CLI) can read while `serve` writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                job_id      INTEGER NOT NULL,
                due_at      INTEGER NOT NULL,
                handler     TEXT NOT NULL,
                state       BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(due_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_key ON jobs(handler, job_id);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("job store mutex poisoned".to_string()))
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, row: &JobRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO jobs (job_id, due_at, handler, state) VALUES (?1, ?2, ?3, ?4)",
            params![row.job_id, row.due_at, row.handler, row.state],
        )?;
        Ok(())
    }

    fn query_due_before(&self, timestamp: i64) -> Result<Vec<JobRow>> {
        query_due_before_on(&*self.conn()?, timestamp)
    }

    fn delete_by_handler_and_id(&self, handler: &str, job_id: i64) -> Result<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM jobs WHERE handler = ?1 AND job_id = ?2",
            params![handler, job_id],
        )?;
        Ok(deleted)
    }

    fn delete_due_before(&self, timestamp: i64) -> Result<usize> {
        delete_due_before_on(&*self.conn()?, timestamp)
    }

    fn take_due_before(&self, timestamp: i64) -> Result<Vec<JobRow>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let rows = query_due_before_on(&tx, timestamp)?;
        delete_due_before_on(&tx, timestamp)?;
        tx.commit()?;
        Ok(rows)
    }

    fn next_due_at(&self) -> Result<Option<i64>> {
        let next: Option<i64> =
            self.conn()?
                .query_row("SELECT MIN(due_at) FROM jobs", [], |row| row.get(0))?;
        Ok(next)
    }

    fn list(&self) -> Result<Vec<JobRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, due_at, handler, state FROM jobs ORDER BY due_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

// ---------------------------------------------------------------------------
// Inner functions. Accept &Connection so they work with both a plain
// connection and a transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn query_due_before_on(conn: &Connection, timestamp: i64) -> Result<Vec<JobRow>> {
    let mut stmt = conn.prepare(
        "SELECT job_id, due_at, handler, state FROM jobs
         WHERE due_at < ?1
         ORDER BY due_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![timestamp], row_to_job)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn delete_due_before_on(conn: &Connection, timestamp: i64) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM jobs WHERE due_at < ?1", params![timestamp])?;
    Ok(deleted)
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        job_id: row.get(0)?,
        due_at: row.get(1)?,
        handler: row.get(2)?,
        state: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(handler: &str, job_id: i64, due_at: i64) -> JobRow {
        JobRow {
            job_id,
            due_at,
            handler: handler.to_string(),
            state: b"{}".to_vec(),
        }
    }

    #[test]
    fn query_due_before_is_strict_and_ordered() {
        let store = SqliteJobStore::in_memory().unwrap();
        store.insert(&row("h", 1, 300)).unwrap();
        store.insert(&row("h", 2, 100)).unwrap();
        store.insert(&row("h", 3, 200)).unwrap();

        let due = store.query_due_before(300).unwrap();
        let dues: Vec<i64> = due.iter().map(|r| r.due_at).collect();
        assert_eq!(dues, vec![100, 200]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn insert_does_not_enforce_uniqueness() {
        let store = SqliteJobStore::in_memory().unwrap();
        store.insert(&row("h", 1, 100)).unwrap();
        store.insert(&row("h", 1, 100)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn delete_by_handler_and_id_matches_both_fields() {
        let store = SqliteJobStore::in_memory().unwrap();
        store.insert(&row("a", 1, 100)).unwrap();
        store.insert(&row("a", 1, 200)).unwrap();
        store.insert(&row("a", 2, 100)).unwrap();
        store.insert(&row("b", 1, 100)).unwrap();

        assert_eq!(store.delete_by_handler_and_id("a", 1).unwrap(), 2);

        let left: Vec<(String, i64)> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| (r.handler, r.job_id))
            .collect();
        assert_eq!(left, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn take_due_before_removes_what_it_returns() {
        let store = SqliteJobStore::in_memory().unwrap();
        store.insert(&row("h", 1, 100)).unwrap();
        store.insert(&row("h", 2, 500)).unwrap();

        let taken = store.take_due_before(200).unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].job_id, 1);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.next_due_at().unwrap(), Some(500));
    }

    #[test]
    fn next_due_at_is_none_when_empty() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert_eq!(store.next_due_at().unwrap(), None);
        store.insert(&row("h", 1, 900)).unwrap();
        store.insert(&row("h", 2, 400)).unwrap();
        assert_eq!(store.next_due_at().unwrap(), Some(400));
        assert_eq!(store.delete_due_before(1_000).unwrap(), 2);
        assert_eq!(store.next_due_at().unwrap(), None);
    }
}
