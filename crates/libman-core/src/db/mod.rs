//! Database module for libman.
//!
//! A single SQLite connection guarded by one process-wide re-entrant lock.
//! Every store call takes the lock for the whole SQL interaction and
//! releases it before returning, so calls from the UI thread and the worker
//! thread are serialized against each other.

pub mod cue_points;
pub mod folders;
pub mod jobs;
pub mod models;
pub mod schema;
pub mod smart;
pub mod tracks;


use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard};
use rusqlite::Connection;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::{debug, error, info};

pub use models::*;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database is not open")]
    NotOpen,

    #[error("Failed to initialize database: {0}")]
    Initialization(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No explicit transaction is open on this thread")]
    NoTransaction,
}

pub type DbResult<T> = Result<T, DbError>;

type SharedConnection = ReentrantMutex<RefCell<Option<Connection>>>;
type ConnGuard<'a> = ReentrantMutexGuard<'a, RefCell<Option<Connection>>>;

/// Owner of the transaction opened by [`Database::begin_transaction`].
///
/// While a thread owns it, every other thread waits in
/// [`Database::lock_conn`] until the transaction is committed or rolled back.
#[derive(Default)]
struct TxnOwner {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Main database interface.
///
/// Cloning is cheap; all clones share the same connection and lock.
#[derive(Clone)]
pub struct Database {
    conn: Arc<SharedConnection>,
    explicit_txn: Arc<TxnOwner>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Create a closed database handle. Call [`Database::initialize`] to open it.
    pub fn new() -> Self {
        Self {
            conn: Arc::new(ReentrantMutex::new(RefCell::new(None))),
            explicit_txn: Arc::new(TxnOwner::default()),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Open (or create) the database file and initialize its schema
    pub fn open<P: AsRef<Path>>(db_path: P) -> DbResult<Self> {
        let db = Self::new();
        db.initialize(db_path)?;
        Ok(db)
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self::new();
        let conn = Connection::open_in_memory()?;
        db.install(conn, ":memory:")?;
        Ok(db)
    }

    /// Open the backing file, creating tables and running additive migrations.
    ///
    /// Any previously open connection is closed first. Called from inside a
    /// store callback it fails and keeps the current connection. On failure the store
    /// is left closed and the reason is available from [`Database::last_error`].
    pub fn initialize<P: AsRef<Path>>(&self, db_path: P) -> DbResult<()> {
        self.close();

        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Err(self.record_init_failure(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    )));
                }
            }
        }

        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(e) => {
                return Err(self.record_init_failure(format!(
                    "cannot open {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        self.install(conn, &path.display().to_string())
    }

    fn install(&self, conn: Connection, label: &str) -> DbResult<()> {
        if let Err(e) = Self::prepare_connection(&conn) {
            return Err(self.record_init_failure(format!("schema setup failed: {}", e)));
        }

        let guard = self.lock_conn();
        let Ok(mut slot) = guard.try_borrow_mut() else {
            return Err(self.record_init_failure(format!(
                "cannot open {} while a store operation is in progress",
                label
            )));
        };
        *slot = Some(conn);
        info!(path = %label, "Database opened");
        Ok(())
    }

    /// Take the store lock, first waiting out an explicit transaction owned
    /// by another thread.
    fn lock_conn(&self) -> ConnGuard<'_> {
        let me = thread::current().id();
        loop {
            let guard = self.conn.lock();
            let mut owner = self.explicit_txn.owner.lock();
            let held = *owner;
            match held {
                Some(other) if other != me => {
                    drop(guard);
                    self.explicit_txn.released.wait(&mut owner);
                }
                _ => return guard,
            }
        }
    }

    fn release_explicit_txn(&self) {
        *self.explicit_txn.owner.lock() = None;
        self.explicit_txn.released.notify_all();
    }

    fn prepare_connection(conn: &Connection) -> DbResult<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        schema::create_tables(conn)?;
        schema::run_migrations(conn)?;

        Ok(())
    }

    fn record_init_failure(&self, message: String) -> DbError {
        error!("Database initialization failed: {}", message);
        *self.last_error.lock() = Some(message.clone());
        DbError::Initialization(message)
    }

    /// Release the connection. Safe to call repeatedly.
    pub fn close(&self) {
        let guard = self.lock_conn();
        let Ok(mut slot) = guard.try_borrow_mut() else {
            // Called from inside a store callback; the outer call still owns the connection.
            error!("Database close requested while a store operation is in progress");
            return;
        };
        if slot.take().is_some() {
            info!("Database closed");
        }
        // Dropping the connection rolled back any open transaction
        self.release_explicit_txn();
    }

    /// Check if the database is open
    pub fn is_open(&self) -> bool {
        let guard = self.lock_conn();
        let open = guard.borrow().is_some();
        open
    }

    /// Message describing the most recent failed store call
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Execute a function with the connection while holding the store lock.
    ///
    /// Errors are recorded as the last error, prefixed with `context`.
    pub fn with_conn<F, T>(&self, context: &str, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let guard = self.lock_conn();
        let slot = guard.borrow();
        let result = match slot.as_ref() {
            Some(conn) => f(conn),
            None => Err(DbError::NotOpen),
        };

        if let Err(e) = &result {
            self.record_error(context, e);
        }
        result
    }

    /// Execute a function within a transaction.
    ///
    /// The store lock is held for the whole closure, so no other thread can
    /// interleave statements. Commits on `Ok`, rolls back on `Err` or panic.
    /// Inside an explicit transaction on the same thread the closure runs in
    /// a savepoint, and its changes commit or roll back with the outer one.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + fmt::Display,
    {
        let guard = self.lock_conn();
        let slot = guard.borrow();
        let Some(conn) = slot.as_ref() else {
            self.record_error("transaction", &DbError::NotOpen);
            return Err(DbError::NotOpen.into());
        };

        if !conn.is_autocommit() {
            return self.savepoint(conn, f);
        }

        let tx = match conn.unchecked_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                let e = DbError::from(e);
                self.record_error("begin transaction", &e);
                return Err(e.into());
            }
        };

        // Dropping `tx` without committing rolls back.
        let value = match f(&tx) {
            Ok(value) => value,
            Err(e) => {
                self.record_error("transaction", &e);
                return Err(e);
            }
        };

        if let Err(e) = tx.commit() {
            let e = DbError::from(e);
            self.record_error("commit transaction", &e);
            return Err(e.into());
        }

        Ok(value)
    }

    fn savepoint<F, T, E>(&self, conn: &Connection, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + fmt::Display,
    {
        if let Err(e) = conn.execute_batch("SAVEPOINT libman_nested") {
            let e = DbError::from(e);
            self.record_error("begin savepoint", &e);
            return Err(e.into());
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| f(conn)));
        let outcome = match &result {
            Ok(Ok(_)) => conn.execute_batch("RELEASE libman_nested"),
            _ => conn.execute_batch("ROLLBACK TO libman_nested; RELEASE libman_nested"),
        };

        match result {
            Ok(Ok(value)) => match outcome {
                Ok(()) => Ok(value),
                Err(e) => {
                    let e = DbError::from(e);
                    self.record_error("release savepoint", &e);
                    Err(e.into())
                }
            },
            Ok(Err(e)) => {
                self.record_error("transaction", &e);
                Err(e)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Begin an explicit transaction spanning several store calls.
    ///
    /// The calling thread owns the store until it calls
    /// [`Database::commit_transaction`] or [`Database::rollback_transaction`];
    /// store calls from other threads wait until then.
    pub fn begin_transaction(&self) -> DbResult<()> {
        let guard = self.lock_conn();
        let result = self.with_conn("begin_transaction", |conn| {
            conn.execute_batch("BEGIN TRANSACTION")?;
            Ok(())
        });
        if result.is_ok() {
            *self.explicit_txn.owner.lock() = Some(thread::current().id());
        }
        drop(guard);
        result
    }

    /// Commit the transaction started by [`Database::begin_transaction`]
    pub fn commit_transaction(&self) -> DbResult<()> {
        self.end_transaction("commit_transaction", "COMMIT")
    }

    /// Roll back the transaction started by [`Database::begin_transaction`]
    pub fn rollback_transaction(&self) -> DbResult<()> {
        self.end_transaction("rollback_transaction", "ROLLBACK")
    }

    fn end_transaction(&self, context: &str, sql: &str) -> DbResult<()> {
        let _guard = self.lock_conn();
        if *self.explicit_txn.owner.lock() != Some(thread::current().id()) {
            self.record_error(context, &DbError::NoTransaction);
            return Err(DbError::NoTransaction);
        }

        let mut finished = false;
        let result = self.with_conn(context, |conn| {
            let executed = conn.execute_batch(sql);
            finished = conn.is_autocommit();
            Ok(executed?)
        });
        if finished {
            self.release_explicit_txn();
        }
        result
    }

    fn record_error(&self, context: &str, e: &dyn fmt::Display) {
        let message = format!("{}: {}", context, e);
        debug!("Store call failed: {}", message);
        *self.last_error.lock() = Some(message);
    }
}

/// Translate a UNIQUE/FOREIGN KEY failure into [`DbError::Constraint`]
pub(crate) fn map_constraint(e: rusqlite::Error, what: impl FnOnce() -> String) -> DbError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(what())
        }
        e => DbError::Sqlite(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_in_memory_database() {
        let db = Database::open_in_memory().expect("Failed to create in-memory database");
        assert!(db.is_open());

        let tables: Vec<String> = db
            .with_conn("list tables", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .unwrap();

        for table in ["Tracks", "VirtualFolders", "Folder_Tracks_Link", "Jobs", "CuePoints"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().unwrap();
        let fk_enabled: i32 = db
            .with_conn("pragma", |conn| {
                Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.close();
        db.close();
        assert!(!db.is_open());

        let err = db.get_all_tracks().unwrap_err();
        assert!(matches!(err, DbError::NotOpen));
        assert!(db.last_error().unwrap().contains("not open"));
    }

    #[test]
    fn test_initialize_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("library.db");

        let db = Database::new();
        assert!(!db.is_open());
        db.initialize(&path).unwrap();

        assert!(db.is_open());
        assert!(path.exists());
    }

    #[test]
    fn test_initialize_failure_leaves_store_closed() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as a database file
        let db = Database::new();
        let err = db.initialize(dir.path()).unwrap_err();

        assert!(matches!(err, DbError::Initialization(_)));
        assert!(!db.is_open());
        assert!(db.last_error().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.transaction(|conn| {
            jobs::add_job(conn, &Job::analyze_audio(&JobParameters::for_file("/a.mp3", 1))?)?;
            Err(DbError::Constraint("forced".into()))
        });

        assert!(result.is_err());
        assert_eq!(db.get_all_jobs().unwrap().len(), 0);
    }

    #[test]
    fn test_explicit_transaction_commit_and_rollback() {
        let db = Database::open_in_memory().unwrap();
        let job = Job::analyze_audio(&JobParameters::for_file("/a.mp3", 1)).unwrap();

        db.begin_transaction().unwrap();
        db.add_job(&job).unwrap();
        db.rollback_transaction().unwrap();
        assert_eq!(db.get_all_jobs().unwrap().len(), 0);

        db.begin_transaction().unwrap();
        db.add_job(&job).unwrap();
        db.commit_transaction().unwrap();
        assert_eq!(db.get_all_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_store_reentrant_inside_transaction() {
        let db = Database::open_in_memory().unwrap();
        let job = Job::analyze_audio(&JobParameters::for_file("/a.mp3", 1)).unwrap();

        let seen: DbResult<usize> = db.transaction(|conn| {
            jobs::add_job(conn, &job)?;
            // Same thread may call back into the store while the lock is held
            db.count_jobs_by_status(JobStatus::Pending)
        });

        assert_eq!(seen.unwrap(), 1);
    }

    #[test]
    fn test_initialize_inside_store_callback_is_error() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = Job::analyze_audio(&JobParameters::for_file("/a.mp3", 1)).unwrap();
        db.add_job(&job).unwrap();

        let nested = db
            .with_conn("outer", |_| Ok(db.initialize(dir.path().join("other.db"))))
            .unwrap();

        assert!(matches!(nested, Err(DbError::Initialization(_))));
        // The original connection is still installed
        assert!(db.is_open());
        assert_eq!(db.get_all_jobs().unwrap().len(), 1);
    }
}
