//! SQLite persistence shared by the action store and device registry

mod schema;

pub use schema::SCHEMA_VERSION;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
enum State {
    Ready(DbPool),
    Unavailable(Arc<str>),
}

/// Handle to the database, or to the reason it could not be opened
///
/// An unavailable store is still a valid value: every operation on it fails
/// with [`Error::StorageUnavailable`] instead of silently using another file.
#[derive(Clone)]
pub struct Store {
    state: State,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Ready(_) => "ready".to_string(),
            State::Unavailable(reason) => format!("unavailable ({reason})"),
        };
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("state", &state)
            .finish()
    }
}

impl Store {
    /// Open (creating if needed) the database file and run migrations
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or migrated
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(Error::StorageUnavailable(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update(None, "foreign_keys", "ON")
        });
        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", path.display())))?;

        let conn = pool.get()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .ok();
        schema::init(&conn)?;

        tracing::info!(path = %path.display(), version = SCHEMA_VERSION, "database initialized");
        Ok(Self {
            state: State::Ready(pool),
            location: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the schema cannot be created
    pub fn open_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        // One connection, so every caller sees the same in-memory database
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let conn = pool.get()?;
        schema::init(&conn)?;

        Ok(Self {
            state: State::Ready(pool),
            location: None,
        })
    }

    /// Open `path`, or return an unavailable store carrying the failure
    pub fn open_or_unavailable<P: AsRef<Path>>(path: P) -> Self {
        match Self::open(path.as_ref()) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(path = %path.as_ref().display(), error = %e, "storage unavailable");
                let mut store = Self::unavailable(e.to_string());
                store.location = Some(path.as_ref().to_path_buf());
                store
            }
        }
    }

    /// A store whose every operation fails with `StorageUnavailable`
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: State::Unavailable(Arc::from(reason.into())),
            location: None,
        }
    }

    /// Database file, if file backed
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Whether the store can serve requests
    pub fn is_available(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Borrow a connection
    ///
    /// Do not hold it while calling another method that needs one: the
    /// in-memory pool has a single connection.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` for an unavailable store, or a pool error
    pub fn conn(&self) -> Result<DbConn> {
        match &self.state {
            State::Ready(pool) => Ok(pool.get()?),
            State::Unavailable(reason) => Err(Error::StorageUnavailable(reason.to_string())),
        }
    }
}

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
