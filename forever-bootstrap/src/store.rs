//! Persisted one-time markers, backed by SQLite.
//!
//! The database lives in the application data directory, so it survives
//! process restarts and goes away with a data clear or reinstall. A marker row
//! is inserted once and only read afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension};

use crate::error::StoreError;

pub const MARKER_DB: &str = "forever-markers.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeMarker {
    pub key: String,
    pub satisfied: bool,
    pub persisted_at: Option<DateTime<Utc>>,
}

pub trait MarkerStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<OneTimeMarker>, StoreError>;

    /// Idempotent: marking an already satisfied key changes nothing.
    fn mark_satisfied(&self, key: &str) -> Result<(), StoreError>;

    fn is_satisfied(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some_and(|m| m.satisfied))
    }
}

pub struct SqliteMarkerStore {
    db: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteMarkerStore {
    /// Open or create the marker database at `path`.
    ///
    /// A file that is not a SQLite database is renamed to `<path>.corrupt`
    /// and replaced with an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                action: "create directory",
                path: parent.display().to_string(),
                source,
            })?;
        }
        let db = match Self::connect(path) {
            Err(StoreError::Database(e)) if is_corruption(&e) => {
                let aside = quarantine_path(path);
                tracing::warn!(
                    path = %path.display(),
                    aside = %aside.display(),
                    "Marker database is unreadable, starting a fresh one: {e}"
                );
                std::fs::rename(path, &aside).map_err(|source| StoreError::Io {
                    action: "quarantine",
                    path: path.display().to_string(),
                    source,
                })?;
                Self::connect(path)?
            }
            other => other?,
        };
        Ok(Self {
            db: Mutex::new(db),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Connection::open_in_memory()?;
        init_schema(&db)?;
        Ok(Self {
            db: Mutex::new(db),
            path: None,
        })
    }

    /// The database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connect(path: &Path) -> Result<Connection, StoreError> {
        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_schema(&db)?;
        Ok(db)
    }
}

fn init_schema(db: &Connection) -> Result<(), StoreError> {
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS markers (
            key TEXT PRIMARY KEY,
            satisfied INTEGER NOT NULL,
            persisted_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

impl MarkerStore for SqliteMarkerStore {
    fn read(&self, key: &str) -> Result<Option<OneTimeMarker>, StoreError> {
        let db = self.db.lock();
        let row = db
            .query_row(
                "SELECT satisfied, persisted_at FROM markers WHERE key = ?1",
                rusqlite::params![key],
                |row| {
                    Ok((
                        row.get::<_, rusqlite::types::Value>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(satisfied, persisted_at)| {
            // Anything but an integer 1 is ambiguous and counts as unset.
            let satisfied = match satisfied {
                rusqlite::types::Value::Integer(1) => true,
                other => {
                    tracing::warn!(key, value = ?other, "Ambiguous marker value, treating as unset");
                    false
                }
            };
            OneTimeMarker {
                key: key.to_string(),
                satisfied,
                persisted_at: persisted_at
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc)),
            }
        }))
    }

    fn mark_satisfied(&self, key: &str) -> Result<(), StoreError> {
        let db = self.db.lock();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO markers (key, satisfied, persisted_at) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET satisfied = 1, persisted_at = excluded.persisted_at
             WHERE markers.satisfied IS NOT 1",
            rusqlite::params![key, now],
        )?;
        Ok(())
    }
}
