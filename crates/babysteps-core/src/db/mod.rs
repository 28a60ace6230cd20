//! SQLite task store utilities.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so the widget can read while the app writes
//! - `busy_timeout = 5s` to ride out short lock contention
//! - `foreign_keys = ON` so deleting a task removes its steps

pub mod migrations;
pub mod mutate;
pub mod query;
pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode as SqliteErrorCode, OpenFlags};
use serde::Serialize;
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ErrorCode;
use crate::time;
use migrations::{MigrationError, MigrationOutcome};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Files SQLite keeps next to a WAL-mode database.
pub const STORE_SIDECARS: [&str; 2] = ["-wal", "-shm"];

/// Errors opening, relocating or discarding a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("discarding the store requires explicit confirmation")]
    NotConfirmed,
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::StoreNotFound,
            Self::Io { .. } => ErrorCode::StoreWriteFailed,
            Self::Migration(error) => error.code(),
            Self::NotConfirmed => ErrorCode::DiscardNotConfirmed,
            Self::Sqlite(error) => match error.sqlite_error_code() {
                Some(SqliteErrorCode::DatabaseCorrupt | SqliteErrorCode::NotADatabase) => {
                    ErrorCode::CorruptStore
                }
                Some(SqliteErrorCode::DatabaseBusy | SqliteErrorCode::DatabaseLocked) => {
                    ErrorCode::LockContention
                }
                _ => ErrorCode::InternalUnexpected,
            },
        }
    }
}

/// Explicit answer to "discard every task and step in this store?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Declined,
    DiscardAllData,
}

/// What [`relocate_store`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Relocation {
    /// No legacy store exists; nothing to do.
    NoLegacyStore,
    /// The shared location already holds a store; the legacy one is left alone.
    TargetExists { legacy: PathBuf },
    Moved { from: PathBuf, to: PathBuf },
}

/// Open (or create) the store, apply runtime pragmas and migrate it to the
/// latest schema.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating fails. A store whose
/// migration failed is never returned.
pub fn open_store(path: &Path) -> Result<Connection, StoreError> {
    open_and_migrate(path).map(|(conn, _)| conn)
}

/// [`open_store`], also reporting what the migration engine did.
///
/// # Errors
///
/// See [`open_store`].
pub fn open_and_migrate(path: &Path) -> Result<(Connection, MigrationOutcome), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| StoreError::io("create store directory", parent, error))?;
    }

    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    let outcome = migrations::migrate(&mut conn)?;

    if !outcome.is_noop() {
        tracing::info!(
            path = %path.display(),
            from = outcome.from,
            to = outcome.to,
            stages = outcome.stages_applied,
            "store migrated"
        );
    }
    Ok((conn, outcome))
}

/// Open an existing store without creating it.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] when `path` does not exist, otherwise
/// see [`open_store`].
pub fn open_existing(path: &Path) -> Result<Connection, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    open_store(path)
}

/// Open an existing store for reading only. Nothing is migrated or created,
/// so the schema may be older than [`migrations::LATEST_SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] when `path` does not exist, or an error
/// if SQLite cannot open it.
pub fn open_read_only(path: &Path) -> Result<Connection, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

/// A fresh in-memory store at the latest schema.
///
/// # Errors
///
/// Returns an error if SQLite cannot create or migrate the database.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let mut conn = Connection::open_in_memory()?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Record that a comprehensive integrity pass saved at `at`.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn mark_checked(conn: &Connection, at: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE store_meta SET last_check_at_us = ?1 WHERE id = 1",
        [time::to_micros(at)],
    )?;
    Ok(())
}

/// `path` with `suffix` appended to its file name (`store.sqlite3-wal`).
#[must_use]
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

fn store_files(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    std::iter::once(path.to_path_buf())
        .chain(STORE_SIDECARS.iter().map(|suffix| sidecar_path(path, suffix)))
}

/// Move an unmigratable store aside and create an empty one in its place.
///
/// The database file and its sidecars are renamed to
/// `<name>.discarded-<timestamp>`, never deleted. Connections to the store
/// must be closed first.
///
/// Returns the quarantined paths.
///
/// # Errors
///
/// Returns [`StoreError::NotConfirmed`] unless `confirmation` is
/// [`Confirmation::DiscardAllData`], or an error if renaming or recreating
/// fails.
pub fn discard_and_recreate(
    path: &Path,
    confirmation: Confirmation,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>, StoreError> {
    if confirmation != Confirmation::DiscardAllData {
        return Err(StoreError::NotConfirmed);
    }

    let stamp = now.format("%Y%m%dT%H%M%S%6fZ").to_string();
    let mut quarantined = Vec::new();
    for file in store_files(path).filter(|file| file.exists()) {
        let target = sidecar_path(&file, &format!(".discarded-{stamp}"));
        fs::rename(&file, &target)
            .map_err(|error| StoreError::io("quarantine store file", &file, error))?;
        quarantined.push(target);
    }

    tracing::warn!(
        path = %path.display(),
        files = quarantined.len(),
        "discarded store; previous data quarantined"
    );

    drop(open_store(path)?);
    Ok(quarantined)
}

/// Move a store left at a legacy per-app location to the shared location.
///
/// Copies the database and sidecars, then deletes the legacy files. Must run
/// before the store is opened.
///
/// # Errors
///
/// Returns an error if copying or deleting fails. A failed copy leaves the
/// legacy store untouched.
pub fn relocate_store(legacy: &Path, target: &Path) -> Result<Relocation, StoreError> {
    if !legacy.exists() {
        return Ok(Relocation::NoLegacyStore);
    }
    if target.exists() {
        tracing::warn!(
            legacy = %legacy.display(),
            target = %target.display(),
            "both legacy and shared stores exist; keeping the shared one"
        );
        return Ok(Relocation::TargetExists {
            legacy: legacy.to_path_buf(),
        });
    }

    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| StoreError::io("create store directory", parent, error))?;
    }

    let copies: Vec<(PathBuf, PathBuf)> = store_files(legacy)
        .zip(store_files(target))
        .filter(|(from, _)| from.exists())
        .collect();

    for (from, to) in &copies {
        if let Err(error) = fs::copy(from, to) {
            for (_, written) in &copies {
                let _ = fs::remove_file(written);
            }
            return Err(StoreError::io("copy store file", from, error));
        }
    }
    for (from, _) in &copies {
        fs::remove_file(from)
            .map_err(|error| StoreError::io("remove legacy store file", from, error))?;
    }

    tracing::info!(
        from = %legacy.display(),
        to = %target.display(),
        "relocated store to shared location"
    );
    Ok(Relocation::Moved {
        from: legacy.to_path_buf(),
        to: target.to_path_buf(),
    })
}
