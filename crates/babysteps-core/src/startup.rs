//! The app-start sequence: relocate, migrate, then check integrity.

use rusqlite::Connection;
use serde::Serialize;

use crate::config::{IntegrityMode, StoreConfig};
use crate::db::migrations::MigrationOutcome;
use crate::db::query::{self, StoreStats};
use crate::db::{self, Relocation, StoreError};
use crate::error::ErrorCode;
use crate::integrity::{self, IntegrityReport};
use crate::lock::{LockError, StoreLock};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StartupError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Lock(error) => error.code(),
            Self::Store(error) => error.code(),
        }
    }
}

/// Which integrity pass ran, and what it found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IntegrityOutcome {
    Skipped,
    /// The quick gate passed; no repair was needed.
    Quick,
    Comprehensive(IntegrityReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub relocated: Relocation,
    pub migration: MigrationOutcome,
    pub integrity: IntegrityOutcome,
    pub stats: StoreStats,
}

/// Prepare the store for use and hand back an open connection.
///
/// Runs under the exclusive store lock:
/// 1. move a legacy store to `store_path`, if configured and present
/// 2. open and migrate to the latest schema
/// 3. run the configured integrity pass
///
/// # Errors
///
/// Returns an error if the lock cannot be taken, relocation fails, the
/// migration fails (the connection is not returned then), or the integrity
/// pass cannot read or save.
pub fn startup(config: &StoreConfig) -> Result<(Connection, StartupReport), StartupError> {
    let path = config.store_path.as_path();
    let _lock = StoreLock::acquire(path, config.lock_timeout())?;

    let relocated = match &config.legacy_store_path {
        Some(legacy) => db::relocate_store(legacy, path)?,
        None => Relocation::NoLegacyStore,
    };

    let (mut conn, migration) = db::open_and_migrate(path)?;
    let integrity = run_integrity(&mut conn, config.integrity)?;
    let stats = query::store_stats(&conn).map_err(StoreError::from)?;

    tracing::info!(
        tasks = stats.total_tasks,
        completed_tasks = stats.completed_tasks,
        steps = stats.total_steps,
        completed_steps = stats.completed_steps,
        "store ready"
    );

    Ok((
        conn,
        StartupReport {
            relocated,
            migration,
            integrity,
            stats,
        },
    ))
}

fn run_integrity(
    conn: &mut Connection,
    mode: IntegrityMode,
) -> Result<IntegrityOutcome, StoreError> {
    match mode {
        IntegrityMode::Off => Ok(IntegrityOutcome::Skipped),
        IntegrityMode::Quick if integrity::quick_check(conn)? => Ok(IntegrityOutcome::Quick),
        IntegrityMode::Quick | IntegrityMode::Comprehensive => {
            integrity::comprehensive_check(conn).map(IntegrityOutcome::Comprehensive)
        }
    }
}
