//! Schema migration stages for the task store.
//!
//! Each stage moves a store from one [`SchemaVersion`] to the next in a
//! single transaction:
//! 1. `will_migrate` runs against source-shaped records
//! 2. the structural copy rebuilds tables, filling new fields with defaults
//! 3. `did_migrate` runs against target-shaped records
//!
//! A failing stage rolls back and leaves the store at its source version.
//! Callers must not use a store whose migration failed.

pub mod v1_to_v2;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, params, types::Type};
use serde::Serialize;
use std::fmt;

use super::schema::{self, SchemaVersion};
use crate::error::ErrorCode;
use crate::time;

/// Latest schema version understood by this build.
pub const LATEST_SCHEMA_VERSION: u32 = SchemaVersion::latest().number();

/// Registered stages, in ascending `from` order.
pub const STAGES: &[MigrationStage] = &[v1_to_v2::STAGE];

/// Custom logic run inside a stage's transaction.
pub type Hook = fn(&Transaction<'_>) -> rusqlite::Result<()>;

/// A declared transition between two schema versions.
#[derive(Clone, Copy)]
pub struct MigrationStage {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub will_migrate: Hook,
    pub structural_sql: &'static str,
    pub did_migrate: Hook,
}

impl fmt::Debug for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStage")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Which hook of a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    WillMigrate,
    DidMigrate,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WillMigrate => "will-migrate",
            Self::DidMigrate => "did-migrate",
        })
    }
}

/// Migration failure. The store is left at the version it had before the
/// failing stage started.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("store schema version {found} is newer than the latest known version {latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    #[error("no migration stage starts at schema {0}")]
    MissingStage(SchemaVersion),

    #[error("unversioned store has tables of no known schema (tasks columns: {})", .columns.join(", "))]
    UnrecognizedShape { columns: Vec<String> },

    #[error("{phase} hook of stage {from} -> {to} failed: {source}")]
    Hook {
        from: SchemaVersion,
        to: SchemaVersion,
        phase: HookPhase,
        #[source]
        source: rusqlite::Error,
    },

    #[error("structural copy of stage {from} -> {to} failed: {source}")]
    StructuralCopy {
        from: SchemaVersion,
        to: SchemaVersion,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error during migration: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MigrationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedSchemaVersion,
            _ => ErrorCode::MigrationFailed,
        }
    }
}

/// What a call to [`migrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// `user_version` found on open (0 for a new or unversioned store).
    pub from: u32,
    pub to: u32,
    pub stages_applied: usize,
}

impl MigrationOutcome {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.stages_applied == 0 && self.from == self.to
    }
}

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Bring the store to the latest schema version.
///
/// Running it on an up-to-date store is a no-op.
///
/// # Errors
///
/// Returns [`MigrationError`] when the stored version is unknown or any stage
/// fails. Completed stages stay committed; the failing one is rolled back.
pub fn migrate(conn: &mut Connection) -> Result<MigrationOutcome, MigrationError> {
    migrate_with(conn, STAGES, time::now())
}

/// [`migrate`] with an explicit stage list and clock.
///
/// # Errors
///
/// See [`migrate`].
pub fn migrate_with(
    conn: &mut Connection,
    stages: &[MigrationStage],
    now: DateTime<Utc>,
) -> Result<MigrationOutcome, MigrationError> {
    let latest = SchemaVersion::latest();
    let stored = current_schema_version(conn)?;

    if stored > latest.number() {
        return Err(MigrationError::UnsupportedVersion {
            found: stored,
            latest: latest.number(),
        });
    }

    let start = match SchemaVersion::from_number(stored) {
        Some(version) => version,
        None => match schema::detect_version(conn)? {
            None if schema::table_exists(conn, "tasks")?
                || schema::table_exists(conn, "steps")? =>
            {
                return Err(MigrationError::UnrecognizedShape {
                    columns: schema::table_columns(conn, "tasks")?,
                });
            }
            None => {
                create_latest(conn, latest)?;
                tracing::info!(schema = %latest, "created empty store");
                return Ok(MigrationOutcome {
                    from: stored,
                    to: latest.number(),
                    stages_applied: 0,
                });
            }
            Some(detected) => {
                tracing::warn!(
                    schema = %detected,
                    "store has no schema version; adopting the shape of its tables"
                );
                detected
            }
        },
    };

    if start == latest && stored == latest.number() {
        tracing::debug!(schema = %latest, "store already at latest schema");
        return Ok(MigrationOutcome {
            from: stored,
            to: stored,
            stages_applied: 0,
        });
    }

    let applied = with_foreign_keys_off(conn, |conn| {
        let mut current = start;
        let mut applied = 0;
        if current == latest {
            // Unversioned store that already has the latest shape.
            let tx = conn.transaction()?;
            tx.execute_batch(schema::ENSURE_META_SQL)?;
            record_version(&tx, latest, now)?;
            tx.commit()?;
        }
        while current < latest {
            let stage = stages
                .iter()
                .find(|stage| stage.from == current)
                .ok_or(MigrationError::MissingStage(current))?;
            run_stage(conn, stage, now)?;
            current = stage.to;
            applied += 1;
        }
        Ok(applied)
    })?;

    Ok(MigrationOutcome {
        from: stored,
        to: latest.number(),
        stages_applied: applied,
    })
}

fn create_latest(conn: &mut Connection, latest: SchemaVersion) -> Result<(), MigrationError> {
    let tx = conn.transaction()?;
    tx.execute_batch(latest.create_sql())?;
    tx.pragma_update(None, "user_version", i64::from(latest.number()))?;
    tx.execute(
        "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
        [i64::from(latest.number())],
    )?;
    tx.commit()?;
    Ok(())
}

fn run_stage(
    conn: &mut Connection,
    stage: &MigrationStage,
    now: DateTime<Utc>,
) -> Result<(), MigrationError> {
    let (from, to) = (stage.from, stage.to);
    tracing::info!(%from, %to, "running migration stage");

    let tx = conn.transaction()?;
    tx.execute_batch(schema::ENSURE_META_SQL)?;

    (stage.will_migrate)(&tx).map_err(|source| MigrationError::Hook {
        from,
        to,
        phase: HookPhase::WillMigrate,
        source,
    })?;

    tx.execute_batch(stage.structural_sql)
        .map_err(|source| MigrationError::StructuralCopy { from, to, source })?;

    (stage.did_migrate)(&tx).map_err(|source| MigrationError::Hook {
        from,
        to,
        phase: HookPhase::DidMigrate,
        source,
    })?;

    let dangling = count_dangling_steps(&tx)?;
    if dangling > 0 {
        tracing::warn!(
            dangling,
            "steps reference missing tasks; the integrity pass will remove them"
        );
    }

    record_version(&tx, to, now)?;
    tx.commit()?;

    tracing::info!(%from, %to, "migration stage committed");
    Ok(())
}

fn record_version(
    tx: &Transaction<'_>,
    version: SchemaVersion,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    tx.pragma_update(None, "user_version", i64::from(version.number()))?;
    tx.execute(
        "UPDATE store_meta
         SET schema_version = ?1, last_migrated_at_us = ?2
         WHERE id = 1",
        params![i64::from(version.number()), time::to_micros(now)],
    )?;
    Ok(())
}

fn count_dangling_steps(tx: &Transaction<'_>) -> rusqlite::Result<usize> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check(steps)")?;
    let rows = stmt.query_map([], |_| Ok(()))?;
    let mut count = 0;
    for row in rows {
        row?;
        count += 1;
    }
    Ok(count)
}

/// Run `f` with foreign key enforcement off, restoring the previous setting
/// afterwards even when `f` fails. The pragma is a no-op inside a
/// transaction, so it is toggled around the stage transactions.
fn with_foreign_keys_off<T>(
    conn: &mut Connection,
    f: impl FnOnce(&mut Connection) -> Result<T, MigrationError>,
) -> Result<T, MigrationError> {
    let enabled: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;

    let result = f(conn);

    if enabled != 0 {
        conn.pragma_update(None, "foreign_keys", "ON")?;
    }
    result
}
