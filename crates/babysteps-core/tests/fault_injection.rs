//! Fault-injection tests for the store-opening paths.
//!
//! These exercise realistic failure modes on real files:
//! - a migration stage failing halfway through its transaction
//! - a store written by a newer build
//! - a store whose header was overwritten
//! - discarding without (and then with) explicit confirmation

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use babysteps_core::db::migrations::{self, MigrationError, MigrationStage};
use babysteps_core::db::{self, Confirmation, StoreError, query, schema};
use babysteps_core::error::ErrorCode;
use babysteps_core::model::TaskId;
use babysteps_core::time;
use rusqlite::{Connection, Transaction, params};
use tempfile::TempDir;

fn temp_store() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("babysteps.sqlite3");
    (dir, path)
}

fn write_v1_store(path: &Path, titles: &[&str]) {
    let conn = Connection::open(path).expect("open v1 store");
    conn.execute_batch(schema::CREATE_V1_SQL).expect("v1 schema");
    conn.pragma_update(None, "user_version", 1_i64)
        .expect("set version");
    for (index, title) in titles.iter().enumerate() {
        conn.execute(
            "INSERT INTO tasks (task_id, title, created_at_us) VALUES (?1, ?2, ?3)",
            params![TaskId::new().to_string(), title, i64::try_from(index).expect("index")],
        )
        .expect("insert task");
    }
}

fn fail_after_copy(_tx: &Transaction<'_>) -> rusqlite::Result<()> {
    Err(rusqlite::Error::InvalidQuery)
}

fn raw_version(path: &Path) -> i64 {
    let conn = Connection::open(path).expect("reopen raw");
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .expect("user_version")
}

#[test]
fn failing_stage_leaves_v1_store_on_disk() {
    let (_dir, path) = temp_store();
    write_v1_store(&path, &["Read", "Run"]);

    let broken = MigrationStage {
        did_migrate: fail_after_copy,
        ..migrations::v1_to_v2::STAGE
    };
    {
        let mut conn = Connection::open(&path).expect("open");
        let err = migrations::migrate_with(&mut conn, &[broken], time::now())
            .expect_err("hook fails");
        assert!(matches!(err, MigrationError::Hook { .. }));
        assert_eq!(err.code(), ErrorCode::MigrationFailed);
    }

    assert_eq!(raw_version(&path), 1);
    let conn = Connection::open(&path).expect("reopen");
    let columns = schema::table_columns(&conn, "tasks").expect("columns");
    assert!(!columns.iter().any(|column| column == "is_completed"));
    drop(conn);

    let conn = db::open_store(&path).expect("real migration succeeds");
    assert_eq!(query::task_count(&conn).expect("count"), 2);
}

#[test]
fn newer_store_is_refused_and_left_alone() {
    let (_dir, path) = temp_store();
    {
        let conn = db::open_store(&path).expect("create");
        conn.pragma_update(None, "user_version", 99_i64)
            .expect("bump version");
    }
    let before = fs::read(&path).expect("read");

    let err = db::open_store(&path).expect_err("newer schema");

    assert!(matches!(
        err,
        StoreError::Migration(MigrationError::UnsupportedVersion { found: 99, .. })
    ));
    assert_eq!(err.code(), ErrorCode::UnsupportedSchemaVersion);
    assert_eq!(fs::read(&path).expect("read"), before);
}

#[test]
fn overwritten_header_reports_corrupt_store() {
    let (_dir, path) = temp_store();
    drop(db::open_store(&path).expect("create"));

    let mut file = OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("open for corruption");
    file.seek(SeekFrom::Start(0)).expect("seek");
    file.write_all(&[0_u8; 16]).expect("clobber header");
    file.sync_all().expect("sync");
    drop(file);

    let err = db::open_store(&path).expect_err("corrupt");
    assert_eq!(err.code(), ErrorCode::CorruptStore);
}

#[test]
fn discard_needs_confirmation_then_quarantines() {
    let (dir, path) = temp_store();
    {
        let conn = db::open_store(&path).expect("create");
        conn.pragma_update(None, "user_version", 99_i64)
            .expect("bump version");
    }

    let err = db::discard_and_recreate(&path, Confirmation::Declined, time::now())
        .expect_err("declined");
    assert_eq!(err.code(), ErrorCode::DiscardNotConfirmed);
    assert_eq!(raw_version(&path), 99);

    let quarantined =
        db::discard_and_recreate(&path, Confirmation::DiscardAllData, time::now())
            .expect("discard");

    assert!(!quarantined.is_empty());
    for moved in &quarantined {
        assert!(moved.exists());
        assert!(moved.starts_with(dir.path()));
    }
    assert_eq!(
        raw_version(&path),
        i64::from(migrations::LATEST_SCHEMA_VERSION)
    );
}
