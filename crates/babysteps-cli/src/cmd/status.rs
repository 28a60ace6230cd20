//! `bs status`: where the store is and what shape it is in.
//!
//! Read-only: the store is opened without migrating, so this is the one
//! command that can show a store still waiting for `bs migrate`.

use std::io::Write;
use std::path::PathBuf;

use babysteps_core::config::StoreConfig;
use babysteps_core::db::migrations::{self, LATEST_SCHEMA_VERSION};
use babysteps_core::db::query::{self, StoreStats};
use babysteps_core::db::schema;
use babysteps_core::integrity;
use chrono::{DateTime, Utc};
use clap::Args;
use rusqlite::Connection;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `bs status`.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
struct StatusOutput {
    store_path: PathBuf,
    exists: bool,
    schema_version: Option<u32>,
    latest_schema_version: u32,
    needs_migration: bool,
    last_migrated_at: Option<DateTime<Utc>>,
    last_check_at: Option<DateTime<Utc>>,
    /// `None` unless the store is at the latest schema.
    quick_check_passed: Option<bool>,
    stats: Option<StoreStats>,
}

impl StatusOutput {
    fn missing(store_path: PathBuf) -> Self {
        Self {
            store_path,
            exists: false,
            schema_version: None,
            latest_schema_version: LATEST_SCHEMA_VERSION,
            needs_migration: false,
            last_migrated_at: None,
            last_check_at: None,
            quick_check_passed: None,
            stats: None,
        }
    }
}

/// Stored version, falling back to shape detection for unversioned stores.
fn stored_version(conn: &Connection) -> anyhow::Result<Option<u32>> {
    let version = migrations::current_schema_version(conn)?;
    if version != 0 {
        return Ok(Some(version));
    }
    Ok(schema::detect_version(conn)?.map(schema::SchemaVersion::number))
}

/// Execute `bs status`.
pub fn run_status(
    _args: &StatusArgs,
    config: &StoreConfig,
    output: OutputMode,
) -> anyhow::Result<()> {
    let store_path = config.store_path.clone();
    if !store_path.exists() {
        return render_status(output, &StatusOutput::missing(store_path));
    }

    let (_lock, conn) = super::open_for_reading(config)?;
    let schema_version = stored_version(&conn)?;
    let current = schema_version == Some(LATEST_SCHEMA_VERSION);

    let meta = if current { query::read_meta(&conn)? } else { None };
    let payload = StatusOutput {
        store_path,
        exists: true,
        schema_version,
        latest_schema_version: LATEST_SCHEMA_VERSION,
        needs_migration: schema_version.is_some_and(|version| version < LATEST_SCHEMA_VERSION),
        last_migrated_at: meta.and_then(|meta| meta.last_migrated_at),
        last_check_at: meta.and_then(|meta| meta.last_check_at),
        quick_check_passed: if current {
            Some(integrity::quick_check(&conn)?)
        } else {
            None
        },
        stats: if current {
            Some(query::store_stats(&conn)?)
        } else {
            None
        },
    };

    render_status(output, &payload)
}

fn render_status(output: OutputMode, payload: &StatusOutput) -> anyhow::Result<()> {
    render_mode(output, payload, render_status_text, render_status_pretty)
}

fn version_label(version: Option<u32>) -> String {
    version.map_or_else(|| "empty".to_string(), |version| format!("v{version}"))
}

fn time_label(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
}

fn render_status_text(report: &StatusOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "store={}", report.store_path.display())?;
    writeln!(w, "exists={}", report.exists)?;
    writeln!(w, "schema={}", version_label(report.schema_version))?;
    writeln!(w, "needs_migration={}", report.needs_migration)?;
    if let Some(passed) = report.quick_check_passed {
        writeln!(w, "quick_check={}", if passed { "ok" } else { "failed" })?;
    }
    if let Some(stats) = report.stats {
        writeln!(
            w,
            "tasks={} completed_tasks={} steps={} completed_steps={} orphans={}",
            stats.total_tasks,
            stats.completed_tasks,
            stats.total_steps,
            stats.completed_steps,
            stats.orphan_steps
        )?;
    }
    Ok(())
}

fn render_status_pretty(report: &StatusOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Store")?;
    pretty_kv(w, "Path", report.store_path.display().to_string())?;
    if !report.exists {
        pretty_kv(w, "State", "not created yet")?;
        return Ok(());
    }

    let schema = if report.needs_migration {
        format!(
            "{} (run `bs migrate` to reach v{})",
            version_label(report.schema_version),
            report.latest_schema_version
        )
    } else {
        version_label(report.schema_version)
    };
    pretty_kv(w, "Schema", schema)?;
    pretty_kv(w, "Last migrated", time_label(report.last_migrated_at))?;
    pretty_kv(w, "Last repaired", time_label(report.last_check_at))?;
    if let Some(passed) = report.quick_check_passed {
        pretty_kv(w, "Quick check", if passed { "ok" } else { "failed" })?;
    }

    if let Some(stats) = report.stats {
        writeln!(w)?;
        pretty_section(w, "Contents")?;
        pretty_kv(
            w,
            "Tasks",
            format!("{} ({} completed)", stats.total_tasks, stats.completed_tasks),
        )?;
        pretty_kv(
            w,
            "Steps",
            format!("{} ({} completed)", stats.total_steps, stats.completed_steps),
        )?;
        if stats.orphan_steps > 0 {
            pretty_kv(w, "Orphan steps", stats.orphan_steps.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lists_counts_for_current_store() {
        let report = StatusOutput {
            exists: true,
            schema_version: Some(LATEST_SCHEMA_VERSION),
            stats: Some(StoreStats {
                total_tasks: 2,
                completed_tasks: 1,
                total_steps: 5,
                completed_steps: 3,
                orphan_steps: 0,
            }),
            quick_check_passed: Some(true),
            ..StatusOutput::missing(PathBuf::from("/tmp/bs.sqlite3"))
        };

        let mut buf = Vec::new();
        render_status_text(&report, &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.contains("schema=v2"));
        assert!(text.contains("quick_check=ok"));
        assert!(text.contains("tasks=2 completed_tasks=1 steps=5"));
    }

    #[test]
    fn pretty_points_at_migrate_for_old_store() {
        let report = StatusOutput {
            exists: true,
            schema_version: Some(1),
            needs_migration: true,
            ..StatusOutput::missing(PathBuf::from("/tmp/bs.sqlite3"))
        };

        let mut buf = Vec::new();
        render_status_pretty(&report, &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.contains("v1 (run `bs migrate` to reach v2)"));
        assert!(!text.contains("Contents"));
    }
}
