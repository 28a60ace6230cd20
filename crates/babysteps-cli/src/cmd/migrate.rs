//! `bs migrate`: run the app-start sequence and report what it did.
//!
//! Lock, relocate a legacy store, migrate to the latest schema, then run the
//! configured integrity pass. This is exactly what the app does on launch.

use std::io::Write;

use babysteps_core::config::StoreConfig;
use babysteps_core::db::Relocation;
use babysteps_core::startup::{self, IntegrityOutcome, StartupReport};
use clap::Args;

use super::check::{write_integrity_pretty, write_integrity_text};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `bs migrate`.
#[derive(Args, Debug, Default)]
pub struct MigrateArgs {}

/// Execute `bs migrate`.
pub fn run_migrate(
    _args: &MigrateArgs,
    config: &StoreConfig,
    output: OutputMode,
) -> anyhow::Result<()> {
    let (_conn, report) = startup::startup(config)?;
    render_mode(output, &report, render_migrate_text, render_migrate_pretty)
}

fn relocation_label(relocation: &Relocation) -> String {
    match relocation {
        Relocation::NoLegacyStore => "none".to_string(),
        Relocation::TargetExists { legacy } => {
            format!("skipped, legacy store left at {}", legacy.display())
        }
        Relocation::Moved { from, .. } => format!("moved from {}", from.display()),
    }
}

fn migration_label(report: &StartupReport) -> String {
    let migration = report.migration;
    if migration.is_noop() {
        format!("already at v{}", migration.to)
    } else if migration.stages_applied == 0 {
        format!("created empty store at v{}", migration.to)
    } else {
        format!(
            "v{} -> v{} ({} stage{})",
            migration.from,
            migration.to,
            migration.stages_applied,
            if migration.stages_applied == 1 { "" } else { "s" }
        )
    }
}

fn render_migrate_text(report: &StartupReport, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "relocation={}", relocation_label(&report.relocated))?;
    writeln!(w, "migration={}", migration_label(report))?;
    match &report.integrity {
        IntegrityOutcome::Skipped => writeln!(w, "integrity=skipped")?,
        IntegrityOutcome::Quick => writeln!(w, "integrity=quick_ok")?,
        IntegrityOutcome::Comprehensive(integrity) => write_integrity_text(integrity, w)?,
    }
    writeln!(
        w,
        "tasks={} steps={}",
        report.stats.total_tasks, report.stats.total_steps
    )
}

fn render_migrate_pretty(report: &StartupReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Startup")?;
    pretty_kv(w, "Relocation", relocation_label(&report.relocated))?;
    pretty_kv(w, "Migration", migration_label(report))?;
    pretty_kv(
        w,
        "Store",
        format!(
            "{} tasks, {} steps",
            report.stats.total_tasks, report.stats.total_steps
        ),
    )?;
    match &report.integrity {
        IntegrityOutcome::Skipped => pretty_kv(w, "Integrity", "skipped (integrity = \"off\")"),
        IntegrityOutcome::Quick => pretty_kv(w, "Integrity", "quick check passed"),
        IntegrityOutcome::Comprehensive(integrity) => {
            writeln!(w)?;
            write_integrity_pretty(integrity, w)
        }
    }
}
