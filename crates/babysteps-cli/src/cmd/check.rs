//! `bs check`: run an integrity pass on demand.
//!
//! The comprehensive pass repairs what it finds and saves in one
//! transaction. `--quick` only reads.

use std::io::Write;

use babysteps_core::config::StoreConfig;
use babysteps_core::db;
use babysteps_core::integrity::{self, IntegrityReport};
use babysteps_core::lock::StoreLock;
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `bs check`.
#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Only test the completion-flag rule; never writes.
    #[arg(long)]
    pub quick: bool,
}

#[derive(Debug, Serialize)]
struct QuickCheckOutput {
    mode: &'static str,
    is_valid: bool,
}

/// Execute `bs check`.
pub fn run_check(args: &CheckArgs, config: &StoreConfig, output: OutputMode) -> anyhow::Result<()> {
    if args.quick {
        let (_lock, conn) = super::open_for_reading(config)?;
        let payload = QuickCheckOutput {
            mode: "quick",
            is_valid: integrity::quick_check(&conn)?,
        };
        return render_mode(
            output,
            &payload,
            |payload, w| writeln!(w, "quick_check={}", ok_label(payload.is_valid)),
            |payload, w| {
                pretty_section(w, "Quick integrity check")?;
                pretty_kv(w, "Result", ok_label(payload.is_valid))
            },
        );
    }

    let _lock = StoreLock::acquire(&config.store_path, config.lock_timeout())?;
    let mut conn = db::open_existing(&config.store_path)?;
    let report = integrity::comprehensive_check(&mut conn)?;
    render_mode(output, &report, write_integrity_text, write_integrity_pretty)
}

const fn ok_label(valid: bool) -> &'static str {
    if valid { "ok" } else { "failed" }
}

/// `key=value` lines for a comprehensive report, one line per issue.
pub fn write_integrity_text(report: &IntegrityReport, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "integrity={} repaired={} warnings={}",
        ok_label(report.is_valid),
        report.repaired_count,
        report.warnings.len()
    )?;
    for issue in &report.issues {
        writeln!(w, "repaired: {issue}")?;
    }
    for warning in &report.warnings {
        writeln!(w, "warning: {warning}")?;
    }
    Ok(())
}

pub fn write_integrity_pretty(report: &IntegrityReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Integrity")?;
    pretty_kv(
        w,
        "Checked",
        format!(
            "{} tasks, {} steps at {}",
            report.total_tasks,
            report.total_steps,
            report.checked_at.to_rfc3339()
        ),
    )?;
    if report.is_valid {
        pretty_kv(w, "Result", "no issues")?;
    } else {
        pretty_kv(w, "Result", format!("{} repaired", report.repaired_count))?;
        for issue in &report.issues {
            writeln!(w, "  - {issue}")?;
        }
    }
    for warning in &report.warnings {
        writeln!(w, "  ! {warning}")?;
    }
    Ok(())
}
