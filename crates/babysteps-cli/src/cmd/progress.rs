//! `bs progress`: the widget's read path.
//!
//! Mirrors what the home-screen widget shows. Like the widget it never
//! fails: an unreadable store renders as all zeros (and logs a warning).

use std::io::Write;

use anyhow::Context;
use babysteps_core::config::StoreConfig;
use babysteps_core::progress::{self, ProgressEntry};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use clap::Args;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `bs progress`.
#[derive(Args, Debug, Default)]
pub struct ProgressArgs {
    /// Day to report on (YYYY-MM-DD, local time). Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

/// Noon local time on `date`, which exists on every calendar day.
fn reference_for(date: Option<NaiveDate>) -> anyhow::Result<DateTime<Local>> {
    let Some(date) = date else {
        return Ok(Local::now());
    };
    let noon = NaiveTime::from_hms_opt(12, 0, 0).context("invalid reference time")?;
    Local
        .from_local_datetime(&date.and_time(noon))
        .earliest()
        .with_context(|| format!("{date} has no local noon"))
}

/// Execute `bs progress`.
pub fn run_progress(
    args: &ProgressArgs,
    config: &StoreConfig,
    output: OutputMode,
) -> anyhow::Result<()> {
    let reference = reference_for(args.date)?;
    let entry = match super::open_for_reading(config) {
        Ok((_lock, conn)) => progress::fetch_progress_or_default(&conn, &reference),
        Err(error) => {
            tracing::warn!(%error, "store unavailable; showing empty progress");
            ProgressEntry::empty(&reference)
        }
    };
    render_mode(output, &entry, render_progress_text, render_progress_pretty)
}

fn render_progress_text(entry: &ProgressEntry, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "date={} today_completed={} total_steps={} completed_tasks={} total_tasks={}",
        entry.date.date_naive(),
        entry.today_completed_count,
        entry.today_total_count,
        entry.completed_tasks_count,
        entry.total_tasks_count
    )
}

fn render_progress_pretty(entry: &ProgressEntry, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Progress for {}", entry.date.date_naive()))?;
    pretty_kv(w, "Steps today", entry.today_completed_count.to_string())?;
    pretty_kv(w, "Steps overall", entry.today_total_count.to_string())?;
    pretty_kv(
        w,
        "Tasks done",
        format!(
            "{} of {}",
            entry.completed_tasks_count, entry.total_tasks_count
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn explicit_date_resolves_to_local_noon() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");
        let reference = reference_for(Some(date)).expect("reference");
        assert_eq!(reference.date_naive(), date);
        assert_eq!(reference.hour(), 12);
    }

    #[test]
    fn text_output_has_every_count() {
        let reference = reference_for(NaiveDate::from_ymd_opt(2026, 1, 2)).expect("reference");
        let entry = ProgressEntry {
            today_completed_count: 2,
            today_total_count: 5,
            completed_tasks_count: 1,
            total_tasks_count: 3,
            ..ProgressEntry::empty(&reference)
        };

        let mut buf = Vec::new();
        render_progress_text(&entry, &mut buf).expect("render");

        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "date=2026-01-02 today_completed=2 total_steps=5 completed_tasks=1 total_tasks=3\n"
        );
    }
}
