//! `bs activity`: per-day completion counts behind the calendar heatmap.

use std::io::Write;

use babysteps_core::activity::{self, ActivityLevel, DailyActivity, MAX_ACTIVITY_DAYS};
use babysteps_core::config::StoreConfig;
use chrono::Local;
use clap::Args;

use crate::output::{OutputMode, pretty_section, render_mode};

/// Arguments for `bs activity`.
#[derive(Args, Debug, Default)]
pub struct ActivityArgs {
    /// Days to look back from today. Defaults to `activity_days` in config.
    #[arg(long, value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_ACTIVITY_DAYS)))]
    pub days: Option<u32>,
}

/// Execute `bs activity`.
pub fn run_activity(
    args: &ActivityArgs,
    config: &StoreConfig,
    output: OutputMode,
) -> anyhow::Result<()> {
    let days = args.days.unwrap_or(config.activity_days);
    let (_lock, conn) = super::open_for_reading(config)?;
    let activities = activity::daily_activities(&conn, &Local::now(), days)?;
    render_mode(output, &activities, render_activity_text, render_activity_pretty)
}

const fn level_label(level: ActivityLevel) -> &'static str {
    match level {
        ActivityLevel::None => "none",
        ActivityLevel::Low => "low",
        ActivityLevel::Medium => "medium",
        ActivityLevel::High => "high",
        ActivityLevel::VeryHigh => "very_high",
    }
}

const fn level_glyph(level: ActivityLevel) -> char {
    match level {
        ActivityLevel::None => '.',
        ActivityLevel::Low => '-',
        ActivityLevel::Medium => '+',
        ActivityLevel::High => '*',
        ActivityLevel::VeryHigh => '#',
    }
}

#[allow(clippy::ptr_arg)]
fn render_activity_text(days: &Vec<DailyActivity>, w: &mut dyn Write) -> std::io::Result<()> {
    for day in days {
        writeln!(
            w,
            "{} {} {}",
            day.date,
            day.commit_count,
            level_label(day.activity_level)
        )?;
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn render_activity_pretty(days: &Vec<DailyActivity>, w: &mut dyn Write) -> std::io::Result<()> {
    let total: usize = days.iter().map(|day| day.commit_count).sum();
    let active = days.iter().filter(|day| day.commit_count > 0).count();
    pretty_section(
        w,
        &format!("Activity: {total} steps over {active} of {} days", days.len()),
    )?;

    // One glyph per day, a week per row.
    for week in days.chunks(7) {
        let row: String = week.iter().map(|day| level_glyph(day.activity_level)).collect();
        if let Some(first) = week.first() {
            writeln!(w, "{}  {row}", first.date)?;
        }
    }

    for day in days.iter().rev().filter(|day| day.commit_count > 0) {
        writeln!(w)?;
        writeln!(w, "{} ({} steps)", day.date, day.commit_count)?;
        for item in &day.task_history {
            writeln!(
                w,
                "  {}  {} step {} (#{})",
                item.completed_at.with_timezone(&Local).format("%H:%M"),
                item.task_title,
                item.step_order + 1,
                item.attempt_count
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(date: u32, commit_count: usize) -> DailyActivity {
        DailyActivity {
            date: NaiveDate::from_ymd_opt(2026, 3, date).expect("valid date"),
            commit_count,
            activity_level: ActivityLevel::from_count(commit_count),
            task_history: Vec::new(),
        }
    }

    #[test]
    fn text_has_one_line_per_day() {
        let mut buf = Vec::new();
        render_activity_text(&vec![day(1, 0), day(2, 5)], &mut buf).expect("render");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "2026-03-01 0 none\n2026-03-02 5 medium\n"
        );
    }

    #[test]
    fn pretty_draws_weeks_of_glyphs() {
        let days: Vec<DailyActivity> = (1..=8).map(|date| day(date, (date as usize) % 3)).collect();
        let mut buf = Vec::new();
        render_activity_pretty(&days, &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.contains("2026-03-01  --.--.-"));
        assert!(text.contains("2026-03-08  -"));
    }
}
