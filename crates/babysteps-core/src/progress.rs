//! Read-only progress summary for the home-screen widget.

use chrono::{DateTime, FixedOffset, TimeZone};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{StoreError, query};

/// Progress counts as of one reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    pub date: DateTime<FixedOffset>,
    /// Completed steps whose completion falls on the reference's calendar day.
    pub today_completed_count: u64,
    /// Every step owned by a task, regardless of day. The name is kept for
    /// widget compatibility; it is not limited to today.
    pub today_total_count: u64,
    pub completed_tasks_count: u64,
    pub total_tasks_count: u64,
}

impl ProgressEntry {
    /// All-zero entry for `reference`.
    #[must_use]
    pub fn empty<Tz: TimeZone>(reference: &DateTime<Tz>) -> Self {
        Self {
            date: reference.fixed_offset(),
            today_completed_count: 0,
            today_total_count: 0,
            completed_tasks_count: 0,
            total_tasks_count: 0,
        }
    }
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(u64::try_from(value).unwrap_or(0))
}

/// Aggregate progress. "Today" is the calendar day of `reference` in its own
/// time zone.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn fetch_progress<Tz: TimeZone>(
    conn: &Connection,
    reference: &DateTime<Tz>,
) -> Result<ProgressEntry, StoreError> {
    let zone = reference.timezone();
    let day = reference.date_naive();

    let mut stmt = conn.prepare(
        "SELECT completed_at_us FROM steps
         WHERE is_completed = 1 AND completed_at_us IS NOT NULL",
    )?;
    let mut today_completed_count = 0;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let completed_at = query::timestamp(row, 0)?;
        if completed_at.with_timezone(&zone).date_naive() == day {
            today_completed_count += 1;
        }
    }

    Ok(ProgressEntry {
        date: reference.fixed_offset(),
        today_completed_count,
        today_total_count: count(
            conn,
            "SELECT COUNT(*) FROM steps WHERE task_id IN (SELECT task_id FROM tasks)",
        )?,
        completed_tasks_count: count(conn, "SELECT COUNT(*) FROM tasks WHERE is_completed = 1")?,
        total_tasks_count: count(conn, "SELECT COUNT(*) FROM tasks")?,
    })
}

/// [`fetch_progress`] for callers that must always render something: a read
/// failure is logged and yields an all-zero entry.
#[must_use]
pub fn fetch_progress_or_default<Tz: TimeZone>(
    conn: &Connection,
    reference: &DateTime<Tz>,
) -> ProgressEntry {
    fetch_progress(conn, reference).unwrap_or_else(|error| {
        tracing::warn!(%error, "progress read failed; showing empty progress");
        ProgressEntry::empty(reference)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{mutate, open_in_memory};
    use chrono::{Duration, Utc};

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).expect("valid offset")
    }

    #[test]
    fn empty_store_reports_zeros() {
        let conn = open_in_memory().expect("open");
        let now = Utc::now();
        assert_eq!(
            fetch_progress(&conn, &now).expect("progress"),
            ProgressEntry::empty(&now)
        );
    }

    #[test]
    fn day_boundary_follows_reference_zone() {
        let mut conn = open_in_memory().expect("open");
        let tokyo = offset(9);
        // 2026-05-10 23:30 in Tokyo is 14:30 UTC the same day.
        let completed = tokyo
            .with_ymd_and_hms(2026, 5, 10, 23, 30, 0)
            .single()
            .expect("valid");
        let task = mutate::create_task_with_steps(
            &mut conn,
            "late night",
            1,
            completed.with_timezone(&Utc) - Duration::hours(1),
        )
        .expect("create");
        mutate::toggle_step_completion(&mut conn, task.steps[0].id, completed.with_timezone(&Utc))
            .expect("toggle");

        let next_morning_tokyo = tokyo
            .with_ymd_and_hms(2026, 5, 11, 0, 30, 0)
            .single()
            .expect("valid");
        let same_instant_utc = next_morning_tokyo.with_timezone(&Utc);

        let in_tokyo = fetch_progress(&conn, &next_morning_tokyo).expect("progress");
        assert_eq!(in_tokyo.today_completed_count, 0);

        let in_utc = fetch_progress(&conn, &same_instant_utc).expect("progress");
        assert_eq!(in_utc.today_completed_count, 1);
        assert_eq!(in_utc.today_total_count, 1);
    }

    #[test]
    fn read_failure_degrades_to_zeros() {
        let conn = Connection::open_in_memory().expect("open");
        let now = Utc::now();
        assert!(fetch_progress(&conn, &now).is_err());
        assert_eq!(
            fetch_progress_or_default(&conn, &now),
            ProgressEntry::empty(&now)
        );
    }
}
