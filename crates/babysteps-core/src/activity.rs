//! Per-day completion counts backing the activity heatmap.

use chrono::{DateTime, Days, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{StoreError, query};
use crate::model::TaskId;
use crate::time;

/// Longest window [`daily_activities`] will build, in days.
pub const MAX_ACTIVITY_DAYS: u32 = 3660;

/// Heatmap intensity bucket for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ActivityLevel {
    #[must_use]
    pub const fn from_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1..=3 => Self::Low,
            4..=6 => Self::Medium,
            7..=9 => Self::High,
            _ => Self::VeryHigh,
        }
    }
}

/// One completed step, as shown in a day's detail list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHistoryItem {
    pub task_id: TaskId,
    pub task_title: String,
    pub step_order: i64,
    pub completed_at: DateTime<Utc>,
    /// 1-based position of this completion among all completions of the task.
    pub attempt_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub commit_count: usize,
    pub activity_level: ActivityLevel,
    pub task_history: Vec<TaskHistoryItem>,
}

/// One entry per calendar day from `days` days before `end` through `end`'s
/// day, oldest first. Days are calendar days in `end`'s time zone. Steps
/// completed after `end` are ignored. `days` is clamped to
/// [`MAX_ACTIVITY_DAYS`].
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn daily_activities<Tz: TimeZone>(
    conn: &Connection,
    end: &DateTime<Tz>,
    days: u32,
) -> Result<Vec<DailyActivity>, StoreError> {
    let zone = end.timezone();
    let end_utc = end.with_timezone(&Utc);
    let last_day = end.date_naive();
    if days > MAX_ACTIVITY_DAYS {
        tracing::warn!(days, max = MAX_ACTIVITY_DAYS, "activity window clamped");
    }
    let days = days.min(MAX_ACTIVITY_DAYS);
    let first_day = last_day
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    // Widened by a day on each side; exact day membership is decided below.
    let lower_us = time::to_micros(
        end_utc
            .checked_sub_signed(Duration::days(i64::from(days) + 2))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    );

    let mut stmt = conn.prepare(
        "SELECT t.task_id, t.title, s.sort_order, s.completed_at_us,
                (SELECT COUNT(*) FROM steps p
                 WHERE p.task_id = s.task_id
                   AND p.is_completed = 1
                   AND p.completed_at_us <= s.completed_at_us)
         FROM steps s
         JOIN tasks t ON t.task_id = s.task_id
         WHERE s.is_completed = 1
           AND s.completed_at_us IS NOT NULL
           AND s.completed_at_us BETWEEN ?1 AND ?2
         ORDER BY s.completed_at_us, s.rowid",
    )?;

    let mut by_day: BTreeMap<NaiveDate, Vec<TaskHistoryItem>> = BTreeMap::new();
    let mut rows = stmt.query([lower_us, time::to_micros(end_utc)])?;
    while let Some(row) = rows.next()? {
        let task_id: String = row.get(0)?;
        let item = TaskHistoryItem {
            task_id: task_id.parse().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            task_title: row.get(1)?,
            step_order: row.get(2)?,
            completed_at: query::timestamp(row, 3)?,
            attempt_count: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        };
        let day = item.completed_at.with_timezone(&zone).date_naive();
        if day >= first_day {
            by_day.entry(day).or_default().push(item);
        }
    }

    Ok(first_day
        .iter_days()
        .take_while(|day| *day <= last_day)
        .map(|date| {
            let task_history = by_day.remove(&date).unwrap_or_default();
            DailyActivity {
                date,
                commit_count: task_history.len(),
                activity_level: ActivityLevel::from_count(task_history.len()),
                task_history,
            }
        })
        .collect())
}
