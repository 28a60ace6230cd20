//! Read helpers over the task store.
//!
//! Row mappers convert stored microseconds and id strings into model types;
//! a value that does not convert is a `FromSqlConversionFailure` on its
//! column rather than a panic.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, types::Type};
use serde::Serialize;
use std::str::FromStr;

use crate::model::{ParseIdError, Step, Task, TaskFilter, TaskGraph, TaskId, TaskV1};
use crate::time;

/// Columns read by [`row_to_task`], in order.
pub const TASK_COLUMNS: &str =
    "task_id, title, created_at_us, sort_order, is_completed, completed_at_us";

/// Columns read by [`row_to_step`], in order.
pub const STEP_COLUMNS: &str = "step_id, task_id, is_completed, sort_order, completed_at_us";

#[derive(Debug, thiserror::Error)]
#[error("stored timestamp {0}us is out of range")]
struct TimestampOutOfRange(i64);

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub total_steps: u64,
    pub completed_steps: u64,
    /// Steps without an owning task.
    pub orphan_steps: u64,
}

/// Contents of the `store_meta` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub last_migrated_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
}

fn parse_id<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseIdError>,
{
    let raw: String = row.get(index)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

fn parse_optional_id<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseIdError>,
{
    match row.get::<_, Option<String>>(index)? {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
        }),
    }
}

fn timestamp_from(index: usize, us: i64) -> rusqlite::Result<DateTime<Utc>> {
    time::from_micros(us).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Integer,
            Box::new(TimestampOutOfRange(us)),
        )
    })
}

pub(crate) fn timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    timestamp_from(index, row.get(index)?)
}

pub(crate) fn optional_timestamp(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(index)?
        .map(|us| timestamp_from(index, us))
        .transpose()
}

/// Map a row selected with [`TASK_COLUMNS`]. Steps are left empty.
///
/// # Errors
///
/// Returns an error if a column is missing or fails to convert.
pub fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: parse_id(row, 0)?,
        title: row.get(1)?,
        created_at: timestamp(row, 2)?,
        order: row.get(3)?,
        is_completed: row.get(4)?,
        completed_at: optional_timestamp(row, 5)?,
        steps: Vec::new(),
    })
}

/// Map a row selected with [`STEP_COLUMNS`].
///
/// # Errors
///
/// Returns an error if a column is missing or fails to convert.
pub fn row_to_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        id: parse_id(row, 0)?,
        task_id: parse_optional_id(row, 1)?,
        is_completed: row.get(2)?,
        order: row.get(3)?,
        completed_at: optional_timestamp(row, 4)?,
    })
}

fn row_to_task_v1(row: &Row<'_>) -> rusqlite::Result<TaskV1> {
    Ok(TaskV1 {
        id: parse_id(row, 0)?,
        title: row.get(1)?,
        created_at: timestamp(row, 2)?,
        order: row.get(3)?,
        steps: Vec::new(),
    })
}

/// All tasks without their steps, in display order.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn load_tasks(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let sql =
        format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY sort_order, created_at_us, rowid");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([], row_to_task)?.collect()
}

/// All steps, orphans included, in ascending `sort_order`.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn load_steps(conn: &Connection) -> rusqlite::Result<Vec<Step>> {
    let sql = format!("SELECT {STEP_COLUMNS} FROM steps ORDER BY sort_order, rowid");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([], row_to_step)?.collect()
}

/// Tasks of a V1-shaped store in insertion (`rowid`) order, with their steps.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn load_tasks_v1(conn: &Connection) -> rusqlite::Result<Vec<TaskV1>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, title, created_at_us, sort_order FROM tasks ORDER BY rowid",
    )?;
    let mut tasks: Vec<TaskV1> = stmt.query_map([], row_to_task_v1)?.collect::<Result<_, _>>()?;

    for step in load_steps(conn)? {
        if let Some(task) = tasks
            .iter_mut()
            .find(|task| Some(task.id) == step.task_id)
        {
            task.steps.push(step);
        }
    }
    Ok(tasks)
}

/// Load the whole store into a [`TaskGraph`].
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn load_graph(conn: &Connection) -> rusqlite::Result<TaskGraph> {
    Ok(TaskGraph::from_parts(load_tasks(conn)?, load_steps(conn)?))
}

/// Tasks matching `filter`, in display order, each with its steps.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn list_tasks(conn: &Connection, filter: TaskFilter) -> rusqlite::Result<Vec<Task>> {
    let graph = load_graph(conn)?;
    Ok(graph
        .tasks
        .into_iter()
        .filter(|task| filter.matches(task))
        .collect())
}

/// A single task with its steps.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn get_task(conn: &Connection, id: TaskId) -> rusqlite::Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1");
    let Some(mut task) = conn
        .query_row(&sql, [id.to_string()], row_to_task)
        .optional()?
    else {
        return Ok(None);
    };

    let sql = format!("SELECT {STEP_COLUMNS} FROM steps WHERE task_id = ?1 ORDER BY sort_order, rowid");
    let mut stmt = conn.prepare(&sql)?;
    task.steps = stmt
        .query_map([id.to_string()], row_to_step)?
        .collect::<Result<_, _>>()?;
    Ok(Some(task))
}

/// Number of tasks in the store.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn task_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
}

/// Task and step totals.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn store_stats(conn: &Connection) -> rusqlite::Result<StoreStats> {
    let count = |sql: &str| -> rusqlite::Result<u64> {
        let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(u64::try_from(value).unwrap_or(0))
    };

    Ok(StoreStats {
        total_tasks: count("SELECT COUNT(*) FROM tasks")?,
        completed_tasks: count("SELECT COUNT(*) FROM tasks WHERE is_completed = 1")?,
        total_steps: count("SELECT COUNT(*) FROM steps")?,
        completed_steps: count("SELECT COUNT(*) FROM steps WHERE is_completed = 1")?,
        orphan_steps: count(
            "SELECT COUNT(*) FROM steps
             WHERE task_id IS NULL
                OR task_id NOT IN (SELECT task_id FROM tasks)",
        )?,
    })
}

/// The `store_meta` row, if the store has one.
///
/// # Errors
///
/// Returns an error if the query or row conversion fails.
pub fn read_meta(conn: &Connection) -> rusqlite::Result<Option<StoreMeta>> {
    conn.query_row(
        "SELECT schema_version, last_migrated_at_us, last_check_at_us
         FROM store_meta WHERE id = 1",
        [],
        |row| {
            let version: i64 = row.get(0)?;
            Ok(StoreMeta {
                schema_version: u32::try_from(version).map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
                })?,
                last_migrated_at: optional_timestamp(row, 1)?,
                last_check_at: optional_timestamp(row, 2)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::TimeZone;
    use rusqlite::params;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn insert_task(conn: &Connection, task: &Task) {
        conn.execute(
            "INSERT INTO tasks (task_id, title, created_at_us, sort_order, is_completed, completed_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.id.to_string(),
                task.title,
                time::to_micros(task.created_at),
                task.order,
                task.is_completed,
                task.completed_at.map(time::to_micros),
            ],
        )
        .expect("insert task");
        for step in &task.steps {
            conn.execute(
                "INSERT INTO steps (step_id, task_id, is_completed, sort_order, completed_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    step.id.to_string(),
                    step.task_id.map(|id| id.to_string()),
                    step.is_completed,
                    step.order,
                    step.completed_at.map(time::to_micros),
                ],
            )
            .expect("insert step");
        }
    }

    #[test]
    fn tasks_roundtrip_through_rows() {
        let conn = open_in_memory().expect("open");
        let mut task = Task::new("Stretch", at(100), 0);
        task.add_step();
        task.add_step();
        task.steps[1].toggle_completion(at(150));
        task.toggle_completion(at(160));
        insert_task(&conn, &task);

        let loaded = get_task(&conn, task.id).expect("query").expect("exists");
        assert_eq!(loaded, task);
        assert_eq!(get_task(&conn, TaskId::new()).expect("query"), None);
    }

    #[test]
    fn list_tasks_orders_and_filters() {
        let conn = open_in_memory().expect("open");
        let first = Task::new("first", at(300), 0);
        let mut second = Task::new("second", at(100), 1);
        second.toggle_completion(at(400));
        insert_task(&conn, &second);
        insert_task(&conn, &first);

        let all: Vec<String> = list_tasks(&conn, TaskFilter::All)
            .expect("list")
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(all, vec!["first", "second"]);

        let done = list_tasks(&conn, TaskFilter::Completed).expect("list");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, second.id);
    }

    #[test]
    fn malformed_id_is_a_conversion_error() {
        let conn = open_in_memory().expect("open");
        conn.execute(
            "INSERT INTO tasks (task_id, title, created_at_us) VALUES ('nope', 't', 0)",
            [],
        )
        .expect("insert");

        let err = load_tasks(&conn).expect_err("must fail");
        assert!(matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _)
        ));
    }

    #[test]
    fn stats_count_orphans() {
        let conn = open_in_memory().expect("open");
        let mut task = Task::new("t", at(0), 0);
        task.add_step();
        insert_task(&conn, &task);
        conn.execute(
            "INSERT INTO steps (step_id, task_id, is_completed, sort_order)
             VALUES (?1, NULL, 1, 0)",
            [crate::model::StepId::new().to_string()],
        )
        .expect("insert orphan");

        let stats = store_stats(&conn).expect("stats");
        assert_eq!(
            stats,
            StoreStats {
                total_tasks: 1,
                completed_tasks: 0,
                total_steps: 2,
                completed_steps: 1,
                orphan_steps: 1,
            }
        );
    }

    #[test]
    fn fresh_store_meta_has_latest_version() {
        let conn = open_in_memory().expect("open");
        let meta = read_meta(&conn).expect("meta").expect("row");
        assert_eq!(meta.schema_version, crate::db::migrations::LATEST_SCHEMA_VERSION);
        assert_eq!(meta.last_check_at, None);
    }
}
