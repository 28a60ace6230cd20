//! Write paths that keep derived values consistent.
//!
//! Every mutation runs in one transaction and leaves task and step orders
//! dense, with `completed_at` set exactly when the entity is completed.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashSet;

use super::query::{self, STEP_COLUMNS};
use crate::error::ErrorCode;
use crate::model::order::{renumber_steps, renumber_tasks};
use crate::model::{Step, StepId, Task, TaskId};
use crate::time;

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("step {0} not found")]
    StepNotFound(StepId),

    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("reorder must list every task exactly once (expected {expected}, got {got})")]
    InvalidReorder { expected: usize, got: usize },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MutationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TaskNotFound(_) => ErrorCode::TaskNotFound,
            Self::StepNotFound(_) => ErrorCode::StepNotFound,
            Self::EmptyTitle => ErrorCode::EmptyTitle,
            Self::InvalidReorder { .. } => ErrorCode::InvalidReorder,
            Self::Sqlite(_) => ErrorCode::StoreWriteFailed,
        }
    }
}

fn clean_title(title: &str) -> Result<String, MutationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(MutationError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

fn insert_step(tx: &Transaction<'_>, step: &Step) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO steps (step_id, task_id, is_completed, sort_order, completed_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            step.id.to_string(),
            step.task_id.map(|id| id.to_string()),
            step.is_completed,
            step.order,
            step.completed_at.map(time::to_micros),
        ],
    )?;
    Ok(())
}

fn require_task(tx: &Transaction<'_>, id: TaskId) -> Result<(), MutationError> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE task_id = ?1)",
        [id.to_string()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(MutationError::TaskNotFound(id))
    }
}

fn load_step(tx: &Transaction<'_>, id: StepId) -> Result<Step, MutationError> {
    let sql = format!("SELECT {STEP_COLUMNS} FROM steps WHERE step_id = ?1");
    tx.query_row(&sql, [id.to_string()], query::row_to_step)
        .optional()?
        .ok_or(MutationError::StepNotFound(id))
}

fn renumber_siblings(tx: &Transaction<'_>, task_id: TaskId) -> rusqlite::Result<()> {
    let sql = format!(
        "SELECT {STEP_COLUMNS} FROM steps WHERE task_id = ?1 ORDER BY sort_order, rowid"
    );
    let mut steps: Vec<Step> = {
        let mut stmt = tx.prepare(&sql)?;
        stmt.query_map([task_id.to_string()], query::row_to_step)?
            .collect::<Result<_, _>>()?
    };
    if renumber_steps(&mut steps) {
        let mut stmt = tx.prepare("UPDATE steps SET sort_order = ?1 WHERE step_id = ?2")?;
        for step in &steps {
            stmt.execute(params![step.order, step.id.to_string()])?;
        }
    }
    Ok(())
}

fn renumber_all_tasks(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let mut tasks = query::load_tasks(tx)?;
    let changed: HashSet<TaskId> = renumber_tasks(&mut tasks).into_iter().collect();
    let mut stmt = tx.prepare("UPDATE tasks SET sort_order = ?1 WHERE task_id = ?2")?;
    for task in tasks.iter().filter(|task| changed.contains(&task.id)) {
        stmt.execute(params![task.order, task.id.to_string()])?;
    }
    Ok(())
}

/// Create a task at the end of the list with `step_count` fresh steps.
///
/// # Errors
///
/// Returns [`MutationError::EmptyTitle`] for a blank title, or a storage
/// error.
pub fn create_task_with_steps(
    conn: &mut Connection,
    title: &str,
    step_count: usize,
    now: DateTime<Utc>,
) -> Result<Task, MutationError> {
    let title = clean_title(title)?;
    let tx = conn.transaction()?;

    let order = query::task_count(&tx)?;
    let mut task = Task::new(title, time::truncate_to_micros(now), order);
    for _ in 0..step_count {
        task.add_step();
    }

    tx.execute(
        "INSERT INTO tasks (task_id, title, created_at_us, sort_order, is_completed, completed_at_us)
         VALUES (?1, ?2, ?3, ?4, 0, NULL)",
        params![
            task.id.to_string(),
            task.title,
            time::to_micros(task.created_at),
            task.order,
        ],
    )?;
    for step in &task.steps {
        insert_step(&tx, step)?;
    }
    tx.commit()?;

    tracing::debug!(task = %task.id, steps = step_count, "created task");
    Ok(task)
}

/// Append a step to `task_id`.
///
/// # Errors
///
/// Returns [`MutationError::TaskNotFound`] or a storage error.
pub fn add_step(conn: &mut Connection, task_id: TaskId) -> Result<StepId, MutationError> {
    let tx = conn.transaction()?;
    require_task(&tx, task_id)?;

    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM steps WHERE task_id = ?1",
        [task_id.to_string()],
        |row| row.get(0),
    )?;
    let step = Step::new(task_id, count);
    insert_step(&tx, &step)?;
    tx.commit()?;
    Ok(step.id)
}

/// Delete a step and close the gap it leaves among its siblings.
///
/// # Errors
///
/// Returns [`MutationError::StepNotFound`] or a storage error.
pub fn remove_step(conn: &mut Connection, step_id: StepId) -> Result<(), MutationError> {
    let tx = conn.transaction()?;
    let step = load_step(&tx, step_id)?;

    tx.execute("DELETE FROM steps WHERE step_id = ?1", [step_id.to_string()])?;
    if let Some(owner) = step.task_id {
        renumber_siblings(&tx, owner)?;
    }
    tx.commit()?;
    Ok(())
}

/// Flip a step's completion. Returns the new state.
///
/// # Errors
///
/// Returns [`MutationError::StepNotFound`] or a storage error.
pub fn toggle_step_completion(
    conn: &mut Connection,
    step_id: StepId,
    now: DateTime<Utc>,
) -> Result<bool, MutationError> {
    let tx = conn.transaction()?;
    let mut step = load_step(&tx, step_id)?;
    step.toggle_completion(time::truncate_to_micros(now));

    tx.execute(
        "UPDATE steps SET is_completed = ?1, completed_at_us = ?2 WHERE step_id = ?3",
        params![
            step.is_completed,
            step.completed_at.map(time::to_micros),
            step_id.to_string()
        ],
    )?;
    tx.commit()?;
    Ok(step.is_completed)
}

/// Flip a task's stored completion. Returns the new state.
///
/// # Errors
///
/// Returns [`MutationError::TaskNotFound`] or a storage error.
pub fn toggle_task_completion(
    conn: &mut Connection,
    task_id: TaskId,
    now: DateTime<Utc>,
) -> Result<bool, MutationError> {
    let tx = conn.transaction()?;
    let current: Option<bool> = tx
        .query_row(
            "SELECT is_completed FROM tasks WHERE task_id = ?1",
            [task_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let completed = !current.ok_or(MutationError::TaskNotFound(task_id))?;
    let completed_at = completed.then(|| time::to_micros(now));

    tx.execute(
        "UPDATE tasks SET is_completed = ?1, completed_at_us = ?2 WHERE task_id = ?3",
        params![completed, completed_at, task_id.to_string()],
    )?;
    tx.commit()?;
    Ok(completed)
}

/// Change a task's title. Surrounding whitespace is trimmed.
///
/// # Errors
///
/// Returns [`MutationError::EmptyTitle`], [`MutationError::TaskNotFound`] or
/// a storage error.
pub fn rename_task(conn: &mut Connection, task_id: TaskId, title: &str) -> Result<(), MutationError> {
    let title = clean_title(title)?;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE tasks SET title = ?1 WHERE task_id = ?2",
        params![title, task_id.to_string()],
    )?;
    if updated == 0 {
        return Err(MutationError::TaskNotFound(task_id));
    }
    tx.commit()?;
    Ok(())
}

/// Put tasks in the given display order. `ordered` must name every task
/// exactly once.
///
/// # Errors
///
/// Returns [`MutationError::InvalidReorder`] when `ordered` is not a
/// permutation of the stored tasks, or a storage error.
pub fn reorder_tasks(conn: &mut Connection, ordered: &[TaskId]) -> Result<(), MutationError> {
    let tx = conn.transaction()?;
    let stored: HashSet<TaskId> = query::load_tasks(&tx)?
        .into_iter()
        .map(|task| task.id)
        .collect();
    let requested: HashSet<TaskId> = ordered.iter().copied().collect();

    if requested.len() != ordered.len() || requested != stored {
        return Err(MutationError::InvalidReorder {
            expected: stored.len(),
            got: ordered.len(),
        });
    }

    {
        let mut stmt = tx.prepare("UPDATE tasks SET sort_order = ?1 WHERE task_id = ?2")?;
        for (position, id) in (0_i64..).zip(ordered) {
            stmt.execute(params![position, id.to_string()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Delete a task with its steps and close the gap in the task order.
///
/// # Errors
///
/// Returns [`MutationError::TaskNotFound`] or a storage error.
pub fn delete_task(conn: &mut Connection, task_id: TaskId) -> Result<(), MutationError> {
    let tx = conn.transaction()?;
    let deleted = tx.execute("DELETE FROM tasks WHERE task_id = ?1", [task_id.to_string()])?;
    if deleted == 0 {
        return Err(MutationError::TaskNotFound(task_id));
    }
    renumber_all_tasks(&tx)?;
    tx.commit()?;

    tracing::debug!(task = %task_id, "deleted task");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::order::is_dense;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn created_tasks_append_with_dense_steps() {
        let mut conn = open_in_memory().expect("open");
        let first = create_task_with_steps(&mut conn, "  Read  ", 3, at(10)).expect("create");
        let second = create_task_with_steps(&mut conn, "Run", 0, at(20)).expect("create");

        assert_eq!(first.title, "Read");
        assert_eq!((first.order, second.order), (0, 1));

        let stored = query::get_task(&conn, first.id).expect("get").expect("exists");
        assert_eq!(stored, first);
        assert!(is_dense(stored.steps.iter().map(|step| step.order)));
    }

    #[test]
    fn blank_title_is_rejected() {
        let mut conn = open_in_memory().expect("open");
        let err = create_task_with_steps(&mut conn, "   ", 1, at(0)).expect_err("blank");
        assert_eq!(err.code(), ErrorCode::EmptyTitle);

        let task = create_task_with_steps(&mut conn, "ok", 0, at(0)).expect("create");
        assert!(matches!(
            rename_task(&mut conn, task.id, "\t"),
            Err(MutationError::EmptyTitle)
        ));
        rename_task(&mut conn, task.id, " renamed ").expect("rename");
        let stored = query::get_task(&conn, task.id).expect("get").expect("exists");
        assert_eq!(stored.title, "renamed");
    }

    #[test]
    fn remove_step_renumbers_siblings() {
        let mut conn = open_in_memory().expect("open");
        let task = create_task_with_steps(&mut conn, "t", 3, at(0)).expect("create");
        let middle = task.steps[1].id;

        remove_step(&mut conn, middle).expect("remove");

        let stored = query::get_task(&conn, task.id).expect("get").expect("exists");
        let remaining: Vec<(StepId, i64)> =
            stored.steps.iter().map(|step| (step.id, step.order)).collect();
        assert_eq!(remaining, vec![(task.steps[0].id, 0), (task.steps[2].id, 1)]);

        assert!(matches!(
            remove_step(&mut conn, middle),
            Err(MutationError::StepNotFound(id)) if id == middle
        ));
    }

    #[test]
    fn add_step_appends_at_count() {
        let mut conn = open_in_memory().expect("open");
        let task = create_task_with_steps(&mut conn, "t", 2, at(0)).expect("create");

        let added = add_step(&mut conn, task.id).expect("add");

        let stored = query::get_task(&conn, task.id).expect("get").expect("exists");
        assert_eq!(stored.steps.last().map(|step| (step.id, step.order)), Some((added, 2)));
        assert!(matches!(
            add_step(&mut conn, TaskId::new()),
            Err(MutationError::TaskNotFound(_))
        ));
    }

    #[test]
    fn toggles_keep_timestamp_consistent() {
        let mut conn = open_in_memory().expect("open");
        let task = create_task_with_steps(&mut conn, "t", 1, at(0)).expect("create");
        let step = task.steps[0].id;

        assert!(toggle_step_completion(&mut conn, step, at(50)).expect("toggle"));
        assert!(toggle_task_completion(&mut conn, task.id, at(60)).expect("toggle"));
        let stored = query::get_task(&conn, task.id).expect("get").expect("exists");
        assert_eq!(stored.steps[0].completed_at, Some(at(50)));
        assert_eq!(stored.completed_at, Some(at(60)));

        assert!(!toggle_step_completion(&mut conn, step, at(70)).expect("toggle"));
        assert!(!toggle_task_completion(&mut conn, task.id, at(80)).expect("toggle"));
        let stored = query::get_task(&conn, task.id).expect("get").expect("exists");
        assert_eq!(stored.steps[0].completed_at, None);
        assert_eq!(stored.completed_at, None);
        assert!(!stored.is_completed);
    }

    #[test]
    fn reorder_requires_a_permutation() {
        let mut conn = open_in_memory().expect("open");
        let a = create_task_with_steps(&mut conn, "a", 0, at(1)).expect("create");
        let b = create_task_with_steps(&mut conn, "b", 0, at(2)).expect("create");
        let c = create_task_with_steps(&mut conn, "c", 0, at(3)).expect("create");

        reorder_tasks(&mut conn, &[c.id, a.id, b.id]).expect("reorder");
        let titles: Vec<String> = query::load_tasks(&conn)
            .expect("load")
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles, vec!["c", "a", "b"]);

        let err = reorder_tasks(&mut conn, &[a.id, a.id, b.id]).expect_err("duplicate");
        assert_eq!(err.code(), ErrorCode::InvalidReorder);
        assert!(reorder_tasks(&mut conn, &[a.id, b.id]).is_err());
    }

    #[test]
    fn delete_task_cascades_and_closes_gap() {
        let mut conn = open_in_memory().expect("open");
        let a = create_task_with_steps(&mut conn, "a", 2, at(1)).expect("create");
        let b = create_task_with_steps(&mut conn, "b", 0, at(2)).expect("create");

        delete_task(&mut conn, a.id).expect("delete");

        let stats = query::store_stats(&conn).expect("stats");
        assert_eq!((stats.total_tasks, stats.total_steps), (1, 0));
        let remaining = query::get_task(&conn, b.id).expect("get").expect("exists");
        assert_eq!(remaining.order, 0);
        assert!(matches!(
            delete_task(&mut conn, a.id),
            Err(MutationError::TaskNotFound(_))
        ));
    }
}
