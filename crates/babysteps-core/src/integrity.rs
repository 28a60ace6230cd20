//! Integrity checker and repairer.
//!
//! Independent of schema version, a pass restores these rules:
//!
//! 1. `is_completed` holds exactly when `completed_at` is set (tasks and steps)
//! 2. `completed_at` lies between the owning task's `created_at` and now
//! 3. step orders within a task are dense and zero-based
//! 4. every step has an existing owning task
//! 5. task orders are dense and zero-based
//!
//! [`repair`] is pure and works on a [`TaskGraph`]. [`comprehensive_check`]
//! loads the graph, repairs it, and writes every change back in one
//! transaction when anything was repaired.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, params};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::db::{self, StoreError, query};
use crate::model::order::{is_dense, renumber_steps, renumber_tasks};
use crate::model::{StepId, TaskGraph, TaskId};
use crate::time;

/// The record an issue was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Task(TaskId),
    Step(StepId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task {id}"),
            Self::Step(id) => write!(f, "step {id}"),
        }
    }
}

/// A detected violation (or, for [`Issue::EmptyTitle`], a warning).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    MissingCompletedAt {
        entity: Entity,
    },
    StaleCompletedAt {
        entity: Entity,
    },
    CompletedBeforeCreation {
        entity: Entity,
        completed_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },
    CompletedInFuture {
        entity: Entity,
        completed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    OrphanStep {
        step: StepId,
    },
    StepOrderNotDense {
        task: TaskId,
        found: Vec<i64>,
    },
    TaskOrderNotDense {
        found: Vec<i64>,
    },
    EmptyTitle {
        task: TaskId,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCompletedAt { entity } => {
                write!(f, "{entity} is completed but has no completion time")
            }
            Self::StaleCompletedAt { entity } => {
                write!(f, "{entity} is not completed but has a completion time")
            }
            Self::CompletedBeforeCreation {
                entity,
                completed_at,
                created_at,
            } => write!(
                f,
                "{entity} was completed at {completed_at}, before its task was created at {created_at}"
            ),
            Self::CompletedInFuture {
                entity,
                completed_at,
                now,
            } => write!(f, "{entity} was completed at {completed_at}, after {now}"),
            Self::OrphanStep { step } => write!(f, "step {step} has no owning task"),
            Self::StepOrderNotDense { task, found } => {
                write!(f, "steps of task {task} have order {found:?}, expected 0..{}", found.len())
            }
            Self::TaskOrderNotDense { found } => {
                write!(f, "tasks have order {found:?}, expected 0..{}", found.len())
            }
            Self::EmptyTitle { task } => write!(f, "task {task} has an empty title"),
        }
    }
}

/// Result of a comprehensive pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<Issue>,
    /// Reported but never repaired. They do not affect `is_valid`.
    pub warnings: Vec<Issue>,
    pub repaired_count: usize,
    pub total_tasks: usize,
    pub total_steps: usize,
    pub checked_at: DateTime<Utc>,
}

/// Changes made in memory by [`repair`], to be written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub issues: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub repaired_count: usize,
    pub dirty_tasks: BTreeSet<TaskId>,
    pub dirty_steps: BTreeSet<StepId>,
    pub deleted_steps: Vec<StepId>,
}

impl RepairPlan {
    fn record(&mut self, issue: Issue) {
        tracing::warn!(%issue, "integrity issue");
        self.issues.push(issue);
        self.repaired_count += 1;
    }
}

/// Bring `completed_at` in line with `is_completed` and the `[lower, upper]`
/// window. At most one issue per entity.
fn repair_completion(
    entity: Entity,
    is_completed: bool,
    completed_at: &mut Option<DateTime<Utc>>,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Issue> {
    match (is_completed, *completed_at) {
        (true, None) => {
            *completed_at = Some(now.clamp(lower, upper));
            Some(Issue::MissingCompletedAt { entity })
        }
        (false, Some(_)) => {
            *completed_at = None;
            Some(Issue::StaleCompletedAt { entity })
        }
        (true, Some(at)) if at < lower => {
            *completed_at = Some(lower);
            Some(Issue::CompletedBeforeCreation {
                entity,
                completed_at: at,
                created_at: lower,
            })
        }
        (true, Some(at)) if at > upper => {
            *completed_at = Some(upper);
            Some(Issue::CompletedInFuture {
                entity,
                completed_at: at,
                now: upper,
            })
        }
        _ => None,
    }
}

/// Restore every rule on `graph` in memory and describe what changed.
///
/// Running it again on the result finds nothing to repair.
pub fn repair(graph: &mut TaskGraph, now: DateTime<Utc>) -> RepairPlan {
    let now = time::truncate_to_micros(now);
    let mut plan = RepairPlan::default();

    for step in std::mem::take(&mut graph.orphans) {
        plan.record(Issue::OrphanStep { step: step.id });
        plan.deleted_steps.push(step.id);
    }

    for task in &mut graph.tasks {
        if task.title.trim().is_empty() {
            tracing::warn!(task = %task.id, "task has an empty title");
            plan.warnings.push(Issue::EmptyTitle { task: task.id });
        }

        let lower = task.created_at;
        let upper = lower.max(now);

        if let Some(issue) = repair_completion(
            Entity::Task(task.id),
            task.is_completed,
            &mut task.completed_at,
            lower,
            upper,
            now,
        ) {
            plan.record(issue);
            plan.dirty_tasks.insert(task.id);
        }

        for step in &mut task.steps {
            if let Some(issue) = repair_completion(
                Entity::Step(step.id),
                step.is_completed,
                &mut step.completed_at,
                lower,
                upper,
                now,
            ) {
                plan.record(issue);
                plan.dirty_steps.insert(step.id);
            }
        }

        if !is_dense(task.steps.iter().map(|step| step.order)) {
            let mut found: Vec<i64> = task.steps.iter().map(|step| step.order).collect();
            found.sort_unstable();
            renumber_steps(&mut task.steps);
            plan.dirty_steps.extend(task.steps.iter().map(|step| step.id));
            plan.record(Issue::StepOrderNotDense {
                task: task.id,
                found,
            });
        }
    }

    if !is_dense(graph.tasks.iter().map(|task| task.order)) {
        let mut found: Vec<i64> = graph.tasks.iter().map(|task| task.order).collect();
        found.sort_unstable();
        plan.dirty_tasks.extend(renumber_tasks(&mut graph.tasks));
        plan.record(Issue::TaskOrderNotDense { found });
    }

    graph.reindex();
    plan
}

fn apply(tx: &Transaction<'_>, graph: &TaskGraph, plan: &RepairPlan) -> rusqlite::Result<()> {
    {
        let mut delete = tx.prepare("DELETE FROM steps WHERE step_id = ?1")?;
        for id in &plan.deleted_steps {
            delete.execute([id.to_string()])?;
        }
    }

    {
        let mut update = tx.prepare(
            "UPDATE tasks SET sort_order = ?1, is_completed = ?2, completed_at_us = ?3
             WHERE task_id = ?4",
        )?;
        for task in graph
            .tasks
            .iter()
            .filter(|task| plan.dirty_tasks.contains(&task.id))
        {
            update.execute(params![
                task.order,
                task.is_completed,
                task.completed_at.map(time::to_micros),
                task.id.to_string(),
            ])?;
        }
    }

    let mut update = tx.prepare(
        "UPDATE steps SET sort_order = ?1, is_completed = ?2, completed_at_us = ?3
         WHERE step_id = ?4",
    )?;
    for step in graph
        .steps()
        .filter(|step| plan.dirty_steps.contains(&step.id))
    {
        update.execute(params![
            step.order,
            step.is_completed,
            step.completed_at.map(time::to_micros),
            step.id.to_string(),
        ])?;
    }
    Ok(())
}

/// Cheap read-only gate: `true` when no task breaks the completion-flag rule.
///
/// # Errors
///
/// Returns an error when the store cannot be read; a failed read is never
/// reported as valid.
pub fn quick_check(conn: &Connection) -> Result<bool, StoreError> {
    let violated: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM tasks
            WHERE (is_completed = 1 AND completed_at_us IS NULL)
               OR (is_completed = 0 AND completed_at_us IS NOT NULL)
        )",
        [],
        |row| row.get(0),
    )?;
    if violated {
        tracing::warn!("quick integrity check found a task with inconsistent completion");
    }
    Ok(!violated)
}

/// Full check and repair against the current time.
///
/// # Errors
///
/// See [`comprehensive_check_at`].
pub fn comprehensive_check(conn: &mut Connection) -> Result<IntegrityReport, StoreError> {
    comprehensive_check_at(conn, time::now())
}

/// Full check and repair, treating `now` as the current time.
///
/// # Errors
///
/// Returns an error if loading or saving fails; nothing is written then.
pub fn comprehensive_check_at(
    conn: &mut Connection,
    now: DateTime<Utc>,
) -> Result<IntegrityReport, StoreError> {
    let now = time::truncate_to_micros(now);
    let tx = conn.transaction()?;
    let mut graph = query::load_graph(&tx)?;
    let plan = repair(&mut graph, now);

    if plan.repaired_count > 0 {
        apply(&tx, &graph, &plan)?;
        db::mark_checked(&tx, now)?;
        tx.commit()?;
        tracing::info!(repaired = plan.repaired_count, "integrity repairs saved");
    } else {
        tx.rollback()?;
        tracing::debug!("integrity check found nothing to repair");
    }

    Ok(IntegrityReport {
        is_valid: plan.issues.is_empty(),
        issues: plan.issues,
        warnings: plan.warnings,
        repaired_count: plan.repaired_count,
        total_tasks: graph.tasks.len(),
        total_steps: graph.total_steps(),
        checked_at: now,
    })
}
