use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::order;

/// Opaque, immutable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

/// Opaque, immutable step identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Uuid);

macro_rules! impl_id {
    ($ty:ident, $what:literal) => {
        impl $ty {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $ty {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ParseIdError {
                        expected: $what,
                        got: s.to_string(),
                    })
            }
        }
    };
}

impl_id!(TaskId, "task id");
impl_id!(StepId, "step id");

/// Error returned when an identifier cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseIdError {
    pub expected: &'static str,
    pub got: String,
}

/// A single repeatable check-off unit belonging to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub is_completed: bool,
    /// Zero-based position among the owning task's steps.
    pub order: i64,
    pub completed_at: Option<DateTime<Utc>>,
    /// Owning task. `None` marks an orphan.
    pub task_id: Option<TaskId>,
}

impl Step {
    #[must_use]
    pub fn new(task_id: TaskId, order: i64) -> Self {
        Self {
            id: StepId::new(),
            is_completed: false,
            order,
            completed_at: None,
            task_id: Some(task_id),
        }
    }

    /// Flip completion, keeping `completed_at` in step with the flag.
    pub fn toggle_completion(&mut self, now: DateTime<Utc>) {
        self.is_completed = !self.is_completed;
        self.completed_at = self.is_completed.then_some(now);
    }
}

/// Top-level trackable unit of work (latest schema shape).
///
/// Task completion is a stored flag, independent of step completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Zero-based display position among all tasks.
    pub order: i64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Owned steps, kept sorted by `order` when loaded from the store.
    pub steps: Vec<Step>,
}

impl Task {
    #[must_use]
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>, order: i64) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            created_at,
            order,
            is_completed: false,
            completed_at: None,
            steps: Vec::new(),
        }
    }

    /// Append a step at the next free position and return its id.
    pub fn add_step(&mut self) -> StepId {
        let step = Step::new(self.id, order::rank(self.total_steps_count()));
        let id = step.id;
        self.steps.push(step);
        id
    }

    /// Detach a step. The returned step is an orphan until it is deleted.
    pub fn remove_step(&mut self, step_id: StepId) -> Option<Step> {
        let index = self.steps.iter().position(|step| step.id == step_id)?;
        let mut step = self.steps.remove(index);
        step.task_id = None;
        Some(step)
    }

    #[must_use]
    pub fn completed_steps_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_completed).count()
    }

    #[must_use]
    pub fn total_steps_count(&self) -> usize {
        self.steps.len()
    }

    /// Completed steps over all steps; `0.0` for a task without steps.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.completed_steps_count() as f64 / self.steps.len() as f64
    }

    pub fn toggle_completion(&mut self, now: DateTime<Utc>) {
        self.is_completed = !self.is_completed;
        self.completed_at = self.is_completed.then_some(now);
    }

    /// Steps in ascending `order`, ties kept in their current sequence.
    #[must_use]
    pub fn sorted_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn ids_roundtrip_through_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn invalid_id_reports_kind() {
        let err = "not-a-uuid".parse::<StepId>().expect_err("must fail");
        assert_eq!(err.to_string(), "invalid step id: 'not-a-uuid'");
    }

    #[test]
    fn add_step_assigns_dense_positions() {
        let mut task = Task::new("Read daily", at(0), 0);
        task.add_step();
        task.add_step();
        task.add_step();

        let orders: Vec<i64> = task.steps.iter().map(|step| step.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert!(task.steps.iter().all(|step| step.task_id == Some(task.id)));
    }

    #[test]
    fn remove_step_orphans_the_detached_step() {
        let mut task = Task::new("Gym", at(0), 0);
        let id = task.add_step();

        let removed = task.remove_step(id).expect("step exists");
        assert_eq!(removed.task_id, None);
        assert!(task.steps.is_empty());
        assert!(task.remove_step(id).is_none());
    }

    #[test]
    fn step_toggle_sets_and_clears_timestamp() {
        let mut step = Step::new(TaskId::new(), 0);

        step.toggle_completion(at(100));
        assert!(step.is_completed);
        assert_eq!(step.completed_at, Some(at(100)));

        step.toggle_completion(at(200));
        assert!(!step.is_completed);
        assert_eq!(step.completed_at, None);
    }

    #[test]
    fn task_completion_is_independent_of_steps() {
        let mut task = Task::new("Walk", at(0), 0);
        task.add_step();
        task.steps[0].toggle_completion(at(5));

        assert!(!task.is_completed);
        task.toggle_completion(at(10));
        assert!(task.is_completed);
        assert_eq!(task.completed_at, Some(at(10)));
    }

    #[test]
    fn progress_counts_completed_steps() {
        let mut task = Task::new("Journal", at(0), 0);
        assert!(task.progress().abs() < f64::EPSILON);

        for _ in 0..4 {
            task.add_step();
        }
        task.steps[0].toggle_completion(at(1));
        assert!((task.progress() - 0.25).abs() < f64::EPSILON);
    }
}
