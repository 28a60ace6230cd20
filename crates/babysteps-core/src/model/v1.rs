//! Record shapes of the first schema version.
//!
//! V1 tasks have no stored completion. A task counts as completed when it has
//! at least one step and every step is completed. `order` did not exist yet;
//! it is nullable here so the pre-copy migration hook can fill it in before
//! the rebuild into the V2 shape.

use chrono::{DateTime, Utc};

use super::task::{Step, TaskId};

/// V1 steps share the latest step shape.
pub type StepV1 = Step;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskV1 {
    pub id: TaskId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub order: Option<i64>,
    pub steps: Vec<StepV1>,
}

impl TaskV1 {
    #[must_use]
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            created_at,
            order: None,
            steps: Vec::new(),
        }
    }

    /// Derived completion: non-empty and all steps completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|step| step.is_completed)
    }

    #[must_use]
    pub fn completed_steps_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_completed).count()
    }
}
