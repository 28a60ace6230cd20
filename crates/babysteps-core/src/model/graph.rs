//! In-memory arena of everything in a store.
//!
//! Tasks own their steps outright. Back-references go through an index
//! (`step_id -> task_id`) rather than pointers, and steps whose owner is
//! missing are parked in `orphans`.

use std::collections::HashMap;

use super::task::{Step, StepId, Task, TaskId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGraph {
    /// Tasks in ascending `order`, each with steps in ascending `order`.
    pub tasks: Vec<Task>,
    /// Steps with no owner, or whose owner does not exist.
    pub orphans: Vec<Step>,
    owners: HashMap<StepId, TaskId>,
}

impl TaskGraph {
    /// Distribute `steps` to their owners among `tasks`.
    ///
    /// Steps already attached to a task are kept. Input order is preserved
    /// within each task.
    #[must_use]
    pub fn from_parts(mut tasks: Vec<Task>, steps: Vec<Step>) -> Self {
        let positions: HashMap<TaskId, usize> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.id, index))
            .collect();

        let mut orphans = Vec::new();
        for step in steps {
            match step.task_id.and_then(|id| positions.get(&id)) {
                Some(&index) => tasks[index].steps.push(step),
                None => orphans.push(step),
            }
        }

        let mut graph = Self {
            tasks,
            orphans,
            owners: HashMap::new(),
        };
        graph.reindex();
        graph
    }

    /// Rebuild the `step_id -> task_id` index after structural edits.
    pub fn reindex(&mut self) {
        self.owners = self
            .tasks
            .iter()
            .flat_map(|task| task.steps.iter().map(move |step| (step.id, task.id)))
            .collect();
    }

    #[must_use]
    pub fn owner_of(&self, step_id: StepId) -> Option<TaskId> {
        self.owners.get(&step_id).copied()
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&Step> {
        let owner = self.owner_of(id)?;
        self.task(owner)?.steps.iter().find(|step| step.id == id)
    }

    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.tasks.iter().map(Task::total_steps_count).sum::<usize>() + self.orphans.len()
    }

    /// Owned steps across all tasks (orphans excluded).
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.tasks.iter().flat_map(|task| task.steps.iter())
    }
}
