//! Ordering rules shared by migration backfill and integrity repair.

use chrono::{DateTime, Utc};

use super::task::{Step, Task, TaskId};
use super::v1::TaskV1;

/// A record whose display position derives from its creation time.
pub trait CreationOrdered {
    fn created_at(&self) -> DateTime<Utc>;
    fn set_order(&mut self, order: i64);
}

impl CreationOrdered for TaskV1 {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_order(&mut self, order: i64) {
        self.order = Some(order);
    }
}

impl CreationOrdered for Task {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

/// Position index as a stored order value. Collections never approach
/// `i64::MAX` entries.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub const fn rank(index: usize) -> i64 {
    index as i64
}

/// Sort `records` by ascending creation time and assign `order = rank`.
///
/// The sort is stable: records sharing a creation time keep the sequence
/// they were fetched in. Re-running on the output yields the same orders.
pub fn assign_creation_order<T: CreationOrdered>(records: &mut [T]) {
    records.sort_by_key(|record| record.created_at());
    for (index, record) in records.iter_mut().enumerate() {
        record.set_order(rank(index));
    }
}

/// `true` when the values, sorted, are exactly `0..n`.
#[must_use]
pub fn is_dense(orders: impl IntoIterator<Item = i64>) -> bool {
    let mut sorted: Vec<i64> = orders.into_iter().collect();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(expected, actual)| *actual == rank(expected))
}

/// Renumber steps to `0..n` by ascending current order (stable for ties).
///
/// Leaves `steps` sorted. Returns `true` when any order value changed.
pub fn renumber_steps(steps: &mut [Step]) -> bool {
    steps.sort_by_key(|step| step.order);
    let mut changed = false;
    for (index, step) in steps.iter_mut().enumerate() {
        let position = rank(index);
        if step.order != position {
            step.order = position;
            changed = true;
        }
    }
    changed
}

/// Renumber tasks to `0..n` by ascending `(order, created_at)`.
///
/// Leaves `tasks` sorted. Returns the ids of tasks whose order changed.
pub fn renumber_tasks(tasks: &mut [Task]) -> Vec<TaskId> {
    tasks.sort_by_key(|task| (task.order, task.created_at));
    let mut changed = Vec::new();
    for (index, task) in tasks.iter_mut().enumerate() {
        let position = rank(index);
        if task.order != position {
            task.order = position;
            changed.push(task.id);
        }
    }
    changed
}
