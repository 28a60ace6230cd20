//! Task and step records, per schema version, plus the in-memory arena the
//! integrity pass works on.

pub mod filter;
pub mod graph;
pub mod order;
pub mod task;
pub mod v1;

pub use filter::TaskFilter;
pub use graph::TaskGraph;
pub use task::{ParseIdError, Step, StepId, Task, TaskId};
pub use v1::{StepV1, TaskV1};

/// A task record tagged with the schema shape it was read in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedTask {
    V1(TaskV1),
    V2(Task),
}

impl VersionedTask {
    #[must_use]
    pub const fn id(&self) -> TaskId {
        match self {
            Self::V1(task) => task.id,
            Self::V2(task) => task.id,
        }
    }

    /// Completion as each schema defines it: derived from steps in V1,
    /// stored in V2.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        match self {
            Self::V1(task) => task.is_completed(),
            Self::V2(task) => task.is_completed,
        }
    }
}
