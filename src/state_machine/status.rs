use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution status of a task.
///
/// Every task flows through: PENDING → WORKING → COMPLETED | ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Working,
    Completed,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Working => write!(f, "WORKING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl TaskStatus {
    /// `Completed` and `Error` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Whether `self -> next` is a forward edge of the status machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Working)
                | (TaskStatus::Working, TaskStatus::Completed)
                | (TaskStatus::Working, TaskStatus::Error)
        )
    }
}
