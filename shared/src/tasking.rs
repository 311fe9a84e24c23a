//! Task Lifecycle State Machine
//!
//! Defines the status vocabulary for dispatch tasks and the legal transitions
//! between them. The engine is the only writer of task status; rovers report
//! status changes and the engine validates them here before persisting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Execution status of a task
///
/// Initial is `Pending`. `Done`, `Failed`, and `Cancelled` are terminal: a
/// task that reaches one of them is never mutated again, and a retry means
/// creating a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, no rover bound yet
    Pending,
    /// Bound to a rover, waiting for it to acknowledge
    Assigned,
    /// Rover is executing the waypoint sequence
    Active,
    /// All work complete
    Done,
    /// Rover reported an unrecoverable error
    Failed,
    /// Stopped by an operator or mission stop
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Active => "active",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A status change that is not on a legal edge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal task transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Check if a status transition is legal
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match (from, to) {
        // Re-reporting the same non-terminal status carries fresh progress;
        // terminal states are immutable, even to themselves
        (a, b) if a == b => !a.is_terminal(),

        // The forward path
        (Pending, Assigned) => true,
        (Assigned, Active) => true,
        (Active, Done) => true,

        // Any non-terminal status can fail or be cancelled
        (Pending | Assigned | Active, Failed) => true,
        (Pending | Assigned | Active, Cancelled) => true,

        _ => false,
    }
}

/// Validate a transition, returning the offending pair on failure
pub fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
