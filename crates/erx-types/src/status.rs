//! Task lifecycle status.

use serde::{Deserialize, Serialize};

use crate::errors::{ErxError, ErxResult};

/// Lifecycle state of a task.
///
/// Serialized as a small integer in the database and by its FHIR name in
/// search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TaskStatus {
    Draft = 0,
    Ready = 1,
    InProgress = 2,
    Completed = 3,
    Cancelled = 4,
}

impl TaskStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> ErxResult<Self> {
        match value {
            0 => Ok(TaskStatus::Draft),
            1 => Ok(TaskStatus::Ready),
            2 => Ok(TaskStatus::InProgress),
            3 => Ok(TaskStatus::Completed),
            4 => Ok(TaskStatus::Cancelled),
            other => Err(ErxError::internal(format!(
                "task status {other} outside domain"
            ))),
        }
    }

    /// FHIR status name as used in search parameter values.
    pub fn name(self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> ErxResult<Self> {
        match name {
            "draft" => Ok(TaskStatus::Draft),
            "ready" => Ok(TaskStatus::Ready),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ErxError::bad_request(format!(
                "Invalid value for status search parameter: {other}"
            ))),
        }
    }

    /// The status DAG: draft → ready → in-progress → completed, with
    /// cancellation possible from any non-terminal state.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Draft, Ready)
                | (Ready, InProgress)
                | (InProgress, Completed)
                | (InProgress, Ready)
                | (Draft, Cancelled)
                | (Ready, Cancelled)
                | (InProgress, Cancelled)
        )
    }
}
