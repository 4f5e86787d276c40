//! A2A task lifecycle: the persistent, observable unit of work.
//!
//! A task is created on the first message of a conversation turn,
//! transitions through the state machine below while the agent runs, and
//! settles in exactly one terminal state:
//!
//! ```text
//! submitted ─→ working ─→ completed | failed | cancelled | rejected
//!                 │ ↑
//!                 ▼ │
//!      input_required / auth_required
//! ```
//!
//! Terminal states accept no further transitions; a second cancel is a
//! no-op at the observable boundary.

mod manager;
mod store;

pub use manager::{StreamEvent, TaskManager};
pub use store::{InMemoryTaskStore, ListTasksFilter, TaskPage, TaskStore};

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Message;

/// Prefix carried by wire-visible task names (`tasks/<id>`).
pub const TASK_NAME_PREFIX: &str = "tasks/";

/// Parse a `tasks/<id>` name into the bare id.
pub fn parse_task_name(name: &str) -> Result<&str> {
    let id = name
        .strip_prefix(TASK_NAME_PREFIX)
        .ok_or_else(|| Error::invalid_input(format!("task name '{name}' must start with 'tasks/'")))?;
    if id.is_empty() || id.contains('/') {
        return Err(Error::invalid_input(format!("task name '{name}' is malformed")));
    }
    Ok(id)
}

/// States of the task machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not yet running.
    Submitted,
    /// Execution in progress.
    Working,
    /// Waiting for additional user input.
    InputRequired,
    /// Waiting for authorization.
    AuthRequired,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable error.
    Failed,
    /// Explicitly cancelled.
    Cancelled,
    /// Refused by an approval gate.
    Rejected,
}

impl TaskState {
    /// Returns `true` for states that accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }

    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::AuthRequired => "auth_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

/// An opaque artifact attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Opaque parts.
    pub parts: Vec<Value>,
}

impl Artifact {
    /// Create an artifact.
    #[must_use]
    pub fn new(name: impl Into<String>, parts: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            parts,
        }
    }
}

/// Status of a task: its state plus an optional human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current state.
    pub state: TaskState,
    /// Free-text status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The observable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id (bare, without the `tasks/` prefix).
    pub id: String,
    /// Conversation grouping id.
    pub context_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Message history, oldest first.
    pub history: Vec<Message>,
    /// Attached artifacts.
    pub artifacts: Vec<Artifact>,
    /// Last modification time.
    pub updated_at: SystemTime,
}

impl Task {
    /// Create a task in `submitted`, generating ids as needed.
    #[must_use]
    pub fn new(context_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_id: context_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: TaskStatus {
                state: TaskState::Submitted,
                message: None,
            },
            history: Vec::new(),
            artifacts: Vec::new(),
            updated_at: SystemTime::now(),
        }
    }

    /// The wire-visible name (`tasks/<id>`).
    #[must_use]
    pub fn name(&self) -> String {
        format!("{TASK_NAME_PREFIX}{}", self.id)
    }

    /// Attempt a state transition.
    ///
    /// Transitions out of a terminal state are rejected; a repeated
    /// transition into the same terminal state is a no-op (idempotent
    /// cancel).
    pub fn transition(&mut self, to: TaskState, message: Option<String>) -> Result<()> {
        if self.status.state.is_terminal() {
            if self.status.state == to {
                return Ok(());
            }
            return Err(Error::invalid_input(format!(
                "task '{}' is {} and accepts no transitions",
                self.id,
                self.status.state.as_str()
            )));
        }
        self.status = TaskStatus { state: to, message };
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Append a message to history.
    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
        self.updated_at = SystemTime::now();
    }

    /// A copy with history trimmed to the `limit` most recent messages
    /// and artifacts included only when requested.
    #[must_use]
    pub fn snapshot(&self, history_limit: Option<usize>, include_artifacts: bool) -> Self {
        let mut copy = self.clone();
        if let Some(limit) = history_limit {
            let start = copy.history.len().saturating_sub(limit);
            copy.history.drain(..start);
        }
        if !include_artifacts {
            copy.artifacts.clear();
        }
        copy
    }

    /// The most recent user message, if any.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User)
    }
}
