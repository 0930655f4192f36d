//! Task lifecycle for request/response exchanges.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;
use crate::error::{MeshError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Submitted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn allowed_transitions(&self) -> &'static [TaskState] {
        use TaskState::*;
        match self {
            Submitted => &[InProgress, Failed, Cancelled],
            InProgress => &[Completed, Failed, Cancelled],
            Completed => &[],
            Failed => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TaskState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Completion, failure, and cancellation are irreversible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    pub from: TaskState,
    pub to: TaskState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl TaskTransition {
    pub fn new(from: TaskState, to: TaskState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// A correlated request/response exchange owned by the channel that
/// created it. The transition history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// The owning channel, keyed by destination agent.
    pub channel: String,
    pub correlation_id: String,
    pub attempts: u32,
    state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Message>,
    history: Vec<TaskTransition>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(channel: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            correlation_id: correlation_id.into(),
            attempts: 0,
            state: TaskState::Submitted,
            result: None,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn result(&self) -> Option<&Message> {
        self.result.as_ref()
    }

    pub fn history(&self) -> &[TaskTransition] {
        &self.history
    }

    pub fn transition(&mut self, to: TaskState, reason: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(MeshError::Conflict(format!(
                "task {}: invalid transition {} -> {} (allowed: {:?})",
                self.id,
                self.state,
                to,
                self.state.allowed_transitions()
            )));
        }
        self.history.push(TaskTransition::new(self.state, to, reason));
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.attempts += 1;
        self.transition(TaskState::InProgress, "dispatched to transport")
    }

    pub fn complete(&mut self, result: Message) -> Result<()> {
        self.transition(TaskState::Completed, "response received")?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Failed, reason)
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Cancelled, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Role;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut task = Task::new("office", "corr-1");
        assert_eq!(task.state(), TaskState::Submitted);

        task.start().unwrap();
        assert_eq!(task.state(), TaskState::InProgress);
        assert_eq!(task.attempts, 1);

        task.complete(Message::text(Role::Agent, "done")).unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.result().is_some());
        assert_eq!(task.history().len(), 2);
    }

    #[test]
    fn test_terminal_states_are_irreversible() {
        let mut task = Task::new("office", "corr-1");
        task.start().unwrap();
        task.fail("endpoint unreachable").unwrap();

        assert!(task.start().is_err());
        assert!(task.complete(Message::text(Role::Agent, "late")).is_err());
        assert!(task.cancel("too late").is_err());
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let mut task = Task::new("office", "corr-1");
        let err = task
            .transition(TaskState::Completed, "skipping in_progress")
            .unwrap_err();
        assert!(matches!(err, MeshError::Conflict(_)));
    }

    #[test]
    fn test_history_is_append_only() {
        let mut task = Task::new("office", "corr-1");
        task.start().unwrap();
        task.cancel("caller cancelled").unwrap();

        let states: Vec<(TaskState, TaskState)> =
            task.history().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            states,
            vec![
                (TaskState::Submitted, TaskState::InProgress),
                (TaskState::InProgress, TaskState::Cancelled),
            ]
        );
    }
}
