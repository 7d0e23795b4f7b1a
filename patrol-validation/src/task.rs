use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use patrol_chain_data::models::{BlockWindow, Subject};

use crate::error::ErrorKind;
use crate::{Result, ValidationError};

/// One evaluation of one subject over one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTask {
    pub id: Uuid,
    pub subject: Subject,
    pub window: BlockWindow,
    pub created_at: i64,
    pub attempts: u32,
}

impl ValidationTask {
    pub fn new(subject: Subject, window: BlockWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            window,
            created_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ingesting,
    Evaluating,
    Submitted,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Ingesting => "ingesting",
            TaskState::Evaluating => "evaluating",
            TaskState::Submitted => "submitted",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Ingesting) | (Ingesting, Evaluating) | (Evaluating, Submitted) | (Submitted, Completed) => true,
            // a retryable failure puts the task back in line
            (Ingesting, Pending) | (Evaluating, Pending) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task and everything that happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task: ValidationTask,
    pub state: TaskState,
    pub history: Vec<TaskState>,
    pub failure: Option<(ErrorKind, String)>,
    /// Version the store assigned to the persisted result.
    pub version: Option<u64>,
}

impl TaskRecord {
    pub fn new(task: ValidationTask) -> Self {
        Self {
            task,
            state: TaskState::Pending,
            history: vec![TaskState::Pending],
            failure: None,
            version: None,
        }
    }

    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ValidationError::IllegalTransition { from: self.state, to: next });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub fn fail(&mut self, err: &ValidationError) -> Result<()> {
        self.transition(TaskState::Failed)?;
        self.failure = Some((err.kind(), err.to_string()));
        Ok(())
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|(kind, _)| *kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(ValidationTask::new("acct".into(), BlockWindow::new(1, 10).unwrap()))
    }

    #[test]
    fn test_happy_path() -> anyhow::Result<()> {
        let mut record = record();
        for state in [
            TaskState::Ingesting,
            TaskState::Evaluating,
            TaskState::Submitted,
            TaskState::Completed,
        ] {
            record.transition(state)?;
        }
        assert_eq!(record.history.len(), 5);
        assert!(record.state.is_terminal());
        Ok(())
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut record = record();
        let err = record.transition(TaskState::Submitted).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalTransition);
        assert_eq!(record.state, TaskState::Pending);

        record.transition(TaskState::Ingesting).unwrap();
        record.fail(&ValidationError::Cancelled("superseded".into())).unwrap();
        assert_eq!(record.failure_kind(), Some(ErrorKind::Cancelled));
        assert!(record.transition(TaskState::Pending).is_err());
        assert!(record.transition(TaskState::Failed).is_err());
    }

    #[test]
    fn test_submitted_cannot_go_back() {
        assert!(!TaskState::Submitted.can_transition_to(TaskState::Pending));
        assert!(TaskState::Submitted.can_transition_to(TaskState::Failed));
        assert!(TaskState::Pending.can_transition_to(TaskState::Failed));
    }
}
