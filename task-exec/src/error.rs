use std::time::Duration;
use thiserror::Error;

use crate::types::{ErrorKind, TaskError, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Timeout after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid task output: {message}")]
    OutputDecode { message: String, output: String },

    #[error("Script failed: {message}")]
    ScriptFailed {
        message: String,
        traceback: Option<String>,
    },

    #[error("Command exited with code {code:?}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already registered: {0}")]
    DuplicateTask(TaskId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Classification recorded on the task when this error ends it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SecurityViolation(_) => ErrorKind::SecurityViolation,
            Error::Launch(_) => ErrorKind::LaunchFailure,
            Error::ResourceExceeded(_) => ErrorKind::ResourceLimitExceeded,
            Error::Timeout(_) => ErrorKind::ExecutionTimeout,
            Error::OutputDecode { .. } | Error::Serialization(_) => ErrorKind::OutputDecodeError,
            Error::ScriptFailed { .. } => ErrorKind::UserScriptError,
            Error::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NotFound(_) | Error::DuplicateTask(_) | Error::Config(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Converts the error into the record stored on a terminal task.
    pub fn into_task_error(self) -> TaskError {
        let kind = self.kind();
        let message = match &self {
            Error::ScriptFailed { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let detail = match self {
            Error::ScriptFailed { traceback, .. } => traceback,
            Error::OutputDecode { output, .. } if !output.is_empty() => Some(output),
            Error::NonZeroExit { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        };

        TaskError {
            kind,
            message,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_failure_keeps_message_and_traceback_verbatim() {
        let err = Error::ScriptFailed {
            message: "division by zero".to_string(),
            traceback: Some("Traceback (most recent call last):\n...".to_string()),
        };

        let task_error = err.into_task_error();
        assert_eq!(task_error.kind, ErrorKind::UserScriptError);
        assert_eq!(task_error.message, "division by zero");
        assert_eq!(
            task_error.detail.as_deref(),
            Some("Traceback (most recent call last):\n...")
        );
    }

    #[test]
    fn timeout_maps_to_execution_timeout() {
        let task_error = Error::Timeout(Duration::from_secs(30)).into_task_error();
        assert_eq!(task_error.kind, ErrorKind::ExecutionTimeout);
        assert_eq!(task_error.message, "Timeout after 30 seconds");
        assert!(task_error.detail.is_none());
    }
}
