use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine::{TaskKind, TaskStatus};

pub type Result<T, E = CadenceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("No handler registered for task kind `{0}`")]
    HandlerNotFound(TaskKind),

    #[error("Handler for `{kind}` failed: {source}")]
    Handler {
        kind: TaskKind,
        #[source]
        source: HandlerError,
    },

    #[error("Recoverable failure {attempt}/{ceiling} in `{key}`: {message}")]
    TransientHandlerFailure {
        key: String,
        attempt: u32,
        ceiling: u32,
        message: String,
    },

    #[error("Manual intervention required: {0}")]
    ManualInterventionRequired(Box<Escalation>),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("Invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled by shutdown request")]
    Cancelled,

    #[error("{0} panicked")]
    Panicked(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CadenceError {
    /// Whether the recovery policy may count and retry this failure.
    ///
    /// Misconfiguration, escalations and shutdown are surfaced as-is.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CadenceError::HandlerNotFound(_)
                | CadenceError::ManualInterventionRequired(_)
                | CadenceError::InvalidTransition { .. }
                | CadenceError::Cancelled
                | CadenceError::Config(_)
        )
    }

    /// Whether this error must abort the enclosing cycle instead of being
    /// counted as a single failed task.
    pub fn aborts_cycle(&self) -> bool {
        matches!(
            self,
            CadenceError::HandlerNotFound(_)
                | CadenceError::ManualInterventionRequired(_)
                | CadenceError::Storage(_)
                | CadenceError::Cancelled
        )
    }
}

/// Typed failure raised by a task handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Handler has no fallback strategy")]
    NoFallback,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// The signal raised once an error class exceeds its retry ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    /// Fingerprint of the failing error class.
    pub error_class: String,
    /// Rendered error that crossed the ceiling.
    pub error: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

impl Escalation {
    /// Body sent to the alerting collaborator.
    pub fn alert_message(&self) -> String {
        format!(
            "MANUAL INTERVENTION REQUIRED\n\nError class: {}\nError: {}\nAttempts: {}\nTime: {}\n\n\
             Automatic recovery was exhausted; a human needs to look at this.",
            self.error_class,
            self.error,
            self.attempts,
            self.at.to_rfc3339()
        )
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` failed {} times (last: {})",
            self.error_class, self.attempts, self.error
        )
    }
}
