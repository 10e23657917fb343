//! Tool error types.
//!
//! Only input problems, cancellation and unknown identifiers are errors.
//! Anything that goes wrong while a command runs (non-zero exit, spawn
//! failure, shell syntax error) is reported inside a successful
//! [`ToolResult`](crate::tools::ToolResult) so the model can reason about it.

use std::io;

use thiserror::Error;

/// Message used whenever a call observes a set abort signal.
pub const ABORTED_MESSAGE: &str = "Operation aborted";

/// Errors that can cross the tool boundary.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required parameter is missing or has the wrong type.
    #[error("{message}")]
    InvalidArguments {
        /// Description of the validation failure.
        message: String,
    },

    /// The abort signal was set before or during the call.
    #[error("Operation aborted")]
    Aborted,

    /// Delegation target is not in the configured agent directory.
    #[error("Unknown agent_id: {agent_id}")]
    UnknownAgent {
        /// The rejected agent id.
        agent_id: String,
    },

    /// Poll referenced a task the store does not know.
    #[error("Unknown task_id: {task_id}")]
    UnknownTask {
        /// The rejected task id.
        task_id: String,
    },

    /// The run-submission service refused the request.
    #[error("Run submission failed: {reason}")]
    SubmitFailed {
        /// Reason reported by the submitter.
        reason: String,
    },

    /// Another execution with the same call id is still running.
    #[error("Tool call {call_id} is already running")]
    DuplicateCall {
        /// The conflicting call id.
        call_id: String,
    },

    /// Tool not found in registry.
    #[error("Tool not found: {name}")]
    ToolNotFound {
        /// The tool name that was not found.
        name: String,
    },

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (catch-all).
    #[error("{message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl ToolError {
    /// Shorthand for [`ToolError::InvalidArguments`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Whether the error is caused by the caller's input rather than the engine.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArguments { .. }
                | Self::UnknownAgent { .. }
                | Self::UnknownTask { .. }
                | Self::DuplicateCall { .. }
                | Self::ToolNotFound { .. }
        )
    }
}
