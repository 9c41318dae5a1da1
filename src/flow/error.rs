//! Error types for admission and submission.
//!
//! Only submission-level failures travel through [`FlowError`]. Errors
//! produced by a task body are a [`TaskError`] and stay inside the backend
//! that ran the task.

use thiserror::Error;

/// Error returned by a task body.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by a task body.
pub type TaskResult = Result<(), TaskError>;

/// Errors surfaced by the flow controller and execution backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A controller was requested without an execution backend.
    #[error("flow controller requires an execution backend")]
    InvalidBackend,

    /// The execution backend refused the submission.
    #[error("submission rejected by execution backend: {reason}")]
    SubmissionFailed {
        /// Backend-provided explanation.
        reason: String,
    },

    /// The controller has been stopped and accepts no more work.
    #[error("flow controller is stopped")]
    Stopped,

    /// A backend could not start one of its threads.
    #[error("failed to start worker thread: {reason}")]
    WorkerSpawn {
        /// Underlying OS error.
        reason: String,
    },
}

impl FlowError {
    /// Shorthand for [`FlowError::SubmissionFailed`].
    pub fn submission_failed(reason: impl Into<String>) -> Self {
        Self::SubmissionFailed {
            reason: reason.into(),
        }
    }
}
