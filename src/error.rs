//! Error types used by the orchestrator runtime and supervised instances.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`]: errors that abort [`Runner::start`](crate::Runner::start) itself.
//! - [`TaskError`]: the outcome of one supervised attempt.
//!
//! Both types provide `as_label` for logs. Child-process failures never surface
//! as `RuntimeError`: they are logged and handed to the restart policy.

use std::path::PathBuf;
use thiserror::Error;

/// # Errors produced by the orchestrator runtime.
///
/// Only a change source that cannot be started is fatal to `start`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A watch pattern could not be compiled.
    #[error("invalid watch pattern {pattern:?}: {error}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        error: String,
    },

    /// The working directory cannot be watched.
    #[error("cannot watch {path:?}: {error}")]
    WorkDir {
        /// The directory that was supposed to be watched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        error: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// let err = RuntimeError::InvalidPattern { pattern: "[".into(), error: "unclosed".into() };
    /// assert_eq!(err.as_label(), "runtime_invalid_pattern");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidPattern { .. } => "runtime_invalid_pattern",
            RuntimeError::WorkDir { .. } => "runtime_workdir",
        }
    }
}

/// # Outcome of a failed supervised attempt.
///
/// `Fail` feeds the restart policy; `Canceled` is a graceful stop and never
/// triggers a restart.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The attempt failed and may be restarted by policy.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The attempt was interrupted by its governing scope.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::TaskError;
    ///
    /// let err = TaskError::Fail { error: "exit status: 1".into() };
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Indicates whether the error should be fed to a restart policy.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_is_not_a_failure() {
        assert!(!TaskError::Canceled.is_failure());
        assert!(TaskError::Fail { error: "boom".into() }.is_failure());
    }

    #[test]
    fn test_workdir_message_names_path() {
        let err = RuntimeError::WorkDir {
            path: PathBuf::from("/nope"),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nope"));
        assert_eq!(err.as_label(), "runtime_workdir");
    }
}
