//! # Restart policies for supervised instances.
//!
//! [`RestartPolicy`] determines whether an instance is started again after its
//! command sequence ends.
//!
//! - [`RestartPolicy::Never`] the instance runs once and is never restarted.
//! - [`RestartPolicy::Always`] the instance is restarted after every termination.
//! - [`RestartPolicy::OnFailure`] the instance is restarted only if it fails.
//!
//! ```text
//! RestartPolicy::Never      → Ok/Err  → exit
//! RestartPolicy::OnFailure  → Ok      → exit
//!                           → Err     → backoff, restart
//! RestartPolicy::Always     → Ok      → wait `first`, restart
//!                           → Err     → backoff, restart
//! ```
//!
//! Cancellation ends every policy.

/// Policy controlling whether a task is restarted after completion or failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart: the task runs once and exits permanently.
    #[default]
    Never,
    /// Restart only on failure.
    OnFailure,
    /// Always restart: the task restarts after it finishes or fails.
    Always,
}

impl RestartPolicy {
    /// Returns `true` if the actor should start another attempt.
    pub fn should_restart(self, failed: bool) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => failed,
            RestartPolicy::Always => true,
        }
    }
}
