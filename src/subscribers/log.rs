//! # LogWriter: renders runner events through `tracing`
//!
//! ```text
//! INFO  generation=2 "generation started"
//! ERROR generation=2 "error during build, halted"
//! WARN  instance="web.0" attempt=1 reason="exit status: 1" "instance failed"
//! INFO  instance="web.0" delay_ms=500 "restart scheduled"
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let instance = e.task.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::GenerationStarted => {
                tracing::info!(generation = e.generation, "generation started");
            }
            EventKind::BuildFailed => {
                tracing::error!(generation = e.generation, "error during build, halted");
            }
            EventKind::ChangeDetected => {
                tracing::info!(generation = e.generation, "change detected, restarting");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(generation = e.generation, "shutting down");
            }
            EventKind::TaskStarting => {
                tracing::debug!(instance, attempt = e.attempt, "instance starting");
            }
            EventKind::TaskStopped => {
                tracing::debug!(instance, attempt = e.attempt, "instance stopped");
            }
            EventKind::TaskFailed => {
                tracing::warn!(instance, attempt = e.attempt, reason, "instance failed");
            }
            EventKind::BackoffScheduled => {
                tracing::info!(instance, delay_ms = e.delay_ms, reason, "restart scheduled");
            }
            EventKind::ActorExhausted => {
                tracing::debug!(instance, attempt = e.attempt, "restart policy exhausted");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
