//! # Runtime events emitted by the runner, generations and instance actors.
//!
//! [`EventKind`] falls into two groups:
//! - **Generation events**: a generation starts, its build phase fails, a change
//!   notification tears it down, or the runner shuts down.
//! - **Instance events**: one supervised attempt starts, stops, fails, or a restart
//!   is scheduled; the actor gives up once its policy is exhausted.
//!
//! Every event carries a global monotonic `seq`.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("web.0")
//!     .with_generation(3)
//!     .with_reason("exit status: 1")
//!     .with_attempt(2);
//!
//! assert_eq!(ev.task.as_deref(), Some("web.0"));
//! assert_eq!(ev.generation, Some(3));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Generation events ===
    /// A new build-then-run cycle began.
    ///
    /// Sets: `generation`.
    GenerationStarted,

    /// A build step failed; the run phase of this generation is skipped.
    ///
    /// Sets: `generation`.
    BuildFailed,

    /// A filesystem change tore the current generation down.
    ///
    /// Sets: `generation` (the one being replaced).
    ChangeDetected,

    /// The parent context ended; the runner is shutting down.
    ///
    /// Sets: `generation` (the last one).
    ShutdownRequested,

    // === Instance events ===
    /// A supervised attempt is starting.
    ///
    /// Sets: `task`, `attempt` (1-based, per actor), `generation`.
    TaskStarting,

    /// An attempt ended cleanly or was cancelled.
    ///
    /// Sets: `task`, `attempt`, `generation`.
    TaskStopped,

    /// An attempt failed.
    ///
    /// Sets: `task`, `attempt`, `reason`, `generation`.
    TaskFailed,

    /// The next attempt was scheduled.
    ///
    /// Sets: `task`, `attempt` (previous), `delay_ms`, `backoff_source`,
    /// `reason` (failure-driven only), `generation`.
    BackoffScheduled,

    /// The restart policy forbids another attempt; the actor exits.
    ///
    /// Sets: `task`, `attempt` (last), `generation`.
    ActorExhausted,
}

/// Why the next attempt was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSource {
    Success,
    Failure,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Instance name, if applicable.
    pub task: Option<Arc<str>>,
    /// Generation the event belongs to.
    pub generation: Option<u64>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
    /// Source for backoff scheduling.
    pub backoff_source: Option<BackoffSource>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            generation: None,
            attempt: None,
            reason: None,
            delay_ms: None,
            backoff_source: None,
        }
    }

    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Marks that this backoff follows a clean exit.
    #[inline]
    pub fn with_backoff_success(mut self) -> Self {
        self.backoff_source = Some(BackoffSource::Success);
        self
    }

    /// Marks that this backoff follows a failure.
    #[inline]
    pub fn with_backoff_failure(mut self) -> Self {
        self.backoff_source = Some(BackoffSource::Failure);
        self
    }

    /// Attaches the generation when one is known.
    #[inline]
    pub(crate) fn with_generation_opt(self, generation: Option<u64>) -> Self {
        match generation {
            Some(g) => self.with_generation(g),
            None => self,
        }
    }
}
