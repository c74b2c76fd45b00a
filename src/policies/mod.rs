//! Restart and backoff policies.
//!
//! This module groups the knobs that control **if/when** a supervised instance
//! is restarted and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RestartPolicy`] when to restart (never / on-failure / always)
//! - [`BackoffPolicy`] how restart delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized restarts
//!
//! ## Quick wiring
//! ```text
//! config::RestartMode ──► RestartPolicy ──► core::actor::TaskActor
//!                                              - restart to decide continue/exit
//!                                              - backoff.next(failures) to delay the next attempt
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
