//! Supervision core.
//!
//! The only public API from this module is [`Scope`], the supervision primitive
//! the generation controller hands instances to.
//!
//! Internal modules:
//! - [`runner`]: executes one attempt with cancellation, panic capture and event publishing;
//! - [`actor`]: runs a single task with restart policy and backoff;
//! - [`scope`]: nested cancellation scopes that spawn and track actors.

mod actor;
mod runner;
mod scope;

pub use scope::Scope;
