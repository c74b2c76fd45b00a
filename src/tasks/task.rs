//! # Supervised unit of work.
//!
//! A [`Task`] has a stable name and produces a **fresh** future per attempt.
//! The future receives a [`CancellationToken`] and must stop promptly once it
//! is cancelled.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future of one attempt.
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// # Asynchronous, cancelable unit.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use procvisor::{BoxTaskFuture, Task};
///
/// struct Demo;
///
/// impl Task for Demo {
///     fn name(&self) -> &str { "demo.0" }
///
///     fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
///         Box::pin(async move {
///             ctx.cancelled().await;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Creates the future for one attempt.
    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture;
}
