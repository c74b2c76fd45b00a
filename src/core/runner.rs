//! # Run a single attempt of a task.
//!
//! ```text
//! Success:       task.spawn() → Ok(())          → publish TaskStopped
//! Cancellation:  task.spawn() → Err(Canceled)   → publish TaskStopped
//! Failure:       task.spawn() → Err(Fail)       → publish TaskFailed
//! Panic:         task.spawn() → unwinds         → Err(Fail) → publish TaskFailed
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event.
//! - Each attempt runs under its own child token, cancelled when the attempt ends.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::TaskError,
    events::{Bus, Event, EventKind},
    tasks::Task,
};

/// Executes one attempt of `task`, publishing its terminal event to `bus`.
///
/// A panic inside the attempt is an abnormal termination and is reported as
/// `TaskError::Fail`, so `RestartPolicy::OnFailure` restarts it.
pub(crate) async fn run_once<T: Task + ?Sized>(
    task: &T,
    parent: &CancellationToken,
    attempt: u32,
    generation: Option<u64>,
    bus: &Bus,
) -> Result<(), TaskError> {
    let child = parent.child_token();
    let res = match AssertUnwindSafe(task.spawn(child.clone()))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(TaskError::Fail {
            error: format!("panicked: {}", panic_message(panic.as_ref())),
        }),
    };
    child.cancel();

    let ev = match &res {
        Ok(()) | Err(TaskError::Canceled) => Event::new(EventKind::TaskStopped),
        Err(e) => Event::new(EventKind::TaskFailed).with_reason(e.to_string()),
    };
    bus.publish(
        ev.with_task(task.name())
            .with_attempt(attempt)
            .with_generation_opt(generation),
    );
    res
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let task = TaskFn::new("boom.0", |_ctx: CancellationToken| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<(), TaskError>(())
        });

        let res = run_once(&task, &CancellationToken::new(), 1, None, &bus).await;
        match res {
            Err(TaskError::Fail { error }) => assert!(error.contains("kaboom")),
            other => panic!("unexpected {other:?}"),
        }
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::TaskFailed);
        assert_eq!(ev.task.as_deref(), Some("boom.0"));
    }

    #[tokio::test]
    async fn test_canceled_counts_as_stopped() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let task = TaskFn::new("idle.0", |_ctx: CancellationToken| async move {
            Err(TaskError::Canceled)
        });

        let res = run_once(&task, &CancellationToken::new(), 1, Some(4), &bus).await;
        assert!(matches!(res, Err(TaskError::Canceled)));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::TaskStopped);
        assert_eq!(ev.generation, Some(4));
    }
}
