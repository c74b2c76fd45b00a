//! # TaskActor: single-instance supervisor.
//!
//! Supervises one [`Task`] with:
//! - restarts per [`RestartPolicy`],
//! - delays per [`BackoffPolicy`],
//! - cooperative cancellation via [`CancellationToken`].
//!
//! ```text
//! loop {
//!   ├─► publish TaskStarting
//!   ├─► run_once()
//!   │     ├─ Ok        ─► Always: sleep(first), continue │ else ActorExhausted, exit
//!   │     ├─ Fail      ─► Never: ActorExhausted, exit    │ else sleep(backoff), continue
//!   │     └─ Canceled  ─► exit
//!   └─► runtime token cancelled at any point ─► exit
//! }
//! ```
//!
//! ## Rules
//! - Attempts run **sequentially** within one actor.
//! - The attempt counter never resets; the failure counter resets on a clean exit.

use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    core::runner::run_once,
    error::TaskError,
    events::{Bus, Event, EventKind},
    policies::{BackoffPolicy, RestartPolicy},
    tasks::TaskRef,
};

/// Parameters extracted by the [`Scope`](crate::Scope) when spawning an actor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TaskActorParams {
    pub restart: RestartPolicy,
    pub backoff: BackoffPolicy,
    pub generation: Option<u64>,
}

pub(crate) struct TaskActor {
    task: TaskRef,
    params: TaskActorParams,
    bus: Bus,
}

impl TaskActor {
    pub fn new(bus: Bus, task: TaskRef, params: TaskActorParams) -> Self {
        Self { task, params, bus }
    }

    /// Runs the actor until the policy forbids another attempt or `runtime_token` is cancelled.
    pub async fn run(self, runtime_token: CancellationToken) {
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            if runtime_token.is_cancelled() {
                break;
            }

            attempt = attempt.saturating_add(1);
            self.publish(Event::new(EventKind::TaskStarting).with_attempt(attempt));

            let res = run_once(
                self.task.as_ref(),
                &runtime_token,
                attempt,
                self.params.generation,
                &self.bus,
            )
            .await;

            if runtime_token.is_cancelled() {
                break;
            }

            let failure = match res {
                Ok(()) => None,
                Err(TaskError::Canceled) => break,
                Err(e) => Some(e.to_string()),
            };

            if !self.params.restart.should_restart(failure.is_some()) {
                self.publish(Event::new(EventKind::ActorExhausted).with_attempt(attempt));
                break;
            }

            let delay = self.next_delay(&failure, &mut failures);
            let ev = Event::new(EventKind::BackoffScheduled)
                .with_attempt(attempt)
                .with_delay(delay);
            self.publish(match failure {
                Some(reason) => ev.with_backoff_failure().with_reason(reason),
                None => ev.with_backoff_success(),
            });

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = runtime_token.cancelled() => break,
            }
        }
    }

    fn next_delay(&self, failure: &Option<String>, failures: &mut u32) -> Duration {
        match failure {
            Some(_) => {
                let delay = self.params.backoff.next(*failures);
                *failures = failures.saturating_add(1);
                delay
            }
            None => {
                *failures = 0;
                self.params.backoff.first
            }
        }
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(
            ev.with_task(self.task.name())
                .with_generation_opt(self.params.generation),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn params(restart: RestartPolicy) -> TaskActorParams {
        TaskActorParams {
            restart,
            backoff: BackoffPolicy::constant(Duration::from_millis(5)),
            generation: None,
        }
    }

    /// Task that fails on its first `fail_first` attempts, then succeeds.
    fn flaky(runs: Arc<AtomicU32>, fail_first: u32) -> TaskRef {
        TaskFn::arc("flaky.0", move |_ctx: CancellationToken| {
            let runs = runs.clone();
            async move {
                let n = runs.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    Err(TaskError::Fail {
                        error: format!("attempt {n}"),
                    })
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn test_never_runs_once_even_on_failure() {
        let runs = Arc::new(AtomicU32::new(0));
        let actor = TaskActor::new(Bus::new(64), flaky(runs.clone(), 5), params(RestartPolicy::Never));
        actor.run(CancellationToken::new()).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_failure_stops_after_first_success() {
        let runs = Arc::new(AtomicU32::new(0));
        let actor = TaskActor::new(
            Bus::new(64),
            flaky(runs.clone(), 2),
            params(RestartPolicy::OnFailure),
        );
        actor.run(CancellationToken::new()).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_restarts_after_success_until_cancelled() {
        let runs = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let actor = TaskActor::new(Bus::new(64), flaky(runs.clone(), 0), params(RestartPolicy::Always));
        let handle = tokio::spawn(actor.run(token.clone()));

        while runs.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        handle.await.unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_exhausted_event_names_instance() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let runs = Arc::new(AtomicU32::new(0));
        TaskActor::new(bus.clone(), flaky(runs, 0), params(RestartPolicy::OnFailure))
            .run(CancellationToken::new())
            .await;

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![EventKind::TaskStarting, EventKind::TaskStopped, EventKind::ActorExhausted]
        );
    }
}
