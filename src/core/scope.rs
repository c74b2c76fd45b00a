//! # Scope: cancellation-bound supervision group.
//!
//! A [`Scope`] owns a [`CancellationToken`] and spawns one [`TaskActor`] per
//! added task. Scopes nest: [`Scope::child`] derives a scope whose token is a
//! child of the parent's, so cancelling the parent stops every nested group.
//!
//! ```text
//! generation token
//!   └─► root Scope ──────────────┬─► actor web.0   (token: root.child)
//!         │                      └─► actor web.1
//!         └─► child Scope "db" ──┬─► actor pg.0    (token: db.child)
//!                                └─► actor redis.0
//! ```
//!
//! All scopes of one tree share a single [`TaskTracker`], so
//! [`Scope::shutdown`] on the root waits for every actor in the tree.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{
    core::actor::{TaskActor, TaskActorParams},
    events::Bus,
    policies::{BackoffPolicy, RestartPolicy},
    tasks::TaskRef,
};

/// Supervision scope bound to a cancellation token.
#[derive(Clone, Debug)]
pub struct Scope {
    token: CancellationToken,
    tracker: TaskTracker,
    bus: Bus,
    backoff: BackoffPolicy,
    generation: Option<u64>,
}

impl Scope {
    /// Creates a root scope governed by `token`.
    pub fn new(token: CancellationToken, bus: Bus, backoff: BackoffPolicy) -> Self {
        Self {
            token,
            tracker: TaskTracker::new(),
            bus,
            backoff,
            generation: None,
        }
    }

    /// Tags every event published by this scope's actors with `generation`.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Derives a nested scope, cancelled together with `self`.
    pub fn child(&self) -> Scope {
        Self {
            token: self.token.child_token(),
            tracker: self.tracker.clone(),
            bus: self.bus.clone(),
            backoff: self.backoff,
            generation: self.generation,
        }
    }

    /// Starts supervising `task` under `restart`.
    pub fn add(&self, task: TaskRef, restart: RestartPolicy) {
        let actor = TaskActor::new(
            self.bus.clone(),
            task,
            TaskActorParams {
                restart,
                backoff: self.backoff,
                generation: self.generation,
            },
        );
        self.tracker.spawn(actor.run(self.token.child_token()));
    }

    /// The token governing this scope.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Waits until every actor of the tree has exited on its own.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancels this scope and waits for every actor of the tree to exit.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::TaskFn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn parked(name: &'static str, stopped: Arc<AtomicBool>) -> TaskRef {
        TaskFn::arc(name, move |ctx: CancellationToken| {
            let stopped = stopped.clone();
            async move {
                ctx.cancelled().await;
                stopped.store(true, Ordering::SeqCst);
                Err::<(), _>(TaskError::Canceled)
            }
        })
    }

    #[tokio::test]
    async fn test_root_shutdown_stops_nested_groups() {
        let root = Scope::new(
            CancellationToken::new(),
            Bus::new(64),
            BackoffPolicy::constant(Duration::from_millis(5)),
        );
        let group = root.child();

        let a = Arc::new(AtomicBool::new(false));
        let b = Arc::new(AtomicBool::new(false));
        root.add(parked("a.0", a.clone()), RestartPolicy::Always);
        group.add(parked("b.0", b.clone()), RestartPolicy::OnFailure);

        root.shutdown().await;
        assert!(a.load(Ordering::SeqCst));
        assert!(b.load(Ordering::SeqCst));
        assert!(group.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_group_cancel_leaves_siblings_running() {
        let root = Scope::new(
            CancellationToken::new(),
            Bus::new(64),
            BackoffPolicy::constant(Duration::from_millis(5)),
        );
        let group = root.child();

        let a = Arc::new(AtomicBool::new(false));
        let b = Arc::new(AtomicBool::new(false));
        root.add(parked("a.0", a.clone()), RestartPolicy::Never);
        group.add(parked("b.0", b.clone()), RestartPolicy::Never);

        group.token().cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.load(Ordering::SeqCst));
        assert!(!a.load(Ordering::SeqCst));

        root.shutdown().await;
        assert!(a.load(Ordering::SeqCst));
    }
}
