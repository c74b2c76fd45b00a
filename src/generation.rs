//! # Generation controller: build phase, then supervised run phase.
//!
//! ```text
//! run_generation(ctx)
//!   ├─► build phase: every build-prefixed type concurrently, joined
//!   │     └─ any failure ─► BuildFailed, return (run phase skipped)
//!   └─► run phase: plan() ─► one actor per instance
//!         root Scope (ctx.child) ──┬─► ungrouped instances
//!                                  └─► group Scope (lazy, cached) ─► grouped instances
//!         wait for ctx ─► root.shutdown()
//! ```
//!
//! Ports come from [`plan`]: `base_port + k`, where `k` counts non-build
//! instances in declaration order, so assignment is identical in every
//! generation of the same configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{instance_name, Config},
    core::Scope,
    error::TaskError,
    events::{Event, EventKind},
    instance::{run_instance, Shared},
    tasks::{TaskFn, TaskRef},
};

/// One non-build instance slot of a generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Assignment {
    /// Index into `Config::processes`.
    pub process: usize,
    /// Instance index within the process type.
    pub index: usize,
    pub port: u16,
}

/// Assigns ports to every non-build instance, in declaration order.
///
/// Instances whose port would overflow `u16` are left out and logged.
pub(crate) fn plan(config: &Config) -> Vec<Assignment> {
    let mut out = Vec::new();
    let mut k: usize = 0;
    for (process, proc) in config.processes.iter().enumerate() {
        if proc.is_build() {
            continue;
        }
        for index in 0..config.instance_count(&proc.name) {
            let port = u16::try_from(k)
                .ok()
                .and_then(|k| config.base_port.checked_add(k));
            k += 1;
            match port {
                Some(port) => out.push(Assignment { process, index, port }),
                None => tracing::error!(
                    instance = %instance_name(&proc.name, index),
                    base_port = config.base_port,
                    "port range exhausted, instance not started"
                ),
            }
        }
    }
    out
}

/// Runs one generation until `ctx` is cancelled or its build phase fails.
pub(crate) async fn run_generation(ctx: CancellationToken, shared: Arc<Shared>, generation: u64) {
    shared
        .bus
        .publish(Event::new(EventKind::GenerationStarted).with_generation(generation));

    if !run_builds(&ctx, &shared).await {
        if !ctx.is_cancelled() {
            shared
                .bus
                .publish(Event::new(EventKind::BuildFailed).with_generation(generation));
        }
        return;
    }
    if ctx.is_cancelled() {
        return;
    }

    run_services(&ctx, &shared, generation).await;
}

/// Runs every build step concurrently; true only if all of them succeeded.
async fn run_builds(ctx: &CancellationToken, shared: &Arc<Shared>) -> bool {
    let mut set = JoinSet::new();
    for (process, proc) in shared.config.processes.iter().enumerate() {
        if !proc.is_build() {
            continue;
        }
        let (ctx, shared) = (ctx.clone(), shared.clone());
        set.spawn(async move {
            let proc = &shared.config.processes[process];
            run_instance(&ctx, &shared, proc, 0, None).await
        });
    }

    let mut ok = true;
    while let Some(res) = set.join_next().await {
        match res {
            Ok(done) => ok &= done,
            Err(e) => {
                tracing::error!(error = %e, "build step aborted");
                ok = false;
            }
        }
    }
    ok
}

async fn run_services(ctx: &CancellationToken, shared: &Arc<Shared>, generation: u64) {
    let root = Scope::new(
        ctx.child_token(),
        shared.bus.clone(),
        shared.config.restart_backoff,
    )
    .with_generation(generation);
    let mut groups: HashMap<&str, Scope> = HashMap::new();

    for slot in plan(&shared.config) {
        let proc = &shared.config.processes[slot.process];
        let scope = match proc.group() {
            Some(group) => &*groups.entry(group).or_insert_with(|| root.child()),
            None => &root,
        };
        scope.add(instance_task(shared.clone(), slot), proc.restart.policy());
    }

    ctx.cancelled().await;
    root.shutdown().await;
}

/// Wraps one instance slot as a supervised task.
///
/// Any unsuccessful run is reported as a failure so `OnFailure` restarts it;
/// `Never` and `Always` do not distinguish outcomes.
fn instance_task(shared: Arc<Shared>, slot: Assignment) -> TaskRef {
    let name = instance_name(&shared.config.processes[slot.process].name, slot.index);
    TaskFn::arc(name, move |ctx: CancellationToken| {
        let shared = shared.clone();
        async move {
            let proc = &shared.config.processes[slot.process];
            if run_instance(&ctx, &shared, proc, slot.index, Some(slot.port)).await {
                Ok(())
            } else if ctx.is_cancelled() {
                Err(TaskError::Canceled)
            } else {
                Err(TaskError::Fail {
                    error: format!("{} failed", instance_name(&proc.name, slot.index)),
                })
            }
        }
    })
}
