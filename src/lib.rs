//! # procvisor
//!
//! **Procvisor** is a local multi-process orchestrator.
//!
//! Given a declarative list of process types (build steps plus long-running
//! services) it runs the builds, fans services out into instances with their
//! own ports, waits for declared TCP dependencies, multiplexes child output
//! onto one console and restarts the whole generation when watched files change.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌───────────────────────────────┐
//!   Config ─────────────►│ Runner::start(ctx)            │◄──── Watch (change notifications)
//!                        │  - name width (fixed)         │
//!                        │  - Bus ─► SubscriberSet       │────► discovery HTTP (optional)
//!                        └──────────────┬────────────────┘
//!                                       ▼  one at a time
//!                        ┌───────────────────────────────┐
//!                        │ generation (ctx.child)        │
//!                        │  1. builds, joined (AND)      │
//!                        │  2. plan(): ports in order    │
//!                        └──────┬─────────────────┬──────┘
//!                               ▼                 ▼
//!                     root Scope           group Scope (lazy)
//!                     ├─► TaskActor        ├─► TaskActor
//!                     └─► TaskActor        └─► TaskActor
//!                               │  RestartPolicy + BackoffPolicy
//!                               ▼
//!                     instance: registry entry, readiness gates,
//!                               sh -c <cmd>, prefixed output
//! ```
//!
//! ### Instance lifecycle
//! ```text
//! TaskActor::run()
//! loop {
//!   ├─► publish TaskStarting
//!   ├─► run_once ─► run_instance(ctx, proc, index, port)
//!   │       ├─ every command exited 0 ─► Ok        ─► TaskStopped
//!   │       ├─ a command failed       ─► Err(Fail) ─► TaskFailed
//!   │       └─ ctx cancelled          ─► Err(Canceled)
//!   ├─► Never ─► ActorExhausted │ OnFailure after Ok ─► ActorExhausted
//!   └─► otherwise BackoffScheduled, sleep (cancellable), continue
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                        |
//! |-------------------|--------------------------------------------------------------|-------------------------------------------|
//! | **Configuration** | Process types, formation, ports, environment, watch patterns | [`Config`], [`ProcessType`], [`RestartMode`] |
//! | **Orchestration** | Generations, builds, supervised instances                    | [`Runner`], [`RunnerBuilder`]             |
//! | **Supervision**   | Cancellation scopes with restart and backoff policies        | [`Scope`], [`RestartPolicy`], [`BackoffPolicy`] |
//! | **Discovery**     | Instance name to port map, prefix resolution, HTTP endpoint  | [`ServiceRegistry`]                       |
//! | **Output**        | Prefixed, line-synchronized console sink                     | [`Console`]                               |
//! | **Watching**      | Pluggable change source with a polling default               | [`Watch`], [`PollWatcher`]                |
//! | **Subscriber API**| Hook into generation and instance events                     | [`Subscribe`], [`LogWriter`]              |
//! | **Errors**        | Typed errors for the runner and for supervised attempts      | [`RuntimeError`], [`TaskError`]           |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use procvisor::{BackoffPolicy, Bus, RestartPolicy, Scope, TaskError, TaskFn, TaskRef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let root = Scope::new(CancellationToken::new(), Bus::new(64), BackoffPolicy::default());
//!
//!     let hello: TaskRef = TaskFn::arc("hello.0", |_ctx: CancellationToken| async move {
//!         println!("hello");
//!         Ok::<(), TaskError>(())
//!     });
//!     root.add(hello, RestartPolicy::Never);
//!
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//!     root.shutdown().await;
//! }
//! ```
mod config;
mod core;
mod discovery;
mod error;
mod events;
mod generation;
mod instance;
mod output;
mod policies;
mod readiness;
mod registry;
mod runner;
mod subscribers;
mod tasks;
mod watcher;

// ---- Public re-exports ----

pub use config::{instance_name, Config, ProcessType, RestartMode, BUILD_PREFIX};
pub use core::Scope;
pub use discovery::router as discovery_router;
pub use error::{RuntimeError, TaskError};
pub use events::{BackoffSource, Bus, Event, EventKind};
pub use output::{pad_name, Console, Prefixed};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use registry::{Registration, ServiceRegistry};
pub use runner::{Runner, RunnerBuilder};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{BoxTaskFuture, Task, TaskFn, TaskRef};
pub use watcher::{PollWatcher, Watch};
