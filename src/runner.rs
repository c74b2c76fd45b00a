//! # Runner: the top-level loop.
//!
//! [`Runner::start`] owns the outer lifecycle:
//!
//! ```text
//! start(ctx)
//!   ├─► width = config.name_width()                 (fixed for this call)
//!   ├─► watcher.watch(ctx)?                          (the only fatal error)
//!   ├─► bus listener ─► SubscriberSet (LogWriter + custom)
//!   ├─► discovery server (if configured)
//!   └─► loop {
//!         spawn run_generation(ctx.child)
//!         select {
//!           ctx cancelled  ─► ShutdownRequested, cancel generation, wait teardown, return Ok
//!           change         ─► ChangeDetected, cancel generation, wait teardown, coalesce, loop
//!         }
//!       }
//! ```
//!
//! ## Example
//! ```no_run
//! use procvisor::{Config, ProcessType, RestartMode, Runner};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.work_dir = ".".into();
//!     config.observables = vec!["*.go".into()];
//!     config.processes = vec![
//!         ProcessType::new("build", ["go build -o app ."]),
//!         ProcessType::new("web", ["./app"]).with_restart(RestartMode::Always),
//!     ];
//!
//!     let ctx = CancellationToken::new();
//!     let stop = ctx.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.cancel();
//!     });
//!
//!     Runner::new(config).start(ctx).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    discovery,
    error::RuntimeError,
    events::{Bus, Event, EventKind},
    generation::run_generation,
    instance::Shared,
    output::Console,
    registry::ServiceRegistry,
    subscribers::{LogWriter, Subscribe, SubscriberSet},
    watcher::{PollWatcher, Watch},
};

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    config: Config,
    watcher: Option<Arc<dyn Watch>>,
    console: Option<Console>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus_capacity: usize,
}

impl RunnerBuilder {
    /// Replaces the default [`PollWatcher`].
    pub fn with_watcher(mut self, watcher: Arc<dyn Watch>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Sends child output and status banners to `console` instead of stdout.
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    /// Adds event subscribers next to the built-in [`LogWriter`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn build(self) -> Runner {
        let watcher = self
            .watcher
            .unwrap_or_else(|| Arc::new(PollWatcher::from_config(&self.config)));
        Runner {
            config: Arc::new(self.config),
            registry: Arc::new(ServiceRegistry::new()),
            watcher,
            console: self.console.unwrap_or_default(),
            subscribers: self.subscribers,
            bus_capacity: self.bus_capacity,
        }
    }
}

/// Local multi-process orchestrator.
pub struct Runner {
    config: Arc<Config>,
    registry: Arc<ServiceRegistry>,
    watcher: Arc<dyn Watch>,
    console: Console,
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus_capacity: usize,
}

impl Runner {
    /// Runner with the default watcher, stdout console and no extra subscribers.
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> RunnerBuilder {
        RunnerBuilder {
            config,
            watcher: None,
            console: None,
            subscribers: Vec::new(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live map of running instances to ports.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Runs generations until `ctx` is cancelled.
    ///
    /// Returns an error only if the watcher cannot start. When this returns,
    /// every child has been killed, every registry entry removed and every
    /// subscriber has processed the final events.
    pub async fn start(&self, ctx: CancellationToken) -> Result<(), RuntimeError> {
        let mut changes = self.watcher.watch(ctx.child_token())?;

        let bus = Bus::new(self.bus_capacity);
        let stop_listener = CancellationToken::new();
        let listener = self.spawn_listener(bus.subscribe(), stop_listener.clone());

        let discovery = self.config.discovery_addr().map(|addr| {
            tokio::spawn(discovery::serve(
                addr.to_string(),
                self.registry.clone(),
                ctx.clone(),
            ))
        });

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            registry: self.registry.clone(),
            console: self.console.clone(),
            width: self.config.name_width(),
            bus: bus.clone(),
        });

        let mut generation: u64 = 0;
        let mut watching = true;
        loop {
            generation += 1;
            let gen_ctx = ctx.child_token();
            let handle = tokio::spawn(run_generation(gen_ctx.clone(), shared.clone(), generation));

            let changed = loop {
                tokio::select! {
                    _ = ctx.cancelled() => break false,
                    change = changes.recv(), if watching => match change {
                        Some(()) => break true,
                        None => {
                            tracing::warn!("change notifications closed, restarts disabled");
                            watching = false;
                        }
                    },
                }
            };

            let kind = if changed {
                EventKind::ChangeDetected
            } else {
                EventKind::ShutdownRequested
            };
            bus.publish(Event::new(kind).with_generation(generation));

            gen_ctx.cancel();
            if let Err(e) = handle.await {
                tracing::error!(generation, error = %e, "generation aborted");
            }
            if !changed {
                break;
            }
            drain(&mut changes);
        }

        if let Some(handle) = discovery {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "service discovery aborted");
            }
        }

        stop_listener.cancel();
        match listener.await {
            Ok(set) => set.shutdown().await,
            Err(e) => tracing::error!(error = %e, "event listener aborted"),
        }
        Ok(())
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains.
    fn spawn_listener(
        &self,
        mut rx: broadcast::Receiver<Event>,
        stop: CancellationToken,
    ) -> JoinHandle<SubscriberSet> {
        let mut subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
        subs.extend(self.subscribers.iter().cloned());
        let set = SubscriberSet::new(subs);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set
        })
    }
}

/// Collapses notifications that piled up during teardown.
fn drain(changes: &mut mpsc::Receiver<()>) {
    while changes.try_recv().is_ok() {}
}
