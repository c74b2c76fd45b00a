//! # Filesystem change source.
//!
//! The runner only consumes change notifications; it never looks at the diff.
//! [`Watch`] is the seam: tests and embedders inject their own source, while
//! [`PollWatcher`] is the default.
//!
//! ```text
//! PollWatcher task
//!   loop {
//!     sleep(interval) │ ctx cancelled ─► exit
//!     scan work_dir (blocking pool)
//!       ├─ skip dirs named in skip_dirs
//!       └─ fingerprint (path, mtime, size) of files matching observables
//!     fingerprint changed ─► try_send(())   (a full channel coalesces)
//!   }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use glob::Pattern;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::RuntimeError;

/// Source of change notifications.
pub trait Watch: Send + Sync {
    /// Starts watching until `ctx` is cancelled.
    ///
    /// Failing here is fatal for [`Runner::start`](crate::Runner::start).
    fn watch(&self, ctx: CancellationToken) -> Result<mpsc::Receiver<()>, RuntimeError>;
}

/// Polling implementation of [`Watch`].
#[derive(Clone, Debug)]
pub struct PollWatcher {
    root: PathBuf,
    observables: Vec<String>,
    skip_dirs: Vec<String>,
    interval: Duration,
}

impl PollWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        observables: Vec<String>,
        skip_dirs: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            observables,
            skip_dirs,
            interval,
        }
    }

    /// Watcher over `work_dir` with the configured patterns and interval.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.work_dir.clone(),
            config.observables.clone(),
            config.skip_dirs.clone(),
            config.watch_interval,
        )
    }

    fn scanner(&self) -> Result<Scanner, RuntimeError> {
        let patterns = self
            .observables
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| RuntimeError::InvalidPattern {
                    pattern: p.clone(),
                    error: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let root = if self.root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.root.clone()
        };
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RuntimeError::WorkDir {
                    path: root,
                    error: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
                })
            }
            Err(error) => return Err(RuntimeError::WorkDir { path: root, error }),
        }

        Ok(Scanner {
            root,
            patterns,
            skip_dirs: self.skip_dirs.clone(),
        })
    }
}

impl Watch for PollWatcher {
    fn watch(&self, ctx: CancellationToken) -> Result<mpsc::Receiver<()>, RuntimeError> {
        let scanner = Arc::new(self.scanner()?);
        let interval = self.interval;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut last = scanner.snapshot().await.unwrap_or_default();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(next) = scanner.snapshot().await else {
                    continue;
                };
                if next == last {
                    continue;
                }
                last = next;
                tracing::debug!(root = %scanner.root.display(), "observed files changed");
                match tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                }
            }
        });
        Ok(rx)
    }
}

type Fingerprint = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

#[derive(Debug)]
struct Scanner {
    root: PathBuf,
    patterns: Vec<Pattern>,
    skip_dirs: Vec<String>,
}

impl Scanner {
    async fn snapshot(self: &Arc<Self>) -> Option<Fingerprint> {
        let me = Arc::clone(self);
        match tokio::task::spawn_blocking(move || me.scan()).await {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::warn!(error = %e, "scanning work dir failed");
                None
            }
        }
    }

    fn scan(&self) -> Fingerprint {
        let mut out = Fingerprint::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable dir");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let Ok(kind) = entry.file_type() else { continue };
                let path = entry.path();
                if kind.is_dir() {
                    if !self.is_skipped(&entry.file_name().to_string_lossy()) {
                        stack.push(path);
                    }
                } else if self.is_observed(&path) {
                    if let Ok(meta) = entry.metadata() {
                        out.insert(path, (meta.modified().ok(), meta.len()));
                    }
                }
            }
        }
        out
    }

    fn is_skipped(&self, dir_name: &str) -> bool {
        self.skip_dirs.iter().any(|d| d == dir_name)
    }

    fn is_observed(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy());
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.patterns.iter().any(|p| {
            name.as_deref().is_some_and(|n| p.matches(n)) || p.matches_path(rel)
        })
    }
}
