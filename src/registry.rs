//! # Service registry: running instance name → allocated port.
//!
//! The registry is the only state shared for reads and writes across instance
//! runners, readiness waiters and the discovery endpoint. Every operation
//! serializes through one mutex; the map itself is never handed out.
//!
//! ```text
//! instance web.0 ──register("web.0", 5000)──┐
//! instance web.1 ──register("web.1", 5001)──┼──► Mutex<BTreeMap<name, port>>
//! readiness "web" ──resolve("web")──────────┘        └─► "localhost:5000"
//! ```
//!
//! ## Rules
//! - Entries are ephemeral: a [`Registration`] guard removes its entry exactly
//!   once, on every exit path of the owning instance.
//! - Prefix lookups return the lexicographically first matching name.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded map of running instances to their ports.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: Mutex<BTreeMap<String, u16>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name → port`, replacing any previous entry for `name`.
    pub fn register(&self, name: &str, port: u16) {
        self.lock().insert(name.to_string(), port);
    }

    /// Removes `name`; unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Registers `name → port` and returns a guard that unregisters on drop.
    #[must_use = "dropping the guard unregisters the instance immediately"]
    pub fn hold(&self, name: &str, port: u16) -> Registration<'_> {
        self.register(name, port);
        Registration {
            registry: self,
            name: name.to_string(),
        }
    }

    /// Port of the first registered instance whose name starts with `prefix`.
    pub fn lookup(&self, prefix: &str) -> Option<u16> {
        self.lock()
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(_, port)| *port)
            .next()
    }

    /// Rewrites `target` to `localhost:<port>` when it prefixes a registered
    /// instance name; otherwise returns it unchanged (assumed `host:port`).
    pub fn resolve(&self, target: &str) -> String {
        match self.lookup(target) {
            Some(port) => format!("localhost:{port}"),
            None => target.to_string(),
        }
    }

    /// Point-in-time copy of every entry, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, u16> {
        self.lock().clone()
    }

    /// True when `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, u16>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps one instance registered for as long as it lives.
#[derive(Debug)]
pub struct Registration<'a> {
    registry: &'a ServiceRegistry,
    name: String,
}

impl Registration<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}
