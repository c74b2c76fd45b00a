//! # Orchestrator configuration.
//!
//! [`Config`] is the declarative description of an application: the ordered
//! list of [`ProcessType`]s plus orchestrator-level settings. It is read-only
//! once handed to the [`Runner`](crate::Runner).
//!
//! Declarative fields deserialize with `serde` using the historical keys
//! (`procs`, `workdir`, `waitbefore`, ...). Runtime tunables (poll intervals,
//! line limit, restart backoff) are not deserialized and keep their defaults
//! unless set in code.
//!
//! ## Sentinel values
//! - `service_discovery_addr = ""` → service discovery disabled
//! - `base_environment = []` → children inherit the orchestrator's environment
//! - formation entry absent → one instance

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::policies::{BackoffPolicy, RestartPolicy};

/// Name prefix that marks a process type as a build step.
pub const BUILD_PREFIX: &str = "build";

/// Whether a process type restarts after its command sequence ends.
///
/// Parsing is lenient: anything unrecognized means [`RestartMode::Never`].
///
/// ```
/// use procvisor::RestartMode;
///
/// assert_eq!("always".parse::<RestartMode>().unwrap(), RestartMode::Always);
/// assert_eq!("on-failure".parse::<RestartMode>().unwrap(), RestartMode::OnFailure);
/// assert_eq!("sometimes".parse::<RestartMode>().unwrap(), RestartMode::Never);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RestartMode {
    #[default]
    Never,
    Always,
    OnFailure,
}

impl RestartMode {
    /// Maps the declarative mode onto a supervision option.
    pub fn policy(self) -> RestartPolicy {
        match self {
            RestartMode::Never => RestartPolicy::Never,
            RestartMode::Always => RestartPolicy::Always,
            RestartMode::OnFailure => RestartPolicy::OnFailure,
        }
    }
}

impl FromStr for RestartMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "always" | "true" | "1" => RestartMode::Always,
            "fail" | "failure" | "onfail" | "onfailure" | "on-failure" | "on_failure" => {
                RestartMode::OnFailure
            }
            _ => RestartMode::Never,
        })
    }
}

impl From<String> for RestartMode {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(mode) => mode,
            Err(never) => match never {},
        }
    }
}

/// A piece of software to start.
///
/// All commands run in declaration order, each in its own `sh -c`; no shell
/// state carries over. The last command is the one that "activates" the
/// process type. `wait_before` gates the first command and `wait_for` gates the
/// last one on TCP readiness of a target (`host:port` or an instance-name prefix).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessType {
    /// Name of the process type; a `build` prefix marks a build step.
    pub name: String,

    /// Commands run in order, each in a separate shell.
    #[serde(default)]
    pub cmd: Vec<String>,

    /// Target that must accept TCP connections before the first command.
    #[serde(default, rename = "waitbefore")]
    pub wait_before: Option<String>,

    /// Target that must accept TCP connections before the last command.
    #[serde(default, rename = "waitfor")]
    pub wait_for: Option<String>,

    /// Restart mode; ignored for build steps.
    #[serde(default)]
    pub restart: RestartMode,

    /// Supervision group shared with other process types carrying the same label.
    #[serde(default)]
    pub group: Option<String>,
}

impl ProcessType {
    /// Creates a process type running `cmd`.
    pub fn new<I, S>(name: impl Into<String>, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_restart(mut self, restart: RestartMode) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_wait_before(mut self, target: impl Into<String>) -> Self {
        self.wait_before = Some(target.into());
        self
    }

    pub fn with_wait_for(mut self, target: impl Into<String>) -> Self {
        self.wait_for = Some(target.into());
        self
    }

    /// Build steps run before everything else and never get a port.
    #[inline]
    pub fn is_build(&self) -> bool {
        self.name.starts_with(BUILD_PREFIX)
    }

    /// Supervision group label, treating an empty label as none.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }
}

/// Orchestrator configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Directory every command runs in and the watcher scans.
    #[serde(default, rename = "workdir")]
    pub work_dir: PathBuf,

    /// Glob patterns of files whose changes restart the generation.
    #[serde(default)]
    pub observables: Vec<String>,

    /// Directory names skipped while scanning for changes.
    #[serde(default, rename = "skipdir")]
    pub skip_dirs: Vec<String>,

    /// Process types in declaration order.
    #[serde(default, rename = "procs")]
    pub processes: Vec<ProcessType>,

    /// First port handed out; each service instance gets the next one.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Instance count per process type name; does not apply to build steps.
    #[serde(default)]
    pub formation: HashMap<String, usize>,

    /// `KEY=value` entries replacing the inherited environment when non-empty.
    #[serde(default)]
    pub base_environment: Vec<String>,

    /// Bind address of the service discovery endpoint; empty disables it.
    #[serde(default)]
    pub service_discovery_addr: String,

    /// Pause between readiness dial attempts.
    #[serde(skip, default = "default_readiness_interval")]
    pub readiness_interval: Duration,

    /// Pause between two scans of the working directory.
    #[serde(skip, default = "default_watch_interval")]
    pub watch_interval: Duration,

    /// Longest child output line printed in one piece.
    #[serde(skip, default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Delay policy between supervised restarts.
    #[serde(skip)]
    pub restart_backoff: BackoffPolicy,
}

fn default_base_port() -> u16 {
    5000
}

fn default_readiness_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_watch_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_line_length() -> usize {
    2 * 1024 * 1024
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `base_port = 5000`
    /// - `readiness_interval = 250ms`
    /// - `watch_interval = 1s`
    /// - `max_line_length = 2 MiB`
    /// - `restart_backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            work_dir: PathBuf::new(),
            observables: Vec::new(),
            skip_dirs: Vec::new(),
            processes: Vec::new(),
            base_port: default_base_port(),
            formation: HashMap::new(),
            base_environment: Vec::new(),
            service_discovery_addr: String::new(),
            readiness_interval: default_readiness_interval(),
            watch_interval: default_watch_interval(),
            max_line_length: default_max_line_length(),
            restart_backoff: BackoffPolicy::default(),
        }
    }
}

impl Config {
    /// Number of instances to start for a process type (formation, default 1).
    #[inline]
    pub fn instance_count(&self, name: &str) -> usize {
        self.formation.get(name).copied().unwrap_or(1)
    }

    /// True when a service discovery bind address is configured.
    #[inline]
    pub fn discovery_enabled(&self) -> bool {
        !self.service_discovery_addr.is_empty()
    }

    /// Returns the discovery address when service discovery is enabled.
    #[inline]
    pub fn discovery_addr(&self) -> Option<&str> {
        if self.service_discovery_addr.is_empty() {
            None
        } else {
            Some(&self.service_discovery_addr)
        }
    }

    /// Width every console prefix is padded to: the longest rendered instance
    /// name plus one.
    pub fn name_width(&self) -> usize {
        self.processes
            .iter()
            .map(|proc| {
                let last = if proc.is_build() {
                    0
                } else {
                    self.instance_count(&proc.name).saturating_sub(1)
                };
                instance_name(&proc.name, last).len()
            })
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Renders the name of one instance: `<process>.<index>`.
pub fn instance_name(process: &str, index: usize) -> String {
    format!("{process}.{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_mode_parsing_is_lenient() {
        for s in ["yes", "Always", "TRUE", "1"] {
            assert_eq!(s.parse::<RestartMode>().unwrap(), RestartMode::Always, "{s}");
        }
        for s in ["fail", "failure", "onfail", "OnFailure", "on-failure", "on_failure"] {
            assert_eq!(s.parse::<RestartMode>().unwrap(), RestartMode::OnFailure, "{s}");
        }
        for s in ["", "no", "never", "maybe"] {
            assert_eq!(s.parse::<RestartMode>().unwrap(), RestartMode::Never, "{s}");
        }
    }

    #[test]
    fn test_restart_mode_maps_to_policy() {
        assert_eq!(RestartMode::Always.policy(), RestartPolicy::Always);
        assert_eq!(RestartMode::OnFailure.policy(), RestartPolicy::OnFailure);
        assert_eq!(RestartMode::Never.policy(), RestartPolicy::Never);
    }

    #[test]
    fn test_build_prefix() {
        assert!(ProcessType::new("build", ["make"]).is_build());
        assert!(ProcessType::new("build-assets", ["npm run build"]).is_build());
        assert!(!ProcessType::new("web", ["./serve"]).is_build());
        assert!(!ProcessType::new("rebuild", ["make"]).is_build());
    }

    #[test]
    fn test_name_width_uses_last_formation_index() {
        let mut cfg = Config::default();
        cfg.processes = vec![
            ProcessType::new("build", ["make"]),
            ProcessType::new("web", ["./serve"]),
            ProcessType::new("worker", ["./work"]),
        ];
        cfg.formation.insert("web".into(), 12);
        // "worker.0" (8) vs "web.11" (6)
        assert_eq!(cfg.name_width(), 9);

        cfg.formation.insert("worker".into(), 3);
        cfg.formation.insert("web".into(), 1000);
        // "web.999" (7) vs "worker.2" (8)
        assert_eq!(cfg.name_width(), 9);
    }

    #[test]
    fn test_formation_ignored_for_build_width() {
        let mut cfg = Config::default();
        cfg.processes = vec![ProcessType::new("build", ["make"])];
        cfg.formation.insert("build".into(), 100);
        assert_eq!(cfg.name_width(), "build.0".len() + 1);
    }

    #[test]
    fn test_deserialize_with_historical_keys() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "workdir": "/srv/app",
                "observables": ["*.go"],
                "skipdir": [".git"],
                "base_port": 6000,
                "formation": {"web": 2},
                "procs": [
                    {"name": "build", "cmd": ["go build"]},
                    {"name": "web", "cmd": ["./app"], "restart": "on-failure",
                     "waitbefore": "db", "group": "front"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.work_dir, PathBuf::from("/srv/app"));
        assert_eq!(cfg.base_port, 6000);
        assert_eq!(cfg.instance_count("web"), 2);
        assert_eq!(cfg.instance_count("missing"), 1);
        assert_eq!(cfg.processes[1].restart, RestartMode::OnFailure);
        assert_eq!(cfg.processes[1].wait_before.as_deref(), Some("db"));
        assert_eq!(cfg.processes[1].group(), Some("front"));
        assert_eq!(cfg.readiness_interval, Duration::from_millis(250));
        assert!(!cfg.discovery_enabled());
        assert!(cfg.discovery_addr().is_none());
    }
}
