//! # Instance runner: one process type's command sequence in one slot.
//!
//! ```text
//! run_instance(ctx, proc, index, port)
//!   ├─► hold registry entry (name → port)      [services only, dropped on every exit]
//!   └─► for each cmd:
//!         ├─► status: running "<cmd>" / listening on <port>
//!         ├─► first cmd: wait_before │ last cmd: wait_for
//!         ├─► sh -c <cmd>  (own process group, env: base + PS/PORT/DISCOVERY)
//!         ├─► stdout/stderr ─► prefixed printers
//!         └─► wait for exit │ ctx cancelled ─► kill group, false
//! ```
//!
//! Returns `true` only if every command exited successfully.
//!
//! The two gates are independent: a single-command process type with both
//! `wait_before` and `wait_for` set waits for both targets, `wait_before` first.
//!
//! Output printers are not awaited. They drain each pipe to EOF on their own,
//! so a child's last lines are printed even after the attempt has ended.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{instance_name, Config, ProcessType},
    events::Bus,
    output::{Console, Prefixed},
    readiness::wait_for,
    registry::ServiceRegistry,
};

/// State shared by every instance of one `start` call.
#[derive(Clone, Debug)]
pub(crate) struct Shared {
    pub config: Arc<Config>,
    pub registry: Arc<ServiceRegistry>,
    pub console: Console,
    pub width: usize,
    pub bus: Bus,
}

enum Step {
    Done,
    Skipped,
    Failed,
}

/// Runs every command of `proc` for instance `index`.
///
/// `port` is `None` for build steps; otherwise the instance is registered under
/// its name for exactly as long as this call runs.
pub(crate) async fn run_instance(
    ctx: &CancellationToken,
    shared: &Shared,
    proc: &ProcessType,
    index: usize,
    port: Option<u16>,
) -> bool {
    let name = instance_name(&proc.name, index);
    let _registration = port.map(|port| shared.registry.hold(&name, port));
    let status = shared.console.prefixed(&name, shared.width);
    let interval = shared.config.readiness_interval;

    let last = proc.cmd.len().saturating_sub(1);
    for (idx, cmd) in proc.cmd.iter().enumerate() {
        status.line(&format!("running \"{cmd}\""));
        if let Some(port) = port {
            status.line(&format!("listening on {port}"));
        }

        let gates = [
            (idx == 0).then_some(proc.wait_before.as_deref()).flatten(),
            (idx == last).then_some(proc.wait_for.as_deref()).flatten(),
        ];
        for target in gates.into_iter().flatten().filter(|t| !t.is_empty()) {
            if !wait_for(ctx, &shared.registry, target, &status, interval).await {
                return false;
            }
        }

        match run_command(ctx, shared, &status, &name, cmd, port).await {
            Step::Done | Step::Skipped => {}
            Step::Failed => return false,
        }
    }
    true
}

async fn run_command(
    ctx: &CancellationToken,
    shared: &Shared,
    status: &Prefixed,
    name: &str,
    cmd: &str,
    port: Option<u16>,
) -> Step {
    if ctx.is_cancelled() {
        return Step::Failed;
    }

    let mut child = match command(&shared.config, name, cmd, port).spawn() {
        Ok(child) => child,
        Err(e) => {
            status.line(&format!("exec error {name}: ({cmd}) {e}"));
            tracing::error!(instance = name, cmd, error = %e, "spawn failed");
            return Step::Failed;
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        status.line(&format!("cannot open output pipes {name} {cmd}"));
        tracing::warn!(instance = name, cmd, "output pipes unavailable, command skipped");
        kill_group(&mut child).await;
        return Step::Skipped;
    };
    let max_line = shared.config.max_line_length;
    status.spawn_printer(stderr, max_line, ctx.clone());
    status.spawn_printer(stdout, max_line, ctx.clone());

    let exit = tokio::select! {
        res = child.wait() => res,
        _ = ctx.cancelled() => {
            kill_group(&mut child).await;
            return Step::Failed;
        }
    };

    match exit {
        Ok(st) if st.success() => Step::Done,
        Ok(st) => {
            report_failure(status, name, cmd, &describe(st));
            Step::Failed
        }
        Err(e) => {
            report_failure(status, name, cmd, &e.to_string());
            Step::Failed
        }
    }
}

fn report_failure(status: &Prefixed, name: &str, cmd: &str, reason: &str) {
    status.line(&format!("exec error {name}: ({cmd}) {reason}"));
    tracing::error!(instance = name, cmd, reason, "command failed");
}

fn describe(st: ExitStatus) -> String {
    match st.code() {
        Some(code) => format!("exit status {code}"),
        None => st.to_string(),
    }
}

/// Builds `sh -c <cmd>` with the instance environment.
fn command(config: &Config, name: &str, cmd: &str, port: Option<u16>) -> Command {
    let mut c = Command::new("sh");
    c.arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !config.work_dir.as_os_str().is_empty() {
        c.current_dir(&config.work_dir);
    }

    if !config.base_environment.is_empty() {
        c.env_clear();
        for entry in &config.base_environment {
            match entry.split_once('=') {
                Some((k, v)) if !k.is_empty() => {
                    c.env(k, v);
                }
                _ => tracing::warn!(
                    instance = name,
                    entry = entry.as_str(),
                    "ignoring malformed environment entry"
                ),
            }
        }
    }
    c.env("PS", name);
    if let Some(port) = port {
        c.env("PORT", port.to_string());
    }
    if let Some(addr) = config.discovery_addr() {
        c.env("DISCOVERY", addr);
    }

    #[cfg(unix)]
    c.process_group(0);
    c
}

/// Kills the child's whole process group and reaps it.
async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid);
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "child already gone");
    }
    if let Err(e) = child.wait().await {
        tracing::debug!(error = %e, "reaping child failed");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else { return };
    // SAFETY: plain syscall; a negative pid addresses the group created by `process_group(0)`.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "killing process group failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        async fn wait_for_line(&self, needle: &str) -> bool {
            for _ in 0..200 {
                if self.text().lines().any(|l| l.ends_with(needle)) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            false
        }
    }

    fn shared(config: Config, cap: &Capture) -> Shared {
        let width = config.name_width();
        Shared {
            config: Arc::new(config),
            registry: Arc::new(ServiceRegistry::new()),
            console: Console::from_writer(cap.clone()),
            width,
            bus: Bus::new(16),
        }
    }

    #[tokio::test]
    async fn test_env_carries_name_and_port() {
        let cap = Capture::default();
        let proc = ProcessType::new("web", ["echo \"$PS $PORT\""]);
        let mut cfg = Config::default();
        cfg.processes = vec![proc.clone()];
        let shared = shared(cfg, &cap);

        assert!(run_instance(&CancellationToken::new(), &shared, &proc, 0, Some(5001)).await);
        assert!(cap.wait_for_line(": web.0 5001").await, "{}", cap.text());
        assert!(cap.text().contains("running \"echo \"$PS $PORT\"\""));
        assert!(cap.text().contains("listening on 5001"));
    }

    #[tokio::test]
    async fn test_build_gets_no_port() {
        let cap = Capture::default();
        let proc = ProcessType::new("build", ["echo \"port=[$PORT]\""]);
        let mut cfg = Config::default();
        cfg.base_environment = vec!["PATH=/usr/bin:/bin".into()];
        cfg.processes = vec![proc.clone()];
        let shared = shared(cfg, &cap);

        assert!(run_instance(&CancellationToken::new(), &shared, &proc, 0, None).await);
        assert!(cap.wait_for_line(": port=[]").await, "{}", cap.text());
        assert!(!cap.text().contains("listening on"));
    }

    #[tokio::test]
    async fn test_failing_command_aborts_sequence() {
        let cap = Capture::default();
        let proc = ProcessType::new("job", ["true", "exit 3", "echo unreachable"]);
        let mut cfg = Config::default();
        cfg.processes = vec![proc.clone()];
        let shared = shared(cfg, &cap);

        assert!(!run_instance(&CancellationToken::new(), &shared, &proc, 0, None).await);
        let text = cap.text();
        assert!(text.contains("exec error job.0: (exit 3) exit status 3"), "{text}");
        assert!(!text.contains("running \"echo unreachable\""));
    }

    #[tokio::test]
    async fn test_single_command_waits_for_both_gates() {
        let before = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let after = spare.local_addr().unwrap();
        drop(spare);

        let cap = Capture::default();
        let proc = ProcessType::new("web", ["echo launched"])
            .with_wait_before(before.local_addr().unwrap().to_string())
            .with_wait_for(after.to_string());
        let mut cfg = Config::default();
        cfg.readiness_interval = Duration::from_millis(20);
        cfg.processes = vec![proc.clone()];
        let shared = shared(cfg, &cap);

        let handle = tokio::spawn(async move {
            run_instance(&CancellationToken::new(), &shared, &proc, 0, None).await
        });
        assert!(cap.wait_for_line(&format!("waiting for {after}")).await, "{}", cap.text());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cap.text().contains(": launched"));

        let _after = tokio::net::TcpListener::bind(after).await.unwrap();
        assert!(handle.await.unwrap());
        assert!(cap.wait_for_line(": launched").await, "{}", cap.text());
        assert_eq!(cap.text().matches(": starting").count(), 2);
    }

    #[tokio::test]
    async fn test_registered_only_while_running() {
        let cap = Capture::default();
        let proc = ProcessType::new("svc", ["sleep 30"]);
        let mut cfg = Config::default();
        cfg.processes = vec![proc.clone()];
        let shared = shared(cfg, &cap);
        let registry = shared.registry.clone();
        let ctx = CancellationToken::new();

        assert!(!registry.contains("svc.0"));
        let handle = tokio::spawn({
            let ctx = ctx.clone();
            async move { run_instance(&ctx, &shared, &proc, 0, Some(6000)).await }
        });

        for _ in 0..200 {
            if registry.contains("svc.0") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registry.lookup("svc"), Some(6000));

        ctx.cancel();
        let ok = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!ok);
        assert!(!registry.contains("svc.0"));
    }
}
