//! # Readiness waiter: TCP dial polling.
//!
//! Blocks until a TCP connection to the target succeeds or the governing token
//! is cancelled. Before every attempt the target goes through
//! [`ServiceRegistry::resolve`], so `"db"` follows whichever `db.*` instance is
//! registered at that moment. There is no timeout besides cancellation.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::output::Prefixed;
use crate::registry::ServiceRegistry;

/// Waits until `target` accepts a TCP connection.
///
/// Prints `waiting for <target>` first and `starting` once the target is
/// reachable. Returns `false` (silently) if `ctx` is cancelled first.
pub(crate) async fn wait_for(
    ctx: &CancellationToken,
    registry: &ServiceRegistry,
    target: &str,
    status: &Prefixed,
    interval: Duration,
) -> bool {
    status.line(&format!("waiting for {target}"));
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return false,
            _ = time::sleep(interval) => {}
        }

        let addr = registry.resolve(target);
        let dial = tokio::select! {
            _ = ctx.cancelled() => return false,
            res = TcpStream::connect(addr.as_str()) => res,
        };
        match dial {
            Ok(conn) => {
                drop(conn);
                status.line("starting");
                return true;
            }
            Err(e) => tracing::trace!(wait_target = target, addr = %addr, error = %e, "target not ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Console;
    use tokio::net::TcpListener;

    fn status() -> Prefixed {
        Console::from_writer(std::io::sink()).prefixed("t.0", 4)
    }

    #[tokio::test]
    async fn test_returns_once_registered_target_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let registry = ServiceRegistry::new();
        registry.register("db.0", port);

        let ready = wait_for(
            &CancellationToken::new(),
            &registry,
            "db",
            &status(),
            Duration::from_millis(10),
        )
        .await;
        assert!(ready);
    }

    #[tokio::test]
    async fn test_polls_until_literal_address_opens() {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = spare.local_addr().unwrap();
        drop(spare);

        let registry = ServiceRegistry::new();
        let ctx = CancellationToken::new();
        let target = addr.to_string();
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                wait_for(&ctx, &registry, &target, &status(), Duration::from_millis(10)).await
            }
        });

        time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let _listener = TcpListener::bind(addr).await.unwrap();
        assert!(time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_cancel_returns_false() {
        let ctx = CancellationToken::new();
        let registry = ServiceRegistry::new();
        ctx.cancel();

        let ready = wait_for(&ctx, &registry, "nothing", &status(), Duration::from_millis(10)).await;
        assert!(!ready);
    }
}
