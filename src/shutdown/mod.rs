// Package shutdown turns an interrupt into session cancellation.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `token` on Ctrl-C. The watcher exits quietly once the token is
/// cancelled by someone else.
pub fn watch_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(
                        component = "shutdown",
                        event = "signal_unavailable",
                        error = %e,
                        "cannot listen for interrupt"
                    );
                    return;
                }
                info!(
                    component = "shutdown",
                    event = "os_signal",
                    signal = "SIGINT",
                    "cancellation started"
                );
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

/// Cancels `token` and waits for the watcher to exit. A watcher that
/// panicked or was aborted is reported, not propagated.
pub async fn stop_watcher(token: &CancellationToken, watcher: JoinHandle<()>) {
    token.cancel();
    if let Err(e) = watcher.await {
        warn!(
            component = "shutdown",
            event = "watcher_join_failed",
            error = %e,
            "interrupt watcher did not exit cleanly"
        );
    }
}
