//! Periodic background refresh.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller::SessionController;

/// Spawn a task that refreshes the session every `every` while it is
/// authenticated. Stops when `cancel` fires. A zero or unrepresentable
/// period disables refreshing. Errors are logged only; a
/// rejected refresh has already ended the session inside the controller.
pub fn spawn_refresher(
    controller: SessionController,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = Some(every)
            .filter(|every| !every.is_zero())
            .and_then(|every| Instant::now().checked_add(every));
        let Some(start) = start else {
            warn!(
                every_secs = every.as_secs(),
                "refresh period out of range; periodic refresh disabled"
            );
            cancel.cancelled().await;
            return;
        };
        let mut interval = tokio::time::interval_at(start, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every_secs = every.as_secs(), "periodic token refresh started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !controller.current().is_authenticated() {
                debug!("not authenticated; skipping periodic refresh");
                continue;
            }
            match controller.refresh_token().await {
                Ok(_) => info!("periodic token refresh succeeded"),
                Err(e) => warn!(error = %e, "periodic token refresh failed"),
            }
        }
        debug!("periodic token refresh stopped");
    })
}
