//! Session events.
//!
//! The controller publishes every transition and every degraded outcome on
//! a broadcast channel. Toasts, telemetry and logging subscribe here; none
//! of them sit in the controller's control flow.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::state::{SessionInput, SessionState};

/// Broadcast buffer size. Slow subscribers lag rather than block.
pub const EVENT_CAPACITY: usize = 64;

/// Something observable happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The machine moved (or stayed, for inputs it ignores).
    Transitioned {
        from: SessionState,
        to: SessionState,
        input: SessionInput,
    },
    /// Authenticated without a resolvable tenant.
    TenantMissing { user_id: String },
    /// The secondary client could not be synced; the session is unaffected.
    SecondarySyncFailed { client: String, error: String },
    /// Best-effort remote logout failed; local state was cleared anyway.
    RemoteLogoutFailed { error: String },
    /// A result arrived after a newer session change and was dropped.
    StaleResultDiscarded { input: SessionInput },
}

/// Spawn a subscriber that writes every event to the log.
pub fn spawn_event_logger(
    mut rx: broadcast::Receiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Transitioned { from, to, input } if from != to => {
            info!(?from, ?to, ?input, "session transition");
        }
        SessionEvent::Transitioned { from, input, .. } => {
            debug!(state = ?from, ?input, "session input ignored");
        }
        // The controller already warns about these; keep the trail at debug.
        other => debug!(event = ?other, "session event"),
    }
}
