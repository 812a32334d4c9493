//! Session diagnostics.
//!
//! A redacted picture of what is stored, for support and the CLI `debug`
//! command. Reads the store and the view only; never touches the network.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SessionResult;
use super::controller::{SessionController, trust_window_holds};
use super::state::SessionState;

/// Characters of a token shown in diagnostics.
pub const REDACTED_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDiagnostics {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub access_token_prefix: Option<String>,
    pub refresh_token_prefix: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub trust_window_secs: Option<u64>,
    pub trust_window_valid: bool,
    pub has_cached_identity: bool,
    pub state: SessionState,
}

impl SessionController {
    /// Snapshot of stored credentials, redacted.
    pub fn diagnostics(&self) -> SessionResult<SessionDiagnostics> {
        let tokens = self.store().get()?;
        let has_cached_identity = self.store().identity_snapshot()?.is_some();

        Ok(SessionDiagnostics {
            has_access_token: tokens.access_token.is_some(),
            has_refresh_token: tokens.refresh_token.is_some(),
            access_token_prefix: tokens.access_token.as_deref().map(redact),
            refresh_token_prefix: tokens.refresh_token.as_deref().map(redact),
            saved_at: tokens.saved_at,
            age_secs: tokens.age(Utc::now()).map(|age| age.num_seconds()),
            trust_window_secs: self.policy().trust_window.map(|w| w.as_secs()),
            trust_window_valid: trust_window_holds(self.policy(), &tokens),
            has_cached_identity,
            state: self.current().state,
        })
    }
}

/// First few characters followed by an ellipsis.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(REDACTED_PREFIX_LEN).collect();
    if prefix.len() < token.len() {
        format!("{prefix}...")
    } else {
        prefix
    }
}
