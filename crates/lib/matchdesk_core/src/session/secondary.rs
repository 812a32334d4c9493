// @zen-component: SES-SecondarySync
//
//! Secondary client synchronization.
//!
//! The data tier is reached through its own client, which needs its own
//! copy of the access token. [`SecondarySynchronizer`] keeps it in step
//! with the session view and reports the result as a [`SyncOutcome`]; a
//! failed sync degrades data access but never touches the session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::debug;
use url::Url;

use super::api::with_trailing_slash;
use super::state::SessionView;
use super::{SessionError, SessionResult};
use crate::models::session::Identity;

/// Cheap authorised read used to validate a freshly installed token.
pub const PROBE_PATH: &str = "projects?select=id&limit=1";

/// A client that must carry the current identity.
#[async_trait]
pub trait SecondaryClient: Send + Sync {
    /// Short name for logs and events.
    fn name(&self) -> &str;

    /// Install `access_token` for `identity`.
    async fn sync(&self, identity: &Identity, access_token: &str) -> SessionResult<()>;

    /// Drop any installed credentials.
    async fn clear(&self);
}

/// Result of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Cleared,
    Failed(String),
}

/// Serialises syncs and reconciles the client against the latest view.
pub struct SecondarySynchronizer {
    client: Arc<dyn SecondaryClient>,
    timeout: Duration,
    turn: Mutex<()>,
}

impl SecondarySynchronizer {
    pub fn new(client: Arc<dyn SecondaryClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            turn: Mutex::new(()),
        }
    }

    /// Synchronizer with nothing behind it.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopSecondaryClient), Duration::from_secs(1))
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Bring the client in line with whatever `view` holds right now.
    ///
    /// Runs one at a time. The view is read after taking the turn, so the
    /// newest identity wins over older queued requests. If the session was
    /// cleared while the sync was in flight, the client is cleared again.
    pub async fn reconcile(&self, view: &watch::Sender<SessionView>) -> SyncOutcome {
        let _turn = self.turn.lock().await;

        let current = authenticated_identity(&view.borrow());
        let Some((identity, token)) = current else {
            self.client.clear().await;
            return SyncOutcome::Cleared;
        };

        let outcome = match tokio::time::timeout(self.timeout, self.client.sync(&identity, &token))
            .await
        {
            Ok(Ok(())) => SyncOutcome::Synced,
            Ok(Err(e)) => SyncOutcome::Failed(e.to_string()),
            Err(_) => SyncOutcome::Failed(format!("timed out after {:?}", self.timeout)),
        };

        let signed_out = !view.borrow().is_authenticated();
        if signed_out {
            debug!(client = %self.client.name(), "session cleared during sync; clearing client");
            self.client.clear().await;
            return SyncOutcome::Cleared;
        }
        outcome
    }

    /// Drop the client's credentials.
    pub async fn clear(&self) {
        let _turn = self.turn.lock().await;
        self.client.clear().await;
    }
}

fn authenticated_identity(view: &SessionView) -> Option<(Identity, String)> {
    let user = view.user.clone()?;
    let token = view.token.clone()?;
    Some((Identity::new(user, view.tenant.clone()), token))
}

/// Used when no data tier is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSecondaryClient;

#[async_trait]
impl SecondaryClient for NoopSecondaryClient {
    fn name(&self) -> &str {
        "none"
    }

    async fn sync(&self, _identity: &Identity, _access_token: &str) -> SessionResult<()> {
        Ok(())
    }

    async fn clear(&self) {}
}

// =============================================================================
// REST data client
// =============================================================================

/// Direct data-tier client authenticated with the session's access token.
#[derive(Debug)]
pub struct RestDataClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    token: RwLock<Option<String>>,
}

impl RestDataClient {
    pub fn new(base_url: Url, api_key: Option<String>, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Network(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            api_key,
            token: RwLock::new(None),
        })
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Authorised request builder for `path` under the data URL.
    pub async fn request(&self, method: Method, path: &str) -> SessionResult<RequestBuilder> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotAuthenticated)?;
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SessionError::Network(format!("invalid data path {path}: {e}")))?;

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        Ok(request)
    }
}

#[async_trait]
impl SecondaryClient for RestDataClient {
    fn name(&self) -> &str {
        "data"
    }

    async fn sync(&self, identity: &Identity, access_token: &str) -> SessionResult<()> {
        *self.token.write().await = Some(access_token.to_string());

        let resp = self
            .request(Method::GET, PROBE_PATH)
            .await?
            .send()
            .await
            .map_err(|e| SessionError::SecondaryClientSync(format!("probe failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::SecondaryClientSync(format!(
                "probe returned HTTP {status}"
            )));
        }
        debug!(user_id = %identity.user.id, "data client synced");
        Ok(())
    }

    async fn clear(&self) {
        *self.token.write().await = None;
    }
}
