// @zen-component: SES-LifecycleController
//
//! Session lifecycle controller.
//!
//! [`SessionController`] is the only writer of the token store and of the
//! [`SessionView`]. Everything else reads the view through a `watch`
//! channel and observes [`SessionEvent`]s.
//!
//! Ordering rules:
//! - initialization runs once; every public call joins it first;
//! - login and explicit refresh are serialised;
//! - logout bumps the session generation, and every commit checks the
//!   generation it started under, so late results from before a logout
//!   are dropped instead of written;
//! - concurrent `refresh_token` calls share one in-flight refresh.
//! - init, login, logout and refresh run on their own tasks and finish
//!   even when the caller stops waiting.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use super::api::{AuthApi, HttpAuthApi, LoginRequest};
use super::events::{EVENT_CAPACITY, SessionEvent};
use super::normalize::normalize;
use super::secondary::{RestDataClient, SecondarySynchronizer, SyncOutcome};
use super::state::{SessionInput, SessionState, SessionView};
use super::store::{FileTokenStore, TokenStore};
use super::{SessionError, SessionResult};
use crate::config::{SessionConfig, SessionPolicy};
use crate::models::session::{Identity, IdentitySnapshot, SessionTokens, User};

type RefreshFuture = Shared<BoxFuture<'static, SessionResult<String>>>;
type InitFuture = Shared<BoxFuture<'static, ()>>;

/// Owns the session. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    secondary: SecondarySynchronizer,
    policy: SessionPolicy,
    /// Bumped by logout. Commits made under an older value are discarded.
    generation: Mutex<u64>,
    init: OnceLock<InitFuture>,
    /// Serialises login and explicit refresh.
    ops: Mutex<()>,
    refresh_slot: Mutex<Option<RefreshFuture>>,
    view: watch::Sender<SessionView>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
        secondary: SecondarySynchronizer,
        policy: SessionPolicy,
    ) -> Self {
        if let Some(window) = policy.trust_window {
            info!(
                window_secs = window.as_secs(),
                "cached sessions are trusted without server verification inside the trust window"
            );
        }
        let (view, _) = watch::channel(SessionView::initial());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                secondary,
                policy,
                generation: Mutex::new(0),
                init: OnceLock::new(),
                ops: Mutex::new(()),
                refresh_slot: Mutex::new(None),
                view,
                events,
            }),
        }
    }

    /// HTTP auth API, file store, and a data client when a data URL is set.
    pub fn from_config(config: &SessionConfig) -> SessionResult<Self> {
        let timeout = config.policy.request_timeout;
        let api = HttpAuthApi::new(config.auth_url.clone(), config.api_key.clone(), timeout)?;
        let secondary = match &config.data_url {
            Some(url) => SecondarySynchronizer::new(
                Arc::new(RestDataClient::new(url.clone(), config.api_key.clone(), timeout)?),
                timeout,
            ),
            None => SecondarySynchronizer::disabled(),
        };
        Ok(Self::new(
            Arc::new(api),
            Arc::new(FileTokenStore::new(&config.session_file)),
            secondary,
            config.policy.clone(),
        ))
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Live view of the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view.subscribe()
    }

    /// Snapshot of the view as it is right now.
    pub fn current(&self) -> SessionView {
        self.inner.view.borrow().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn store(&self) -> &dyn TokenStore {
        self.inner.store.as_ref()
    }

    /// Run initialization (once per controller) and return the view.
    pub async fn initialize(&self) -> SessionView {
        self.ensure_initialized().await;
        self.current()
    }

    async fn ensure_initialized(&self) {
        let init = self
            .inner
            .init
            .get_or_init(|| {
                let weak = Arc::downgrade(&self.inner);
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let run = detached(async move {
                        inner.run_init().await;
                        Ok::<_, SessionError>(())
                    });
                    if let Err(e) = run.await {
                        warn!(error = %e, "session initialization did not finish");
                    }
                }
                .boxed()
                .shared()
            })
            .clone();
        init.await;
    }

    /// Current access token, after initialization.
    pub async fn access_token(&self) -> Option<String> {
        self.ensure_initialized().await;
        self.inner.view.borrow().token.clone()
    }

    /// Log in with credentials.
    ///
    /// On failure nothing is written and the previous session, if any,
    /// stays as it was. The attempt runs to completion even if the caller
    /// stops waiting for it.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        tenant_id: Option<&str>,
    ) -> SessionResult<User> {
        self.ensure_initialized().await;
        let inner = Arc::clone(&self.inner);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            device_name: inner.policy.device_name.clone(),
        };
        detached(async move { inner.sign_in(request).await }).await
    }

    /// Log out. Local state is always cleared; the remote call is best effort.
    pub async fn sign_out(&self) {
        self.ensure_initialized().await;
        let inner = Arc::clone(&self.inner);
        let run = detached(async move {
            inner.sign_out().await;
            Ok::<_, SessionError>(())
        });
        if let Err(e) = run.await {
            warn!(error = %e, "sign out did not finish");
        }
    }

    /// Mint a new access token from the stored refresh token.
    ///
    /// Concurrent callers share one request and receive the same result.
    /// A rejected refresh, or a refreshed token that fails verification,
    /// ends the session.
    ///
    /// The refresh runs on its own task and finishes even if every caller
    /// stops waiting for it.
    pub async fn refresh_token(&self) -> SessionResult<String> {
        self.ensure_initialized().await;

        let inflight = {
            let mut slot = self.inner.refresh_slot.lock().await;
            match slot.as_ref() {
                Some(inflight) => inflight.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let refresh = detached(async move {
                        let result = inner.explicit_refresh().await;
                        inner.refresh_slot.lock().await.take();
                        result
                    })
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };
        inflight.await
    }

    /// Ask the server whether the current access token is still valid.
    ///
    /// Read-only: the session is not changed whatever the answer.
    pub async fn verify_current_token(&self) -> SessionResult<()> {
        self.ensure_initialized().await;
        let token = self
            .inner
            .view
            .borrow()
            .token
            .clone()
            .ok_or(SessionError::NotAuthenticated)?;
        self.inner.call(self.inner.api.verify(&token)).await.map(|_| ())
    }

    /// Run `op` with the access token, refreshing and retrying once if the
    /// operation reports that the token was not accepted.
    pub async fn authorized<T, E, F, Fut>(&self, mut op: F) -> Result<T, AuthorizedError<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Unauthorized,
    {
        let token = self
            .access_token()
            .await
            .ok_or(AuthorizedError::Session(SessionError::NotAuthenticated))?;

        match op(token).await {
            Err(e) if e.is_unauthorized() => {
                debug!("operation unauthorized; refreshing once");
                let token = self
                    .refresh_token()
                    .await
                    .map_err(AuthorizedError::Session)?;
                op(token).await.map_err(AuthorizedError::Operation)
            }
            other => other.map_err(AuthorizedError::Operation),
        }
    }
}

/// Errors that mean "the token was not accepted".
pub trait Unauthorized {
    fn is_unauthorized(&self) -> bool;
}

impl Unauthorized for reqwest::Error {
    fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

impl Unauthorized for SessionError {
    fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SessionError::TokenInvalid(_) | SessionError::NotAuthenticated
        )
    }
}

/// Failure of [`SessionController::authorized`].
#[derive(Debug, Error)]
pub enum AuthorizedError<E> {
    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Operation(E),
}

/// `true` while `tokens` were stamped less than the trust window ago.
pub(crate) fn trust_window_holds(policy: &SessionPolicy, tokens: &SessionTokens) -> bool {
    let Some(window) = policy.trust_window.and_then(|w| chrono::Duration::from_std(w).ok()) else {
        return false;
    };
    tokens
        .age(Utc::now())
        .is_some_and(|age| age >= chrono::Duration::zero() && age < window)
}

impl Inner {
    async fn run_init(&self) {
        let generation = self.current_generation().await;
        self.publish(SessionInput::Start, |_| {});
        if let Err(e) = self.restore(generation).await {
            debug!(error = %e, "session restore ended without a session");
        }
        self.view.send_modify(|view| view.loading = false);
        let state = self.view.borrow().state;
        info!(?state, "session initialized");
    }

    /// Trusted cache, then verify, then refresh; the first that works wins.
    async fn restore(&self, generation: u64) -> SessionResult<()> {
        let stored = self
            .store
            .get()
            .and_then(|tokens| Ok((tokens, self.store.identity_snapshot()?)));
        let (tokens, snapshot) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "session store unreadable; starting signed out");
                self.clear_session(generation, SessionInput::NoStoredSession).await?;
                return Err(e.into());
            }
        };

        let Some(access_token) = tokens.access_token.clone() else {
            return self
                .clear_session(generation, SessionInput::NoStoredSession)
                .await;
        };

        if let Some(snapshot) = snapshot
            && trust_window_holds(&self.policy, &tokens)
        {
            debug!("cached identity inside trust window; skipping verify");
            return self
                .establish(
                    generation,
                    SessionInput::CacheTrusted,
                    snapshot.into(),
                    access_token,
                    None,
                )
                .await;
        }

        self.transition(generation, SessionInput::CacheStale).await?;
        match self.verify_identity(&access_token).await {
            Ok(identity) => {
                let tokens =
                    SessionTokens::issued(access_token.clone(), tokens.refresh_token, Utc::now());
                self.establish(
                    generation,
                    SessionInput::Verified,
                    identity,
                    access_token,
                    Some(tokens),
                )
                .await
            }
            Err(e) => {
                debug!(error = %e, "stored access token failed verification");
                match tokens.refresh_token {
                    Some(refresh_token) => {
                        self.transition(
                            generation,
                            SessionInput::VerifyFailed { can_refresh: true },
                        )
                        .await?;
                        self.refresh_cycle(generation, &refresh_token).await.map(|_| ())
                    }
                    None => {
                        self.clear_session(
                            generation,
                            SessionInput::VerifyFailed { can_refresh: false },
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn sign_in(&self, request: LoginRequest) -> SessionResult<User> {
        let _op = self.ops.lock().await;
        self.wait_settled().await;

        let generation = self.current_generation().await;
        let was_authenticated = self.view.borrow().state == SessionState::Authenticated;
        self.transition(generation, SessionInput::LoginRequested).await?;

        let attempt = async {
            let response = self.call(self.api.login(&request)).await?;
            let identity = normalize(&response.payload)?;
            Ok::<_, SessionError>((response, identity))
        };
        let (response, identity) = match attempt.await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(email = %request.email, error = %e, "login failed");
                self.transition(
                    generation,
                    SessionInput::LoginFailed {
                        session_intact: was_authenticated,
                    },
                )
                .await?;
                return Err(e);
            }
        };

        let user = identity.user.clone();
        let tokens = SessionTokens::issued(
            response.access_token.clone(),
            response.refresh_token,
            Utc::now(),
        );
        self.establish(
            generation,
            SessionInput::LoginSucceeded,
            identity,
            response.access_token,
            Some(tokens),
        )
        .await?;
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_out(&self) {
        let tokens = self.store.get().unwrap_or_else(|e| {
            warn!(error = %e, "could not read tokens for remote logout");
            SessionTokens::default()
        });

        let generation = {
            let mut current = self.generation.lock().await;
            *current += 1;
            self.wipe_store();
            self.publish(SessionInput::LogoutRequested, SessionView::clear);
            *current
        };
        self.secondary.clear().await;

        if let Some(token) = tokens.refresh_token.or(tokens.access_token)
            && let Err(e) = self.call(self.api.logout(&token)).await
        {
            warn!(error = %e, "remote logout failed; local session cleared");
            self.emit(SessionEvent::RemoteLogoutFailed {
                error: e.to_string(),
            });
        }

        let current = self.generation.lock().await;
        if *current == generation {
            self.publish(SessionInput::LoggedOut, |_| {});
        }
        info!("signed out");
    }

    async fn explicit_refresh(&self) -> SessionResult<String> {
        let _op = self.ops.lock().await;

        let state = self.view.borrow().state;
        if state != SessionState::Authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        let refresh_token = self
            .store
            .get()?
            .refresh_token
            .ok_or(SessionError::NoRefreshToken)?;

        let generation = self.current_generation().await;
        self.transition(generation, SessionInput::RefreshRequested).await?;
        self.refresh_cycle(generation, &refresh_token).await
    }

    /// Refresh, persist the new access token, then verify it once.
    async fn refresh_cycle(&self, generation: u64, refresh_token: &str) -> SessionResult<String> {
        let refreshed = match self.call(self.api.refresh(refresh_token)).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(error = %e, "token refresh failed; clearing session");
                self.clear_session(generation, SessionInput::RefreshFailed).await?;
                return Err(e);
            }
        };
        let access_token = refreshed.access_token;
        let tokens = SessionTokens::issued(
            access_token.clone(),
            Some(refresh_token.to_string()),
            Utc::now(),
        );

        {
            let current = self.generation.lock().await;
            if *current != generation {
                return Err(self.discard(SessionInput::Refreshed));
            }
            if let Err(e) = self.store.set(&tokens) {
                warn!(error = %e, "failed to persist refreshed token; clearing session");
                self.wipe_store();
                self.publish(SessionInput::RefreshFailed, SessionView::clear);
                drop(current);
                self.sync_secondary().await;
                return Err(e.into());
            }
            self.publish(SessionInput::Refreshed, |view| {
                if view.user.is_some() {
                    view.token = Some(access_token.clone());
                }
            });
        }

        match self.verify_identity(&access_token).await {
            Ok(identity) => {
                self.establish(
                    generation,
                    SessionInput::Verified,
                    identity,
                    access_token.clone(),
                    Some(tokens),
                )
                .await?;
                debug!(expires_at = ?refreshed.expires_at, "access token refreshed");
                Ok(access_token)
            }
            Err(e) => {
                warn!(error = %e, "refreshed token failed verification; clearing session");
                self.clear_session(generation, SessionInput::VerifyFailed { can_refresh: false })
                    .await?;
                Err(e)
            }
        }
    }

    async fn verify_identity(&self, access_token: &str) -> SessionResult<Identity> {
        let payload = self.call(self.api.verify(access_token)).await?;
        normalize(&payload)
    }

    /// Commit an authenticated session, then sync the secondary client.
    async fn establish(
        &self,
        generation: u64,
        input: SessionInput,
        identity: Identity,
        access_token: String,
        persist: Option<SessionTokens>,
    ) -> SessionResult<()> {
        let user_id = identity.user.id.clone();
        let tenant_missing = identity.tenant.is_none();
        {
            let current = self.generation.lock().await;
            if *current != generation {
                return Err(self.discard(input));
            }
            if let Some(tokens) = persist {
                let snapshot = IdentitySnapshot::from(&identity);
                if let Err(e) = self.store.save_session(&tokens, &snapshot) {
                    warn!(error = %e, "failed to persist session; clearing");
                    self.wipe_store();
                    self.publish(failed_counterpart(input), SessionView::clear);
                    drop(current);
                    self.sync_secondary().await;
                    return Err(e.into());
                }
            }
            self.publish(input, |view| view.authenticate(identity, access_token));
        }

        if tenant_missing {
            warn!(user_id = %user_id, "authenticated without a tenant");
            self.emit(SessionEvent::TenantMissing { user_id });
        }
        self.sync_secondary().await;
        Ok(())
    }

    /// Full clear: store, view and secondary client.
    async fn clear_session(&self, generation: u64, input: SessionInput) -> SessionResult<()> {
        {
            let current = self.generation.lock().await;
            if *current != generation {
                return Err(self.discard(input));
            }
            self.wipe_store();
            self.publish(input, SessionView::clear);
        }
        self.sync_secondary().await;
        Ok(())
    }

    /// Feed an input that changes nothing but the state.
    async fn transition(&self, generation: u64, input: SessionInput) -> SessionResult<()> {
        let current = self.generation.lock().await;
        if *current != generation {
            return Err(self.discard(input));
        }
        self.publish(input, |_| {});
        Ok(())
    }

    fn publish(&self, input: SessionInput, mutate: impl FnOnce(&mut SessionView)) {
        let mut transition = (SessionState::Init, SessionState::Init);
        self.view.send_modify(|view| {
            let from = view.state;
            view.state = from.next(input);
            mutate(view);
            transition = (from, view.state);
        });
        let (from, to) = transition;
        self.emit(SessionEvent::Transitioned { from, to, input });
    }

    fn discard(&self, input: SessionInput) -> SessionError {
        self.emit(SessionEvent::StaleResultDiscarded { input });
        SessionError::Superseded
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn wipe_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear session store");
        }
    }

    async fn sync_secondary(&self) {
        match self.secondary.reconcile(&self.view).await {
            SyncOutcome::Failed(error) => {
                warn!(
                    client = %self.secondary.client_name(),
                    error = %error,
                    "secondary client sync failed"
                );
                self.emit(SessionEvent::SecondarySyncFailed {
                    client: self.secondary.client_name().to_string(),
                    error,
                });
            }
            outcome => {
                debug!(
                    ?outcome,
                    client = %self.secondary.client_name(),
                    "secondary client reconciled"
                );
            }
        }
    }

    async fn current_generation(&self) -> u64 {
        *self.generation.lock().await
    }

    /// Wait out a logout that is still finishing.
    async fn wait_settled(&self) {
        let mut rx = self.view.subscribe();
        let _ = rx.wait_for(|view| view.state.is_settled()).await;
    }

    async fn call<T>(&self, request: impl Future<Output = SessionResult<T>>) -> SessionResult<T> {
        match tokio::time::timeout(self.policy.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Network(format!(
                "timed out after {:?}",
                self.policy.request_timeout
            ))),
        }
    }
}

/// Input that abandons the step `input` would have completed.
fn failed_counterpart(input: SessionInput) -> SessionInput {
    match input {
        SessionInput::LoginSucceeded => SessionInput::LoginFailed {
            session_intact: false,
        },
        SessionInput::Refreshed => SessionInput::RefreshFailed,
        _ => SessionInput::VerifyFailed { can_refresh: false },
    }
}

/// Run `work` on its own task so it finishes even if the caller is dropped.
async fn detached<T>(
    work: impl Future<Output = SessionResult<T>> + Send + 'static,
) -> SessionResult<T>
where
    T: Send + 'static,
{
    tokio::spawn(work).await.unwrap_or_else(|e| Err(SessionError::TaskFailed(e.to_string())))
}
