// @zen-component: SES-StateMachine
//
//! Session machine states and the consumer-facing view.
//!
//! ```text
//!  Init ──Start──► TrustCheck ──CacheTrusted──────────────────► Authenticated
//!                     │  │                                        ▲   │
//!      NoStoredSession│  └─CacheStale─► Verifying ──Verified──────┘   │RefreshRequested
//!                     ▼                  │   ▲                        ▼
//!               Unauthenticated ◄────────┘   └──────Refreshed──── Refreshing
//!                 ▲   │     VerifyFailed{no refresh}               │
//!                 │   │                                            │RefreshFailed
//!                 │   └─LoginRequested─► LoggingIn ─LoginSucceeded─► Authenticated
//!                 └──LoggedOut── LoggingOut ◄──LogoutRequested── (any)
//! ```

use serde::Serialize;

use crate::models::session::{Identity, Profile, Tenant, User};

/// Machine state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    TrustCheck,
    Verifying,
    Refreshing,
    Authenticated,
    Unauthenticated,
    LoggingIn,
    LoggingOut,
}

/// Inputs that drive [`SessionState::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionInput {
    Start,
    NoStoredSession,
    CacheTrusted,
    CacheStale,
    Verified,
    VerifyFailed { can_refresh: bool },
    RefreshRequested,
    Refreshed,
    RefreshFailed,
    LoginRequested,
    LoginSucceeded,
    LoginFailed { session_intact: bool },
    LogoutRequested,
    LoggedOut,
}

impl SessionState {
    /// Successor for `input`. Total: inputs that mean nothing in the
    /// current state leave it unchanged.
    pub fn next(self, input: SessionInput) -> SessionState {
        use SessionInput as I;
        use SessionState as S;

        match (self, input) {
            (_, I::LogoutRequested) => S::LoggingOut,
            (S::LoggingOut, I::LoggedOut) => S::Unauthenticated,

            (S::Init, I::Start) => S::TrustCheck,
            (S::TrustCheck, I::NoStoredSession) => S::Unauthenticated,
            (S::TrustCheck, I::CacheTrusted) => S::Authenticated,
            (S::TrustCheck, I::CacheStale) => S::Verifying,

            (S::Verifying, I::Verified) => S::Authenticated,
            (S::Verifying, I::VerifyFailed { can_refresh: true }) => S::Refreshing,
            (S::Verifying, I::VerifyFailed { can_refresh: false }) => S::Unauthenticated,

            (S::Authenticated, I::RefreshRequested) => S::Refreshing,
            (S::Refreshing, I::Refreshed) => S::Verifying,
            (S::Refreshing, I::RefreshFailed) => S::Unauthenticated,

            (S::Authenticated | S::Unauthenticated, I::LoginRequested) => S::LoggingIn,
            (S::LoggingIn, I::LoginSucceeded) => S::Authenticated,
            (S::LoggingIn, I::LoginFailed { session_intact: true }) => S::Authenticated,
            (S::LoggingIn, I::LoginFailed { session_intact: false }) => S::Unauthenticated,

            (state, _) => state,
        }
    }

    /// Terminal (resting) states.
    pub fn is_settled(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Unauthenticated)
    }
}

/// Read-only snapshot of the session for the rest of the application.
///
/// `user`, `profile` and `token` are all present or all absent. `tenant`
/// may be absent for an authenticated user whose payload had no tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub user: Option<User>,
    pub tenant: Option<Tenant>,
    pub profile: Option<Profile>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// `true` until initialization has finished once.
    pub loading: bool,
}

impl SessionView {
    /// View before initialization.
    pub fn initial() -> Self {
        Self {
            state: SessionState::Init,
            user: None,
            tenant: None,
            profile: None,
            token: None,
            loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.is_some()
    }

    /// Role of the signed-in user.
    pub fn role(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.role.as_str())
    }

    /// Plain equality check against the user's role.
    pub fn has_role(&self, role: &str) -> bool {
        self.role() == Some(role)
    }

    pub(crate) fn authenticate(&mut self, identity: Identity, token: String) {
        self.user = Some(identity.user);
        self.tenant = identity.tenant;
        self.profile = Some(identity.profile);
        self.token = Some(token);
    }

    pub(crate) fn clear(&mut self) {
        self.user = None;
        self.tenant = None;
        self.profile = None;
        self.token = None;
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self::initial()
    }
}
