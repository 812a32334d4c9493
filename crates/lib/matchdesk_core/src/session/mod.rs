// @zen-component: SES-SessionCore
//
//! Session and token lifecycle.
//!
//! Token persistence, identity normalization, the init/verify/refresh/
//! login/logout state machine, and the secondary data client that follows
//! the primary identity.

pub mod api;
pub mod controller;
pub mod diagnostics;
pub mod events;
pub mod normalize;
pub mod refresher;
pub mod secondary;
pub mod state;
pub mod store;


use thiserror::Error;

/// Convenience alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session errors.
///
/// `Clone` so one de-duplicated refresh result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Tenant missing for user {0}")]
    TenantMissing(String),

    #[error("Secondary client sync failed: {0}")]
    SecondaryClientSync(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No refresh token stored")]
    NoRefreshToken,

    #[error("Superseded by a newer session change")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

impl From<store::StoreError> for SessionError {
    fn from(e: store::StoreError) -> Self {
        SessionError::Storage(e.to_string())
    }
}
