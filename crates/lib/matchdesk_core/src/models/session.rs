//! Session domain models.
//!
//! These are the canonical records the rest of the console reads. The auth
//! backend's wire shapes never leak past `session::normalize`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Canonical user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Full name when the backend has one, else first + last name.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Defaults to `"member"`.
    pub role: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Only an explicit `false` from the backend clears this.
    pub is_active: bool,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub is_test_account: bool,
    /// Account expiry as reported by the backend (test accounts).
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Opaque permission blob, passed through untouched.
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
}

/// Tenant classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantType {
    Personal,
    Enterprise,
}

/// Canonical tenant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub tenant_type: TenantType,
    pub is_active: bool,
    #[serde(default)]
    pub subscription_plan: Option<String>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_email: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// Name given to a tenant synthesized from a bare tenant id.
pub const PLACEHOLDER_TENANT_NAME: &str = "default";

impl Tenant {
    /// Placeholder tenant for a user whose payload carried only a tenant id.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: PLACEHOLDER_TENANT_NAME.to_string(),
            tenant_type: TenantType::Personal,
            is_active: true,
            subscription_plan: None,
            max_users: None,
            domain: None,
            company_name: None,
            company_email: None,
            contact_email: None,
            contact_phone: None,
        }
    }
}

/// Backward-compatible projection of [`User`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub role: String,
    pub tenant_id: Option<String>,
    pub is_test_account: bool,
    pub expires_at: Option<String>,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.display_name.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar_url: user.avatar_url.clone(),
            job_title: user.job_title.clone(),
            company: user.company.clone(),
            role: user.role.clone(),
            tenant_id: user.tenant_id.clone(),
            is_test_account: user.is_test_account,
            expires_at: user.expires_at.clone(),
        }
    }
}

/// Output of one normalization pass. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user: User,
    /// `None` when the payload carried no resolvable tenant.
    pub tenant: Option<Tenant>,
    pub profile: Profile,
}

impl Identity {
    pub fn new(user: User, tenant: Option<Tenant>) -> Self {
        let profile = Profile::from(&user);
        Self {
            user,
            tenant,
            profile,
        }
    }
}

/// Last known-good identity, persisted next to the tokens so a restart can
/// rebuild the session without a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub user: User,
    #[serde(default)]
    pub tenant: Option<Tenant>,
}

impl From<&Identity> for IdentitySnapshot {
    fn from(identity: &Identity) -> Self {
        Self {
            user: identity.user.clone(),
            tenant: identity.tenant.clone(),
        }
    }
}

impl From<IdentitySnapshot> for Identity {
    fn from(snapshot: IdentitySnapshot) -> Self {
        Identity::new(snapshot.user, snapshot.tenant)
    }
}

/// Persisted credentials.
///
/// `access_token` and `saved_at` are always set or cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl SessionTokens {
    /// Tokens stamped at `saved_at`.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            saved_at: Some(saved_at),
        }
    }

    /// Time elapsed since the tokens were stamped, if they were.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.saved_at.map(|saved_at| now - saved_at)
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.saved_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u-1".into(),
            email: "ada@example.com".into(),
            display_name: Some("Ada Lovelace".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            avatar_url: None,
            role: "admin".into(),
            tenant_id: Some("t-1".into()),
            is_active: true,
            job_title: Some("Engineer".into()),
            company: None,
            is_test_account: false,
            expires_at: None,
            permissions: None,
        }
    }

    #[test]
    fn profile_mirrors_user() {
        let profile = Profile::from(&user());
        assert_eq!(profile.id, "u-1");
        assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.job_title.as_deref(), Some("Engineer"));
        assert_eq!(profile.tenant_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn placeholder_tenant_is_active_and_named_default() {
        let tenant = Tenant::placeholder("t-9");
        assert_eq!(tenant.id, "t-9");
        assert_eq!(tenant.name, "default");
        assert!(tenant.is_active);
    }

    #[test]
    fn snapshot_restores_identity_with_profile() {
        let identity = Identity::new(user(), Some(Tenant::placeholder("t-1")));
        let snapshot = IdentitySnapshot::from(&identity);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: IdentitySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(Identity::from(restored), identity);
    }

    #[test]
    fn token_age_is_none_without_timestamp() {
        assert!(SessionTokens::default().age(Utc::now()).is_none());
        assert!(SessionTokens::default().is_empty());
    }
}
