// @zen-component: SES-IdentityNormalizer
//
//! Identity normalization.
//!
//! The auth backend answers login and verify with different shapes: the
//! user may be nested under `user` or be the payload itself, the tenant
//! may be nested, flattened to an id, or missing. [`normalize`] maps all of
//! them onto [`Identity`]. It is pure: no I/O, no logging, no clock.

use serde_json::{Map, Value};

use super::SessionError;
use crate::models::session::{Identity, PLACEHOLDER_TENANT_NAME, Tenant, TenantType, User};

/// Role given to users whose payload carries none.
pub const DEFAULT_ROLE: &str = "member";

/// Map a raw auth payload onto canonical identity records.
///
/// Rules, in order:
/// 1. a nested `user` object is the user source, otherwise the payload is;
/// 2. a nested `tenant` object becomes the tenant;
/// 3. else a user tenant id yields a placeholder tenant named `"default"`;
/// 4. else the tenant is `None` (the caller reports it, nothing aborts);
/// 5. `role` defaults to `"member"`, `is_active` to `true`.
///
/// Fails only when the user source lacks `id` or `email`.
pub fn normalize(payload: &Value) -> Result<Identity, SessionError> {
    let root = payload
        .as_object()
        .ok_or_else(|| SessionError::MalformedResponse("auth payload is not an object".into()))?;

    let source = match root.get("user") {
        Some(Value::Object(user)) => user,
        _ => root,
    };

    let nested_tenant = match root.get("tenant") {
        Some(Value::Object(tenant)) => Some(tenant),
        _ => None,
    };

    let mut user = build_user(source)?;
    if user.tenant_id.is_none() {
        user.tenant_id = nested_tenant.and_then(|t| string_field(t, &["id"]));
    }

    let tenant = match (nested_tenant, user.tenant_id.as_deref()) {
        (Some(raw), tenant_id) => Some(build_tenant(raw, tenant_id)),
        (None, Some(tenant_id)) => Some(Tenant::placeholder(tenant_id)),
        (None, None) => None,
    };

    Ok(Identity::new(user, tenant))
}

fn build_user(source: &Map<String, Value>) -> Result<User, SessionError> {
    let id = string_field(source, &["id", "user_id"])
        .ok_or_else(|| SessionError::MalformedResponse("user id missing".into()))?;
    let email = string_field(source, &["email"])
        .ok_or_else(|| SessionError::MalformedResponse("user email missing".into()))?;

    let first_name = string_field(source, &["first_name"]);
    let last_name = string_field(source, &["last_name"]);
    let display_name = string_field(source, &["full_name", "name", "display_name"]).or_else(|| {
        let joined = [first_name.as_deref(), last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    });

    Ok(User {
        id,
        email,
        display_name,
        first_name,
        last_name,
        avatar_url: string_field(source, &["avatar_url"]),
        role: string_field(source, &["role"]).unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        tenant_id: string_field(source, &["tenant_id"]),
        is_active: bool_field(source, "is_active").unwrap_or(true),
        job_title: string_field(source, &["job_title"]),
        company: string_field(source, &["company"]),
        is_test_account: bool_field(source, "is_test_account").unwrap_or(false),
        expires_at: string_field(source, &["expires_at"]),
        permissions: source.get("permissions").filter(|v| !v.is_null()).cloned(),
    })
}

fn build_tenant(raw: &Map<String, Value>, user_tenant_id: Option<&str>) -> Tenant {
    let id = string_field(raw, &["id"])
        .or_else(|| user_tenant_id.map(str::to_string))
        .unwrap_or_default();
    let tenant_type = match string_field(raw, &["tenant_type", "type"]).as_deref() {
        Some("enterprise") | Some("company") => TenantType::Enterprise,
        _ => TenantType::Personal,
    };

    Tenant {
        id,
        name: string_field(raw, &["name"]).unwrap_or_else(|| PLACEHOLDER_TENANT_NAME.to_string()),
        tenant_type,
        is_active: bool_field(raw, "is_active").unwrap_or(true),
        subscription_plan: string_field(raw, &["subscription_plan"]),
        max_users: raw.get("max_users").and_then(Value::as_i64),
        domain: string_field(raw, &["domain"]),
        company_name: string_field(raw, &["company_name"]),
        company_email: string_field(raw, &["company_email"]),
        contact_email: string_field(raw, &["contact_email"]),
        contact_phone: string_field(raw, &["contact_phone"]),
    }
}

/// First non-empty string (or number, stringified) among `keys`.
fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}
