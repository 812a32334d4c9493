// @zen-component: SES-AuthApi
//
//! Remote auth endpoints.
//!
//! [`AuthApi`] is the seam the controller talks through; [`HttpAuthApi`] is
//! the HTTP+JSON implementation. Responses come either bare or wrapped in a
//! `{success, message, data}` envelope; both are accepted.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{SessionError, SessionResult};

pub const LOGIN_PATH: &str = "auth/login";
pub const VERIFY_PATH: &str = "auth/verify";
pub const REFRESH_PATH: &str = "auth/refresh";
pub const LOGOUT_PATH: &str = "auth/logout";

/// Credentials for `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub device_name: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("device_name", &self.device_name)
            .finish()
    }
}

/// Successful login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub access_token: String,
    /// `None` when the backend issued no refresh token.
    pub refresh_token: Option<String>,
    /// Raw payload for `normalize` (carries `user` / `tenant`).
    pub payload: Value,
}

/// Successful refresh. The refresh token itself is not rotated.
#[derive(Debug, Clone)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_at: Option<String>,
}

/// Auth endpoint contract.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`. Rejection is `InvalidCredentials`.
    async fn login(&self, request: &LoginRequest) -> SessionResult<LoginResponse>;

    /// `POST /auth/verify` with the access token as bearer. Returns the raw
    /// identity payload. Rejection is `TokenInvalid`.
    async fn verify(&self, access_token: &str) -> SessionResult<Value>;

    /// `POST /auth/refresh`. Rejection is `RefreshRejected`.
    async fn refresh(&self, refresh_token: &str) -> SessionResult<RefreshResponse>;

    /// `POST /auth/logout` with `token` as bearer. Best effort.
    async fn logout(&self, token: &str) -> SessionResult<()>;
}

/// HTTP implementation of [`AuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpAuthApi {
    /// Build a client for the endpoints under `base_url`.
    pub fn new(base_url: Url, api_key: Option<String>, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Network(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> SessionResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SessionError::Network(format!("invalid endpoint {path}: {e}")))
    }

    /// POST with `apikey` (when configured) and the given bearer.
    fn post(&self, url: Url, bearer: Option<&str>) -> RequestBuilder {
        let mut request = self.client.post(url);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        match bearer.or(self.api_key.as_deref()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> SessionResult<Response> {
        request
            .send()
            .await
            .map_err(|e| SessionError::Network(format!("request failed: {e}")))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> SessionResult<LoginResponse> {
        debug!(email = %request.email, "auth login");
        let url = self.endpoint(LOGIN_PATH)?;
        let resp = Self::send(self.post(url, None).json(request)).await?;
        let body = read_body(resp, SessionError::InvalidCredentials).await?;

        let access_token = non_empty(&body, "access_token").ok_or_else(|| {
            SessionError::MalformedResponse("login response has no access_token".into())
        })?;
        let refresh_token = non_empty(&body, "refresh_token");

        Ok(LoginResponse {
            access_token,
            refresh_token,
            payload: body,
        })
    }

    async fn verify(&self, access_token: &str) -> SessionResult<Value> {
        let url = self.endpoint(VERIFY_PATH)?;
        let resp = Self::send(self.post(url, Some(access_token))).await?;
        read_body(resp, SessionError::TokenInvalid).await
    }

    async fn refresh(&self, refresh_token: &str) -> SessionResult<RefreshResponse> {
        let url = self.endpoint(REFRESH_PATH)?;
        let resp = Self::send(
            self.post(url, None)
                .json(&serde_json::json!({ "refresh_token": refresh_token })),
        )
        .await?;
        let body = read_body(resp, SessionError::RefreshRejected).await?;

        let access_token = non_empty(&body, "access_token").ok_or_else(|| {
            SessionError::MalformedResponse("refresh response has no access_token".into())
        })?;
        Ok(RefreshResponse {
            access_token,
            expires_at: non_empty(&body, "expires_at"),
        })
    }

    async fn logout(&self, token: &str) -> SessionResult<()> {
        let url = self.endpoint(LOGOUT_PATH)?;
        let resp = Self::send(self.post(url, Some(token))).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SessionError::Network(format!("logout HTTP {status}")))
        }
    }
}

/// Decode a response body, mapping failures.
///
/// 4xx and envelope-level failures use `rejected`; 5xx is `Network`.
async fn read_body(resp: Response, rejected: fn(String) -> SessionError) -> SessionResult<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| SessionError::Network(format!("read body: {e}")))?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        let message = body
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(if status.is_client_error() {
            rejected(message)
        } else {
            SessionError::Network(format!("HTTP {status}: {message}"))
        });
    }

    let body = body.ok_or_else(|| SessionError::MalformedResponse("response is not JSON".into()))?;
    unwrap_envelope(body, rejected)
}

/// Strip a `{success, message, data}` envelope if there is one.
fn unwrap_envelope(body: Value, rejected: fn(String) -> SessionError) -> SessionResult<Value> {
    let failed = body.get("success").and_then(Value::as_bool) == Some(false)
        || body.get("error").is_some_and(|e| !e.is_null());
    if failed {
        let message = error_message(&body).unwrap_or_else(|| "request rejected".to_string());
        return Err(rejected(message));
    }

    match body {
        Value::Object(mut map) => {
            if matches!(map.get("data"), Some(Value::Object(_))) {
                Ok(map.remove("data").unwrap_or_default())
            } else {
                Ok(Value::Object(map))
            }
        }
        _ => Err(SessionError::MalformedResponse(
            "response is not a JSON object".into(),
        )),
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Object(e)) => {
            if let Some(Value::String(s)) = e.get("message") {
                return Some(s.clone());
            }
        }
        _ => {}
    }
    body.get("message").and_then(Value::as_str).map(str::to_string)
}

fn non_empty(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `Url::join` drops the last segment unless the base ends in `/`.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
