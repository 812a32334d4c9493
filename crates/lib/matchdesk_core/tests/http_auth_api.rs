//! Integration test: serve a fake auth backend with axum on an ephemeral
//! port and drive `HttpAuthApi` and the controller against it.

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde_json::{Value, json};
use url::Url;

use matchdesk_core::SessionController;
use matchdesk_core::config::{SessionConfig, SessionPolicy};
use matchdesk_core::session::SessionError;
use matchdesk_core::session::api::{AuthApi, HttpAuthApi, LoginRequest};
use matchdesk_core::session::state::SessionState;
use matchdesk_core::session::store::{FileTokenStore, TokenStore};

const API_KEY: &str = "anon-key";

fn identity() -> Value {
    json!({
        "user": {
            "id": "u-1",
            "email": "ada@example.com",
            "role": "recruiter",
            "tenant_id": "t-1"
        },
        "tenant": { "id": "t-1", "name": "Acme Recruiting", "tenant_type": "company" }
    })
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn login(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing apikey" })));
    }
    if body["password"] != "pw" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid login credentials" })),
        );
    }
    let mut data = identity();
    data["access_token"] = json!("good");
    data["refresh_token"] = json!("r-1");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "ok", "data": data })),
    )
}

async fn verify(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match bearer(&headers) {
        Some("good") => (StatusCode::OK, Json(identity())),
        Some("boom") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "db down" }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token" }))),
    }
}

async fn refresh(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["refresh_token"] == "r-1" {
        (
            StatusCode::OK,
            Json(json!({ "access_token": "good", "expires_at": "2030-01-01T00:00:00Z" })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Refresh token expired" })))
    }
}

async fn logout() -> Json<Value> {
    Json(json!({}))
}

async fn projects(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match bearer(&headers) {
        Some("good") => (StatusCode::OK, Json(json!([]))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "JWT expired" }))),
    }
}

/// Start the fake backend and return its base URL.
async fn spawn_backend() -> Url {
    let app = Router::new()
        .route("/functions/v1/auth/login", post(login))
        .route("/functions/v1/auth/verify", post(verify))
        .route("/functions/v1/auth/refresh", post(refresh))
        .route("/functions/v1/auth/logout", post(logout))
        .route("/rest/v1/projects", get(projects));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    Url::parse(&format!("http://{addr}/")).expect("backend url")
}

fn api(base: &Url) -> HttpAuthApi {
    HttpAuthApi::new(
        base.join("functions/v1").unwrap(),
        Some(API_KEY.into()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn request(password: &str) -> LoginRequest {
    LoginRequest {
        email: "ada@example.com".into(),
        password: password.into(),
        tenant_id: None,
        device_name: "test".into(),
    }
}

#[tokio::test]
async fn login_unwraps_envelope() {
    let base = spawn_backend().await;

    let response = api(&base).login(&request("pw")).await.expect("login");

    assert_eq!(response.access_token, "good");
    assert_eq!(response.refresh_token.as_deref(), Some("r-1"));
    assert_eq!(response.payload["user"]["id"], "u-1");
}

#[tokio::test]
async fn login_rejection_is_invalid_credentials() {
    let base = spawn_backend().await;

    let err = api(&base).login(&request("wrong")).await.unwrap_err();

    assert_eq!(
        err,
        SessionError::InvalidCredentials("Invalid login credentials".into())
    );
}

#[tokio::test]
async fn verify_maps_statuses() {
    let base = spawn_backend().await;
    let api = api(&base);

    let payload = api.verify("good").await.expect("verify");
    assert_eq!(payload["tenant"]["name"], "Acme Recruiting");

    assert_eq!(
        api.verify("bad").await,
        Err(SessionError::TokenInvalid("Invalid token".into()))
    );
    assert!(matches!(
        api.verify("boom").await,
        Err(SessionError::Network(_))
    ));
}

#[tokio::test]
async fn refresh_and_logout() {
    let base = spawn_backend().await;
    let api = api(&base);

    let refreshed = api.refresh("r-1").await.expect("refresh");
    assert_eq!(refreshed.access_token, "good");
    assert_eq!(refreshed.expires_at.as_deref(), Some("2030-01-01T00:00:00Z"));

    assert!(matches!(
        api.refresh("stale").await,
        Err(SessionError::RefreshRejected(_))
    ));
    api.logout("r-1").await.expect("logout");
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let api = HttpAuthApi::new(
        Url::parse("http://127.0.0.1:9/functions/v1").unwrap(),
        None,
        Duration::from_secs(2),
    )
    .unwrap();

    assert!(matches!(
        api.verify("good").await,
        Err(SessionError::Network(_))
    ));
}

#[tokio::test]
async fn controller_end_to_end_with_file_store() {
    let base = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session.json");
    let config = SessionConfig {
        auth_url: base.join("functions/v1").unwrap(),
        api_key: Some(API_KEY.into()),
        data_url: Some(base.join("rest/v1").unwrap()),
        session_file: session_file.clone(),
        refresh_interval: None,
        policy: SessionPolicy {
            trust_window: None,
            request_timeout: Duration::from_secs(5),
            device_name: "test".into(),
        },
    };

    let controller = SessionController::from_config(&config).unwrap();
    let user = controller
        .sign_in("ada@example.com", "pw", None)
        .await
        .expect("sign in");
    assert_eq!(user.role, "recruiter");
    assert!(session_file.exists());

    // A new process picks the session up again through verify.
    let restarted = SessionController::from_config(&config).unwrap();
    let view = restarted.initialize().await;
    assert_eq!(view.state, SessionState::Authenticated);
    assert_eq!(view.tenant.map(|t| t.id), Some("t-1".to_string()));

    restarted.refresh_token().await.expect("refresh");
    restarted.verify_current_token().await.expect("verify");

    restarted.sign_out().await;
    assert!(!session_file.exists());
    let store = FileTokenStore::new(&session_file);
    assert!(store.get().unwrap().is_empty());
}
