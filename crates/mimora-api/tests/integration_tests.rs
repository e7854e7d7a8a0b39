//! # Integration Tests for mimora-api
//!
//! Drives the assembled router end to end: the two-step KYC flow against a
//! wiremock provider, callback reconciliation and signature checks, profile
//! scoping, email one-time-code login against a wiremock mail relay, and the
//! unauthenticated probes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mimora_api::kyc::WebhookVerifier;
use mimora_api::mailer::Mailer;
use mimora_api::state::{AppConfig, AppState};
use mimora_core::ProfileId;
use mimora_kyc_client::{KycProviderClient, ProviderConfig};

const TOKEN: &str = "test-secret";

/// Helper: provider client pointed at the mock server.
fn provider_for(server: &MockServer) -> KycProviderClient {
    let cfg = ProviderConfig::for_base_url(&server.uri(), "meon-secret").unwrap();
    KycProviderClient::new(cfg).unwrap()
}

/// Helper: mount document and face session responses on the mock provider.
async fn mount_sessions(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .and(body_partial_json(json!({"workflowName": "analyst"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sso_url": "https://x/1",
            "request_id": "abc"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .and(body_partial_json(json!({"workflowName": "image_verification"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sso_url": "https://face/2",
            "request_id": "face-9"
        })))
        .mount(server)
        .await;
}

/// Helper: read response body as JSON.
async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> axum::http::Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    mimora_api::app(state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

async fn webhook(state: &AppState, payload: Value, signature: Option<&str>) -> axum::http::Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/kyc/webhook")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-meon-signature", sig);
    }
    mimora_api::app(state.clone())
        .oneshot(
            builder
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn register(state: &AppState, role: &str, username: &str) -> ProfileId {
    let response = send(
        state,
        "POST",
        "/v1/profiles",
        None,
        Some(json!({
            "role": role,
            "username": username,
            "email": format!("{username}@mimora.app"),
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    ProfileId::parse(body["id"].as_str().unwrap()).unwrap()
}

fn with_auth(state: AppState) -> AppState {
    let config = AppConfig {
        auth_token: Some(TOKEN.to_string()),
        ..state.config.clone()
    };
    AppState {
        config,
        ..state
    }
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn liveness_and_readiness_probes() {
    let state = AppState::new();
    let response = send(&state, "GET", "/health/liveness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");

    let response = send(&state, "GET", "/health/readiness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn probes_skip_bearer_auth() {
    let state = with_auth(AppState::new());
    let response = send(&state, "GET", "/health/liveness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let state = AppState::new();
    let response = send(&state, "GET", "/v1/unknown", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// -- KYC start -----------------------------------------------------------------

#[tokio::test]
async fn start_without_provider_returns_503() {
    let state = AppState::new();
    let owner = register(&state, "artist", "ana").await;

    let response = send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn start_for_unknown_profile_is_404() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));

    let response = send(
        &state,
        "POST",
        &format!("/v1/kyc/{}/start", ProfileId::new()),
        None,
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_start_replays_the_stored_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sso_url": "https://x/1",
            "request_id": "abc"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;

    let first = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await).await;
    assert_eq!(first["status"], "initiated");
    assert_eq!(first["session_id"], "abc");
    assert_eq!(first["redirect_url"], "https://x/1");

    let second = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await).await;
    assert_eq!(second["status"], "in_progress");
    assert_eq!(second["session_id"], "abc");
    assert_eq!(second["redirect_url"], "https://x/1");

    let profile = state.store.get_profile(owner).await.unwrap().unwrap();
    assert_eq!(profile.external_kyc_id.as_deref(), Some("abc"));
}

#[tokio::test]
async fn provider_failure_is_502_and_leaves_request_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "customer", "cara").await;

    let response = send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["details"]["retryable"], true);

    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert_eq!(request.status.as_str(), "pending");
    assert!(request.provider_kyc_id.is_none());
}

// -- Full two-step flow ----------------------------------------------------------

#[tokio::test]
async fn document_then_face_verifies_the_profile() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;

    let started = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await).await;
    assert_eq!(started["status"], "initiated");

    // Face before the document result changes nothing.
    let early = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/face"), None, None).await).await;
    assert_eq!(early["status"], "document_pending");
    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert_eq!(request.status.as_str(), "in_progress");
    assert!(request.verification_data.is_empty());

    let receipt = webhook(
        &state,
        json!({"request_id": "abc", "status": "success", "verification_type": "aadhaar"}),
        None,
    )
    .await;
    assert_eq!(receipt.status(), StatusCode::OK);
    let receipt = body_json(receipt).await;
    assert_eq!(receipt["request_status"], "document_verified");
    assert_eq!(receipt["document_verified"], true);
    assert_eq!(receipt["current_step"], "face");
    assert_eq!(receipt["kyc_verified"], false);
    assert_eq!(receipt["message"], "Webhook processed: aadhaar - success");

    let face = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/face"), None, None).await).await;
    assert_eq!(face["status"], "initiated");
    assert_eq!(face["redirect_url"], "https://face/2");
    assert_eq!(face["session_id"], "abc");

    // A start while the face session is open replays it as a face session.
    let replayed = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await).await;
    assert_eq!(replayed["status"], "in_progress");
    assert_eq!(replayed["redirect_url"], "https://face/2");
    assert_eq!(
        replayed["message"],
        "Face verification already in progress. Redirect user to redirect_url"
    );

    let receipt = body_json(
        webhook(
            &state,
            json!({"request_id": "abc", "status": "success", "verification_type": "face"}),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(receipt["request_status"], "verified");
    assert_eq!(receipt["current_step"], "complete");
    assert_eq!(receipt["kyc_verified"], true);

    let status = body_json(send(&state, "GET", &format!("/v1/kyc/{owner}/status"), None, None).await).await;
    assert_eq!(status["request_status"], "verified");
    assert_eq!(status["kyc_verified"], true);
    assert_eq!(status["face_verified"], true);
    assert_eq!(status["external_kyc_id"], "abc");
    assert_eq!(status["last_verification"]["type"], "face");

    let again = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await).await;
    assert_eq!(again["status"], "already_verified");
    assert!(again.get("redirect_url").is_none());
}

#[tokio::test]
async fn status_before_any_attempt_is_not_started() {
    let state = AppState::new();
    let owner = register(&state, "customer", "cara").await;
    let status = body_json(send(&state, "GET", &format!("/v1/kyc/{owner}/status"), None, None).await).await;
    assert_eq!(status["request_status"], "not_started");
    assert_eq!(status["current_step"], "document");
    assert_eq!(status["kyc_verified"], false);
}

// -- Concurrency -------------------------------------------------------------

#[tokio::test]
async fn concurrent_starts_share_one_request_and_one_session() {
    let server = MockServer::start().await;
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = issued.clone();
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .respond_with(move |_: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "sso_url": format!("https://x/{n}"),
                    "request_id": format!("abc-{n}")
                }))
                .set_delay(Duration::from_millis(200))
        })
        .mount(&server)
        .await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;

    let uri = format!("/v1/kyc/{owner}/start");
    let (a, b) = tokio::join!(
        send(&state, "POST", &uri, None, None),
        send(&state, "POST", &uri, None, None),
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    let (a, b) = (body_json(a).await, body_json(b).await);

    assert_eq!(a["session_id"], b["session_id"]);
    assert_eq!(a["redirect_url"], b["redirect_url"]);
    assert!(issued.load(Ordering::SeqCst) >= 1);

    let history = state.store.request_history(owner).await.unwrap();
    assert_eq!(history.len(), 1);
    let stored = history[0].provider_kyc_id.clone().unwrap();
    assert_eq!(a["session_id"], stored.as_str());
    let profile = state.store.get_profile(owner).await.unwrap().unwrap();
    assert_eq!(profile.external_kyc_id.as_deref(), Some(stored.as_str()));
}

#[tokio::test]
async fn concurrent_callbacks_are_each_logged_once() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;
    send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;

    let (aadhaar, pan) = tokio::join!(
        webhook(
            &state,
            json!({"request_id": "abc", "status": "success", "verification_type": "aadhaar"}),
            None,
        ),
        webhook(
            &state,
            json!({"request_id": "abc", "status": "success", "verification_type": "pan"}),
            None,
        ),
    );
    assert_eq!(aadhaar.status(), StatusCode::OK);
    assert_eq!(pan.status(), StatusCode::OK);

    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert_eq!(request.verification_data.len(), 2);
    let mut kinds: Vec<&str> = request
        .verification_data
        .verifications
        .iter()
        .map(|e| e.verification_type.as_str())
        .collect();
    kinds.sort_unstable();
    assert_eq!(kinds, ["aadhaar", "pan"]);
    assert_eq!(request.status.as_str(), "document_verified");
    assert_eq!(request.current_step.as_str(), "face");
    assert!(request.document_verified);
    assert!(!request.face_verified);

    let profile = state.store.get_profile(owner).await.unwrap().unwrap();
    assert!(!profile.kyc_verified);
    assert_eq!(state.store.request_history(owner).await.unwrap().len(), 1);
}

// -- Callbacks ---------------------------------------------------------------

#[tokio::test]
async fn failed_callback_then_retry_opens_a_new_request() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;

    send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;
    let first = state.store.latest_request(owner).await.unwrap().unwrap();

    let receipt = body_json(
        webhook(
            &state,
            json!({"kyc_id": "abc", "status": "FAILED", "step": "aadhaar"}),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(receipt["request_status"], "failed");
    assert_eq!(receipt["kyc_verified"], false);

    let retried = body_json(send(&state, "POST", &format!("/v1/kyc/{owner}/retry"), None, None).await).await;
    assert_eq!(retried["status"], "initiated");

    let second = state.store.latest_request(owner).await.unwrap().unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status.as_str(), "in_progress");
    let first = state.store.get_request(first.id).await.unwrap().unwrap();
    assert_eq!(first.status.as_str(), "failed");
}

#[tokio::test]
async fn replayed_callback_is_logged_but_not_reapplied() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;
    send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;

    let payload = json!({"request_id": "abc", "status": "success", "verification_type": "pan"});
    for _ in 0..2 {
        let response = webhook(&state, payload.clone(), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert_eq!(request.status.as_str(), "document_verified");
    assert_eq!(request.verification_data.len(), 2);
}

#[tokio::test]
async fn callback_correlates_by_reference_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_sso_kyc_route"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sso_url": "https://x/1"})))
        .mount(&server)
        .await;
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)));
    let owner = register(&state, "artist", "ana").await;
    send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;
    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert!(request.provider_kyc_id.is_none());

    let receipt = body_json(
        webhook(
            &state,
            json!({
                "request_id": "late-handle",
                "status": "success",
                "verification_type": "aadhaar",
                "additional_info": {"reference_id": request.id.to_string()}
            }),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(receipt["document_verified"], true);

    let request = state.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.provider_kyc_id.as_deref(), Some("late-handle"));
}

#[tokio::test]
async fn unmatched_callback_is_404() {
    let state = AppState::new();
    let response = webhook(&state, json!({"request_id": "nobody", "status": "success"}), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_object_callback_is_422() {
    let state = AppState::new();
    let response = webhook(&state, json!(["not", "an", "object"]), None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn signed_callbacks_require_a_valid_signature() {
    let server = MockServer::start().await;
    mount_sessions(&server).await;
    let verifier = WebhookVerifier::new("whsec");
    let state = AppState::with_config(AppConfig::default(), Some(provider_for(&server)))
        .with_webhook_verifier(Some(verifier.clone()));
    let owner = register(&state, "artist", "ana").await;
    send(&state, "POST", &format!("/v1/kyc/{owner}/start"), None, None).await;

    let payload = json!({"request_id": "abc", "status": "success", "verification_type": "aadhaar"});

    let missing = webhook(&state, payload.clone(), None).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let wrong = webhook(&state, payload.clone(), Some(&"0".repeat(64))).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert!(request.verification_data.is_empty());
    assert!(!request.document_verified);

    // HMAC-SHA256("whsec", json.dumps(payload, sort_keys=True)) as the
    // provider computes it.
    let signature = "bd2e80e8b75891765602c633a862287bc7790fc904dbc52e3a3b28cd9883a62b";
    assert_eq!(verifier.sign(&payload).unwrap(), signature);
    let ok = webhook(&state, payload, Some(signature)).await;
    assert_eq!(ok.status(), StatusCode::OK);
    let request = state.store.latest_request(owner).await.unwrap().unwrap();
    assert!(request.document_verified);
}

#[tokio::test]
async fn webhook_skips_bearer_auth() {
    let state = with_auth(AppState::new());
    let response = webhook(&state, json!({"request_id": "nobody"}), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// -- Auth and scoping --------------------------------------------------------

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let state = with_auth(AppState::new());
    let response = send(
        &state,
        "GET",
        &format!("/v1/kyc/{}/status", ProfileId::new()),
        None,
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

async fn register_as(state: &AppState, bearer: &str, body: Value) -> ProfileId {
    let response = send(state, "POST", "/v1/profiles", Some(bearer), Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    ProfileId::parse(body["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn profile_bound_caller_cannot_touch_another_profile() {
    let state = with_auth(AppState::new());
    let own = register_as(
        &state,
        TOKEN,
        json!({"role": "customer", "username": "cara", "phone_number": "+919876543210"}),
    )
    .await;
    let other = register_as(
        &state,
        TOKEN,
        json!({"role": "artist", "username": "ana", "email": "ana@mimora.app"}),
    )
    .await;

    let token = format!("customer:{own}:{TOKEN}");
    let mine = send(&state, "GET", &format!("/v1/kyc/{own}/status"), Some(&token), None).await;
    assert_eq!(mine.status(), StatusCode::OK);

    let theirs = send(&state, "GET", &format!("/v1/kyc/{other}/status"), Some(&token), None).await;
    assert_eq!(theirs.status(), StatusCode::FORBIDDEN);
    let theirs = send(&state, "POST", &format!("/v1/kyc/{other}/start"), Some(&token), None).await;
    assert_eq!(theirs.status(), StatusCode::FORBIDDEN);
    let theirs = send(&state, "GET", &format!("/v1/profiles/{other}"), Some(&token), None).await;
    assert_eq!(theirs.status(), StatusCode::FORBIDDEN);

    let me = body_json(send(&state, "GET", "/v1/profiles/me", Some(&token), None).await).await;
    assert_eq!(me["username"], "cara");
}

// -- Profiles ----------------------------------------------------------------

#[tokio::test]
async fn duplicate_username_is_409() {
    let state = AppState::new();
    register(&state, "artist", "ana").await;
    let response = send(
        &state,
        "POST",
        "/v1/profiles",
        None,
        Some(json!({"role": "artist", "username": "ana", "email": "other@mimora.app"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn profile_update_changes_only_given_fields() {
    let state = AppState::new();
    let id = register(&state, "artist", "ana").await;
    let response = send(
        &state,
        "PATCH",
        &format!("/v1/profiles/{id}"),
        None,
        Some(json!({"city": "Pune", "profession": ["bridal", "editorial"]})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["city"], "Pune");
    assert_eq!(body["profession"], json!(["bridal", "editorial"]));
    assert_eq!(body["email"], "ana@mimora.app");
    assert_eq!(body["kyc_verified"], false);
}

#[tokio::test]
async fn location_update_builds_the_address() {
    let state = AppState::new();
    let id = register(&state, "customer", "cara").await;
    let response = send(
        &state,
        "PUT",
        &format!("/v1/profiles/{id}/location"),
        None,
        Some(json!({
            "latitude": 19.06,
            "longitude": 72.83,
            "flat_building": "12B Sea View",
            "street_area": "Linking Road",
            "landmark": "",
            "city": "Mumbai",
            "state": "Maharashtra",
            "pincode": "400050"
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["address"],
        "12B Sea View, Linking Road, Mumbai, Maharashtra, 400050"
    );
    assert_eq!(body["latitude"], 19.06);
    assert_eq!(body["longitude"], 72.83);
    assert!(body.get("landmark").is_none());

    let stored = state.store.get_profile(id).await.unwrap().unwrap();
    assert_eq!(stored.pincode.as_deref(), Some("400050"));
    assert_eq!(stored.city.as_deref(), Some("Mumbai"));

    let bad = send(
        &state,
        "PUT",
        &format!("/v1/profiles/{id}/location"),
        None,
        Some(json!({"latitude": 95.0, "longitude": 72.83})),
    )
    .await;
    assert_eq!(bad.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn location_update_is_profile_scoped() {
    let state = with_auth(AppState::new());
    let own = register_as(
        &state,
        TOKEN,
        json!({"role": "customer", "username": "cara", "email": "cara@mimora.app"}),
    )
    .await;
    let other = register_as(
        &state,
        TOKEN,
        json!({"role": "customer", "username": "dev", "email": "dev@mimora.app"}),
    )
    .await;
    let token = format!("customer:{own}:{TOKEN}");
    let location = json!({"latitude": 18.52, "longitude": 73.84, "city": "Pune"});

    let mine = send(
        &state,
        "PUT",
        &format!("/v1/profiles/{own}/location"),
        Some(&token),
        Some(location.clone()),
    )
    .await;
    assert_eq!(mine.status(), StatusCode::OK);
    let theirs = send(
        &state,
        "PUT",
        &format!("/v1/profiles/{other}/location"),
        Some(&token),
        Some(location),
    )
    .await;
    assert_eq!(theirs.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn account_check_looks_up_email_or_phone_without_auth() {
    let state = with_auth(AppState::new());
    register_as(
        &state,
        TOKEN,
        json!({"role": "artist", "username": "ana", "email": "ana@mimora.app"}),
    )
    .await;
    register_as(
        &state,
        TOKEN,
        json!({"role": "customer", "username": "cara", "phone_number": "+919876543210"}),
    )
    .await;

    let by_email = body_json(check_account(&state, "Ana@Mimora.app", "email").await).await;
    assert_eq!(by_email, json!({"exists": true, "user_type": "artist"}));

    let by_phone = body_json(check_account(&state, "+919876543210", "phone").await).await;
    assert_eq!(by_phone, json!({"exists": true, "user_type": "customer"}));

    let missing = body_json(check_account(&state, "+910000000000", "phone").await).await;
    assert_eq!(missing, json!({"exists": false, "user_type": null}));

    let bad_type = check_account(&state, "ana", "username").await;
    assert_eq!(bad_type.status(), StatusCode::BAD_REQUEST);

    let bad_phone = check_account(&state, "12-34", "phone").await;
    assert_eq!(bad_phone.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

async fn check_account(state: &AppState, identifier: &str, kind: &str) -> axum::http::Response<Body> {
    send(
        state,
        "POST",
        "/v1/profiles/check",
        None,
        Some(json!({"identifier": identifier, "type": kind})),
    )
    .await
}

// -- Email login -------------------------------------------------------------

/// Helper: state with a mail relay on the mock server.
async fn login_state(server: &MockServer) -> AppState {
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
    let mailer = Mailer::new(&server.uri(), "sg-key", "noreply@mimora.app").unwrap();
    AppState::new().with_mailer(Some(mailer))
}

/// The code sent in the most recent mail.
async fn last_mailed_code(server: &MockServer) -> String {
    let received = server.received_requests().await.unwrap();
    let mail: Value = serde_json::from_slice(&received.last().unwrap().body).unwrap();
    let text = mail["content"][0]["value"].as_str().unwrap().to_string();
    text.split_whitespace()
        .map(|w| w.trim_end_matches('.'))
        .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn email_login_creates_then_finds_the_customer() {
    let server = MockServer::start().await;
    let state = login_state(&server).await;

    let issued = send(
        &state,
        "POST",
        "/v1/auth/email/otp",
        None,
        Some(json!({"email": "Cara@Mimora.app", "username": "cara"})),
    )
    .await;
    assert_eq!(issued.status(), StatusCode::OK);
    let issued = body_json(issued).await;
    assert_eq!(issued["expires_in"], 300);
    assert_eq!(issued["email"], "cara@mimora.app");

    let code = last_mailed_code(&server).await;
    let verified = send(
        &state,
        "POST",
        "/v1/auth/email/verify",
        None,
        Some(json!({"email": "cara@mimora.app", "otp": code})),
    )
    .await;
    assert_eq!(verified.status(), StatusCode::OK);
    let verified = body_json(verified).await;
    assert_eq!(verified["created"], true);
    assert_eq!(verified["profile"]["role"], "customer");
    assert_eq!(verified["profile"]["username"], "cara");

    // A used code cannot be replayed.
    let replay = send(
        &state,
        "POST",
        "/v1/auth/email/verify",
        None,
        Some(json!({"email": "cara@mimora.app", "otp": code})),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    send(&state, "POST", "/v1/auth/email/otp", None, Some(json!({"email": "cara@mimora.app"}))).await;
    let code = last_mailed_code(&server).await;
    let again = body_json(
        send(
            &state,
            "POST",
            "/v1/auth/email/verify",
            None,
            Some(json!({"email": "cara@mimora.app", "otp": code})),
        )
        .await,
    )
    .await;
    assert_eq!(again["created"], false);
    assert_eq!(again["profile"]["id"], verified["profile"]["id"]);
}

#[tokio::test]
async fn wrong_code_is_401() {
    let server = MockServer::start().await;
    let state = login_state(&server).await;
    send(&state, "POST", "/v1/auth/email/otp", None, Some(json!({"email": "cara@mimora.app"}))).await;
    let code = last_mailed_code(&server).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let response = send(
        &state,
        "POST",
        "/v1/auth/email/verify",
        None,
        Some(json!({"email": "cara@mimora.app", "otp": wrong})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verify_without_issued_code_is_401() {
    let state = AppState::new();
    let response = send(
        &state,
        "POST",
        "/v1/auth/email/verify",
        None,
        Some(json!({"email": "cara@mimora.app", "otp": "123456"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn email_login_without_mailer_is_503() {
    let state = AppState::new();
    let response = send(
        &state,
        "POST",
        "/v1/auth/email/otp",
        None,
        Some(json!({"email": "cara@mimora.app"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn code_issue_is_rate_limited() {
    let state = AppState::new();
    let app = mimora_api::app(state);
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/email/otp")
                    .header("content-type", "application/json")
                    .header("x-forwarded-for", "203.0.113.7")
                    .body(Body::from(r#"{"email":"cara@mimora.app"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        statuses.push(response.status());
    }
    assert!(statuses[..5]
        .iter()
        .all(|s| *s == StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
}

// -- OpenAPI -----------------------------------------------------------------

#[tokio::test]
async fn openapi_lists_kyc_routes() {
    let state = AppState::new();
    let spec = body_json(send(&state, "GET", "/openapi.json", None, None).await).await;
    assert!(spec["paths"]["/v1/kyc/{profile_id}/start"].is_object());
    assert!(spec["paths"]["/v1/kyc/webhook"].is_object());
    assert!(spec["paths"]["/v1/profiles/check"].is_object());
}
