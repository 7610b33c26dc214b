//! API integration tests for keyprint-server.
//!
//! These tests drive the HTTP API through the real router, covering the
//! full register / challenge / authenticate flow plus the registration
//! management endpoints.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use keyprint_core::signing::{self, ChallengePayload, DeviceKeyPair};
use keyprint_server::{create_router, AppState, Config, DeviceRegistry};

/// Build the test router plus the state behind it, so tests can mint
/// bearer tokens and inspect the stores directly.
fn create_test_app() -> (Router, AppState) {
    let config = Config::default();
    let state = AppState::new(&config, DeviceRegistry::in_memory());
    let app = create_router(state.clone(), &config);
    (app, state)
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Request a challenge, optionally bound to a device.
async fn request_challenge(app: &Router, device_id: Option<&str>) -> (String, Vec<u8>) {
    let body = match device_id {
        Some(id) => json!({ "deviceId": id }),
        None => json!({}),
    };
    let (status, json) = send_json(
        app,
        Method::POST,
        "/api/v1/biometric/challenge",
        None,
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let challenge_id = json["challengeId"].as_str().unwrap().to_string();
    let nonce = signing::decode_b64(json["challenge"].as_str().unwrap()).unwrap();
    (challenge_id, nonce)
}

fn sign_challenge(keypair: &DeviceKeyPair, challenge_id: &str, device_id: &str, nonce: &[u8]) -> String {
    let payload = ChallengePayload {
        challenge_id: challenge_id.to_string(),
        device_id: device_id.to_string(),
        nonce: nonce.to_vec(),
    };
    keypair.sign_b64(&payload).unwrap()
}

/// Register a device key for a user through the API, proving possession.
async fn register_device(
    app: &Router,
    state: &AppState,
    user_id: &str,
    device_id: &str,
) -> DeviceKeyPair {
    let keypair = DeviceKeyPair::generate();
    let token = state.tokens.issue_access(user_id).unwrap();
    let (challenge_id, nonce) = request_challenge(app, Some(device_id)).await;
    let signature = sign_challenge(&keypair, &challenge_id, device_id, &nonce);

    let (status, json) = send_json(
        app,
        Method::POST,
        "/api/v1/biometric/register",
        Some(&token),
        Some(json!({
            "publicKey": keypair.public_key_b64(),
            "deviceId": device_id,
            "deviceInfo": { "platform": "ios", "model": "iPhone 15", "osVersion": "17.4" },
            "signature": signature,
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "registration failed: {json}");
    assert_eq!(json["deviceId"], device_id);
    assert_eq!(json["biometricKey"].as_str().unwrap().len(), 64);

    keypair
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (app, _) = create_test_app();

    let (status, json) = send_json(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage_persistent"], false);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let (app, _) = create_test_app();

    let (status, json) = send_json(&app, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

// ============================================================================
// Challenge Tests
// ============================================================================

#[tokio::test]
async fn test_challenge_issuance_shape() {
    let (app, _) = create_test_app();

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/challenge",
        None,
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["challengeId"].is_string());
    assert!(json["expiresAt"].is_string());
    let nonce = signing::decode_b64(json["challenge"].as_str().unwrap()).unwrap();
    assert_eq!(nonce.len(), 32);
}

#[tokio::test]
async fn test_challenges_are_unique() {
    let (app, _) = create_test_app();

    let (id_a, nonce_a) = request_challenge(&app, None).await;
    let (id_b, nonce_b) = request_challenge(&app, None).await;
    assert_ne!(id_a, id_b);
    assert_ne!(nonce_a, nonce_b);
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_register_requires_bearer_token() {
    let (app, _) = create_test_app();

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/register",
        None,
        Some(json!({
            "publicKey": "cGs=",
            "deviceId": "dev-1",
            "deviceInfo": { "platform": "ios", "model": "iPhone 15", "osVersion": "17.4" },
            "signature": "c2ln",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_wrong_key_possession_proof() {
    let (app, state) = create_test_app();
    let token = state.tokens.issue_access("user-1").unwrap();

    // Sign with one keypair, submit another's public key
    let signer = DeviceKeyPair::generate();
    let submitted = DeviceKeyPair::generate();
    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;
    let signature = sign_challenge(&signer, &challenge_id, "dev-1", &nonce);

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/register",
        Some(&token),
        Some(json!({
            "publicKey": submitted.public_key_b64(),
            "deviceId": "dev-1",
            "deviceInfo": { "platform": "ios", "model": "iPhone 15", "osVersion": "17.4" },
            "signature": signature,
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_key_swap_conflicts() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;

    // Same device, different key
    let token = state.tokens.issue_access("user-1").unwrap();
    let other = DeviceKeyPair::generate();
    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;
    let signature = sign_challenge(&other, &challenge_id, "dev-1", &nonce);

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/register",
        Some(&token),
        Some(json!({
            "publicKey": other.public_key_b64(),
            "deviceId": "dev-1",
            "deviceInfo": { "platform": "ios", "model": "iPhone 15", "osVersion": "17.4" },
            "signature": signature,
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "DEVICE_ALREADY_REGISTERED");
}

// ============================================================================
// Authentication Flow Tests
// ============================================================================

#[tokio::test]
async fn test_full_authentication_flow() {
    let (app, state) = create_test_app();
    let keypair = register_device(&app, &state, "user-1", "dev-1").await;

    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;
    let signature = sign_challenge(&keypair, &challenge_id, "dev-1", &nonce);

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": signature,
            "deviceId": "dev-1",
            "challengeId": challenge_id,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "authentication failed: {json}");
    assert_eq!(json["user"]["id"], "user-1");
    assert!(json["refreshToken"].is_string());

    // The minted access token works against a protected endpoint
    let claims = state
        .tokens
        .verify_access(json["accessToken"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.sub, "user-1");
}

#[tokio::test]
async fn test_replayed_challenge_rejected() {
    let (app, state) = create_test_app();
    let keypair = register_device(&app, &state, "user-1", "dev-1").await;

    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;
    let signature = sign_challenge(&keypair, &challenge_id, "dev-1", &nonce);
    let body = json!({
        "biometricToken": signature,
        "deviceId": "dev-1",
        "challengeId": challenge_id,
    });

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "CHALLENGE_ALREADY_CONSUMED");
}

#[tokio::test]
async fn test_unknown_challenge_reads_as_expired() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": "c2ln",
            "deviceId": "dev-1",
            "challengeId": "never-issued",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "CHALLENGE_EXPIRED");
}

#[tokio::test]
async fn test_bad_signature_rejected_and_burns_challenge() {
    let (app, state) = create_test_app();
    let keypair = register_device(&app, &state, "user-1", "dev-1").await;

    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;

    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": "bm90LWEtc2lnbmF0dXJl",
            "deviceId": "dev-1",
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "SIGNATURE_MISMATCH");

    // A correct retry is too late, the failed attempt spent the challenge
    let signature = sign_challenge(&keypair, &challenge_id, "dev-1", &nonce);
    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": signature,
            "deviceId": "dev-1",
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "CHALLENGE_ALREADY_CONSUMED");
}

#[tokio::test]
async fn test_authenticate_without_challenge_id_is_bad_request() {
    let (app, _) = create_test_app();

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": "c2ln",
            "deviceId": "dev-1",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Revocation & Management Tests
// ============================================================================

#[tokio::test]
async fn test_revoked_device_cannot_authenticate() {
    let (app, state) = create_test_app();
    let keypair = register_device(&app, &state, "user-1", "dev-1").await;
    let token = state.tokens.issue_access("user-1").unwrap();

    let (status, _) = send_json(
        &app,
        Method::DELETE,
        "/api/v1/biometric/registrations/dev-1",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (challenge_id, nonce) = request_challenge(&app, Some("dev-1")).await;
    let signature = sign_challenge(&keypair, &challenge_id, "dev-1", &nonce);
    let (status, json) = send_json(
        &app,
        Method::POST,
        "/api/v1/biometric/authenticate",
        None,
        Some(json!({
            "biometricToken": signature,
            "deviceId": "dev-1",
            "challengeId": challenge_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "DEVICE_REVOKED");
}

#[tokio::test]
async fn test_revoked_registration_stays_listed() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;
    let token = state.tokens.issue_access("user-1").unwrap();

    send_json(
        &app,
        Method::DELETE,
        "/api/v1/biometric/registrations/dev-1",
        Some(&token),
        None,
    )
    .await;

    let (status, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/registrations",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hasBiometricEnabled"], false);
    assert_eq!(json["registrations"][0]["deviceId"], "dev-1");
    assert_eq!(json["registrations"][0]["status"], "revoked");
}

#[tokio::test]
async fn test_delete_unknown_device_is_not_found() {
    let (app, state) = create_test_app();
    let token = state.tokens.issue_access("user-1").unwrap();

    let (status, _) = send_json(
        &app,
        Method::DELETE,
        "/api/v1/biometric/registrations/no-such-device",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_tracks_registrations() {
    let (app, state) = create_test_app();
    let token = state.tokens.issue_access("user-1").unwrap();

    let (status, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/status",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hasBiometricEnabled"], false);

    register_device(&app, &state, "user-1", "dev-1").await;

    let (_, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/status",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(json["hasBiometricEnabled"], true);
}

#[tokio::test]
async fn test_settings_disable_revokes_all_devices() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;
    register_device(&app, &state, "user-1", "dev-2").await;
    let token = state.tokens.issue_access("user-1").unwrap();

    let (status, json) = send_json(
        &app,
        Method::PUT,
        "/api/v1/biometric/settings",
        Some(&token),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["enabled"], false);

    let (_, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/status",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(json["hasBiometricEnabled"], false);
}

#[tokio::test]
async fn test_settings_disable_single_device_leaves_others() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;
    register_device(&app, &state, "user-1", "dev-2").await;
    let token = state.tokens.issue_access("user-1").unwrap();

    send_json(
        &app,
        Method::PUT,
        "/api/v1/biometric/settings",
        Some(&token),
        Some(json!({ "enabled": false, "deviceId": "dev-1" })),
    )
    .await;

    let (_, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/status",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(json["hasBiometricEnabled"], true);
}

#[tokio::test]
async fn test_users_cannot_revoke_each_others_devices() {
    let (app, state) = create_test_app();
    register_device(&app, &state, "user-1", "dev-1").await;
    let intruder = state.tokens.issue_access("user-2").unwrap();

    let (status, _) = send_json(
        &app,
        Method::DELETE,
        "/api/v1/biometric/registrations/dev-1",
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let owner = state.tokens.issue_access("user-1").unwrap();
    let (_, json) = send_json(
        &app,
        Method::GET,
        "/api/v1/biometric/status",
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(json["hasBiometricEnabled"], true);
}
