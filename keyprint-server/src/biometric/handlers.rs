//! Biometric HTTP endpoint handlers
//!
//! Implements the challenge, registration and authentication flows plus the
//! per-user registration management endpoints.
//!
//! Challenge and authenticate are reachable without a session: they ARE the
//! login. Everything else requires a bearer token.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use keyprint_core::protocol::{
    AuthenticateRequest, AuthenticateResponse, ChallengeRequest, ChallengeResponse, DeviceInfo,
    RegisterRequest, RegisterResponse, RegistrationView, RegistrationsResponse, SettingsRequest,
    SettingsResponse, StatusResponse,
};
use keyprint_core::signing::{self, ChallengePayload};

use super::challenge::ConsumeOutcome;
use super::registry::{RegisterOutcome, RegistrationRecord};
use super::verifier::AuthOutcome;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/v1/biometric/challenge
///
/// Issue a fresh single-use challenge. Unauthenticated: challenges are
/// worthless without a registered device key.
#[utoipa::path(
    post,
    path = "/api/v1/biometric/challenge",
    tag = "Biometric",
    request_body = ChallengeRequest,
    responses(
        (status = 200, description = "Challenge issued", body = ChallengeResponse),
        (status = 503, description = "Entropy source unavailable")
    )
)]
pub async fn issue_challenge(
    State(state): State<AppState>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.challenges.issue(req.device_id.as_deref())?;

    Ok(Json(ChallengeResponse {
        challenge_id: challenge.id,
        challenge: signing::encode_b64(&challenge.nonce),
        expires_at: challenge.expires_at,
    }))
}

/// POST /api/v1/biometric/register
///
/// Register a device public key for the authenticated user. When a
/// `challengeId` is supplied the signature must prove possession of the
/// submitted key; the challenge is consumed either way.
#[utoipa::path(
    post,
    path = "/api/v1/biometric/register",
    tag = "Biometric",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Device registered", body = RegisterResponse),
        (status = 400, description = "Malformed key or failed possession proof"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 409, description = "Device already carries a different key")
    ),
    security(("bearer_auth" = []))
)]
pub async fn register_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let public_key = signing::decode_b64(&req.public_key)
        .map_err(|_| ApiError::bad_request("publicKey is not valid base64"))?;
    if public_key.is_empty() {
        return Err(ApiError::bad_request("publicKey must not be empty"));
    }

    if let Some(challenge_id) = &req.challenge_id {
        prove_possession(&state, challenge_id, &req.device_id, &public_key, &req.signature)?;
    }

    let fingerprint = signing::key_fingerprint(&public_key);
    let outcome = state
        .registry
        .register(
            &user.user_id,
            &req.device_id,
            &req.public_key,
            &fingerprint,
            Some(req.device_info),
        )
        .await?;

    let record = match outcome {
        RegisterOutcome::Registered(record) => record,
        RegisterOutcome::AlreadyRegistered => {
            return Err(ApiError::conflict(
                "DEVICE_ALREADY_REGISTERED",
                "Device already carries an active key",
            ))
        }
    };

    tracing::info!(device_id = %record.device_id, "Biometric device registered");

    Ok(Json(RegisterResponse {
        biometric_key: record.biometric_key,
        device_id: record.device_id,
        registered_at: record.registered_at,
    }))
}

/// Verify a registration signature against the submitted key, consuming
/// the named challenge.
fn prove_possession(
    state: &AppState,
    challenge_id: &str,
    device_id: &str,
    public_key: &[u8],
    signature_b64: &str,
) -> Result<(), ApiError> {
    let challenge = match state.challenges.consume(challenge_id, device_id) {
        ConsumeOutcome::Consumed(challenge) => challenge,
        ConsumeOutcome::NotFound => {
            return Err(ApiError::bad_request("Challenge expired or unknown"))
        }
        ConsumeOutcome::AlreadyConsumed => {
            return Err(ApiError::bad_request("Challenge already consumed"))
        }
        ConsumeOutcome::BoundDeviceMismatch => {
            return Err(ApiError::bad_request("Challenge bound to another device"))
        }
    };
    if challenge.is_expired_at(chrono::Utc::now()) {
        return Err(ApiError::bad_request("Challenge expired or unknown"));
    }

    let payload = ChallengePayload {
        challenge_id: challenge.id,
        device_id: device_id.to_string(),
        nonce: challenge.nonce,
    };
    let signature = signing::decode_b64(signature_b64)
        .map_err(|_| ApiError::bad_request("signature is not valid base64"))?;

    let verified = signing::verify_signature(public_key, &signature, &payload)
        .map_err(|_| ApiError::bad_request("publicKey is not a valid signing key"))?;
    if !verified {
        return Err(ApiError::bad_request(
            "Signature does not prove possession of the submitted key",
        ));
    }
    Ok(())
}

/// POST /api/v1/biometric/authenticate
///
/// Exchange a signed challenge for a session token pair. Unauthenticated:
/// this endpoint is the login itself.
#[utoipa::path(
    post,
    path = "/api/v1/biometric/authenticate",
    tag = "Biometric",
    request_body = AuthenticateRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthenticateResponse),
        (status = 400, description = "Missing challengeId"),
        (status = 401, description = "Verification rejected, code names the reason")
    )
)]
pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    let challenge_id = req
        .challenge_id
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("challengeId is required"))?;

    let decision = state
        .verifier
        .verify(
            challenge_id,
            &req.device_id,
            &req.biometric_token,
            req.user_id.as_deref(),
        )
        .await?;

    let record = match (decision.outcome, decision.registration) {
        (AuthOutcome::Verified, Some(record)) => record,
        (outcome, _) => return Err(ApiError::auth_error(outcome.code(), outcome.message())),
    };

    let tokens = state.tokens.issue_session(&record.user_id)?;

    Ok(Json(AuthenticateResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        user: serde_json::json!({ "id": record.user_id }),
    }))
}

/// GET /api/v1/biometric/registrations
///
/// List the caller's device registrations, revoked ones included.
#[utoipa::path(
    get,
    path = "/api/v1/biometric/registrations",
    tag = "Biometric",
    responses(
        (status = 200, description = "Registration list", body = RegistrationsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_registrations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<RegistrationsResponse>, ApiError> {
    let records = state.registry.list_for(&user.user_id).await?;
    let has_biometric_enabled = records.iter().any(RegistrationRecord::is_active);
    let registrations = records.into_iter().map(registration_view).collect();

    Ok(Json(RegistrationsResponse {
        has_biometric_enabled,
        registrations,
    }))
}

/// GET /api/v1/biometric/status
///
/// Whether the caller has at least one active device registration.
#[utoipa::path(
    get,
    path = "/api/v1/biometric/status",
    tag = "Biometric",
    responses(
        (status = 200, description = "Enablement status", body = StatusResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<StatusResponse>, ApiError> {
    let has_biometric_enabled = state.registry.has_enabled(&user.user_id).await?;
    Ok(Json(StatusResponse {
        has_biometric_enabled,
    }))
}

/// PUT /api/v1/biometric/settings
///
/// Update biometric enablement. Disabling revokes the named device, or
/// every active registration when no device is given. Enabling is a no-op
/// server-side; registration is the act that enables.
#[utoipa::path(
    put,
    path = "/api/v1/biometric/settings",
    tag = "Biometric",
    request_body = SettingsRequest,
    responses(
        (status = 200, description = "Settings applied", body = SettingsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    if !req.enabled {
        match &req.device_id {
            Some(device_id) => {
                state.registry.revoke(&user.user_id, device_id).await?;
            }
            None => {
                let revoked = state.registry.revoke_all(&user.user_id).await?;
                tracing::info!(revoked, "Biometric disabled for all devices");
            }
        }
    }

    Ok(Json(SettingsResponse {
        enabled: req.enabled,
        device_id: req.device_id,
    }))
}

/// DELETE /api/v1/biometric/registrations/{deviceId}
///
/// Revoke one device registration. The record stays queryable as revoked.
#[utoipa::path(
    delete,
    path = "/api/v1/biometric/registrations/{deviceId}",
    tag = "Biometric",
    params(("deviceId" = String, Path, description = "Device to revoke")),
    responses(
        (status = 204, description = "Registration revoked"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "No active registration for this device")
    ),
    security(("bearer_auth" = []))
)]
pub async fn remove_registration(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let revoked = state.registry.revoke(&user.user_id, &device_id).await?;
    if !revoked {
        return Err(ApiError::not_found("No active registration for this device"));
    }

    tracing::info!(device_id = %device_id, "Biometric registration revoked");
    Ok(StatusCode::NO_CONTENT)
}

fn registration_view(record: RegistrationRecord) -> RegistrationView {
    let last_used_at = record.last_used_at.unwrap_or(record.registered_at);
    let device_info = record.device_info.unwrap_or(DeviceInfo {
        platform: "unknown".into(),
        model: "unknown".into(),
        os_version: "unknown".into(),
    });

    RegistrationView {
        biometric_key: record.biometric_key,
        device_id: record.device_id,
        device_info,
        status: record.status,
        registered_at: record.registered_at,
        last_used_at,
    }
}
