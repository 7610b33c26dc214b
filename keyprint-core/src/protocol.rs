//! Wire types for the biometric authentication REST API
//!
//! Field names are camelCase to match the existing mobile client contract.
//! These shapes are shared by the HTTP client and the server handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Device hardware/software description captured at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// OS platform ("ios", "android")
    #[schema(example = "ios")]
    pub platform: String,
    /// Device model
    #[schema(example = "iPhone 15 Pro")]
    pub model: String,
    /// OS version string
    #[schema(example = "17.4")]
    pub os_version: String,
}

/// Lifecycle status of a device registration
///
/// Revoked is terminal: a revoked registration is never reactivated or
/// deleted, it stays queryable for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Active,
    Revoked,
}

/// Request body for `POST /biometric/challenge`
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// Optional device hint; when present the challenge is bound to this
    /// device at issuance instead of on first verification attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Response for `POST /biometric/challenge`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// Server-side identifier for this challenge
    pub challenge_id: String,
    /// Base64-encoded random nonce (256 bits) to sign
    pub challenge: String,
    /// When the challenge stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /biometric/register`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Base64-encoded ML-DSA-65 public key of the device-bound keypair
    pub public_key: String,
    /// Client-generated opaque device identifier, stable per install
    pub device_id: String,
    pub device_info: DeviceInfo,
    /// Base64-encoded signature over the registration challenge,
    /// proving possession of the private key
    pub signature: String,
    /// Challenge the signature covers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
}

/// Response for `POST /biometric/register`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Opaque server-side handle for the registered key
    pub biometric_key: String,
    pub device_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Request body for `POST /biometric/authenticate`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// Optional cross-check against the registration's owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Base64-encoded signature over the challenge payload
    pub biometric_token: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
}

/// Response for `POST /biometric/authenticate`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// User profile as issued by the token layer
    pub user: serde_json::Value,
}

/// One registration entry in `GET /biometric/registrations`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    pub biometric_key: String,
    pub device_id: String,
    pub device_info: DeviceInfo,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Response for `GET /biometric/registrations`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationsResponse {
    pub has_biometric_enabled: bool,
    pub registrations: Vec<RegistrationView>,
}

/// Response for `GET /biometric/status`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub has_biometric_enabled: bool,
}

/// Request body for `PUT /biometric/settings`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    pub enabled: bool,
    /// Device to act on; when disabling without a device id, all of the
    /// caller's registrations are revoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Response for `PUT /biometric/settings`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}
