//! Signature verification pipeline
//!
//! Every authentication attempt burns its challenge first, then walks the
//! remaining checks in a fixed order: challenge liveness, device status,
//! signature. A failed attempt therefore never leaves a reusable challenge
//! behind, and the first check to fail names the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use keyprint_core::signing::{self, ChallengePayload};

use super::challenge::{ChallengeStore, ConsumeOutcome};
use super::registry::{DeviceRegistry, RegistrationRecord, StorageError};

/// Outcome of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Verified,
    /// Challenge expired, or was never issued (evicted challenges are
    /// indistinguishable from expired ones)
    ChallengeExpired,
    ChallengeAlreadyConsumed,
    DeviceUnknown,
    DeviceRevoked,
    SignatureMismatch,
}

impl AuthOutcome {
    /// Stable error code surfaced to clients
    pub fn code(&self) -> &'static str {
        match self {
            AuthOutcome::Verified => "VERIFIED",
            AuthOutcome::ChallengeExpired => "CHALLENGE_EXPIRED",
            AuthOutcome::ChallengeAlreadyConsumed => "CHALLENGE_ALREADY_CONSUMED",
            AuthOutcome::DeviceUnknown => "DEVICE_UNKNOWN",
            AuthOutcome::DeviceRevoked => "DEVICE_REVOKED",
            AuthOutcome::SignatureMismatch => "SIGNATURE_MISMATCH",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthOutcome::Verified => "Signature verified",
            AuthOutcome::ChallengeExpired => "Challenge expired or unknown",
            AuthOutcome::ChallengeAlreadyConsumed => "Challenge already consumed",
            AuthOutcome::DeviceUnknown => "Device is not registered",
            AuthOutcome::DeviceRevoked => "Device registration has been revoked",
            AuthOutcome::SignatureMismatch => "Signature verification failed",
        }
    }
}

/// The audit record of one verification attempt.
#[derive(Debug)]
pub struct AuthDecision {
    pub challenge_id: String,
    pub device_id: String,
    pub verified_at: DateTime<Utc>,
    pub outcome: AuthOutcome,
    /// Populated only when the outcome is `Verified`
    pub registration: Option<RegistrationRecord>,
}

/// Verifies signed challenges against the device registry.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    challenges: Arc<ChallengeStore>,
    registry: Arc<DeviceRegistry>,
}

impl SignatureVerifier {
    pub fn new(challenges: Arc<ChallengeStore>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            challenges,
            registry,
        }
    }

    /// Verify one authentication attempt.
    ///
    /// `expected_user` restricts the lookup to a device registered to that
    /// user; `None` accepts whichever user the device key belongs to.
    pub async fn verify(
        &self,
        challenge_id: &str,
        device_id: &str,
        signature_b64: &str,
        expected_user: Option<&str>,
    ) -> Result<AuthDecision, StorageError> {
        let now = Utc::now();
        let outcome = self
            .run_checks(challenge_id, device_id, signature_b64, expected_user, now)
            .await?;

        let (outcome, registration) = match outcome {
            CheckResult::Verified(record) => (AuthOutcome::Verified, Some(record)),
            CheckResult::Rejected(outcome) => (outcome, None),
        };

        if outcome == AuthOutcome::Verified {
            self.registry.touch_last_used(device_id).await?;
            tracing::info!(
                challenge_id = %challenge_id,
                device_id = %device_id,
                "Biometric signature verified"
            );
        } else {
            tracing::warn!(
                challenge_id = %challenge_id,
                device_id = %device_id,
                code = outcome.code(),
                "Biometric verification rejected"
            );
        }

        Ok(AuthDecision {
            challenge_id: challenge_id.to_string(),
            device_id: device_id.to_string(),
            verified_at: now,
            outcome,
            registration,
        })
    }

    async fn run_checks(
        &self,
        challenge_id: &str,
        device_id: &str,
        signature_b64: &str,
        expected_user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CheckResult, StorageError> {
        // Consume first. Whatever happens next, the challenge is spent.
        let challenge = match self.challenges.consume(challenge_id, device_id) {
            ConsumeOutcome::Consumed(challenge) => challenge,
            ConsumeOutcome::NotFound => {
                return Ok(CheckResult::Rejected(AuthOutcome::ChallengeExpired))
            }
            ConsumeOutcome::AlreadyConsumed => {
                return Ok(CheckResult::Rejected(AuthOutcome::ChallengeAlreadyConsumed))
            }
            ConsumeOutcome::BoundDeviceMismatch => {
                return Ok(CheckResult::Rejected(AuthOutcome::SignatureMismatch))
            }
        };

        if challenge.is_expired_at(now) {
            return Ok(CheckResult::Rejected(AuthOutcome::ChallengeExpired));
        }

        let Some(record) = self.registry.lookup(device_id).await? else {
            return Ok(CheckResult::Rejected(AuthOutcome::DeviceUnknown));
        };
        if let Some(user_id) = expected_user {
            if record.user_id != user_id {
                return Ok(CheckResult::Rejected(AuthOutcome::DeviceUnknown));
            }
        }
        if !record.is_active() {
            return Ok(CheckResult::Rejected(AuthOutcome::DeviceRevoked));
        }

        let payload = ChallengePayload {
            challenge_id: challenge.id.clone(),
            device_id: device_id.to_string(),
            nonce: challenge.nonce.clone(),
        };

        let verified = decode_and_verify(&record.public_key, signature_b64, &payload);
        if verified {
            Ok(CheckResult::Verified(record))
        } else {
            Ok(CheckResult::Rejected(AuthOutcome::SignatureMismatch))
        }
    }
}

enum CheckResult {
    Verified(RegistrationRecord),
    Rejected(AuthOutcome),
}

/// Decode the base64 inputs and verify. Any malformed input reads as a
/// signature mismatch, never as a server error.
fn decode_and_verify(public_key_b64: &str, signature_b64: &str, payload: &ChallengePayload) -> bool {
    let Ok(public_key) = signing::decode_b64(public_key_b64) else {
        return false;
    };
    let Ok(signature) = signing::decode_b64(signature_b64) else {
        return false;
    };
    signing::verify_signature(&public_key, &signature, payload).unwrap_or(false)
}
