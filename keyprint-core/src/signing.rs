//! Challenge signing primitives
//!
//! A challenge is proven by signing a CBOR-encoded payload that covers the
//! challenge id, the nonce, *and* the device id. Including the device id
//! binds the signature to one registration, so a captured signature cannot
//! be replayed from another device. Signatures use ML-DSA-65 (FIPS 204);
//! the secret key never leaves the [`crate::capability::CapabilityGate`]
//! that created it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pqcrypto_mldsa::mldsa65;
use pqcrypto_traits::sign::{PublicKey, SignedMessage};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::error::{KeyprintError, Result};

/// The signable portion of a challenge-response round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    /// Server-issued challenge id
    pub challenge_id: String,
    /// Device the signature is bound to
    pub device_id: String,
    /// Raw challenge nonce (decoded from the wire base64)
    pub nonce: Vec<u8>,
}

impl ChallengePayload {
    /// Build a payload from the wire-format challenge fields.
    pub fn from_wire(challenge_id: &str, challenge_b64: &str, device_id: &str) -> Result<Self> {
        let nonce = decode_b64(challenge_b64)?;
        Ok(Self {
            challenge_id: challenge_id.to_string(),
            device_id: device_id.to_string(),
            nonce,
        })
    }

    /// Serialize the payload to CBOR bytes for signing.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| KeyprintError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }
}

/// Device-bound ML-DSA-65 keypair.
///
/// Outside of tests this lives inside a [`crate::capability::CapabilityGate`]
/// implementation; the secret half is never serialized or exposed.
pub struct DeviceKeyPair {
    public: mldsa65::PublicKey,
    secret: mldsa65::SecretKey,
}

impl DeviceKeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let (public, secret) = mldsa65::keypair();
        Self { public, secret }
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    /// Base64-encoded public key, as sent in `RegisterRequest.publicKey`.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// Sign a challenge payload, returning the raw signed message bytes.
    pub fn sign(&self, payload: &ChallengePayload) -> Result<Vec<u8>> {
        let signable = payload.to_cbor()?;
        let signed = mldsa65::sign(&signable, &self.secret);
        Ok(signed.as_bytes().to_vec())
    }

    /// Sign a challenge payload and base64-encode it for the wire.
    pub fn sign_b64(&self, payload: &ChallengePayload) -> Result<String> {
        Ok(BASE64.encode(self.sign(payload)?))
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("fingerprint", &key_fingerprint(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Verify a signature over a challenge payload against a public key.
///
/// Returns `Ok(false)` on a well-formed but non-matching signature; only
/// malformed key or signature material is an error.
pub fn verify_signature(
    public_key: &[u8],
    signature: &[u8],
    payload: &ChallengePayload,
) -> Result<bool> {
    let signable = payload.to_cbor()?;

    let public_key = mldsa65::PublicKey::from_bytes(public_key)
        .map_err(|_| KeyprintError::SignatureError("Invalid public key".into()))?;

    let signed = match mldsa65::SignedMessage::from_bytes(signature) {
        Ok(signed) => signed,
        // A truncated or garbage signature is a mismatch, not an error
        Err(_) => return Ok(false),
    };

    match mldsa65::open(&signed, &public_key) {
        Ok(verified) => Ok(verified == signable),
        Err(_) => Ok(false),
    }
}

/// SHA3-256 fingerprint of a public key, hex-encoded.
///
/// Used as the opaque `biometricKey` handle the API exposes; the raw key
/// itself is never echoed back.
pub fn key_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Decode base64 wire data.
pub fn decode_b64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| KeyprintError::SerializationError(format!("Base64 decode error: {e}")))
}

/// Encode bytes as base64 wire data.
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ChallengePayload {
        ChallengePayload {
            challenge_id: "ch-1".into(),
            device_id: "dev-1".into(),
            nonce: vec![7u8; 32],
        }
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let keys = DeviceKeyPair::generate();
        let sig = keys.sign(&payload()).expect("signing failed");

        let valid = verify_signature(&keys.public_key_bytes(), &sig, &payload())
            .expect("verification call failed");
        assert!(valid, "own signature should verify");
    }

    #[test]
    fn test_signature_bound_to_device() {
        let keys = DeviceKeyPair::generate();
        let sig = keys.sign(&payload()).expect("signing failed");

        let mut other_device = payload();
        other_device.device_id = "dev-2".into();

        let valid = verify_signature(&keys.public_key_bytes(), &sig, &other_device)
            .expect("verification call failed");
        assert!(!valid, "signature must not verify for another device");
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let keys = DeviceKeyPair::generate();
        let other = DeviceKeyPair::generate();
        let sig = keys.sign(&payload()).expect("signing failed");

        let valid = verify_signature(&other.public_key_bytes(), &sig, &payload())
            .expect("verification call failed");
        assert!(!valid);
    }

    #[test]
    fn test_garbage_signature_is_mismatch_not_error() {
        let keys = DeviceKeyPair::generate();
        let valid = verify_signature(&keys.public_key_bytes(), b"not-a-signature", &payload())
            .expect("verification call failed");
        assert!(!valid);
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let keys = DeviceKeyPair::generate();
        let fp1 = key_fingerprint(&keys.public_key_bytes());
        let fp2 = key_fingerprint(&keys.public_key_bytes());
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
    }

    #[test]
    fn test_payload_from_wire_rejects_bad_base64() {
        assert!(ChallengePayload::from_wire("ch-1", "!!!", "dev-1").is_err());
    }
}
