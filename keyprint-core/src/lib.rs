//! Keyprint Core - biometric device-authentication protocol library
//!
//! This crate provides the client half of the Keyprint challenge-response
//! protocol: device-bound ML-DSA-65 signing keys gated behind an OS
//! biometric prompt, wire types for the REST API, and the enablement state
//! machine that orchestrates enable / authenticate / disable.
//!
//! # Features
//!
//! - Post-quantum signatures using ML-DSA-65 (FIPS 204)
//! - Signed payloads bound to a device id (no cross-device replay)
//! - Capability-gated key use: every signature requires a fresh local
//!   biometric unlock
//! - Explicit state machine for the enablement lifecycle
//!
//! # Example
//!
//! ```no_run
//! use keyprint_core::{
//!     DeviceInfo, EnablementStateMachine, HttpApiConfig, HttpBiometricApi, MemoryStateStore,
//!     SoftwareKeyGate,
//! };
//!
//! # async fn example() -> keyprint_core::Result<()> {
//! let gate = SoftwareKeyGate::new();
//! let api = HttpBiometricApi::new(
//!     HttpApiConfig::new("https://api.example.org").with_bearer_token("token"),
//! )?;
//! let store = MemoryStateStore::new();
//! let device_info = DeviceInfo {
//!     platform: "android".into(),
//!     model: "Pixel 8".into(),
//!     os_version: "14".into(),
//! };
//!
//! let mut machine = EnablementStateMachine::new(gate, api, store, device_info).await?;
//! machine.enable().await?;
//! let _session = machine.authenticate().await?;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod client;
pub mod enablement;
pub mod error;
pub mod protocol;
pub mod signing;

// Re-export main types for convenience
pub use capability::{
    BiometricCapabilities, BiometricFactor, CapabilityGate, PromptGuard, PromptScript,
    SecurityLevel, SoftwareKeyGate,
};
pub use client::BiometricApi;
pub use enablement::{EnablementState, EnablementStateMachine, LocalState, LocalStateStore, MemoryStateStore};
pub use error::{KeyprintError, Result};
pub use protocol::{
    AuthenticateRequest, AuthenticateResponse, ChallengeRequest, ChallengeResponse, DeviceInfo,
    RegisterRequest, RegisterResponse, RegistrationStatus, RegistrationView,
    RegistrationsResponse, SettingsRequest, SettingsResponse, StatusResponse,
};
pub use signing::{
    decode_b64, encode_b64, key_fingerprint, verify_signature, ChallengePayload, DeviceKeyPair,
};

#[cfg(feature = "client")]
pub use client::{HttpApiConfig, HttpBiometricApi};
