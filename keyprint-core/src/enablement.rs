//! Enablement state machine
//!
//! Orchestrates enable / authenticate / disable against the capability
//! gate and the backend API. The machine's state, not a lock, serializes
//! the operations: anything started in the wrong state fails fast with
//! [`KeyprintError::InvalidStateTransition`] instead of blocking.
//!
//! Only two non-secret flags are ever persisted locally: whether biometric
//! login is enabled and the opaque device id. The private key stays inside
//! the capability gate.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::{BiometricCapabilities, CapabilityGate};
use crate::client::BiometricApi;
use crate::error::{KeyprintError, Result};
use crate::protocol::{
    AuthenticateRequest, AuthenticateResponse, DeviceInfo, RegisterRequest,
};
use crate::signing::{encode_b64, ChallengePayload};

/// Enablement lifecycle states.
///
/// `Registering` and `Disabling` exist only for the duration of one
/// operation; an observer never sees a half-enabled machine at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementState {
    /// No usable biometric hardware or nothing enrolled
    Unavailable,
    /// Biometrics usable, not enabled for this account/device
    Available,
    /// `enable()` in flight
    Registering,
    /// Device registered, local flag set
    Enabled,
    /// `disable()` in flight
    Disabling,
}

/// The two non-secret flags persisted on device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub biometric_enabled: bool,
    pub device_id: String,
}

/// Device-local persistence for [`LocalState`].
///
/// Implementations wrap whatever the platform offers (UserDefaults,
/// SharedPreferences); nothing secret ever goes through here.
pub trait LocalStateStore: Send + Sync {
    fn load(&self) -> Result<Option<LocalState>>;
    fn save(&self, state: &LocalState) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<LocalState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<LocalState>> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &LocalState) -> Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.state.lock().unwrap() = None;
        Ok(())
    }
}

/// Outcome codes that invalidate the local enrollment entirely.
///
/// Any of these means the server will never accept this device key again,
/// so the machine drops back to `Available` and clears the enabled flag.
/// The UI must never show "biometric enabled" after the server revoked it.
const FORCE_REENABLE_CODES: &[&str] = &["SIGNATURE_MISMATCH", "DEVICE_REVOKED", "DEVICE_UNKNOWN"];

/// Client-side orchestrator for the biometric factor.
pub struct EnablementStateMachine<G, A, S> {
    gate: G,
    api: A,
    store: S,
    device_info: DeviceInfo,
    state: EnablementState,
}

impl<G: CapabilityGate, A: BiometricApi, S: LocalStateStore> EnablementStateMachine<G, A, S> {
    /// Build the machine and derive its initial state from the capability
    /// probe and the persisted local flags.
    pub async fn new(gate: G, api: A, store: S, device_info: DeviceInfo) -> Result<Self> {
        let mut machine = Self {
            gate,
            api,
            store,
            device_info,
            state: EnablementState::Unavailable,
        };
        machine.refresh_capabilities().await?;
        Ok(machine)
    }

    /// Current state.
    pub fn state(&self) -> EnablementState {
        self.state
    }

    /// Re-probe hardware/enrollment. `Unavailable` is terminal only until
    /// this detects a change (the user may enroll in OS settings at any
    /// time); conversely a device that lost enrollment drops out.
    pub async fn refresh_capabilities(&mut self) -> Result<EnablementState> {
        let caps = self.gate.check_capabilities().await?;
        self.state = self.derive_state(&caps)?;
        Ok(self.state)
    }

    fn derive_state(&self, caps: &BiometricCapabilities) -> Result<EnablementState> {
        if !caps.available() {
            return Ok(EnablementState::Unavailable);
        }
        match self.store.load()? {
            Some(local) if local.biometric_enabled => Ok(EnablementState::Enabled),
            _ => Ok(EnablementState::Available),
        }
    }

    /// Enable the biometric factor: prompt, register the device key with
    /// the backend, persist local flags. Rolls back to `Available` on any
    /// failure; a partial enable is never observable.
    pub async fn enable(&mut self) -> Result<()> {
        if self.state != EnablementState::Available {
            return Err(KeyprintError::InvalidStateTransition {
                operation: "enable",
                state: self.state,
            });
        }
        self.state = EnablementState::Registering;

        match self.run_enable().await {
            Ok(device_id) => {
                self.state = EnablementState::Enabled;
                info!(device_id = %device_id, "Biometric authentication enabled");
                Ok(())
            }
            Err(e) => {
                self.state = EnablementState::Available;
                Err(e)
            }
        }
    }

    async fn run_enable(&mut self) -> Result<String> {
        // Reuse a previously assigned device id so re-enabling after a
        // revocation keeps the install's identity stable
        let device_id = match self.store.load()? {
            Some(local) => local.device_id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let challenge = self.api.request_challenge(Some(&device_id)).await?;
        let public_key = self.gate.generate_key(&device_id).await?;

        let payload =
            ChallengePayload::from_wire(&challenge.challenge_id, &challenge.challenge, &device_id)?;

        let signature = match self.gate.prompt_and_sign(&device_id, &payload).await {
            Ok(signature) => signature,
            Err(e) => {
                // The freshly minted key is unusable without a registration
                let _ = self.gate.remove_key(&device_id).await;
                return Err(e);
            }
        };

        let request = RegisterRequest {
            public_key: encode_b64(&public_key),
            device_id: device_id.clone(),
            device_info: self.device_info.clone(),
            signature: encode_b64(&signature),
            challenge_id: Some(challenge.challenge_id),
        };

        if let Err(e) = self.api.register(&request).await {
            let _ = self.gate.remove_key(&device_id).await;
            return Err(e);
        }

        // Persisting the flag is the last step; a crash before this line
        // leaves the machine fully disabled
        self.store.save(&LocalState {
            biometric_enabled: true,
            device_id: device_id.clone(),
        })?;

        Ok(device_id)
    }

    /// Authenticate with the device key: fresh challenge, biometric
    /// prompt, signature submission. On a non-retryable server outcome the
    /// machine clears the enabled flag and drops to `Available`.
    pub async fn authenticate(&mut self) -> Result<AuthenticateResponse> {
        if self.state != EnablementState::Enabled {
            return Err(KeyprintError::InvalidStateTransition {
                operation: "authenticate",
                state: self.state,
            });
        }

        let device_id = self
            .store
            .load()?
            .map(|local| local.device_id)
            .ok_or_else(|| KeyprintError::StorageError("Missing device id".into()))?;

        let challenge = self.api.request_challenge(Some(&device_id)).await?;
        let payload =
            ChallengePayload::from_wire(&challenge.challenge_id, &challenge.challenge, &device_id)?;

        // Cancellation surfaces here and leaves the machine in `Enabled`
        let signature = self.gate.prompt_and_sign(&device_id, &payload).await?;

        let request = AuthenticateRequest {
            user_id: None,
            biometric_token: encode_b64(&signature),
            device_id: device_id.clone(),
            challenge_id: Some(challenge.challenge_id),
        };

        match self.api.authenticate(&request).await {
            Ok(session) => {
                info!(device_id = %device_id, "Biometric authentication succeeded");
                Ok(session)
            }
            Err(KeyprintError::ApiRejected { code, message })
                if FORCE_REENABLE_CODES.contains(&code.as_str()) =>
            {
                warn!(
                    device_id = %device_id,
                    code = %code,
                    "Server invalidated this enrollment; disabling locally"
                );
                self.store.save(&LocalState {
                    biometric_enabled: false,
                    device_id: device_id.clone(),
                })?;
                let _ = self.gate.remove_key(&device_id).await;
                self.state = EnablementState::Available;
                Err(KeyprintError::ApiRejected { code, message })
            }
            // ChallengeExpired and transport failures stay Enabled; the
            // caller retries with a fresh challenge
            Err(e) => Err(e),
        }
    }

    /// Disable the biometric factor. Local disablement is unconditional:
    /// the enabled flag and key are cleared even when the revocation call
    /// fails, and server-side revocation is reconciled out of band. The
    /// device id is kept so a later re-enable registers under the same
    /// install identity.
    pub async fn disable(&mut self) -> Result<()> {
        if self.state != EnablementState::Enabled {
            return Err(KeyprintError::InvalidStateTransition {
                operation: "disable",
                state: self.state,
            });
        }
        self.state = EnablementState::Disabling;

        match self.store.load()?.map(|local| local.device_id) {
            Some(device_id) => {
                if let Err(e) = self.api.remove_registration(&device_id).await {
                    warn!(
                        device_id = %device_id,
                        error = %e,
                        "Server-side revocation failed; disabling locally anyway"
                    );
                }
                let _ = self.gate.remove_key(&device_id).await;
                self.store.save(&LocalState {
                    biometric_enabled: false,
                    device_id,
                })?;
            }
            None => self.store.clear()?,
        }

        self.state = EnablementState::Available;
        info!("Biometric authentication disabled");
        Ok(())
    }
}
