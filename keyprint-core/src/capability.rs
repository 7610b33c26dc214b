//! Capability gate abstraction
//!
//! The capability gate is the seam between this crate and the platform:
//! it reports biometric hardware/enrollment state and wraps every use of
//! the device-bound key behind an OS biometric prompt. Platform bindings
//! (Keychain/Keystore backed) implement [`CapabilityGate`] on-device;
//! [`SoftwareKeyGate`] is the explicit software-backed fallback and the
//! test double.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{KeyprintError, Result};
use crate::signing::{ChallengePayload, DeviceKeyPair};

/// Biometric factor supported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricFactor {
    Fingerprint,
    Face,
    Iris,
}

/// Where the device key material is anchored.
///
/// Hardware-backed keys cannot be extracted from the secure element;
/// software-backed keys are an explicit, caller-visible degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    HardwareBacked,
    SoftwareBacked,
}

/// Result of a capability probe. Pure data, no side effects.
#[derive(Debug, Clone)]
pub struct BiometricCapabilities {
    pub has_hardware: bool,
    pub is_enrolled: bool,
    pub supported_factors: Vec<BiometricFactor>,
    pub security_level: SecurityLevel,
}

impl BiometricCapabilities {
    /// Whether biometric authentication can be offered at all.
    pub fn available(&self) -> bool {
        self.has_hardware && self.is_enrolled
    }

    /// Why biometrics cannot be used, as an error. Missing hardware and
    /// missing enrollment are distinct so the caller can direct the user
    /// to OS enrollment rather than hiding the feature.
    pub fn ensure_available(&self) -> Result<()> {
        if !self.has_hardware {
            return Err(KeyprintError::HardwareUnavailable);
        }
        if !self.is_enrolled {
            return Err(KeyprintError::NotEnrolled);
        }
        Ok(())
    }
}

/// Gate guarding creation and use of the device-bound key.
///
/// Every signing operation runs the OS biometric prompt first; the secret
/// key never crosses this boundary in either direction.
#[async_trait]
pub trait CapabilityGate: Send + Sync {
    /// Query hardware and enrollment state.
    async fn check_capabilities(&self) -> Result<BiometricCapabilities>;

    /// Create a device-bound keypair and return its public key bytes.
    ///
    /// Replaces any existing key for the device id. Fails with
    /// [`KeyprintError::HardwareUnavailable`] / `NotEnrolled` when the
    /// probe reports the device unusable.
    async fn generate_key(&self, device_id: &str) -> Result<Vec<u8>>;

    /// Prompt the user, then sign the challenge payload with the device key.
    ///
    /// Fails with [`KeyprintError::PromptCancelled`] / `PromptFailed` when
    /// the prompt does not complete, and `PromptAlreadyActive` when another
    /// prompt is in flight in this process.
    async fn prompt_and_sign(&self, device_id: &str, payload: &ChallengePayload)
        -> Result<Vec<u8>>;

    /// Discard the device key, if present. Idempotent.
    async fn remove_key(&self, device_id: &str) -> Result<()>;
}

/// Single-flight guard for the OS biometric prompt.
///
/// At most one prompt may be in flight per process; a second caller is
/// rejected rather than queued so OS dialogs never stack.
#[derive(Debug, Default)]
pub struct PromptGuard {
    active: AtomicBool,
}

impl PromptGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the prompt slot, failing if one is already active.
    pub fn acquire(&self) -> Result<PromptPermit<'_>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(KeyprintError::PromptAlreadyActive);
        }
        Ok(PromptPermit { guard: self })
    }
}

/// RAII permit; releases the prompt slot on drop, including on cancel paths.
#[derive(Debug)]
pub struct PromptPermit<'a> {
    guard: &'a PromptGuard,
}

impl Drop for PromptPermit<'_> {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

/// Scripted outcome for the next [`SoftwareKeyGate`] prompt.
#[derive(Debug, Clone)]
pub enum PromptScript {
    Approve,
    Cancel,
    Fail(String),
}

/// Software-backed capability gate.
///
/// Keys live in process memory instead of a secure element, so this gate
/// reports [`SecurityLevel::SoftwareBacked`] and callers must opt in.
/// Doubles as the test implementation: prompts can be scripted to approve,
/// cancel, or fail.
pub struct SoftwareKeyGate {
    keys: DashMap<String, DeviceKeyPair>,
    capabilities: Mutex<BiometricCapabilities>,
    scripted: Mutex<VecDeque<PromptScript>>,
    prompt_guard: PromptGuard,
}

impl SoftwareKeyGate {
    /// Create a gate reporting an enrolled fingerprint reader.
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            capabilities: Mutex::new(BiometricCapabilities {
                has_hardware: true,
                is_enrolled: true,
                supported_factors: vec![BiometricFactor::Fingerprint],
                security_level: SecurityLevel::SoftwareBacked,
            }),
            scripted: Mutex::new(VecDeque::new()),
            prompt_guard: PromptGuard::new(),
        }
    }

    /// Override the reported capabilities (tests: simulate missing
    /// hardware or un-enrolled devices).
    pub fn set_capabilities(&self, capabilities: BiometricCapabilities) {
        *self.capabilities.lock().unwrap() = capabilities;
    }

    /// Queue an outcome for the next prompt. Unscripted prompts approve.
    pub fn script_prompt(&self, script: PromptScript) {
        self.scripted.lock().unwrap().push_back(script);
    }

    fn next_script(&self) -> PromptScript {
        self.scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PromptScript::Approve)
    }
}

impl Default for SoftwareKeyGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityGate for SoftwareKeyGate {
    async fn check_capabilities(&self) -> Result<BiometricCapabilities> {
        Ok(self.capabilities.lock().unwrap().clone())
    }

    async fn generate_key(&self, device_id: &str) -> Result<Vec<u8>> {
        self.capabilities.lock().unwrap().ensure_available()?;

        let keys = DeviceKeyPair::generate();
        let public = keys.public_key_bytes();
        self.keys.insert(device_id.to_string(), keys);
        tracing::debug!(device_id = %device_id, "Generated software-backed device key");
        Ok(public)
    }

    async fn prompt_and_sign(
        &self,
        device_id: &str,
        payload: &ChallengePayload,
    ) -> Result<Vec<u8>> {
        self.capabilities.lock().unwrap().ensure_available()?;
        let _permit = self.prompt_guard.acquire()?;

        match self.next_script() {
            PromptScript::Approve => {}
            PromptScript::Cancel => return Err(KeyprintError::PromptCancelled),
            PromptScript::Fail(reason) => return Err(KeyprintError::PromptFailed(reason)),
        }

        let keys = self
            .keys
            .get(device_id)
            .ok_or_else(|| KeyprintError::KeyError(format!("No key for device {device_id}")))?;
        keys.sign(payload)
    }

    async fn remove_key(&self, device_id: &str) -> Result<()> {
        self.keys.remove(device_id);
        Ok(())
    }
}

impl std::fmt::Debug for SoftwareKeyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyGate")
            .field("keys", &self.keys.len())
            .finish()
    }
}
