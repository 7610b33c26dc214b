use thiserror::Error;

use crate::enablement::EnablementState;

#[derive(Error, Debug)]
pub enum KeyprintError {
    #[error("Biometric hardware unavailable")]
    HardwareUnavailable,

    #[error("No biometric factors enrolled on this device")]
    NotEnrolled,

    #[error("Biometric prompt cancelled by the user or the system")]
    PromptCancelled,

    #[error("Biometric prompt failed: {0}")]
    PromptFailed(String),

    #[error("A biometric prompt is already active")]
    PromptAlreadyActive,

    #[error("Operation '{operation}' is not valid in state {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: EnablementState,
    },

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Local state storage error: {0}")]
    StorageError(String),

    #[error("Server rejected request: {code}: {message}")]
    ApiRejected { code: String, message: String },

    #[cfg(feature = "client")]
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl KeyprintError {
    /// Whether the caller may retry the same operation without changing
    /// anything (transport hiccups, a dismissed prompt, a stale challenge).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PromptCancelled | Self::PromptFailed(_) | Self::StorageError(_) => true,
            Self::ApiRejected { code, .. } => code == "CHALLENGE_EXPIRED",
            #[cfg(feature = "client")]
            Self::HttpError(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, KeyprintError>;
