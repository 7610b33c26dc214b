//! Keyprint Server - REST API for biometric device authentication
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod auth;
pub mod biometric;
pub mod config;
pub mod error;
pub mod health;
pub mod openapi;
pub mod routes;
pub mod state;

pub use auth::{AuthenticatedUser, SessionTokens, TokenIssuer};
pub use biometric::{
    AuthDecision, AuthOutcome, ChallengeStore, DeviceRegistry, RegisterOutcome,
    RegistrationRecord, SignatureVerifier, StorageError,
};
pub use config::Config;
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
