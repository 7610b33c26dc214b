//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use crate::auth::TokenIssuer;
use crate::biometric::{ChallengeStore, DeviceRegistry, SignatureVerifier};
use crate::config::Config;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Challenge issuer and single-use store
    pub challenges: Arc<ChallengeStore>,
    /// Device key registry (PostgreSQL or in-memory)
    pub registry: Arc<DeviceRegistry>,
    /// Verification pipeline over the two stores above
    pub verifier: SignatureVerifier,
    /// Session token issuer
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    /// Assemble state from a config and a registry backend.
    pub fn new(config: &Config, registry: DeviceRegistry) -> Self {
        let challenges = Arc::new(ChallengeStore::new(config.challenge_ttl_secs));
        let registry = Arc::new(registry);
        let verifier = SignatureVerifier::new(Arc::clone(&challenges), Arc::clone(&registry));
        let tokens = Arc::new(TokenIssuer::new(&config.token_secret));

        Self {
            challenges,
            registry,
            verifier,
            tokens,
        }
    }
}
