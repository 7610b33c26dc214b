//! Biometric device authentication
//!
//! Server side of the challenge-response protocol:
//! - **Challenges** (in-memory): single-use nonces with a short TTL. They
//!   never need to survive a restart.
//! - **Registry** (PostgreSQL or memory): device public keys with
//!   append-only revocation history.
//! - **Verifier**: the ordered check pipeline that burns a challenge and
//!   decides an authentication attempt.

pub mod challenge;
pub mod handlers;
mod postgres;
pub mod registry;
pub mod verifier;

pub use challenge::{Challenge, ChallengeStore, ConsumeOutcome};
pub use registry::{DeviceRegistry, RegisterOutcome, RegistrationRecord, StorageError};
pub use verifier::{AuthDecision, AuthOutcome, SignatureVerifier};
