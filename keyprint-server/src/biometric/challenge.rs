//! Challenge issuance and single-use consumption
//!
//! Challenges are short-lived and never survive a restart, so they live in
//! memory. The consumed flag is the one shared mutable resource of the
//! whole protocol: it transitions false→true exactly once, under the
//! store's shard lock, so concurrent double-submissions resolve
//! deterministically and exactly one caller wins.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::ApiError;

/// Nonce size in bytes (256 bits)
const NONCE_LEN: usize = 32;

/// A single-use, time-boxed challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub nonce: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    /// Device the challenge is bound to. Set at issuance when the caller
    /// supplied a hint, otherwise on the first verification attempt.
    pub bound_device_id: Option<String>,
}

impl Challenge {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of the atomic consume step.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// This caller won the test-and-set; snapshot taken at consumption
    Consumed(Challenge),
    /// The flag was already set by an earlier or concurrent caller
    AlreadyConsumed,
    /// No such challenge (never issued, or evicted after expiry)
    NotFound,
    /// The challenge was bound to a different device. Still consumed.
    BoundDeviceMismatch,
}

/// In-memory issuer + store for challenges.
pub struct ChallengeStore {
    entries: DashMap<String, Challenge>,
    ttl: Duration,
}

impl ChallengeStore {
    /// Create a store issuing challenges with the given time-to-live.
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Mint and persist a fresh challenge.
    ///
    /// `bound_device_id` binds it to one device at issuance; unbound
    /// challenges bind on first verification attempt instead.
    pub fn issue(&self, bound_device_id: Option<&str>) -> Result<Challenge, ApiError> {
        let mut nonce = vec![0u8; NONCE_LEN];
        getrandom::fill(&mut nonce)
            .map_err(|e| ApiError::service_unavailable(format!("Entropy source failed: {e}")))?;

        let issued_at = Utc::now();
        let challenge = Challenge {
            id: uuid::Uuid::new_v4().to_string(),
            nonce,
            issued_at,
            expires_at: issued_at + self.ttl,
            consumed: false,
            bound_device_id: bound_device_id.map(str::to_string),
        };

        self.entries.insert(challenge.id.clone(), challenge.clone());
        tracing::debug!(challenge_id = %challenge.id, expires_at = %challenge.expires_at, "Challenge issued");
        Ok(challenge)
    }

    /// Atomically consume a challenge for a device.
    ///
    /// Consumption happens before any other check and regardless of later
    /// outcomes; a consumed challenge never reverts. Binding is recorded
    /// here so an unbound challenge cannot be replayed across devices.
    pub fn consume(&self, challenge_id: &str, device_id: &str) -> ConsumeOutcome {
        let Some(mut entry) = self.entries.get_mut(challenge_id) else {
            return ConsumeOutcome::NotFound;
        };

        if entry.consumed {
            return ConsumeOutcome::AlreadyConsumed;
        }
        entry.consumed = true;

        match &entry.bound_device_id {
            Some(bound) if bound != device_id => ConsumeOutcome::BoundDeviceMismatch,
            Some(_) => ConsumeOutcome::Consumed(entry.clone()),
            None => {
                entry.bound_device_id = Some(device_id.to_string());
                ConsumeOutcome::Consumed(entry.clone())
            }
        }
    }

    /// Drop expired challenges (called periodically).
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, challenge| challenge.expires_at > now);
    }

    /// Number of live challenges (for stats)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, challenge_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(challenge_id) {
            entry.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_sets_expiry_and_nonce() {
        let store = ChallengeStore::new(120);
        let challenge = store.issue(None).unwrap();

        assert_eq!(challenge.nonce.len(), NONCE_LEN);
        assert!(!challenge.consumed);
        assert!(challenge.expires_at > challenge.issued_at);
        assert!(challenge.bound_device_id.is_none());
    }

    #[test]
    fn test_consume_exactly_once() {
        let store = ChallengeStore::new(120);
        let challenge = store.issue(None).unwrap();

        assert!(matches!(
            store.consume(&challenge.id, "dev-1"),
            ConsumeOutcome::Consumed(_)
        ));
        assert!(matches!(
            store.consume(&challenge.id, "dev-1"),
            ConsumeOutcome::AlreadyConsumed
        ));
    }

    #[test]
    fn test_unbound_challenge_binds_on_consume() {
        let store = ChallengeStore::new(120);
        let challenge = store.issue(None).unwrap();

        let ConsumeOutcome::Consumed(consumed) = store.consume(&challenge.id, "dev-1") else {
            panic!("expected consumption");
        };
        assert_eq!(consumed.bound_device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_bound_challenge_rejects_other_device() {
        let store = ChallengeStore::new(120);
        let challenge = store.issue(Some("dev-1")).unwrap();

        assert!(matches!(
            store.consume(&challenge.id, "dev-2"),
            ConsumeOutcome::BoundDeviceMismatch
        ));
        // The mismatch attempt still burned the challenge
        assert!(matches!(
            store.consume(&challenge.id, "dev-1"),
            ConsumeOutcome::AlreadyConsumed
        ));
    }

    #[test]
    fn test_unknown_challenge_not_found() {
        let store = ChallengeStore::new(120);
        assert!(matches!(
            store.consume("missing", "dev-1"),
            ConsumeOutcome::NotFound
        ));
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let store = ChallengeStore::new(120);
        let challenge = store.issue(None).unwrap();
        store.force_expire(&challenge.id);

        store.cleanup_expired();
        assert!(store.is_empty());
        assert!(matches!(
            store.consume(&challenge.id, "dev-1"),
            ConsumeOutcome::NotFound
        ));
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        use std::sync::Arc;

        let store = Arc::new(ChallengeStore::new(120));
        let challenge = store.issue(None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = challenge.id.clone();
                std::thread::spawn(move || {
                    matches!(
                        store.consume(&id, &format!("dev-{i}")),
                        ConsumeOutcome::Consumed(_)
                    )
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1, "exactly one concurrent caller may win");
    }
}
