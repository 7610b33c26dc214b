//! Device key registry
//!
//! Persists device registrations in PostgreSQL when `DATABASE_URL` is set,
//! with an in-memory fallback for development. Records are append-only per
//! device: revocation marks a record terminal but keeps it queryable, and a
//! later re-registration appends a fresh active record.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use keyprint_core::protocol::{DeviceInfo, RegistrationStatus};

use super::postgres::PostgresRegistry;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A device key registration.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub user_id: String,
    pub device_id: String,
    /// Base64-encoded public key, immutable for the lifetime of the record
    pub public_key: String,
    /// SHA3-256 fingerprint of the public key, returned to clients
    pub biometric_key: String,
    pub device_info: Option<DeviceInfo>,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RegistrationRecord {
    pub fn is_active(&self) -> bool {
        self.status == RegistrationStatus::Active
    }
}

/// Result of a registration attempt.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// A new active record was created (or an identical one already existed)
    Registered(RegistrationRecord),
    /// The device already carries a different active key, or belongs to
    /// another user. The stored key never changes in place.
    AlreadyRegistered,
}

enum RegistryBackend {
    /// PostgreSQL storage (production)
    Postgres(PostgresRegistry),
    /// In-memory storage (development fallback), history per device
    Memory(DashMap<String, Vec<RegistrationRecord>>),
}

/// Registry of device keys, keyed by device id.
pub struct DeviceRegistry {
    backend: RegistryBackend,
}

impl DeviceRegistry {
    /// Create a registry with a PostgreSQL backend
    pub async fn with_postgres(database_url: &str) -> Result<Self, StorageError> {
        let pg = PostgresRegistry::new(database_url).await?;
        pg.migrate().await?;
        Ok(Self {
            backend: RegistryBackend::Postgres(pg),
        })
    }

    /// Create a registry with an in-memory backend (development only)
    pub fn in_memory() -> Self {
        tracing::warn!("Using in-memory device registry - registrations will be lost on restart!");
        Self {
            backend: RegistryBackend::Memory(DashMap::new()),
        }
    }

    /// Create a registry from the environment.
    ///
    /// Uses PostgreSQL if `DATABASE_URL` is set, otherwise falls back to memory.
    pub async fn from_env() -> Result<Self, StorageError> {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => {
                tracing::info!("Using PostgreSQL device registry");
                Self::with_postgres(&url).await
            }
            _ => {
                tracing::warn!("DATABASE_URL not set, using in-memory device registry");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, RegistryBackend::Postgres(_))
    }

    /// Check backend health (always Ok for the memory backend)
    pub async fn check_health(&self) -> Result<(), StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.check_health().await,
            RegistryBackend::Memory(_) => Ok(()),
        }
    }

    /// Register a device key for a user.
    ///
    /// Idempotent when the active record carries the same user and key.
    /// A revoked device may re-register; the old record stays in history.
    pub async fn register(
        &self,
        user_id: &str,
        device_id: &str,
        public_key: &str,
        biometric_key: &str,
        device_info: Option<DeviceInfo>,
    ) -> Result<RegisterOutcome, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => {
                pg.register(user_id, device_id, public_key, biometric_key, device_info)
                    .await
            }
            RegistryBackend::Memory(map) => {
                let mut history = map.entry(device_id.to_string()).or_default();
                if let Some(latest) = history.last() {
                    if latest.is_active() {
                        if latest.user_id == user_id && latest.public_key == public_key {
                            return Ok(RegisterOutcome::Registered(latest.clone()));
                        }
                        return Ok(RegisterOutcome::AlreadyRegistered);
                    }
                }

                let record = RegistrationRecord {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                    public_key: public_key.to_string(),
                    biometric_key: biometric_key.to_string(),
                    device_info,
                    status: RegistrationStatus::Active,
                    registered_at: Utc::now(),
                    last_used_at: None,
                    revoked_at: None,
                };
                history.push(record.clone());
                Ok(RegisterOutcome::Registered(record))
            }
        }
    }

    /// Latest record for a device, active or revoked
    pub async fn lookup(
        &self,
        device_id: &str,
    ) -> Result<Option<RegistrationRecord>, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.lookup(device_id).await,
            RegistryBackend::Memory(map) => Ok(map
                .get(device_id)
                .and_then(|history| history.last().cloned())),
        }
    }

    /// Revoke a user's active registration for a device.
    ///
    /// Returns `true` if an active record was revoked. Revocation is
    /// terminal: the record stays queryable but never verifies again.
    pub async fn revoke(&self, user_id: &str, device_id: &str) -> Result<bool, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.revoke(user_id, device_id).await,
            RegistryBackend::Memory(map) => {
                let Some(mut history) = map.get_mut(device_id) else {
                    return Ok(false);
                };
                match history.last_mut() {
                    Some(latest) if latest.is_active() && latest.user_id == user_id => {
                        latest.status = RegistrationStatus::Revoked;
                        latest.revoked_at = Some(Utc::now());
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// Revoke every active registration a user holds. Returns the count.
    pub async fn revoke_all(&self, user_id: &str) -> Result<usize, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.revoke_all(user_id).await,
            RegistryBackend::Memory(map) => {
                let mut revoked = 0;
                for mut entry in map.iter_mut() {
                    if let Some(latest) = entry.value_mut().last_mut() {
                        if latest.is_active() && latest.user_id == user_id {
                            latest.status = RegistrationStatus::Revoked;
                            latest.revoked_at = Some(Utc::now());
                            revoked += 1;
                        }
                    }
                }
                Ok(revoked)
            }
        }
    }

    /// Latest record per device for a user, revoked ones included
    pub async fn list_for(&self, user_id: &str) -> Result<Vec<RegistrationRecord>, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.list_for(user_id).await,
            RegistryBackend::Memory(map) => {
                let mut records: Vec<_> = map
                    .iter()
                    .filter_map(|entry| entry.value().last().cloned())
                    .filter(|record| record.user_id == user_id)
                    .collect();
                records.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
                Ok(records)
            }
        }
    }

    /// Whether the user holds at least one active registration
    pub async fn has_enabled(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .list_for(user_id)
            .await?
            .iter()
            .any(RegistrationRecord::is_active))
    }

    /// Record a successful verification against a device key
    pub async fn touch_last_used(&self, device_id: &str) -> Result<(), StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.touch_last_used(device_id).await,
            RegistryBackend::Memory(map) => {
                if let Some(mut history) = map.get_mut(device_id) {
                    if let Some(latest) = history.last_mut() {
                        latest.last_used_at = Some(Utc::now());
                    }
                }
                Ok(())
            }
        }
    }

    /// Total device count (for stats)
    pub async fn device_count(&self) -> Result<usize, StorageError> {
        match &self.backend {
            RegistryBackend::Postgres(pg) => pg.device_count().await,
            RegistryBackend::Memory(map) => Ok(map.len()),
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            RegistryBackend::Postgres(_) => "PostgreSQL",
            RegistryBackend::Memory(_) => "Memory",
        };
        f.debug_struct("DeviceRegistry")
            .field("backend", &backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_lookup() {
        let registry = DeviceRegistry::in_memory();
        let outcome = registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::Registered(_)));

        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert!(record.is_active());
        assert_eq!(record.public_key, "pk-a");
    }

    #[tokio::test]
    async fn test_register_same_key_is_idempotent() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        let outcome = registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::Registered(_)));
    }

    #[tokio::test]
    async fn test_register_different_key_conflicts() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        let outcome = registry
            .register("user-1", "dev-1", "pk-b", "fp-b", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::AlreadyRegistered));
        // The stored key is unchanged
        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert_eq!(record.public_key, "pk-a");
    }

    #[tokio::test]
    async fn test_register_other_users_device_conflicts() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        let outcome = registry
            .register("user-2", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::AlreadyRegistered));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_register_single_winner() {
        let registry = std::sync::Arc::new(DeviceRegistry::in_memory());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register("user-1", "dev-1", &format!("pk-{i}"), &format!("fp-{i}"), None)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), RegisterOutcome::Registered(_)) {
                winners += 1;
            }
        }
        // Exactly one active record exists no matter how the inserts race
        assert_eq!(winners, 1);
        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert!(record.is_active());
    }

    #[tokio::test]
    async fn test_revoke_is_terminal_but_queryable() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();

        assert!(registry.revoke("user-1", "dev-1").await.unwrap());
        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert_eq!(record.status, RegistrationStatus::Revoked);
        assert!(record.revoked_at.is_some());

        // Revoking again is a no-op
        assert!(!registry.revoke("user-1", "dev-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reregister_after_revoke_appends_new_record() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        registry.revoke("user-1", "dev-1").await.unwrap();

        let outcome = registry
            .register("user-1", "dev-1", "pk-b", "fp-b", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RegisterOutcome::Registered(_)));
        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert!(record.is_active());
        assert_eq!(record.public_key, "pk-b");
    }

    #[tokio::test]
    async fn test_has_enabled_tracks_active_records() {
        let registry = DeviceRegistry::in_memory();
        assert!(!registry.has_enabled("user-1").await.unwrap());

        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        assert!(registry.has_enabled("user-1").await.unwrap());

        registry.revoke("user-1", "dev-1").await.unwrap();
        assert!(!registry.has_enabled("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_counts() {
        let registry = DeviceRegistry::in_memory();
        registry
            .register("user-1", "dev-1", "pk-a", "fp-a", None)
            .await
            .unwrap();
        registry
            .register("user-1", "dev-2", "pk-b", "fp-b", None)
            .await
            .unwrap();
        registry
            .register("user-2", "dev-3", "pk-c", "fp-c", None)
            .await
            .unwrap();

        assert_eq!(registry.revoke_all("user-1").await.unwrap(), 2);
        assert!(registry.has_enabled("user-2").await.unwrap());
    }
}
