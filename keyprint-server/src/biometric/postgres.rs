//! PostgreSQL backend for the device registry
//!
//! Registration history is append-only: each device carries an ordered list
//! of records and only the newest one is consulted for verification.

use sqlx::PgPool;

use keyprint_core::protocol::{DeviceInfo, RegistrationStatus};

use super::registry::{RegisterOutcome, RegistrationRecord, StorageError};

/// PostgreSQL-backed device registry
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Connect to the database
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Register a device key, appending to the device's history.
    pub async fn register(
        &self,
        user_id: &str,
        device_id: &str,
        public_key: &str,
        biometric_key: &str,
        device_info: Option<DeviceInfo>,
    ) -> Result<RegisterOutcome, StorageError> {
        if let Some(latest) = self.lookup(device_id).await? {
            if latest.is_active() {
                if latest.user_id == user_id && latest.public_key == public_key {
                    return Ok(RegisterOutcome::Registered(latest));
                }
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
        }

        let device_info_json = match &device_info {
            Some(info) => Some(
                serde_json::to_value(info)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let inserted = sqlx::query_as::<_, RegistrationRow>(
            r#"
            INSERT INTO device_registrations
                (user_id, device_id, public_key, biometric_key, device_info, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING user_id, device_id, public_key, biometric_key, device_info,
                      status, registered_at, last_used_at, revoked_at
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(public_key)
        .bind(biometric_key)
        .bind(device_info_json)
        .fetch_one(&self.pool)
        .await;

        let row = match inserted {
            Ok(row) => row,
            // A concurrent registration won the single-active-row index.
            // Re-read so an identical racing request stays idempotent.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return match self.lookup(device_id).await? {
                    Some(latest)
                        if latest.is_active()
                            && latest.user_id == user_id
                            && latest.public_key == public_key =>
                    {
                        Ok(RegisterOutcome::Registered(latest))
                    }
                    _ => Ok(RegisterOutcome::AlreadyRegistered),
                };
            }
            Err(e) => return Err(StorageError::Query(e.to_string())),
        };

        tracing::info!(device_id = %device_id, "Device registration stored in database");
        Ok(RegisterOutcome::Registered(row.into_record()?))
    }

    /// Latest record for a device, active or revoked
    pub async fn lookup(
        &self,
        device_id: &str,
    ) -> Result<Option<RegistrationRecord>, StorageError> {
        let row = sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT user_id, device_id, public_key, biometric_key, device_info,
                   status, registered_at, last_used_at, revoked_at
            FROM device_registrations
            WHERE device_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        row.map(RegistrationRow::into_record).transpose()
    }

    /// Revoke the active registration for a user's device
    pub async fn revoke(&self, user_id: &str, device_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE device_registrations
            SET status = 'revoked', revoked_at = NOW()
            WHERE id = (
                SELECT id FROM device_registrations
                WHERE device_id = $1
                ORDER BY id DESC
                LIMIT 1
            )
            AND user_id = $2 AND status = 'active'
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every active registration a user holds
    pub async fn revoke_all(&self, user_id: &str) -> Result<usize, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE device_registrations
            SET status = 'revoked', revoked_at = NOW()
            WHERE user_id = $1 AND status = 'active'
              AND id IN (
                  SELECT MAX(id) FROM device_registrations GROUP BY device_id
              )
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    /// Latest record per device for a user
    pub async fn list_for(&self, user_id: &str) -> Result<Vec<RegistrationRecord>, StorageError> {
        let rows = sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT DISTINCT ON (device_id)
                   user_id, device_id, public_key, biometric_key, device_info,
                   status, registered_at, last_used_at, revoked_at
            FROM device_registrations
            WHERE user_id = $1
            ORDER BY device_id, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        let mut records = rows
            .into_iter()
            .map(RegistrationRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(records)
    }

    /// Record a successful verification against the device's latest record
    pub async fn touch_last_used(&self, device_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE device_registrations
            SET last_used_at = NOW()
            WHERE id = (
                SELECT id FROM device_registrations
                WHERE device_id = $1
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(())
    }

    /// Distinct device count (for stats)
    pub async fn device_count(&self) -> Result<usize, StorageError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT device_id) FROM device_registrations")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(count as usize)
    }
}

/// Database row for registrations
#[derive(sqlx::FromRow)]
struct RegistrationRow {
    user_id: String,
    device_id: String,
    public_key: String,
    biometric_key: String,
    device_info: Option<serde_json::Value>,
    status: String,
    registered_at: chrono::DateTime<chrono::Utc>,
    last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    revoked_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RegistrationRow {
    fn into_record(self) -> Result<RegistrationRecord, StorageError> {
        let device_info: Option<DeviceInfo> = match self.device_info {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let status = match self.status.as_str() {
            "revoked" => RegistrationStatus::Revoked,
            _ => RegistrationStatus::Active,
        };

        Ok(RegistrationRecord {
            user_id: self.user_id,
            device_id: self.device_id,
            public_key: self.public_key,
            biometric_key: self.biometric_key,
            device_info,
            status,
            registered_at: self.registered_at,
            last_used_at: self.last_used_at,
            revoked_at: self.revoked_at,
        })
    }
}

impl std::fmt::Debug for PostgresRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRegistry")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
