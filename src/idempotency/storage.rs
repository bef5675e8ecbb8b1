use crate::clock::Clock;
use crate::error::{AppError, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cached outcome of one processed request, bound to a single fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub fingerprint: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn new(
        idempotency_key: impl Into<String>,
        fingerprint: impl Into<String>,
        response: serde_json::Value,
        created_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<Self> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| AppError::InvalidArgument(format!("ttl out of range: {}", e)))?;
                Some(created_at.checked_add_signed(ttl).ok_or_else(|| {
                    AppError::InvalidArgument("ttl out of range".to_string())
                })?)
            }
            None => None,
        };

        Ok(Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.into(),
            fingerprint: fingerprint.into(),
            response,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }
}

/// Key-value store for idempotency records.
///
/// Single-key operations are atomic. Expired records read as absent even if their
/// physical removal is deferred to `cleanup_expired`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fails with `NotFound` when the key is absent or expired; expired records are evicted.
    async fn get(&self, key: &str) -> Result<IdempotencyRecord>;

    /// Creates or replaces the record for `key`. Last writer wins.
    async fn put(
        &self,
        key: &str,
        fingerprint: &str,
        response: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<bool>;

    /// Physically removes expired records and returns how many were dropped.
    async fn cleanup_expired(&self) -> Result<u64>;
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "idempotency key cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_put(key: &str, fingerprint: &str, response: &serde_json::Value) -> Result<()> {
    validate_key(key)?;
    if fingerprint.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "fingerprint cannot be empty".to_string(),
        ));
    }
    if response.is_null() {
        return Err(AppError::InvalidArgument(
            "cached response cannot be null".to_string(),
        ));
    }
    Ok(())
}

fn not_found(key: &str) -> AppError {
    AppError::NotFound(format!("idempotency record '{}'", key))
}

/// Process-local store. Reads share a read lock; eviction and writes take the write lock.
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of physically present records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<IdempotencyRecord> {
        validate_key(key)?;

        {
            let records = self.records.read().await;
            match records.get(key) {
                None => return Err(not_found(key)),
                Some(record) if !record.is_expired_at(self.clock.now()) => {
                    return Ok(record.clone())
                }
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock since a writer may have replaced it.
        let mut records = self.records.write().await;
        let now = self.clock.now();
        match records.get(key) {
            Some(record) if !record.is_expired_at(now) => Ok(record.clone()),
            Some(_) => {
                records.remove(key);
                tracing::debug!("Evicted expired idempotency record on read");
                Err(not_found(key))
            }
            None => Err(not_found(key)),
        }
    }

    async fn put(
        &self,
        key: &str,
        fingerprint: &str,
        response: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        validate_put(key, fingerprint, &response)?;
        let record = IdempotencyRecord::new(key, fingerprint, response, self.clock.now(), ttl)?;

        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}

/// PostgreSQL-backed store.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow!("Failed to run migrations: {}", e)))
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn get(&self, key: &str) -> Result<IdempotencyRecord> {
        validate_key(key)?;

        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id, idempotency_key, fingerprint, response, created_at, expires_at
            FROM idempotency_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found(key))?;

        let now = self.clock.now();
        if record.is_expired_at(now) {
            sqlx::query(
                r#"
                DELETE FROM idempotency_records
                WHERE idempotency_key = $1 AND expires_at <= $2
                "#,
            )
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;

            return Err(not_found(key));
        }

        Ok(record)
    }

    async fn put(
        &self,
        key: &str,
        fingerprint: &str,
        response: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        validate_put(key, fingerprint, &response)?;
        let record = IdempotencyRecord::new(key, fingerprint, response, self.clock.now(), ttl)?;

        sqlx::query(
            r#"
            INSERT INTO idempotency_records (id, idempotency_key, fingerprint, response, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                id = EXCLUDED.id,
                fingerprint = EXCLUDED.fingerprint,
                response = EXCLUDED.response,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(record.id)
        .bind(&record.idempotency_key)
        .bind(&record.fingerprint)
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

const DELETE_IF_UNCHANGED: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis-backed store. Records are JSON values under `<prefix>:<key>` with a native TTL.
pub struct RedisIdempotencyStore {
    client: redis::Client,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisIdempotencyStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            clock,
        }
    }

    fn make_key(&self, idempotency_key: &str) -> String {
        format!("{}:{}", self.key_prefix, idempotency_key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Deletes `redis_key` only while it still holds `expected`, so a record rebound
    /// by a concurrent `put` survives.
    async fn delete_if_unchanged(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        redis_key: &str,
        expected: &str,
    ) -> Result<bool> {
        let deleted: i64 = redis::Script::new(DELETE_IF_UNCHANGED)
            .key(redis_key)
            .arg(expected)
            .invoke_async(conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> Result<IdempotencyRecord> {
        validate_key(key)?;
        let mut conn = self.connection().await?;
        let redis_key = self.make_key(key);

        let raw: Option<String> = conn.get(&redis_key).await?;
        let raw = raw.ok_or_else(|| not_found(key))?;
        let record: IdempotencyRecord = serde_json::from_str(&raw)?;

        // Redis TTLs have second granularity; the record's own expiry is authoritative.
        if record.is_expired_at(self.clock.now()) {
            self.delete_if_unchanged(&mut conn, &redis_key, &raw).await?;
            return Err(not_found(key));
        }

        Ok(record)
    }

    async fn put(
        &self,
        key: &str,
        fingerprint: &str,
        response: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        validate_put(key, fingerprint, &response)?;
        let record = IdempotencyRecord::new(key, fingerprint, response, self.clock.now(), ttl)?;
        let payload = serde_json::to_string(&record)?;

        let mut conn = self.connection().await?;
        let redis_key = self.make_key(key);
        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
                let _: () = conn.set_ex(&redis_key, payload, seconds.max(1)).await?;
            }
            None => {
                let _: () = conn.set(&redis_key, payload).await?;
            }
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = conn.del(self.make_key(key)).await?;
        Ok(deleted > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        // Redis evicts keys itself once their TTL elapses.
        Ok(0)
    }
}
