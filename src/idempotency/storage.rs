use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Stored idempotency record. Rows are create-once; the cached response is never updated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub user_id: Uuid,
    pub endpoint_path: String,
    pub http_method: String,
    pub response_status: i32,
    pub response_body: serde_json::Value,
    pub request_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idempotency_key: String,
        user_id: Uuid,
        endpoint_path: String,
        http_method: String,
        request_hash: Option<String>,
        response_status: i32,
        response_body: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key,
            user_id,
            endpoint_path,
            http_method,
            response_status,
            response_body,
            request_hash,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(now),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This writer's record is now authoritative.
    Inserted,
    /// A live record for the same (owner, endpoint, key) already existed.
    AlreadyExists,
}

/// Persistence port for idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Finds a record for the tuple that has not expired at `now`.
    async fn find_active(
        &self,
        user_id: Uuid,
        endpoint_path: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Inserts a record. An expired row for the same tuple counts as absent and is replaced.
    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome>;

    /// Deletes records expired at `now`, returning how many were removed.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL-based idempotency storage.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        endpoint_path: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT idempotency_key, user_id, endpoint_path, http_method, response_status, response_body, request_hash, created_at, expires_at
            FROM idempotency_keys
            WHERE user_id = $1 AND endpoint_path = $2 AND idempotency_key = $3 AND expires_at > $4
            "#,
        )
        .bind(user_id)
        .bind(endpoint_path)
        .bind(idempotency_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        // Bound as text so the JSON column keeps the body's key order.
        let body = serde_json::to_string(&record.response_body)?;

        // A live row wins; only an expired row may be overwritten.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (idempotency_key, user_id, endpoint_path, http_method, response_status, response_body, request_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6::json, $7, $8, $9)
            ON CONFLICT (user_id, endpoint_path, idempotency_key) DO UPDATE SET
                http_method = EXCLUDED.http_method,
                response_status = EXCLUDED.response_status,
                response_body = EXCLUDED.response_body,
                request_hash = EXCLUDED.request_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= EXCLUDED.created_at
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(record.user_id)
        .bind(&record.endpoint_path)
        .bind(&record.http_method)
        .bind(record.response_status)
        .bind(body)
        .bind(&record.request_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(InsertOutcome::Inserted),
            Ok(_) => Ok(InsertOutcome::AlreadyExists),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

type RecordKey = (Uuid, String, String);

/// In-memory store for tests and database-less local runs.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<RecordKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RecordKey, IdempotencyRecord>>> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("idempotency store lock poisoned")))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        endpoint_path: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let records = self.lock()?;
        let key = (user_id, endpoint_path.to_string(), idempotency_key.to_string());
        Ok(records
            .get(&key)
            .filter(|record| !record.is_expired_at(now))
            .cloned())
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        let mut records = self.lock()?;
        let key = (
            record.user_id,
            record.endpoint_path.clone(),
            record.idempotency_key.clone(),
        );
        match records.get(&key) {
            Some(existing) if !existing.is_expired_at(record.created_at) => {
                Ok(InsertOutcome::AlreadyExists)
            }
            _ => {
                records.insert(key, record.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}
