use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{insert_audit, PgStore};
use crate::domain::{AuditLogEntry, DistributedLock, IdempotencyKey};
use crate::ports::{
    AuditRepository, IdempotencyRepository, LockRepository, RepositoryError, RepositoryResult,
};

#[async_trait]
impl IdempotencyRepository for PgStore {
    async fn get_key(&self, key_hash: &str) -> RepositoryResult<Option<IdempotencyKey>> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT key_hash, entity_type, entity_id, request_fingerprint, response, created_at, expires_at
            FROM idempotency_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IdempotencyRow::into_domain))
    }

    async fn store_response(
        &self,
        key_hash: &str,
        response: &serde_json::Value,
    ) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE idempotency_keys SET response = $2 WHERE key_hash = $1")
            .bind(key_hash)
            .bind(response)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("idempotency key {}", key_hash)));
        }
        Ok(())
    }

    async fn purge_expired_keys(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockRepository for PgStore {
    async fn try_acquire(&self, lock: &DistributedLock) -> RepositoryResult<bool> {
        // Takes over the row only when the previous holder's lease has lapsed.
        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_name, owner_id, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (lock_name) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE distributed_locks.expires_at <= EXCLUDED.acquired_at
            "#,
        )
        .bind(&lock.lock_name)
        .bind(&lock.owner_id)
        .bind(lock.acquired_at)
        .bind(lock.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, lock_name: &str, owner_id: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE lock_name = $1 AND owner_id = $2")
            .bind(lock_name)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> RepositoryResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut *conn, entry).await?;
        Ok(())
    }

    async fn audit_trail(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, entity_type, entity_id, action, actor, old_values, new_values,
                   correlation_id, created_at
            FROM audit_logs
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRow::into_domain).collect())
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRow {
    key_hash: String,
    entity_type: String,
    entity_id: String,
    request_fingerprint: String,
    response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl IdempotencyRow {
    fn into_domain(self) -> IdempotencyKey {
        IdempotencyKey {
            key_hash: self.key_hash,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            request_fingerprint: self.request_fingerprint,
            response: self.response,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    entity_type: String,
    entity_id: String,
    action: String,
    actor: String,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    correlation_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> AuditLogEntry {
        AuditLogEntry {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            actor: self.actor,
            old_values: self.old_values,
            new_values: self.new_values,
            correlation_id: self.correlation_id,
            created_at: self.created_at,
        }
    }
}
