use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::coordination::{hash_key, sha256_hex};
use crate::domain::IdempotencyKey;
use crate::error::AppError;
use crate::ports::{IdempotencyRepository, SwitchStore};

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    /// No live key; the caller owns execution.
    New,
    /// A submission with the same payload is still executing.
    Processing,
    /// The cached result to replay.
    Completed(Value),
}

/// Lookup-before-execute guard over durable idempotency keys.
#[derive(Clone)]
pub struct IdempotencyService {
    store: Arc<dyn SwitchStore>,
    ttl: Duration,
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn SwitchStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key_hash(entity_type: &str, caller_key: &str) -> String {
        hash_key(entity_type, caller_key)
    }

    /// Fingerprint of the canonical request payload.
    pub fn fingerprint<T: serde::Serialize>(payload: &T) -> Result<String, AppError> {
        let canonical = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(format!("Failed to fingerprint request: {}", e)))?;
        Ok(sha256_hex(&canonical))
    }

    pub fn new_key(
        &self,
        entity_type: &str,
        caller_key: &str,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> IdempotencyKey {
        IdempotencyKey {
            key_hash: Self::key_hash(entity_type, caller_key),
            entity_type: entity_type.to_string(),
            entity_id: caller_key.to_string(),
            request_fingerprint: fingerprint,
            response: None,
            created_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// Reports whether `caller_key` has been seen with this payload before.
    pub async fn check(
        &self,
        entity_type: &str,
        caller_key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyStatus, AppError> {
        let key_hash = Self::key_hash(entity_type, caller_key);
        let existing = match self.store.get_key(&key_hash).await? {
            Some(key) => key,
            None => return Ok(IdempotencyStatus::New),
        };

        if existing.is_expired(now) && existing.response.is_none() {
            return Ok(IdempotencyStatus::New);
        }
        if existing.request_fingerprint != fingerprint {
            tracing::warn!(
                entity_type,
                caller_key,
                "idempotency key reused with a different payload"
            );
            return Err(AppError::Conflict(format!(
                "{} {} was already submitted with a different payload",
                entity_type, caller_key
            )));
        }

        Ok(match existing.response {
            Some(response) => IdempotencyStatus::Completed(response),
            None => IdempotencyStatus::Processing,
        })
    }

    pub async fn complete(
        &self,
        entity_type: &str,
        caller_key: &str,
        response: &Value,
    ) -> Result<(), AppError> {
        let key_hash = Self::key_hash(entity_type, caller_key);
        self.store.store_response(&key_hash, response).await?;
        Ok(())
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(self.store.purge_expired_keys(now).await?)
    }
}
