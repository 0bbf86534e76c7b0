//! Idempotency keys and distributed locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ENTITY_KIND_TRANSACTION: &str = "transaction";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key_hash: String,
    pub entity_type: String,
    pub entity_id: String,
    /// SHA-256 of the request payload registered under this key.
    pub request_fingerprint: String,
    /// Cached response, set once the entity reaches a terminal state.
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Hash of the caller-supplied key, namespaced by entity type.
pub fn hash_key(entity_type: &str, caller_key: &str) -> String {
    sha256_hex(&format!("{}:{}", entity_type, caller_key))
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedLock {
    pub lock_name: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_stable_and_namespaced() {
        assert_eq!(hash_key("transaction", "T1"), hash_key("transaction", "T1"));
        assert_ne!(hash_key("transaction", "T1"), hash_key("reversal", "T1"));
        assert_eq!(hash_key("transaction", "T1").len(), 64);
    }
}
