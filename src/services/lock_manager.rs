use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::domain::DistributedLock;
use crate::error::AppError;
use crate::ports::{LockRepository, SwitchStore};

/// Named advisory locks held in the durable store, shared by every instance.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn SwitchStore>,
    owner_id: String,
}

/// A held lock. Must be released with [`LockGuard::release`]; if the holder dies the
/// lock simply expires.
#[must_use]
pub struct LockGuard {
    store: Arc<dyn SwitchStore>,
    lock: DistributedLock,
}

impl LockManager {
    pub fn new(store: Arc<dyn SwitchStore>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns `None` if another unexpired holder exists.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>, AppError> {
        let now = Utc::now();
        let lock = DistributedLock {
            lock_name: name.to_string(),
            owner_id: self.owner_id.clone(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        if !self.store.try_acquire(&lock).await? {
            tracing::debug!(lock_name = name, owner_id = %self.owner_id, "lock held elsewhere");
            return Ok(None);
        }

        tracing::debug!(lock_name = name, owner_id = %self.owner_id, "lock acquired");
        Ok(Some(LockGuard {
            store: self.store.clone(),
            lock,
        }))
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(self.store.purge_expired_locks(now).await?)
    }
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.lock.lock_name
    }

    pub async fn release(self) -> Result<(), AppError> {
        let released = self
            .store
            .release(&self.lock.lock_name, &self.lock.owner_id)
            .await?;
        if !released {
            tracing::warn!(
                lock_name = %self.lock.lock_name,
                owner_id = %self.lock.owner_id,
                "lock expired or was taken over before release"
            );
        }
        Ok(())
    }
}
