use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::time;
use tracing::{error, info};

use super::idempotency::IdempotencyService;
use super::lifecycle::{Lifecycle, Outcome};
use super::lock_manager::LockManager;
use crate::domain::coordination::ENTITY_KIND_TRANSACTION;
use crate::domain::{Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::{SwitchStore, TransactionRepository};
use crate::schemas::TransactionResult;

pub const TIMEOUT_UNCONFIRMED: &str = "TIMEOUT_UNCONFIRMED";
const SWEEP_BATCH: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    /// Rows whose bank calls never answered; flagged for reconciliation.
    pub unconfirmed: usize,
    pub keys_purged: u64,
    pub locks_purged: u64,
}

/// Finalizes PENDING transactions past their deadline and purges expired keys and locks.
pub struct TimeoutSweeper {
    store: Arc<dyn SwitchStore>,
    lifecycle: Lifecycle,
    idempotency: IdempotencyService,
    locks: LockManager,
    interval: std::time::Duration,
    grace: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        store: Arc<dyn SwitchStore>,
        lifecycle: Lifecycle,
        idempotency: IdempotencyService,
        locks: LockManager,
        interval: std::time::Duration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            idempotency,
            locks,
            interval,
            grace,
        }
    }

    /// Start the sweep background task
    pub fn start(self) {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                interval.tick().await;
                match self.sweep_once().await {
                    Ok(report) if report != SweepReport::default() => {
                        info!(
                            timed_out = report.timed_out,
                            unconfirmed = report.unconfirmed,
                            keys_purged = report.keys_purged,
                            locks_purged = report.locks_purged,
                            "timeout sweep completed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Timeout sweep failed: {}", e),
                }
            }
        });
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, AppError> {
        self.sweep_once_at(Utc::now()).await
    }

    pub async fn sweep_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();
        let expired = self
            .store
            .list_expired_pending(now, now - self.grace, SWEEP_BATCH)
            .await?;

        for tx in expired {
            let dispatched = tx.dispatched_at.is_some();
            let outcome = if dispatched {
                Outcome {
                    needs_reconciliation: true,
                    ..Outcome::failure(
                        TIMEOUT_UNCONFIRMED,
                        "no bank confirmation before expiry; outcome must be reconciled",
                    )
                }
            } else {
                Outcome {
                    require_undispatched: true,
                    ..Outcome::failure("TIMEOUT", "expired before any bank call")
                }
            };

            let finalized = match self
                .lifecycle
                .transition(&tx, TransactionStatus::Timeout, "expired", outcome, now)
                .await
            {
                Ok(Some(finalized)) => finalized,
                // Finished, or dispatched since listing; the next sweep sees it again.
                Ok(None) => continue,
                Err(e) => {
                    error!(transaction_id = %tx.transaction_id, error = %e, "failed to time out transaction");
                    continue;
                }
            };

            if dispatched {
                tracing::warn!(
                    transaction_id = %finalized.transaction_id,
                    error_code = TIMEOUT_UNCONFIRMED,
                    "dispatched transaction timed out; flagged for reconciliation"
                );
                report.unconfirmed += 1;
            } else {
                report.timed_out += 1;
            }
            self.cache(&finalized).await;
        }

        report.keys_purged = self.idempotency.purge_expired(now).await?;
        report.locks_purged = self.locks.purge_expired(now).await?;
        Ok(report)
    }

    async fn cache(&self, tx: &Transaction) {
        let value = match serde_json::to_value(TransactionResult::from(tx)) {
            Ok(value) => value,
            Err(e) => {
                error!(transaction_id = %tx.transaction_id, error = %e, "failed to encode result");
                return;
            }
        };
        match self
            .idempotency
            .complete(ENTITY_KIND_TRANSACTION, &tx.transaction_id, &value)
            .await
        {
            Ok(()) | Err(AppError::NotFound(_)) => {}
            Err(e) => error!(transaction_id = %tx.transaction_id, error = %e, "failed to cache result"),
        }
    }
}
