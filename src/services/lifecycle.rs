//! The only path through which a transaction's status changes.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use super::events::EventBus;
use crate::domain::audit::ENTITY_TRANSACTION;
use crate::domain::{AuditLogEntry, Fees, StateChange, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::{SwitchStore, TransactionRepository, Transition};

/// What a status change should record besides the new status.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub rrn: Option<String>,
    pub fees: Option<Fees>,
    pub needs_reconciliation: bool,
    pub require_undispatched: bool,
    /// Leave `processed_at` untouched, e.g. SUCCESS -> REVERSED.
    pub keep_processed_at: bool,
    pub correlation_id: Option<String>,
}

impl Outcome {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn SwitchStore>,
    events: EventBus,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn SwitchStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Moves `tx` from its current status to `to` if the row still holds that status.
    ///
    /// Returns `None` when another writer got there first. Illegal transitions are
    /// refused before touching the store.
    pub async fn transition(
        &self,
        tx: &Transaction,
        to: TransactionStatus,
        reason: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, AppError> {
        let from = tx.status;
        if !from.can_transition_to(to) {
            tracing::error!(
                transaction_id = %tx.transaction_id,
                from = %from,
                to = %to,
                reason,
                "integrity violation: illegal state transition refused"
            );
            return Err(AppError::Integrity(format!(
                "illegal transition {} -> {} for {}",
                from, to, tx.transaction_id
            )));
        }

        let mut audit = AuditLogEntry::new(ENTITY_TRANSACTION, tx.transaction_id.clone(), "STATUS_CHANGE")
            .with_values(
                Some(json!({ "status": from })),
                Some(json!({
                    "status": to,
                    "reason": reason,
                    "error_code": outcome.error_code,
                    "rrn": outcome.rrn,
                    "needs_reconciliation": outcome.needs_reconciliation,
                })),
            )
            .with_correlation(
                outcome
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| tx.transaction_id.clone()),
            );
        audit.created_at = now;

        let mut state_change = StateChange::new(tx.transaction_id.clone(), Some(from), to, reason);
        state_change.changed_at = now;

        let transition = Transition {
            transaction_id: tx.transaction_id.clone(),
            from,
            to,
            error_code: outcome.error_code,
            error_message: outcome.error_message,
            rrn: outcome.rrn,
            fees: outcome.fees,
            processed_at: if outcome.keep_processed_at { None } else { Some(now) },
            needs_reconciliation: outcome.needs_reconciliation,
            require_undispatched: outcome.require_undispatched,
            state_change,
            audit,
        };

        match self.store.apply_transition(&transition).await? {
            Some(updated) => {
                tracing::info!(
                    transaction_id = %updated.transaction_id,
                    status = %updated.status,
                    error_code = updated.error_code.as_deref().unwrap_or(""),
                    reason,
                    "transaction transitioned"
                );
                if updated.status.is_terminal() {
                    self.events.publish(&updated);
                }
                Ok(Some(updated))
            }
            None => Ok(None),
        }
    }

    /// Like `transition`, but when the conditional write loses returns the row as it now is.
    pub async fn finalize(
        &self,
        tx: &Transaction,
        to: TransactionStatus,
        reason: &str,
        outcome: Outcome,
    ) -> Result<Transaction, AppError> {
        if let Some(updated) = self.transition(tx, to, reason, outcome, Utc::now()).await? {
            return Ok(updated);
        }

        let current = self
            .store
            .get_transaction(&tx.transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", tx.transaction_id)))?;
        tracing::error!(
            transaction_id = %tx.transaction_id,
            expected = %tx.status,
            actual = %current.status,
            wanted = %to,
            "conditional transition lost to a concurrent writer"
        );
        Ok(current)
    }
}
