//! Transaction lifecycle stream for downstream ledger and analytics consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{Transaction, TransactionStatus};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub event_type: String,
    pub transaction_id: String,
    pub rrn: Option<String>,
    pub status: TransactionStatus,
    pub amount: i64,
    pub total_fee: i64,
    pub currency: String,
    pub payer_bank_code: String,
    pub payee_bank_code: String,
    pub original_transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub emitted_at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            event_type: format!("transaction.{}", tx.status.as_str().to_lowercase()),
            transaction_id: tx.transaction_id.clone(),
            rrn: tx.rrn.clone(),
            status: tx.status,
            amount: tx.amount,
            total_fee: tx.fees.total_fee,
            currency: tx.currency.clone(),
            payer_bank_code: tx.payer_bank_code.clone(),
            payee_bank_code: tx.payee_bank_code.clone(),
            original_transaction_id: tx.original_transaction_id.clone(),
            error_code: tx.error_code.clone(),
            initiated_at: tx.initiated_at,
            processed_at: tx.processed_at,
            emitted_at: Utc::now(),
        }
    }
}

/// Fan-out of lifecycle events. Publishing never blocks and never fails the caller.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TransactionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, tx: &Transaction) {
        let event = TransactionEvent::from_transaction(tx);
        tracing::debug!(
            transaction_id = %event.transaction_id,
            event_type = %event.event_type,
            "publishing lifecycle event"
        );
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.sender.subscribe()
    }
}
