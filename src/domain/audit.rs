//! Append-only audit records. Entries are only ever inserted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::transaction::TransactionStatus;

pub const ENTITY_TRANSACTION: &str = "transaction";
pub const ENTITY_SETTLEMENT: &str = "settlement_batch";
pub const ENTITY_VPA: &str = "vpa_mapping";
pub const ENTITY_BANK: &str = "bank";

pub const ACTOR_SYSTEM: &str = "SYSTEM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(entity_type: &str, entity_id: impl Into<String>, action: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.into(),
            action: action.to_string(),
            actor: ACTOR_SYSTEM.to_string(),
            old_values: None,
            new_values: None,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_values(mut self, old_values: Option<Value>, new_values: Option<Value>) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// One row of a transaction's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub id: Uuid,
    pub transaction_id: String,
    pub from_status: Option<TransactionStatus>,
    pub to_status: TransactionStatus,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

impl StateChange {
    pub fn new(
        transaction_id: impl Into<String>,
        from_status: Option<TransactionStatus>,
        to_status: TransactionStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            from_status,
            to_status,
            reason: reason.into(),
            changed_at: Utc::now(),
        }
    }
}
