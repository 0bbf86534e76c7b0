//! Storage ports. Every method is one unit of work: implementations must make
//! all writes of a call commit together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{
    AuditLogEntry, Bank, BankSettlement, BankStatus, BatchStatus, DistributedLock, Fees,
    IdempotencyKey, SettlementBatch, StateChange, Transaction, TransactionStatus, VpaMapping,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Outcome of the uniqueness-constrained intake insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Transaction),
    /// Another submission already owns this `transaction_id`.
    Duplicate(Transaction),
}

/// A conditional status change. Applied only if the row is still in `from`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub transaction_id: String,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub rrn: Option<String>,
    pub fees: Option<Fees>,
    pub processed_at: Option<DateTime<Utc>>,
    pub needs_reconciliation: bool,
    /// Only apply while no bank call has been dispatched.
    pub require_undispatched: bool,
    pub state_change: StateChange,
    pub audit: AuditLogEntry,
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts a PENDING transaction, its idempotency key and creation audit together.
    async fn insert_pending(
        &self,
        tx: &Transaction,
        key: &IdempotencyKey,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<InsertOutcome>;

    async fn get_transaction(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>>;

    async fn get_transaction_by_rrn(&self, rrn: &str) -> RepositoryResult<Option<Transaction>>;

    async fn list_transactions_by_vpa(&self, vpa: &str, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    /// Records that the first money-moving call is about to leave. Returns false if the
    /// row is no longer PENDING or was already dispatched.
    async fn mark_dispatched(&self, transaction_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool>;

    /// Returns the updated row, or None if the row was not in `transition.from`.
    async fn apply_transition(&self, transition: &Transition) -> RepositoryResult<Option<Transaction>>;

    /// PENDING rows past expiry: undispatched ones at `now`, dispatched ones after `grace_cutoff`.
    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        grace_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    async fn count_by_status(&self) -> RepositoryResult<HashMap<String, i64>>;

    async fn state_changes(&self, transaction_id: &str) -> RepositoryResult<Vec<StateChange>>;
}

#[async_trait]
pub trait VpaRepository: Send + Sync {
    async fn get_active_vpa(&self, vpa: &str) -> RepositoryResult<Option<VpaMapping>>;

    /// The VPA's mapping at `bank_code`, active or not. The active one wins, then the newest.
    async fn vpa_mapping_at_bank(&self, vpa: &str, bank_code: &str) -> RepositoryResult<Option<VpaMapping>>;

    /// Deactivates any active mapping for the VPA and activates `mapping` together.
    /// Returns the mapping that was replaced, if any.
    async fn register_vpa(
        &self,
        mapping: &VpaMapping,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<VpaMapping>>;

    /// Returns false if there was no active mapping.
    async fn deactivate_vpa(&self, vpa: &str, audit: &AuditLogEntry) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait BankRepository: Send + Sync {
    async fn insert_bank(&self, bank: &Bank, audit: &AuditLogEntry) -> RepositoryResult<Bank>;

    async fn get_bank(&self, bank_code: &str) -> RepositoryResult<Option<Bank>>;

    async fn list_banks(&self, status: Option<BankStatus>) -> RepositoryResult<Vec<Bank>>;

    async fn update_bank_status(
        &self,
        bank_code: &str,
        status: BankStatus,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<Bank>>;

    async fn update_bank_health(
        &self,
        bank_code: &str,
        last_heartbeat: DateTime<Utc>,
        success_rate: f64,
        avg_response_time_ms: f64,
    ) -> RepositoryResult<Option<Bank>>;
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    async fn create_batch(&self, batch: &SettlementBatch) -> RepositoryResult<SettlementBatch>;

    async fn get_batch(&self, batch_id: &str) -> RepositoryResult<Option<SettlementBatch>>;

    async fn list_batches_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<SettlementBatch>>;

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<SettlementBatch>>;

    /// SUCCESS and REVERSED rows processed on `date` with no batch yet.
    async fn unsettled_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<Transaction>>;

    /// Writes the bank rows, tags every transaction still untagged, and completes the batch.
    /// Fails with `Conflict` and writes nothing if any transaction was already tagged.
    async fn commit_batch(
        &self,
        batch: &SettlementBatch,
        rows: &[BankSettlement],
        transaction_ids: &[String],
        audit: &AuditLogEntry,
    ) -> RepositoryResult<SettlementBatch>;

    async fn bank_settlements(&self, batch_id: &str) -> RepositoryResult<Vec<BankSettlement>>;

    async fn batch_transactions(&self, batch_id: &str) -> RepositoryResult<Vec<Transaction>>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn get_key(&self, key_hash: &str) -> RepositoryResult<Option<IdempotencyKey>>;

    async fn store_response(
        &self,
        key_hash: &str,
        response: &serde_json::Value,
    ) -> RepositoryResult<()>;

    async fn purge_expired_keys(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Succeeds only if no unexpired lock of the same name exists.
    async fn try_acquire(&self, lock: &DistributedLock) -> RepositoryResult<bool>;

    async fn release(&self, lock_name: &str, owner_id: &str) -> RepositoryResult<bool>;

    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append_audit(&self, entry: &AuditLogEntry) -> RepositoryResult<()>;

    async fn audit_trail(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<AuditLogEntry>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

/// The full durable store the switch runs against.
pub trait SwitchStore:
    TransactionRepository
    + VpaRepository
    + BankRepository
    + SettlementRepository
    + IdempotencyRepository
    + LockRepository
    + AuditRepository
{
}

impl<T> SwitchStore for T where
    T: TransactionRepository
        + VpaRepository
        + BankRepository
        + SettlementRepository
        + IdempotencyRepository
        + LockRepository
        + AuditRepository
{
}
