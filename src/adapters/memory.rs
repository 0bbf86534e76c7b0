//! In-memory implementation of every storage port.
//!
//! All tables live behind one `RwLock`, so each port call sees and writes a consistent
//! snapshot, which gives the same all-or-nothing behaviour the Postgres adapter gets
//! from a database transaction. Used by tests and `STORE_BACKEND=memory`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{
    AuditLogEntry, Bank, BankSettlement, BankStatus, BatchStatus, DistributedLock, IdempotencyKey,
    SettlementBatch, StateChange, Transaction, TransactionStatus, TransactionType, VpaMapping,
};
use crate::ports::{
    AuditRepository, BankRepository, IdempotencyRepository, InsertOutcome, LockRepository,
    RepositoryError, RepositoryResult, SettlementRepository, Transition, TransactionRepository,
    VpaRepository,
};

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    state_changes: Vec<StateChange>,
    vpa_mappings: Vec<VpaMapping>,
    banks: HashMap<String, Bank>,
    batches: HashMap<String, SettlementBatch>,
    bank_settlements: Vec<BankSettlement>,
    idempotency_keys: HashMap<String, IdempotencyKey>,
    locks: HashMap<String, DistributedLock>,
    audit_logs: Vec<AuditLogEntry>,
}

/// A thread-safe in-memory switch store.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_settleable(tx: &Transaction, date: NaiveDate) -> bool {
    matches!(tx.status, TransactionStatus::Success | TransactionStatus::Reversed)
        && tx.settlement_id.is_none()
        && tx.processed_at.map(|at| at.date_naive() == date).unwrap_or(false)
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert_pending(
        &self,
        tx: &Transaction,
        key: &IdempotencyKey,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<InsertOutcome> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.transactions.get(&tx.transaction_id) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }

        if tx.transaction_type == TransactionType::Refund {
            if let Some(original) = &tx.original_transaction_id {
                let active_refund = state.transactions.values().any(|t| {
                    t.transaction_type == TransactionType::Refund
                        && t.original_transaction_id.as_ref() == Some(original)
                        && matches!(t.status, TransactionStatus::Pending | TransactionStatus::Success)
                });
                if active_refund {
                    return Err(RepositoryError::Conflict(format!(
                        "transaction {} already has an active refund",
                        original
                    )));
                }
            }
        }

        state.transactions.insert(tx.transaction_id.clone(), tx.clone());
        state.idempotency_keys.insert(key.key_hash.clone(), key.clone());
        state.state_changes.push(StateChange::new(
            tx.transaction_id.clone(),
            None,
            TransactionStatus::Pending,
            "created",
        ));
        state.audit_logs.push(audit.clone());
        Ok(InsertOutcome::Inserted(tx.clone()))
    }

    async fn get_transaction(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(transaction_id).cloned())
    }

    async fn get_transaction_by_rrn(&self, rrn: &str) -> RepositoryResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|t| t.rrn.as_deref() == Some(rrn))
            .cloned())
    }

    async fn list_transactions_by_vpa(&self, vpa: &str, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.payer_vpa == vpa || t.payee_vpa == vpa)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_dispatched(&self, transaction_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;
        match state.transactions.get_mut(transaction_id) {
            Some(tx) if tx.status == TransactionStatus::Pending && tx.dispatched_at.is_none() => {
                tx.dispatched_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_transition(&self, transition: &Transition) -> RepositoryResult<Option<Transaction>> {
        let mut state = self.state.write().await;

        if let Some(rrn) = &transition.rrn {
            let taken = state
                .transactions
                .values()
                .any(|t| t.rrn.as_ref() == Some(rrn) && t.transaction_id != transition.transaction_id);
            if taken {
                return Err(RepositoryError::Conflict(format!("rrn {} already assigned", rrn)));
            }
        }

        let Some(tx) = state.transactions.get_mut(&transition.transaction_id) else {
            return Ok(None);
        };
        if tx.status != transition.from {
            return Ok(None);
        }
        if transition.require_undispatched && tx.dispatched_at.is_some() {
            return Ok(None);
        }

        tx.status = transition.to;
        if transition.error_code.is_some() {
            tx.error_code = transition.error_code.clone();
            tx.error_message = transition.error_message.clone();
        }
        if transition.rrn.is_some() {
            tx.rrn = transition.rrn.clone();
        }
        if let Some(fees) = transition.fees {
            tx.fees = fees;
        }
        if transition.processed_at.is_some() {
            tx.processed_at = transition.processed_at;
        }
        tx.needs_reconciliation |= transition.needs_reconciliation;
        let updated = tx.clone();

        state.state_changes.push(transition.state_change.clone());
        state.audit_logs.push(transition.audit.clone());
        Ok(Some(updated))
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        grace_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending)
            .filter(|t| {
                if t.dispatched_at.is_some() {
                    t.expires_at < grace_cutoff
                } else {
                    t.expires_at <= now
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn count_by_status(&self) -> RepositoryResult<HashMap<String, i64>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for tx in state.transactions.values() {
            *counts.entry(tx.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn state_changes(&self, transaction_id: &str) -> RepositoryResult<Vec<StateChange>> {
        let state = self.state.read().await;
        Ok(state
            .state_changes
            .iter()
            .filter(|c| c.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VpaRepository for MemoryStore {
    async fn get_active_vpa(&self, vpa: &str) -> RepositoryResult<Option<VpaMapping>> {
        let state = self.state.read().await;
        Ok(state
            .vpa_mappings
            .iter()
            .find(|m| m.vpa == vpa && m.is_active)
            .cloned())
    }

    async fn vpa_mapping_at_bank(&self, vpa: &str, bank_code: &str) -> RepositoryResult<Option<VpaMapping>> {
        let state = self.state.read().await;
        Ok(state
            .vpa_mappings
            .iter()
            .filter(|m| m.vpa == vpa && m.bank_code == bank_code)
            .max_by_key(|m| (m.is_active, m.created_at))
            .cloned())
    }

    async fn register_vpa(
        &self,
        mapping: &VpaMapping,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<VpaMapping>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut replaced = None;
        for existing in state.vpa_mappings.iter_mut() {
            if existing.vpa == mapping.vpa && existing.is_active {
                existing.is_active = false;
                existing.updated_at = now;
                replaced = Some(existing.clone());
            }
        }
        state.vpa_mappings.push(mapping.clone());
        state.audit_logs.push(audit.clone());
        Ok(replaced)
    }

    async fn deactivate_vpa(&self, vpa: &str, audit: &AuditLogEntry) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut changed = false;
        for existing in state.vpa_mappings.iter_mut() {
            if existing.vpa == vpa && existing.is_active {
                existing.is_active = false;
                existing.updated_at = now;
                changed = true;
            }
        }
        if changed {
            state.audit_logs.push(audit.clone());
        }
        Ok(changed)
    }
}

#[async_trait]
impl BankRepository for MemoryStore {
    async fn insert_bank(&self, bank: &Bank, audit: &AuditLogEntry) -> RepositoryResult<Bank> {
        let mut state = self.state.write().await;
        if state.banks.contains_key(&bank.bank_code) {
            return Err(RepositoryError::Conflict(format!(
                "bank {} already registered",
                bank.bank_code
            )));
        }
        state.banks.insert(bank.bank_code.clone(), bank.clone());
        state.audit_logs.push(audit.clone());
        Ok(bank.clone())
    }

    async fn get_bank(&self, bank_code: &str) -> RepositoryResult<Option<Bank>> {
        let state = self.state.read().await;
        Ok(state.banks.get(bank_code).cloned())
    }

    async fn list_banks(&self, status: Option<BankStatus>) -> RepositoryResult<Vec<Bank>> {
        let state = self.state.read().await;
        let mut banks: Vec<Bank> = state
            .banks
            .values()
            .filter(|b| status.map(|s| b.status == s).unwrap_or(true))
            .cloned()
            .collect();
        banks.sort_by(|a, b| a.bank_code.cmp(&b.bank_code));
        Ok(banks)
    }

    async fn update_bank_status(
        &self,
        bank_code: &str,
        status: BankStatus,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<Bank>> {
        let mut state = self.state.write().await;
        let Some(bank) = state.banks.get_mut(bank_code) else {
            return Ok(None);
        };
        bank.status = status;
        bank.updated_at = Utc::now();
        let updated = bank.clone();
        state.audit_logs.push(audit.clone());
        Ok(Some(updated))
    }

    async fn update_bank_health(
        &self,
        bank_code: &str,
        last_heartbeat: DateTime<Utc>,
        success_rate: f64,
        avg_response_time_ms: f64,
    ) -> RepositoryResult<Option<Bank>> {
        let mut state = self.state.write().await;
        let Some(bank) = state.banks.get_mut(bank_code) else {
            return Ok(None);
        };
        bank.last_heartbeat = Some(last_heartbeat);
        bank.success_rate = success_rate;
        bank.avg_response_time_ms = avg_response_time_ms;
        bank.updated_at = last_heartbeat;
        Ok(Some(bank.clone()))
    }
}

#[async_trait]
impl SettlementRepository for MemoryStore {
    async fn create_batch(&self, batch: &SettlementBatch) -> RepositoryResult<SettlementBatch> {
        let mut state = self.state.write().await;
        if state.batches.contains_key(&batch.batch_id) {
            return Err(RepositoryError::Conflict(format!("batch {} exists", batch.batch_id)));
        }
        state.batches.insert(batch.batch_id.clone(), batch.clone());
        Ok(batch.clone())
    }

    async fn get_batch(&self, batch_id: &str) -> RepositoryResult<Option<SettlementBatch>> {
        let state = self.state.read().await;
        Ok(state.batches.get(batch_id).cloned())
    }

    async fn list_batches_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<SettlementBatch>> {
        let state = self.state.read().await;
        let mut batches: Vec<SettlementBatch> = state
            .batches
            .values()
            .filter(|b| b.settlement_date == date)
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(batches)
    }

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<SettlementBatch>> {
        let mut state = self.state.write().await;
        let Some(batch) = state.batches.get_mut(batch_id) else {
            return Ok(None);
        };
        if batch.status == BatchStatus::Completed {
            return Err(RepositoryError::Integrity(format!(
                "batch {} is completed and immutable",
                batch_id
            )));
        }
        batch.status = status;
        if status == BatchStatus::Processing {
            batch.processed_at = Some(at);
        }
        if error_message.is_some() {
            batch.error_message = error_message;
        }
        Ok(Some(batch.clone()))
    }

    async fn unsettled_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| is_settleable(t, date))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.processed_at.cmp(&b.processed_at));
        Ok(rows)
    }

    async fn commit_batch(
        &self,
        batch: &SettlementBatch,
        rows: &[BankSettlement],
        transaction_ids: &[String],
        audit: &AuditLogEntry,
    ) -> RepositoryResult<SettlementBatch> {
        let mut state = self.state.write().await;

        for id in transaction_ids {
            match state.transactions.get(id) {
                Some(tx) if tx.settlement_id.is_none() => {}
                Some(tx) => {
                    return Err(RepositoryError::Conflict(format!(
                        "transaction {} already settled in {}",
                        id,
                        tx.settlement_id.as_deref().unwrap_or_default()
                    )))
                }
                None => return Err(RepositoryError::NotFound(format!("transaction {}", id))),
            }
        }
        if state
            .bank_settlements
            .iter()
            .any(|r| r.batch_id == batch.batch_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "batch {} already has bank settlements",
                batch.batch_id
            )));
        }
        match state.batches.get(&batch.batch_id) {
            Some(existing) if existing.status == BatchStatus::Completed => {
                return Err(RepositoryError::Integrity(format!(
                    "batch {} is completed and immutable",
                    batch.batch_id
                )))
            }
            Some(_) => {}
            None => return Err(RepositoryError::NotFound(format!("batch {}", batch.batch_id))),
        }

        for id in transaction_ids {
            if let Some(tx) = state.transactions.get_mut(id) {
                tx.settlement_id = Some(batch.batch_id.clone());
            }
        }
        state.bank_settlements.extend(rows.iter().cloned());
        state.batches.insert(batch.batch_id.clone(), batch.clone());
        state.audit_logs.push(audit.clone());
        Ok(batch.clone())
    }

    async fn bank_settlements(&self, batch_id: &str) -> RepositoryResult<Vec<BankSettlement>> {
        let state = self.state.read().await;
        let mut rows: Vec<BankSettlement> = state
            .bank_settlements
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.bank_code.cmp(&b.bank_code));
        Ok(rows)
    }

    async fn batch_transactions(&self, batch_id: &str) -> RepositoryResult<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.settlement_id.as_deref() == Some(batch_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdempotencyRepository for MemoryStore {
    async fn get_key(&self, key_hash: &str) -> RepositoryResult<Option<IdempotencyKey>> {
        let state = self.state.read().await;
        Ok(state.idempotency_keys.get(key_hash).cloned())
    }

    async fn store_response(
        &self,
        key_hash: &str,
        response: &serde_json::Value,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        match state.idempotency_keys.get_mut(key_hash) {
            Some(key) => {
                key.response = Some(response.clone());
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("idempotency key {}", key_hash))),
        }
    }

    async fn purge_expired_keys(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        let before = state.idempotency_keys.len();
        state.idempotency_keys.retain(|_, key| !key.is_expired(now));
        Ok((before - state.idempotency_keys.len()) as u64)
    }
}

#[async_trait]
impl LockRepository for MemoryStore {
    async fn try_acquire(&self, lock: &DistributedLock) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;
        if let Some(held) = state.locks.get(&lock.lock_name) {
            if held.expires_at > lock.acquired_at {
                return Ok(false);
            }
        }
        state.locks.insert(lock.lock_name.clone(), lock.clone());
        Ok(true)
    }

    async fn release(&self, lock_name: &str, owner_id: &str) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;
        match state.locks.get(lock_name) {
            Some(held) if held.owner_id == owner_id => {
                state.locks.remove(lock_name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.expires_at > now);
        Ok((before - state.locks.len()) as u64)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        state.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn audit_trail(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit_logs
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}
