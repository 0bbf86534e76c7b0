use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::{conflict_on_unique, insert_audit, parse_column, PgStore};
use crate::domain::{
    AuditLogEntry, Fees, IdempotencyKey, StateChange, Transaction, TransactionStatus,
};
use crate::ports::{InsertOutcome, RepositoryResult, Transition, TransactionRepository};

pub(super) const TRANSACTION_COLUMNS: &str = r#"
    id, transaction_id, rrn, payer_vpa, payee_vpa, amount, currency, transaction_type,
    status, description, payer_bank_code, payee_bank_code, switch_fee, bank_fee, total_fee,
    settlement_id, original_transaction_id, error_code, error_message, signature,
    needs_reconciliation, initiated_at, dispatched_at, processed_at, expires_at
"#;

#[async_trait]
impl TransactionRepository for PgStore {
    async fn insert_pending(
        &self,
        tx: &Transaction,
        key: &IdempotencyKey,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<InsertOutcome> {
        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, transaction_id, payer_vpa, payee_vpa, amount, currency, transaction_type,
                status, description, payer_bank_code, payee_bank_code, original_transaction_id,
                signature, initiated_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(tx.id)
        .bind(&tx.transaction_id)
        .bind(&tx.payer_vpa)
        .bind(&tx.payee_vpa)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.transaction_type.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(&tx.payer_bank_code)
        .bind(&tx.payee_bank_code)
        .bind(&tx.original_transaction_id)
        .bind(&tx.signature)
        .bind(tx.initiated_at)
        .bind(tx.expires_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!(
                    "transaction {} already has an active refund",
                    tx.original_transaction_id.as_deref().unwrap_or_default()
                )
            })
        })?;

        if inserted.rows_affected() == 0 {
            db_tx.rollback().await?;
            let existing = self.get_transaction(&tx.transaction_id).await?.ok_or_else(|| {
                crate::ports::RepositoryError::Integrity(format!(
                    "transaction {} conflicted but cannot be read back",
                    tx.transaction_id
                ))
            })?;
            return Ok(InsertOutcome::Duplicate(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (
                key_hash, entity_type, entity_id, request_fingerprint, response, created_at, expires_at
            ) VALUES ($1, $2, $3, $4, NULL, $5, $6)
            ON CONFLICT (key_hash) DO UPDATE SET
                entity_type = EXCLUDED.entity_type,
                entity_id = EXCLUDED.entity_id,
                request_fingerprint = EXCLUDED.request_fingerprint,
                response = NULL,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&key.key_hash)
        .bind(&key.entity_type)
        .bind(&key.entity_id)
        .bind(&key.request_fingerprint)
        .bind(key.created_at)
        .bind(key.expires_at)
        .execute(&mut *db_tx)
        .await?;

        insert_state_change(
            &mut *db_tx,
            &StateChange::new(tx.transaction_id.clone(), None, TransactionStatus::Pending, "created"),
        )
        .await?;
        insert_audit(&mut *db_tx, audit).await?;

        db_tx.commit().await?;
        Ok(InsertOutcome::Inserted(tx.clone()))
    }

    async fn get_transaction(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn get_transaction_by_rrn(&self, rrn: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE rrn = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(rrn)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn list_transactions_by_vpa(&self, vpa: &str, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE payer_vpa = $1 OR payee_vpa = $1
            ORDER BY initiated_at DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(vpa)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn mark_dispatched(&self, transaction_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET dispatched_at = $2
            WHERE transaction_id = $1 AND status = 'PENDING' AND dispatched_at IS NULL
            "#,
        )
        .bind(transaction_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_transition(&self, transition: &Transition) -> RepositoryResult<Option<Transaction>> {
        let mut db_tx = self.pool.begin().await?;

        let fees = transition.fees;
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE transactions SET
                status = $3,
                error_code = COALESCE($4::text, error_code),
                error_message = CASE WHEN $4::text IS NULL THEN error_message ELSE $5 END,
                rrn = COALESCE($6, rrn),
                switch_fee = COALESCE($7, switch_fee),
                bank_fee = COALESCE($8, bank_fee),
                total_fee = COALESCE($9, total_fee),
                processed_at = COALESCE($10, processed_at),
                needs_reconciliation = needs_reconciliation OR $11
            WHERE transaction_id = $1 AND status = $2
              AND (NOT $12 OR dispatched_at IS NULL)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(&transition.transaction_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&transition.error_code)
        .bind(&transition.error_message)
        .bind(&transition.rrn)
        .bind(fees.map(|f| f.switch_fee))
        .bind(fees.map(|f| f.bank_fee))
        .bind(fees.map(|f| f.total_fee))
        .bind(transition.processed_at)
        .bind(transition.needs_reconciliation)
        .bind(transition.require_undispatched)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("rrn collision on transaction {}", transition.transaction_id)
            })
        })?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(None);
        };

        insert_state_change(&mut *db_tx, &transition.state_change).await?;
        insert_audit(&mut *db_tx, &transition.audit).await?;
        db_tx.commit().await?;

        row.into_domain().map(Some)
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        grace_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE status = 'PENDING'
              AND ((dispatched_at IS NULL AND expires_at <= $1)
                OR (dispatched_at IS NOT NULL AND expires_at < $2))
            ORDER BY expires_at
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(now)
        .bind(grace_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn count_by_status(&self) -> RepositoryResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM transactions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn state_changes(&self, transaction_id: &str) -> RepositoryResult<Vec<StateChange>> {
        let rows = sqlx::query_as::<_, StateChangeRow>(
            r#"
            SELECT id, transaction_id, from_status, to_status, reason, changed_at
            FROM transaction_state_changes
            WHERE transaction_id = $1
            ORDER BY changed_at
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StateChangeRow::into_domain).collect()
    }
}

async fn insert_state_change(
    conn: &mut sqlx::PgConnection,
    change: &StateChange,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transaction_state_changes (
            id, transaction_id, from_status, to_status, reason, changed_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(change.id)
    .bind(&change.transaction_id)
    .bind(change.from_status.map(|s| s.as_str()))
    .bind(change.to_status.as_str())
    .bind(&change.reason)
    .bind(change.changed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
pub(super) struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    rrn: Option<String>,
    payer_vpa: String,
    payee_vpa: String,
    amount: i64,
    currency: String,
    transaction_type: String,
    status: String,
    description: Option<String>,
    payer_bank_code: String,
    payee_bank_code: String,
    switch_fee: i64,
    bank_fee: i64,
    total_fee: i64,
    settlement_id: Option<String>,
    original_transaction_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    signature: Option<String>,
    needs_reconciliation: bool,
    initiated_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl TransactionRow {
    pub(super) fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            transaction_type: parse_column("transaction_type", &self.transaction_type)?,
            status: parse_column("status", &self.status)?,
            transaction_id: self.transaction_id,
            rrn: self.rrn,
            payer_vpa: self.payer_vpa,
            payee_vpa: self.payee_vpa,
            amount: self.amount,
            currency: self.currency,
            description: self.description,
            payer_bank_code: self.payer_bank_code,
            payee_bank_code: self.payee_bank_code,
            fees: Fees {
                switch_fee: self.switch_fee,
                bank_fee: self.bank_fee,
                total_fee: self.total_fee,
            },
            settlement_id: self.settlement_id,
            original_transaction_id: self.original_transaction_id,
            error_code: self.error_code,
            error_message: self.error_message,
            signature: self.signature,
            needs_reconciliation: self.needs_reconciliation,
            initiated_at: self.initiated_at,
            dispatched_at: self.dispatched_at,
            processed_at: self.processed_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StateChangeRow {
    id: Uuid,
    transaction_id: String,
    from_status: Option<String>,
    to_status: String,
    reason: String,
    changed_at: DateTime<Utc>,
}

impl StateChangeRow {
    fn into_domain(self) -> RepositoryResult<StateChange> {
        Ok(StateChange {
            id: self.id,
            transaction_id: self.transaction_id,
            from_status: self
                .from_status
                .as_deref()
                .map(|s| parse_column("from_status", s))
                .transpose()?,
            to_status: parse_column("to_status", &self.to_status)?,
            reason: self.reason,
            changed_at: self.changed_at,
        })
    }
}
