use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::transactions::{TransactionRow, TRANSACTION_COLUMNS};
use super::{conflict_on_unique, insert_audit, parse_column, PgStore};
use crate::domain::{AuditLogEntry, BankSettlement, BatchStatus, SettlementBatch, Transaction};
use crate::ports::{RepositoryError, RepositoryResult, SettlementRepository};

const BATCH_COLUMNS: &str = r#"
    batch_id, settlement_date, status, total_transactions, total_amount,
    error_message, created_at, processed_at, completed_at
"#;

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[async_trait]
impl SettlementRepository for PgStore {
    async fn create_batch(&self, batch: &SettlementBatch) -> RepositoryResult<SettlementBatch> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            INSERT INTO settlement_batches (
                batch_id, settlement_date, status, total_transactions, total_amount,
                error_message, created_at, processed_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(&batch.batch_id)
        .bind(batch.settlement_date)
        .bind(batch.status.as_str())
        .bind(batch.total_transactions)
        .bind(batch.total_amount)
        .bind(&batch.error_message)
        .bind(batch.created_at)
        .bind(batch.processed_at)
        .bind(batch.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("batch {} exists", batch.batch_id)))?;

        row.into_domain()
    }

    async fn get_batch(&self, batch_id: &str) -> RepositoryResult<Option<SettlementBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM settlement_batches WHERE batch_id = $1",
            BATCH_COLUMNS
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BatchRow::into_domain).transpose()
    }

    async fn list_batches_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<SettlementBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM settlement_batches WHERE settlement_date = $1 ORDER BY created_at",
            BATCH_COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BatchRow::into_domain).collect()
    }

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<SettlementBatch>> {
        let mut db_tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM settlement_batches WHERE batch_id = $1 FOR UPDATE")
                .bind(batch_id)
                .fetch_optional(&mut *db_tx)
                .await?;

        match current {
            None => {
                db_tx.rollback().await?;
                return Ok(None);
            }
            Some((raw,)) if parse_column::<BatchStatus>("status", &raw)? == BatchStatus::Completed => {
                db_tx.rollback().await?;
                return Err(RepositoryError::Integrity(format!(
                    "batch {} is completed and immutable",
                    batch_id
                )));
            }
            Some(_) => {}
        }

        let row = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            UPDATE settlement_batches SET
                status = $2,
                processed_at = CASE WHEN $2 = 'PROCESSING' THEN $4 ELSE processed_at END,
                error_message = COALESCE($3, error_message)
            WHERE batch_id = $1
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(batch_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(at)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        row.into_domain().map(Some)
    }

    async fn unsettled_for_date(&self, date: NaiveDate) -> RepositoryResult<Vec<Transaction>> {
        let (start, end) = day_bounds(date);
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE status IN ('SUCCESS', 'REVERSED')
              AND settlement_id IS NULL
              AND processed_at >= $1 AND processed_at < $2
            ORDER BY processed_at
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn commit_batch(
        &self,
        batch: &SettlementBatch,
        rows: &[BankSettlement],
        transaction_ids: &[String],
        audit: &AuditLogEntry,
    ) -> RepositoryResult<SettlementBatch> {
        let mut db_tx = self.pool.begin().await?;

        let tagged = sqlx::query(
            r#"
            UPDATE transactions SET settlement_id = $1
            WHERE transaction_id = ANY($2) AND settlement_id IS NULL
            "#,
        )
        .bind(&batch.batch_id)
        .bind(transaction_ids)
        .execute(&mut *db_tx)
        .await?;

        if tagged.rows_affected() != transaction_ids.len() as u64 {
            db_tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "batch {}: {} of {} transactions were already settled",
                batch.batch_id,
                transaction_ids.len() as u64 - tagged.rows_affected(),
                transaction_ids.len()
            )));
        }

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO bank_settlements (
                    batch_id, bank_code, credit_amount, debit_amount, net_amount,
                    transaction_count, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&row.batch_id)
            .bind(&row.bank_code)
            .bind(row.credit_amount)
            .bind(row.debit_amount)
            .bind(row.net_amount)
            .bind(row.transaction_count)
            .bind(row.status.as_str())
            .execute(&mut *db_tx)
            .await
            .map_err(|e| {
                conflict_on_unique(e, || {
                    format!("batch {} already settled bank {}", row.batch_id, row.bank_code)
                })
            })?;
        }

        let completed = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            UPDATE settlement_batches SET
                status = $2,
                total_transactions = $3,
                total_amount = $4,
                processed_at = COALESCE(processed_at, $5),
                completed_at = $6
            WHERE batch_id = $1 AND status <> 'COMPLETED'
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(&batch.batch_id)
        .bind(batch.status.as_str())
        .bind(batch.total_transactions)
        .bind(batch.total_amount)
        .bind(batch.processed_at)
        .bind(batch.completed_at)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(completed) = completed else {
            db_tx.rollback().await?;
            return Err(RepositoryError::Integrity(format!(
                "batch {} is missing or already completed",
                batch.batch_id
            )));
        };

        insert_audit(&mut *db_tx, audit).await?;
        db_tx.commit().await?;

        completed.into_domain()
    }

    async fn bank_settlements(&self, batch_id: &str) -> RepositoryResult<Vec<BankSettlement>> {
        let rows = sqlx::query_as::<_, BankSettlementRow>(
            r#"
            SELECT batch_id, bank_code, credit_amount, debit_amount, net_amount,
                   transaction_count, status
            FROM bank_settlements
            WHERE batch_id = $1
            ORDER BY bank_code
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BankSettlementRow::into_domain).collect()
    }

    async fn batch_transactions(&self, batch_id: &str) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE settlement_id = $1 ORDER BY processed_at",
            TRANSACTION_COLUMNS
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    batch_id: String,
    settlement_date: NaiveDate,
    status: String,
    total_transactions: i64,
    total_amount: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl BatchRow {
    fn into_domain(self) -> RepositoryResult<SettlementBatch> {
        Ok(SettlementBatch {
            status: parse_column("status", &self.status)?,
            batch_id: self.batch_id,
            settlement_date: self.settlement_date,
            total_transactions: self.total_transactions,
            total_amount: self.total_amount,
            error_message: self.error_message,
            created_at: self.created_at,
            processed_at: self.processed_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BankSettlementRow {
    batch_id: String,
    bank_code: String,
    credit_amount: i64,
    debit_amount: i64,
    net_amount: i64,
    transaction_count: i64,
    status: String,
}

impl BankSettlementRow {
    fn into_domain(self) -> RepositoryResult<BankSettlement> {
        Ok(BankSettlement {
            status: parse_column("status", &self.status)?,
            batch_id: self.batch_id,
            bank_code: self.bank_code,
            credit_amount: self.credit_amount,
            debit_amount: self.debit_amount,
            net_amount: self.net_amount,
            transaction_count: self.transaction_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bounds_cover_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start.to_rfc3339(), "2025-01-15T00:00:00+00:00");
        assert_eq!(end - start, Duration::days(1));
    }
}
