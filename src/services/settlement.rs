use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::lock_manager::LockManager;
use crate::domain::audit::ENTITY_SETTLEMENT;
use crate::domain::{
    AuditLogEntry, BankSettlement, BatchStatus, NetPositions, SettlementBatch,
};
use crate::error::AppError;
use crate::ports::{SettlementRepository, SwitchStore};
use crate::schemas::{Reconciliation, SettlementReport, SettlementStatusView};

/// Nets settled-eligible transactions into per-bank positions, one date at a time.
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn SwitchStore>,
    locks: LockManager,
    lock_ttl: Duration,
}

#[derive(Serialize)]
struct ReportCsvRow<'a> {
    batch_id: &'a str,
    settlement_date: String,
    bank_code: &'a str,
    credit_amount: i64,
    debit_amount: i64,
    net_amount: i64,
    transaction_count: i64,
    status: &'a str,
}

impl SettlementService {
    pub fn new(store: Arc<dyn SwitchStore>, locks: LockManager, lock_ttl: Duration) -> Self {
        Self {
            store,
            locks,
            lock_ttl,
        }
    }

    /// Builds the batch for `date` under the `settlement:{date}` lock.
    ///
    /// Fails with `SettlementInProgress` if another builder holds the lock. If nothing
    /// is left unsettled and the date already has a completed batch, that batch is
    /// returned unchanged.
    pub async fn create_batch(&self, date: NaiveDate) -> Result<SettlementStatusView, AppError> {
        let lock_name = format!("settlement:{}", date);
        let guard = self
            .locks
            .try_acquire(&lock_name, self.lock_ttl)
            .await?
            .ok_or_else(|| {
                AppError::SettlementInProgress(format!("settlement for {} is being built elsewhere", date))
            })?;

        let result = self.build(date).await;

        if let Err(e) = guard.release().await {
            tracing::warn!(lock_name = %lock_name, error = %e, "failed to release settlement lock");
        }
        result
    }

    async fn build(&self, date: NaiveDate) -> Result<SettlementStatusView, AppError> {
        let unsettled = self.store.unsettled_for_date(date).await?;

        if unsettled.is_empty() {
            let completed = self
                .store
                .list_batches_for_date(date)
                .await?
                .into_iter()
                .filter(|b| b.status == BatchStatus::Completed)
                .last();
            if let Some(batch) = completed {
                tracing::info!(batch_id = %batch.batch_id, %date, "date already settled");
                return self.status_view(batch).await;
            }
        }

        let batch = self.store.create_batch(&SettlementBatch::new(date)).await?;
        let batch_id = batch.batch_id.clone();
        let mut batch = self
            .store
            .set_batch_status(&batch_id, BatchStatus::Processing, None, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("batch {}", batch_id)))?;

        let positions = match NetPositions::compute(&unsettled) {
            Ok(positions) => positions,
            Err(overflow) => {
                tracing::error!(batch_id = %batch_id, %date, %overflow, "integrity violation: settlement totals overflow");
                self.fail(&batch_id, &overflow).await;
                return Err(AppError::Integrity(format!("batch {}: {}", batch_id, overflow)));
            }
        };
        if let Err(mismatch) = positions.check_balanced() {
            tracing::error!(
                batch_id = %batch_id,
                %date,
                %mismatch,
                "integrity violation: settlement totals do not balance"
            );
            self.fail(&batch_id, &mismatch).await;
            return Err(AppError::Integrity(format!("batch {}: {}", batch_id, mismatch)));
        }

        let now = Utc::now();
        batch.status = BatchStatus::Completed;
        batch.total_transactions = positions.total_transactions;
        batch.total_amount = positions.total_amount;
        batch.processed_at = batch.processed_at.or(Some(now));
        batch.completed_at = Some(now);

        let bank_count = positions.by_bank.len();
        let rows = positions.into_rows(&batch_id, BatchStatus::Completed);
        let transaction_ids: Vec<String> = unsettled.iter().map(|t| t.transaction_id.clone()).collect();
        let audit = AuditLogEntry::new(ENTITY_SETTLEMENT, batch_id.clone(), "COMPLETE")
            .with_values(
                Some(json!({ "status": BatchStatus::Processing })),
                Some(json!({
                    "status": BatchStatus::Completed,
                    "settlement_date": date,
                    "total_transactions": batch.total_transactions,
                    "total_amount": batch.total_amount,
                    "transaction_ids": transaction_ids,
                })),
            );

        match self
            .store
            .commit_batch(&batch, &rows, &transaction_ids, &audit)
            .await
        {
            Ok(completed) => {
                tracing::info!(
                    batch_id = %completed.batch_id,
                    %date,
                    total_transactions = completed.total_transactions,
                    total_amount = completed.total_amount,
                    banks = bank_count,
                    "settlement batch completed"
                );
                Ok(SettlementStatusView {
                    batch: completed,
                    bank_settlements: rows,
                })
            }
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "settlement batch commit failed");
                self.fail(&batch_id, &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    async fn fail(&self, batch_id: &str, reason: &str) {
        if let Err(e) = self
            .store
            .set_batch_status(batch_id, BatchStatus::Failed, Some(reason.to_string()), Utc::now())
            .await
        {
            tracing::error!(batch_id, error = %e, "could not mark batch FAILED");
        }
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<SettlementStatusView, AppError> {
        let batch = self.load(batch_id).await?;
        self.status_view(batch).await
    }

    pub async fn list_batches(&self, date: NaiveDate) -> Result<Vec<SettlementBatch>, AppError> {
        Ok(self.store.list_batches_for_date(date).await?)
    }

    /// The batch with its bank rows, checked against the transactions it tagged.
    pub async fn report(
        &self,
        batch_id: &str,
        bank_code: Option<&str>,
    ) -> Result<SettlementReport, AppError> {
        let batch = self.load(batch_id).await?;
        let rows = self.store.bank_settlements(batch_id).await?;
        let tagged = self.store.batch_transactions(batch_id).await?;

        let recomputed = NetPositions::compute(&tagged)
            .map_err(|overflow| AppError::Integrity(format!("batch {}: {}", batch_id, overflow)))?;
        let reconciliation = reconcile(&batch, &rows, recomputed);
        if !reconciliation.balanced {
            tracing::error!(
                batch_id,
                mismatches = ?reconciliation.mismatches,
                "integrity violation: batch does not reproduce from its transactions"
            );
        }

        let bank_settlements = match bank_code {
            Some(code) => rows.into_iter().filter(|r| r.bank_code == code).collect(),
            None => rows,
        };
        Ok(SettlementReport {
            batch,
            bank_settlements,
            reconciliation,
        })
    }

    pub async fn report_csv(&self, batch_id: &str, bank_code: Option<&str>) -> Result<String, AppError> {
        let report = self.report(batch_id, bank_code).await?;
        let settlement_date = report.batch.settlement_date.to_string();

        let mut writer = csv::Writer::from_writer(vec![]);
        for row in &report.bank_settlements {
            writer
                .serialize(ReportCsvRow {
                    batch_id: &row.batch_id,
                    settlement_date: settlement_date.clone(),
                    bank_code: &row.bank_code,
                    credit_amount: row.credit_amount,
                    debit_amount: row.debit_amount,
                    net_amount: row.net_amount,
                    transaction_count: row.transaction_count,
                    status: row.status.as_str(),
                })
                .map_err(|e| AppError::Internal(format!("Failed to write report: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("Failed to flush report: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("Report is not UTF-8: {}", e)))
    }

    async fn load(&self, batch_id: &str) -> Result<SettlementBatch, AppError> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("settlement batch {}", batch_id)))
    }

    async fn status_view(&self, batch: SettlementBatch) -> Result<SettlementStatusView, AppError> {
        let bank_settlements = self.store.bank_settlements(&batch.batch_id).await?;
        Ok(SettlementStatusView {
            batch,
            bank_settlements,
        })
    }
}

fn reconcile(batch: &SettlementBatch, rows: &[BankSettlement], recomputed: NetPositions) -> Reconciliation {
    let mut mismatches = Vec::new();
    if batch.status != BatchStatus::Completed {
        return Reconciliation {
            recomputed_transactions: recomputed.total_transactions,
            recomputed_amount: recomputed.total_amount,
            balanced: false,
            mismatches: vec![format!("batch is {}", batch.status)],
        };
    }

    if recomputed.total_transactions != batch.total_transactions {
        mismatches.push(format!(
            "transaction count {} != recomputed {}",
            batch.total_transactions, recomputed.total_transactions
        ));
    }
    if recomputed.total_amount != batch.total_amount {
        mismatches.push(format!(
            "total amount {} != recomputed {}",
            batch.total_amount, recomputed.total_amount
        ));
    }
    for row in rows {
        let expected = recomputed.by_bank.get(&row.bank_code).map(|p| p.net()).unwrap_or(0);
        if row.net_amount != expected {
            mismatches.push(format!(
                "{} net {} != recomputed {}",
                row.bank_code, row.net_amount, expected
            ));
        }
    }
    if rows.len() != recomputed.by_bank.len() {
        mismatches.push(format!(
            "{} bank rows != {} recomputed banks",
            rows.len(),
            recomputed.by_bank.len()
        ));
    }

    Reconciliation {
        recomputed_transactions: recomputed.total_transactions,
        recomputed_amount: recomputed.total_amount,
        balanced: mismatches.is_empty(),
        mismatches,
    }
}
