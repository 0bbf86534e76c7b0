use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BatchStatus::Pending),
            "PROCESSING" => Ok(BatchStatus::Processing),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub batch_id: String,
    pub settlement_date: NaiveDate,
    pub status: BatchStatus,
    pub total_transactions: i64,
    pub total_amount: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementBatch {
    pub fn new(settlement_date: NaiveDate) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            batch_id: format!(
                "STL{}{}",
                settlement_date.format("%Y%m%d"),
                suffix[..8].to_uppercase()
            ),
            settlement_date,
            status: BatchStatus::Pending,
            total_transactions: 0,
            total_amount: 0,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
        }
    }
}

/// Net position of one bank inside one batch. Unique per (batch_id, bank_code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSettlement {
    pub batch_id: String,
    pub bank_code: String,
    pub credit_amount: i64,
    pub debit_amount: i64,
    pub net_amount: i64,
    pub transaction_count: i64,
    pub status: BatchStatus,
}

/// Netting result for a set of transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetPositions {
    pub total_transactions: i64,
    pub total_amount: i64,
    pub by_bank: BTreeMap<String, Position>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub credit_amount: i64,
    pub debit_amount: i64,
    pub transaction_count: i64,
}

impl Position {
    pub fn net(&self) -> i64 {
        self.credit_amount - self.debit_amount
    }
}

fn add(total: i64, amount: i64, what: &str) -> Result<i64, String> {
    total
        .checked_add(amount)
        .ok_or_else(|| format!("{} overflows adding {}", what, amount))
}

impl NetPositions {
    /// Debits are booked to the payer bank and credits to the payee bank. Compensation
    /// refunds never leave the payer bank and carry no position. Fails if a total would
    /// overflow.
    pub fn compute<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Result<Self, String> {
        let mut by_bank: BTreeMap<String, Position> = BTreeMap::new();
        let mut total_transactions: i64 = 0;
        let mut total_amount: i64 = 0;

        for tx in transactions.into_iter().filter(|tx| !tx.is_compensation()) {
            total_transactions += 1;
            total_amount = add(total_amount, tx.amount, "batch total")?;

            let payer = by_bank.entry(tx.payer_bank_code.clone()).or_default();
            payer.debit_amount = add(payer.debit_amount, tx.amount, &tx.payer_bank_code)?;
            payer.transaction_count += 1;

            let payee = by_bank.entry(tx.payee_bank_code.clone()).or_default();
            payee.credit_amount = add(payee.credit_amount, tx.amount, &tx.payee_bank_code)?;
            if tx.payee_bank_code != tx.payer_bank_code {
                payee.transaction_count += 1;
            }
        }

        Ok(Self {
            total_transactions,
            total_amount,
            by_bank,
        })
    }

    /// Net positions of a closed system sum to zero and credits equal the batch total.
    pub fn check_balanced(&self) -> Result<(), String> {
        let mut net_sum: i64 = 0;
        let mut credits: i64 = 0;
        let mut debits: i64 = 0;
        for (bank_code, position) in &self.by_bank {
            net_sum = add(net_sum, position.net(), "net sum")?;
            credits = add(credits, position.credit_amount, bank_code)?;
            debits = add(debits, position.debit_amount, bank_code)?;
        }
        if net_sum != 0 {
            return Err(format!("net positions sum to {} instead of 0", net_sum));
        }
        if credits != self.total_amount || debits != self.total_amount {
            return Err(format!(
                "credits {} / debits {} do not match batch total {}",
                credits, debits, self.total_amount
            ));
        }
        Ok(())
    }

    pub fn into_rows(self, batch_id: &str, status: BatchStatus) -> Vec<BankSettlement> {
        self.by_bank
            .into_iter()
            .map(|(bank_code, p)| BankSettlement {
                batch_id: batch_id.to_string(),
                bank_code,
                credit_amount: p.credit_amount,
                debit_amount: p.debit_amount,
                net_amount: p.net(),
                transaction_count: p.transaction_count,
                status,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{NewTransaction, TransactionType};
    use chrono::Duration;

    fn tx(payer_bank: &str, payee_bank: &str, amount: i64) -> Transaction {
        Transaction::new_pending(
            NewTransaction {
                transaction_id: Uuid::new_v4().to_string(),
                payer_vpa: "a@x".into(),
                payee_vpa: "b@y".into(),
                amount,
                currency: "INR".into(),
                transaction_type: TransactionType::P2p,
                description: None,
                payer_bank_code: payer_bank.into(),
                payee_bank_code: payee_bank.into(),
                signature: None,
                original_transaction_id: None,
            },
            Utc::now(),
            Duration::minutes(5),
        )
    }

    #[test]
    fn nets_credits_against_debits_per_bank() {
        let txs = vec![tx("HDFC", "SBI", 10_000), tx("SBI", "HDFC", 4_000), tx("HDFC", "ICIC", 1_000)];
        let positions = NetPositions::compute(&txs).unwrap();

        assert_eq!(positions.total_transactions, 3);
        assert_eq!(positions.total_amount, 15_000);
        assert_eq!(positions.by_bank["HDFC"].net(), 4_000 - 11_000);
        assert_eq!(positions.by_bank["SBI"].net(), 10_000 - 4_000);
        assert_eq!(positions.by_bank["ICIC"].net(), 1_000);
        assert!(positions.check_balanced().is_ok());
    }

    #[test]
    fn intra_bank_transaction_counts_once() {
        let txs = vec![tx("HDFC", "HDFC", 500)];
        let positions = NetPositions::compute(&txs).unwrap();
        let hdfc = positions.by_bank["HDFC"];
        assert_eq!(hdfc.transaction_count, 1);
        assert_eq!(hdfc.net(), 0);
    }

    #[test]
    fn tampered_positions_fail_balance_check() {
        let mut positions = NetPositions::compute(&[tx("HDFC", "SBI", 100)]).unwrap();
        positions.by_bank.get_mut("SBI").unwrap().credit_amount += 1;
        assert!(positions.check_balanced().is_err());
    }

    #[test]
    fn rows_carry_batch_and_net() {
        let rows = NetPositions::compute(&[tx("HDFC", "SBI", 100)])
            .unwrap()
            .into_rows("B1", BatchStatus::Completed);
        assert_eq!(rows.len(), 2);
        let sbi = rows.iter().find(|r| r.bank_code == "SBI").unwrap();
        assert_eq!(sbi.net_amount, 100);
        assert_eq!(sbi.batch_id, "B1");
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let txs = vec![tx("HDFC", "SBI", i64::MAX), tx("HDFC", "SBI", 1)];
        let err = NetPositions::compute(&txs).unwrap_err();
        assert!(err.contains("overflows"));
    }

    #[test]
    fn compensation_refunds_carry_no_position() {
        let mut compensation = tx("HDFC", "HDFC", 700);
        compensation.transaction_type = TransactionType::Refund;
        compensation.original_transaction_id = Some("T9".into());
        compensation.transaction_id = "T9_REVERSAL".into();
        let txs = vec![tx("HDFC", "SBI", 1_000), compensation];

        let positions = NetPositions::compute(&txs).unwrap();

        assert_eq!(positions.total_transactions, 1);
        assert_eq!(positions.total_amount, 1_000);
        assert_eq!(positions.by_bank["HDFC"].transaction_count, 1);
        assert!(positions.check_balanced().is_ok());
    }
}
