//! Wire types for the inbound operations. Requests reject unknown fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::transaction::CURRENCY_INR;
use crate::domain::{
    AuditLogEntry, Bank, BankSettlement, BankStatus, Fees, HealthSample, ResolvedVpa,
    SettlementBatch, StateChange, Transaction, TransactionStatus, TransactionType,
};

fn default_currency() -> String {
    CURRENCY_INR.to_string()
}

fn default_transaction_type() -> TransactionType {
    TransactionType::P2p
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessTransactionRequest {
    pub transaction_id: String,
    pub payer_vpa: String,
    pub payee_vpa: String,
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReverseTransactionRequest {
    pub reversal_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What a caller sees for a transaction; identical on every replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub rrn: Option<String>,
    pub transaction_type: TransactionType,
    pub payer_vpa: String,
    pub payee_vpa: String,
    pub amount: i64,
    pub currency: String,
    pub fees: Fees,
    pub payer_bank_code: String,
    pub payee_bank_code: String,
    pub original_transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for TransactionResult {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            status: tx.status,
            rrn: tx.rrn.clone(),
            transaction_type: tx.transaction_type,
            payer_vpa: tx.payer_vpa.clone(),
            payee_vpa: tx.payee_vpa.clone(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            fees: tx.fees,
            payer_bank_code: tx.payer_bank_code.clone(),
            payee_bank_code: tx.payee_bank_code.clone(),
            original_transaction_id: tx.original_transaction_id.clone(),
            error_code: tx.error_code.clone(),
            error_message: tx.error_message.clone(),
            initiated_at: tx.initiated_at,
            processed_at: tx.processed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionHistory {
    pub transaction: Transaction,
    pub state_changes: Vec<StateChange>,
    pub audit: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTransactionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterVpaRequest {
    pub vpa: String,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
    #[serde(default)]
    pub mobile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveVpaResponse {
    pub vpa: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    pub is_active: bool,
}

impl ResolveVpaResponse {
    pub fn from_resolution(vpa: String, resolved: Option<ResolvedVpa>) -> Self {
        match resolved {
            Some(r) => Self {
                vpa,
                exists: true,
                bank_code: Some(r.bank_code),
                account_number: Some(r.account_number),
                holder_name: Some(r.holder_name),
                is_active: r.is_active,
            },
            None => Self {
                vpa,
                exists: false,
                bank_code: None,
                account_number: None,
                holder_name: None,
                is_active: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBankRequest {
    pub bank_code: String,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBankStatusRequest {
    pub status: BankStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {
    pub success_rate: f64,
    pub response_time_ms: f64,
}

impl From<HeartbeatRequest> for HealthSample {
    fn from(req: HeartbeatRequest) -> Self {
        HealthSample {
            success_rate: req.success_rate,
            response_time_ms: req.response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBanksQuery {
    pub status: Option<BankStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankStatusView {
    #[serde(flatten)]
    pub bank: Bank,
    pub routing: String,
    pub eligible: bool,
    pub circuit_state: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitiateSettlementRequest {
    pub settlement_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementStatusView {
    #[serde(flatten)]
    pub batch: SettlementBatch,
    pub bank_settlements: Vec<BankSettlement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementReportQuery {
    pub bank_code: Option<String>,
    #[serde(default)]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub batch: SettlementBatch,
    pub bank_settlements: Vec<BankSettlement>,
    pub reconciliation: Reconciliation,
}

/// Totals recomputed from the transactions tagged with the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub recomputed_transactions: i64,
    pub recomputed_amount: i64,
    pub balanced: bool,
    pub mismatches: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_request_defaults_currency_and_type() {
        let req: ProcessTransactionRequest = serde_json::from_str(
            r#"{"transaction_id":"T1","payer_vpa":"a@bank1","payee_vpa":"b@bank2","amount":10000}"#,
        )
        .unwrap();
        assert_eq!(req.currency, "INR");
        assert_eq!(req.transaction_type, TransactionType::P2p);
    }

    #[test]
    fn process_request_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<ProcessTransactionRequest>(
            r#"{"transaction_id":"T1","payer_vpa":"a@bank1","payee_vpa":"b@bank2","amount":1,"tip":5}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn unresolved_vpa_reports_missing() {
        let view = ResolveVpaResponse::from_resolution("ghost@bank9".into(), None);
        assert!(!view.exists);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("bank_code").is_none());
    }
}
