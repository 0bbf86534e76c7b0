//! Transaction domain entity and its state machine.
//! Framework-agnostic representation of a switched payment.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CURRENCY_INR: &str = "INR";

/// Reserved suffix of switch-issued compensation ids. Clients may not use it.
pub const COMPENSATION_SUFFIX: &str = "_REVERSAL";

/// Id of the refund that compensates a partially applied `transaction_id`.
pub fn compensation_id(transaction_id: &str) -> String {
    format!("{}{}", transaction_id, COMPENSATION_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    Cancelled,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Timeout => "TIMEOUT",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }

    /// SUCCESS counts as terminal for callers even though it may still move to REVERSED.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// The single table of legal transitions.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Success)
                | (Pending, Failed)
                | (Pending, Timeout)
                | (Pending, Cancelled)
                | (Success, Reversed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            "TIMEOUT" => Ok(TransactionStatus::Timeout),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REVERSED" => Ok(TransactionStatus::Reversed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    P2p,
    P2m,
    M2p,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::P2p => "P2P",
            TransactionType::P2m => "P2M",
            TransactionType::M2p => "M2P",
            TransactionType::Refund => "REFUND",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P2P" => Ok(TransactionType::P2p),
            "P2M" => Ok(TransactionType::P2m),
            "M2P" => Ok(TransactionType::M2p),
            "REFUND" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Fee breakdown in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    pub switch_fee: i64,
    pub bank_fee: i64,
    pub total_fee: i64,
}

impl Fees {
    /// 0.1% switch fee and 0.05% bank fee, each at least one minor unit.
    pub fn for_amount(amount: i64) -> Self {
        let switch_fee = (amount / 1000).max(1);
        let bank_fee = (amount / 2000).max(1);
        Self {
            switch_fee,
            bank_fee,
            total_fee: switch_fee + bank_fee,
        }
    }
}

/// Domain entity representing a switched transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_id: String,
    pub rrn: Option<String>,
    pub payer_vpa: String,
    pub payee_vpa: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub payer_bank_code: String,
    pub payee_bank_code: String,
    pub fees: Fees,
    pub settlement_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub signature: Option<String>,
    pub needs_reconciliation: bool,
    pub initiated_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Routing facts the engine needs to create a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: String,
    pub payer_vpa: String,
    pub payee_vpa: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub payer_bank_code: String,
    pub payee_bank_code: String,
    pub signature: Option<String>,
    pub original_transaction_id: Option<String>,
}

impl Transaction {
    pub fn new_pending(input: NewTransaction, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: input.transaction_id,
            rrn: None,
            payer_vpa: input.payer_vpa,
            payee_vpa: input.payee_vpa,
            amount: input.amount,
            currency: input.currency,
            transaction_type: input.transaction_type,
            status: TransactionStatus::Pending,
            description: input.description,
            payer_bank_code: input.payer_bank_code,
            payee_bank_code: input.payee_bank_code,
            fees: Fees::default(),
            settlement_id: None,
            original_transaction_id: input.original_transaction_id,
            error_code: None,
            error_message: None,
            signature: input.signature,
            needs_reconciliation: false,
            initiated_at: now,
            dispatched_at: None,
            processed_at: None,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A switch-issued refund undoing a debit whose transfer never completed. It moves
    /// money inside the payer bank only.
    pub fn is_compensation(&self) -> bool {
        self.transaction_type == TransactionType::Refund
            && self
                .original_transaction_id
                .as_deref()
                .map_or(false, |original| self.transaction_id == compensation_id(original))
    }
}

/// Retrieval reference number: UTC julian date plus 12 random hex digits.
pub fn generate_rrn(now: DateTime<Utc>) -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{}{}", now.format("%y%j"), entropy[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn legal_transitions_are_accepted() {
        assert!(Pending.can_transition_to(Success));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Timeout));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Success.can_transition_to(Reversed));
    }

    #[test]
    fn terminal_states_never_move() {
        for from in [Failed, Timeout, Cancelled, Reversed] {
            for to in [Pending, Success, Failed, Timeout, Cancelled, Reversed] {
                assert!(!from.can_transition_to(to), "{} -> {} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn reversed_only_reachable_from_success() {
        for from in [Pending, Failed, Timeout, Cancelled, Reversed] {
            assert!(!from.can_transition_to(Reversed));
        }
    }

    #[test]
    fn fees_follow_rate_with_floor() {
        let fees = Fees::for_amount(10_000);
        assert_eq!(fees.switch_fee, 10);
        assert_eq!(fees.bank_fee, 5);
        assert_eq!(fees.total_fee, 15);

        let tiny = Fees::for_amount(3);
        assert_eq!(tiny, Fees { switch_fee: 1, bank_fee: 1, total_fee: 2 });
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [Pending, Success, Failed, Timeout, Cancelled, Reversed] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn rrn_has_date_prefix() {
        let now = Utc::now();
        let rrn = generate_rrn(now);
        assert_eq!(rrn.len(), 17);
        assert!(rrn.starts_with(&now.format("%y%j").to_string()));
        assert_ne!(rrn, generate_rrn(now));
    }

    #[test]
    fn compensation_is_recognised_by_id_and_type() {
        let mut refund = Transaction::new_pending(
            NewTransaction {
                transaction_id: compensation_id("T1"),
                payer_vpa: "a@bank1".into(),
                payee_vpa: "a@bank1".into(),
                amount: 100,
                currency: CURRENCY_INR.into(),
                transaction_type: TransactionType::Refund,
                description: None,
                payer_bank_code: "BANK1".into(),
                payee_bank_code: "BANK1".into(),
                signature: None,
                original_transaction_id: Some("T1".into()),
            },
            Utc::now(),
            Duration::minutes(5),
        );
        assert_eq!(refund.transaction_id, "T1_REVERSAL");
        assert!(refund.is_compensation());

        refund.transaction_id = "RVS-1".into();
        assert!(!refund.is_compensation());
    }
}
