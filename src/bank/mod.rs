//! Outbound calls to participant banks.
//!
//! `BankClient` is the capability set every participant implements; `BankGateway`
//! wraps the per-bank clients with deadlines and circuit breakers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod gateway;
pub mod http;
pub mod simulator;

pub use gateway::{BankGateway, GatewaySettings};
pub use http::HttpBankClient;
pub use simulator::{Behaviour, SimulatedBank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankOperation {
    Debit,
    Credit,
    Reversal,
}

impl fmt::Display for BankOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BankOperation::Debit => "debit",
            BankOperation::Credit => "credit",
            BankOperation::Reversal => "reversal",
        })
    }
}

/// One money-moving instruction sent to a bank.
///
/// `transaction_id` is the switch transaction the instruction belongs to. A reversal
/// carries the refund's id there and names the debit being undone in
/// `original_transaction_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankRequest {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,
    pub bank_code: String,
    pub account_number: String,
    pub counterparty_vpa: String,
    pub amount: i64,
    pub currency: String,
    /// The bank should not act on the request after this instant.
    pub deadline: Option<DateTime<Utc>>,
}

/// A bank's answer. A decline is a normal response, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankResponse {
    pub approved: bool,
    #[serde(default)]
    pub bank_reference: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl BankResponse {
    pub fn approved(bank_reference: impl Into<String>) -> Self {
        Self {
            approved: true,
            bank_reference: Some(bank_reference.into()),
            error_code: None,
            error_message: None,
        }
    }

    pub fn declined(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            approved: false,
            bank_reference: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BankError {
    #[error("bank call timed out: {0}")]
    Timeout(String),

    #[error("bank transport failure: {0}")]
    Transport(String),

    #[error("circuit breaker open for bank {0}")]
    CircuitOpen(String),

    #[error("no client configured for bank {0}")]
    UnknownBank(String),
}

impl BankError {
    /// True when the bank may or may not have acted on the request.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, BankError::Timeout(_) | BankError::Transport(_))
    }
}

#[async_trait]
pub trait BankClient: Send + Sync {
    async fn authorize_debit(&self, request: &BankRequest) -> Result<BankResponse, BankError>;

    async fn post_credit(&self, request: &BankRequest) -> Result<BankResponse, BankError>;

    async fn reverse(&self, request: &BankRequest) -> Result<BankResponse, BankError>;
}
