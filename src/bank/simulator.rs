//! In-process stand-in for a participant bank.
//!
//! Used as the bank for non-production deployments (`BANK_SIMULATOR=true`) and as the
//! scripted test double. Behaviours are queued per operation and consumed in order;
//! once a queue is empty the simulator approves.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{BankClient, BankError, BankOperation, BankRequest, BankResponse};

#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    Approve,
    Decline(String),
    /// Answers after the delay, so a short deadline turns it into a timeout.
    Delay(Duration),
    TransportError,
}

#[derive(Default)]
struct SimState {
    scripts: HashMap<BankOperation, VecDeque<Behaviour>>,
    calls: Vec<(BankOperation, String)>,
}

#[derive(Default)]
pub struct SimulatedBank {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed latency to every approved answer.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues the next answer for `operation`.
    pub fn script(&self, operation: BankOperation, behaviour: Behaviour) -> &Self {
        self.lock()
            .scripts
            .entry(operation)
            .or_default()
            .push_back(behaviour);
        self
    }

    /// Number of `operation` calls received for `transaction_id`.
    pub fn calls(&self, operation: BankOperation, transaction_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, id)| *op == operation && id == transaction_id)
            .count()
    }

    pub fn total_calls(&self, operation: BankOperation) -> usize {
        self.lock().calls.iter().filter(|(op, _)| *op == operation).count()
    }

    async fn handle(&self, operation: BankOperation, request: &BankRequest) -> Result<BankResponse, BankError> {
        let behaviour = {
            let mut state = self.lock();
            state.calls.push((operation, request.transaction_id.clone()));
            state
                .scripts
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Behaviour::Approve)
        };

        tracing::debug!(
            bank_code = %request.bank_code,
            transaction_id = %request.transaction_id,
            %operation,
            ?behaviour,
            "simulated bank call"
        );

        match behaviour {
            Behaviour::Approve => {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                Ok(approval(request))
            }
            Behaviour::Decline(code) => Ok(BankResponse::declined(
                code,
                format!("{} declined by simulator", operation),
            )),
            Behaviour::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(approval(request))
            }
            Behaviour::TransportError => Err(BankError::Transport(format!(
                "simulated connection reset at {}",
                request.bank_code
            ))),
        }
    }
}

fn approval(request: &BankRequest) -> BankResponse {
    let suffix = Uuid::new_v4().simple().to_string();
    BankResponse::approved(format!("{}{}", request.bank_code, &suffix[..10].to_uppercase()))
}

#[async_trait]
impl BankClient for SimulatedBank {
    async fn authorize_debit(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.handle(BankOperation::Debit, request).await
    }

    async fn post_credit(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.handle(BankOperation::Credit, request).await
    }

    async fn reverse(&self, request: &BankRequest) -> Result<BankResponse, BankError> {
        self.handle(BankOperation::Reversal, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> BankRequest {
        BankRequest {
            transaction_id: id.to_string(),
            original_transaction_id: None,
            bank_code: "BANK1".to_string(),
            account_number: "0001".to_string(),
            counterparty_vpa: "b@bank2".to_string(),
            amount: 100,
            currency: "INR".to_string(),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn scripted_answers_are_consumed_in_order() {
        let bank = SimulatedBank::new();
        bank.script(BankOperation::Debit, Behaviour::Decline("INSUFFICIENT_FUNDS".into()))
            .script(BankOperation::Debit, Behaviour::TransportError);

        let first = bank.authorize_debit(&request("T1")).await.unwrap();
        assert!(!first.approved);
        assert!(bank.authorize_debit(&request("T2")).await.is_err());
        assert!(bank.authorize_debit(&request("T3")).await.unwrap().approved);
    }

    #[tokio::test]
    async fn calls_are_counted_per_transaction() {
        let bank = SimulatedBank::new();
        bank.authorize_debit(&request("T1")).await.unwrap();
        bank.post_credit(&request("T1")).await.unwrap();
        bank.authorize_debit(&request("T2")).await.unwrap();

        assert_eq!(bank.calls(BankOperation::Debit, "T1"), 1);
        assert_eq!(bank.calls(BankOperation::Credit, "T1"), 1);
        assert_eq!(bank.total_calls(BankOperation::Debit), 2);
        assert_eq!(bank.calls(BankOperation::Reversal, "T1"), 0);
    }
}
