use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{BankClient, BankError, BankOperation, BankRequest, BankResponse, HttpBankClient};
use crate::config::Config as AppConfig;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub default_timeout: Duration,
    pub timeouts: HashMap<String, Duration>,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_timeout: config.bank_timeout,
            timeouts: config.bank_timeouts.clone(),
            failure_threshold: config.circuit_failure_threshold,
            reset_timeout: config.circuit_reset,
        }
    }

    pub fn timeout_for(&self, bank_code: &str) -> Duration {
        self.timeouts
            .get(bank_code)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            timeouts: HashMap::new(),
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Routes bank calls to the right client under a per-bank deadline and circuit breaker.
///
/// Timeouts and transport failures count against the breaker; declines do not.
pub struct BankGateway {
    settings: GatewaySettings,
    clients: RwLock<HashMap<String, Arc<dyn BankClient>>>,
    /// Serves every bank without its own client, e.g. the simulator.
    fallback: Option<Arc<dyn BankClient>>,
    breakers: RwLock<HashMap<String, Breaker>>,
}

impl BankGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            settings,
            clients: RwLock::new(HashMap::new()),
            fallback: None,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// A gateway where every bank is answered by `client`.
    pub fn with_fallback(settings: GatewaySettings, client: Arc<dyn BankClient>) -> Self {
        Self {
            fallback: Some(client),
            ..Self::new(settings)
        }
    }

    pub async fn set_client(&self, bank_code: &str, client: Arc<dyn BankClient>) {
        self.clients.write().await.insert(bank_code.to_string(), client);
    }

    /// Installs an HTTP client for a registered bank unless one is already set.
    pub async fn register_endpoint(&self, bank_code: &str, endpoint: &str) {
        if self.fallback.is_some() {
            return;
        }
        let mut clients = self.clients.write().await;
        clients
            .entry(bank_code.to_string())
            .or_insert_with(|| Arc::new(HttpBankClient::new(endpoint.to_string())));
    }

    pub async fn circuit_state(&self, bank_code: &str) -> &'static str {
        match self.breakers.read().await.get(bank_code) {
            Some(breaker) if !breaker.is_call_permitted() => "open",
            _ => "closed",
        }
    }

    async fn client_for(&self, bank_code: &str) -> Result<Arc<dyn BankClient>, BankError> {
        if let Some(client) = self.clients.read().await.get(bank_code) {
            return Ok(client.clone());
        }
        self.fallback
            .clone()
            .ok_or_else(|| BankError::UnknownBank(bank_code.to_string()))
    }

    async fn breaker_for(&self, bank_code: &str) -> Breaker {
        if let Some(breaker) = self.breakers.read().await.get(bank_code) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(bank_code.to_string())
            .or_insert_with(|| {
                let backoff = backoff::equal_jittered(
                    self.settings.reset_timeout,
                    self.settings.reset_timeout * 2,
                );
                let policy =
                    failure_policy::consecutive_failures(self.settings.failure_threshold, backoff);
                Config::new().failure_policy(policy).build()
            })
            .clone()
    }

    /// Issues one call. `not_after` caps the per-bank timeout at the transaction's expiry;
    /// compensation calls pass `None` so they are bounded only by the bank timeout.
    pub async fn call(
        &self,
        operation: BankOperation,
        request: &BankRequest,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<BankResponse, BankError> {
        let bank_code = request.bank_code.as_str();
        let client = self.client_for(bank_code).await?;
        let breaker = self.breaker_for(bank_code).await;

        let mut deadline = self.settings.timeout_for(bank_code);
        if let Some(not_after) = not_after {
            let remaining = (not_after - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            deadline = deadline.min(remaining);
        }
        if deadline.is_zero() {
            return Err(BankError::Timeout(format!(
                "{} {} for {} past transaction expiry",
                bank_code, operation, request.transaction_id
            )));
        }

        let started = std::time::Instant::now();
        let result = breaker
            .call(async {
                let pending = match operation {
                    BankOperation::Debit => client.authorize_debit(request),
                    BankOperation::Credit => client.post_credit(request),
                    BankOperation::Reversal => client.reverse(request),
                };
                match tokio::time::timeout(deadline, pending).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(BankError::Timeout(format!(
                        "{} {} exceeded {}ms",
                        bank_code,
                        operation,
                        deadline.as_millis()
                    ))),
                }
            })
            .await;

        match result {
            Ok(response) => {
                tracing::debug!(
                    bank_code,
                    transaction_id = %request.transaction_id,
                    %operation,
                    approved = response.approved,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "bank call completed"
                );
                Ok(response)
            }
            Err(FailsafeError::Rejected) => {
                tracing::warn!(bank_code, %operation, "circuit breaker open, failing fast");
                Err(BankError::CircuitOpen(bank_code.to_string()))
            }
            Err(FailsafeError::Inner(e)) => {
                tracing::warn!(
                    bank_code,
                    transaction_id = %request.transaction_id,
                    %operation,
                    error = %e,
                    "bank call failed"
                );
                Err(e)
            }
        }
    }
}
