use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::bank::BankGateway;
use crate::domain::audit::ENTITY_BANK;
use crate::domain::{AuditLogEntry, Bank, BankStatus, HealthSample, Routing, RoutingPolicy};
use crate::error::AppError;
use crate::ports::{BankRepository, SwitchStore};
use crate::schemas::{BankStatusView, RegisterBankRequest};
use crate::validation::{sanitize_string, validate_bank_code, validate_endpoint, validate_required};

/// Participant metadata, health and routing eligibility, backed by the store.
#[derive(Clone)]
pub struct BankRegistry {
    store: Arc<dyn SwitchStore>,
    gateway: Arc<BankGateway>,
    policy: RoutingPolicy,
    ema_alpha: f64,
}

impl BankRegistry {
    pub fn new(
        store: Arc<dyn SwitchStore>,
        gateway: Arc<BankGateway>,
        policy: RoutingPolicy,
        ema_alpha: f64,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            ema_alpha,
        }
    }

    pub async fn register_bank(&self, req: RegisterBankRequest) -> Result<Bank, AppError> {
        validate_bank_code(&req.bank_code)?;
        let name = sanitize_string(&req.name);
        validate_required("name", &name)?;
        validate_endpoint(&req.endpoint)?;

        if self.store.get_bank(&req.bank_code).await?.is_some() {
            return Err(AppError::Conflict(format!("bank {} already registered", req.bank_code)));
        }

        let bank = Bank::new(req.bank_code, name, req.endpoint, req.public_key);
        let audit = AuditLogEntry::new(ENTITY_BANK, bank.bank_code.clone(), "REGISTER")
            .with_values(None, Some(json!({ "endpoint": bank.endpoint, "status": bank.status })));
        let bank = self.store.insert_bank(&bank, &audit).await?;
        self.gateway.register_endpoint(&bank.bank_code, &bank.endpoint).await;

        tracing::info!(bank_code = %bank.bank_code, "bank registered");
        Ok(bank)
    }

    pub async fn update_status(&self, bank_code: &str, status: BankStatus) -> Result<Bank, AppError> {
        let current = self.get_bank(bank_code).await?;
        let audit = AuditLogEntry::new(ENTITY_BANK, bank_code, "STATUS_CHANGE").with_values(
            Some(json!({ "status": current.status })),
            Some(json!({ "status": status })),
        );
        let bank = self
            .store
            .update_bank_status(bank_code, status, &audit)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bank {}", bank_code)))?;

        tracing::info!(bank_code, from = %current.status, to = %status, "bank status changed");
        Ok(bank)
    }

    /// Folds one health observation into the rolling metrics.
    pub async fn heartbeat(&self, bank_code: &str, sample: HealthSample) -> Result<Bank, AppError> {
        let response_time_ok = sample.response_time_ms.is_finite() && sample.response_time_ms >= 0.0;
        if !(0.0..=1.0).contains(&sample.success_rate) || !response_time_ok {
            return Err(AppError::Validation(
                "success_rate must be within [0, 1] and response_time_ms finite and non-negative"
                    .to_string(),
            ));
        }

        let mut bank = self.get_bank(bank_code).await?;
        let now = Utc::now();
        bank.apply_heartbeat(sample, self.ema_alpha, now);

        self.store
            .update_bank_health(bank_code, now, bank.success_rate, bank.avg_response_time_ms)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bank {}", bank_code)))
    }

    pub async fn get_bank(&self, bank_code: &str) -> Result<Bank, AppError> {
        self.store
            .get_bank(bank_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bank {}", bank_code)))
    }

    pub async fn get_status(&self, bank_code: &str) -> Result<BankStatusView, AppError> {
        let bank = self.get_bank(bank_code).await?;
        Ok(self.view(bank, Utc::now()).await)
    }

    /// Eligible banks first, then by success rate.
    pub async fn list_banks(&self, status: Option<BankStatus>) -> Result<Vec<BankStatusView>, AppError> {
        let now = Utc::now();
        let mut ranked: Vec<(Routing, Bank)> = self
            .store
            .list_banks(status)
            .await?
            .into_iter()
            .map(|bank| (bank.routing(now, &self.policy), bank))
            .collect();
        ranked.sort_by(|(ra, a), (rb, b)| {
            rank(ra)
                .cmp(&rank(rb))
                .then(b.success_rate.total_cmp(&a.success_rate))
                .then(a.bank_code.cmp(&b.bank_code))
        });

        let mut views = Vec::with_capacity(ranked.len());
        for (_, bank) in ranked {
            views.push(self.view(bank, now).await);
        }
        Ok(views)
    }

    /// Returns the bank if it may receive traffic now.
    pub async fn route(&self, bank_code: &str, now: DateTime<Utc>) -> Result<Bank, AppError> {
        let bank = self
            .store
            .get_bank(bank_code)
            .await?
            .ok_or_else(|| AppError::Unavailable(format!("bank {} is not registered", bank_code)))?;

        match bank.routing(now, &self.policy) {
            Routing::Preferred => Ok(bank),
            Routing::Deprioritized => {
                tracing::warn!(
                    bank_code,
                    success_rate = bank.success_rate,
                    "routing to deprioritized bank"
                );
                Ok(bank)
            }
            Routing::Ineligible(reason) => Err(AppError::Unavailable(reason)),
        }
    }

    /// Installs a client for every registered bank. Called once at startup.
    pub async fn sync_gateway(&self) -> Result<usize, AppError> {
        let banks = self.store.list_banks(None).await?;
        for bank in &banks {
            self.gateway.register_endpoint(&bank.bank_code, &bank.endpoint).await;
        }
        Ok(banks.len())
    }

    async fn view(&self, bank: Bank, now: DateTime<Utc>) -> BankStatusView {
        let routing = bank.routing(now, &self.policy);
        let circuit_state = self.gateway.circuit_state(&bank.bank_code).await;
        BankStatusView {
            routing: match &routing {
                Routing::Preferred => "PREFERRED".to_string(),
                Routing::Deprioritized => "DEPRIORITIZED".to_string(),
                Routing::Ineligible(reason) => format!("INELIGIBLE: {}", reason),
            },
            eligible: routing.is_eligible(),
            circuit_state,
            bank,
        }
    }
}

fn rank(routing: &Routing) -> u8 {
    match routing {
        Routing::Preferred => 0,
        Routing::Deprioritized => 1,
        Routing::Ineligible(_) => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::bank::GatewaySettings;

    fn registry() -> BankRegistry {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(BankGateway::new(GatewaySettings::default()));
        BankRegistry::new(store, gateway, RoutingPolicy::default(), 0.5)
    }

    fn request(code: &str) -> RegisterBankRequest {
        RegisterBankRequest {
            bank_code: code.into(),
            name: format!("{} Bank", code),
            endpoint: "http://localhost:9000".into(),
            public_key: None,
        }
    }

    #[tokio::test]
    async fn registered_bank_is_routable() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        assert!(registry.route("BANK1", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        let err = registry.register_bank(request("BANK1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn suspended_bank_is_unavailable() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        registry.update_status("BANK1", BankStatus::Suspended).await.unwrap();
        let err = registry.route("BANK1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unhealthy_bank_ranks_last_but_stays_eligible() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        registry.register_bank(request("BANK2")).await.unwrap();
        registry
            .heartbeat("BANK1", HealthSample { success_rate: 0.2, response_time_ms: 900.0 })
            .await
            .unwrap();

        let banks = registry.list_banks(None).await.unwrap();
        assert_eq!(banks[0].bank.bank_code, "BANK2");
        assert_eq!(banks[1].routing, "DEPRIORITIZED");
        assert!(banks[1].eligible);
        assert!(registry.route("BANK1", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_rejects_out_of_range_rate() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        let err = registry
            .heartbeat("BANK1", HealthSample { success_rate: 1.5, response_time_ms: 10.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn heartbeat_rejects_non_finite_samples() {
        let registry = registry();
        registry.register_bank(request("BANK1")).await.unwrap();
        for sample in [
            HealthSample { success_rate: 0.9, response_time_ms: f64::INFINITY },
            HealthSample { success_rate: 0.9, response_time_ms: f64::NAN },
            HealthSample { success_rate: f64::NAN, response_time_ms: 10.0 },
        ] {
            let err = registry.heartbeat("BANK1", sample).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        let bank = registry.get_bank("BANK1").await.unwrap();
        assert!(bank.avg_response_time_ms.is_finite());
    }
}
