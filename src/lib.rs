pub mod adapters;
pub mod bank;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ports;
pub mod schemas;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::bank::BankGateway;
use crate::config::Config;
use crate::domain::RoutingPolicy;
use crate::error::AppError;
use crate::ports::SwitchStore;
use crate::services::{
    BankRegistry, EngineSettings, EventBus, IdempotencyService, Lifecycle, LockManager,
    SettlementScheduler, SettlementService, TimeoutSweeper, TransactionEngine, VpaCache,
    VpaDirectory,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SwitchStore>,
    pub engine: Arc<TransactionEngine>,
    pub directory: VpaDirectory,
    pub registry: BankRegistry,
    pub settlement: SettlementService,
    pub events: EventBus,
    pub redis_url: Option<String>,
    pub started_at: Instant,
}

/// Everything one switch instance runs: the request-facing state plus its background tasks.
pub struct Switch {
    pub state: AppState,
    pub sweeper: TimeoutSweeper,
    pub scheduler: SettlementScheduler,
}

fn chrono_duration(value: std::time::Duration) -> Result<chrono::Duration, AppError> {
    chrono::Duration::from_std(value)
        .map_err(|e| AppError::Internal(format!("duration out of range: {}", e)))
}

impl Switch {
    pub fn assemble(
        config: &Config,
        store: Arc<dyn SwitchStore>,
        gateway: Arc<BankGateway>,
        cache: Arc<dyn VpaCache>,
    ) -> Result<Self, AppError> {
        let events = EventBus::new();
        let lifecycle = Lifecycle::new(store.clone(), events.clone());
        let idempotency = IdempotencyService::new(store.clone(), chrono_duration(config.idempotency_ttl)?);
        let locks = LockManager::new(store.clone(), config.instance_id.clone());

        let directory = VpaDirectory::new(store.clone(), cache, config.vpa_cache_ttl);
        let policy = RoutingPolicy {
            heartbeat_staleness: chrono_duration(config.heartbeat_stale)?,
            success_rate_floor: config.success_rate_floor,
        };
        let registry = BankRegistry::new(store.clone(), gateway.clone(), policy, config.health_ema_alpha);

        let settings = EngineSettings {
            transaction_ttl: chrono_duration(config.transaction_ttl)?,
            signing_secret: config.signing_secret.clone(),
            ..EngineSettings::default()
        };
        let engine = TransactionEngine::new(
            store.clone(),
            directory.clone(),
            registry.clone(),
            gateway,
            idempotency.clone(),
            lifecycle.clone(),
            settings,
        );

        let settlement = SettlementService::new(
            store.clone(),
            locks.clone(),
            chrono_duration(config.settlement_lock_ttl)?,
        );
        let scheduler = SettlementScheduler::new(settlement.clone(), &config.settlement_cron)?;
        let sweeper = TimeoutSweeper::new(
            store.clone(),
            lifecycle,
            idempotency,
            locks,
            config.sweep_interval,
            chrono_duration(config.sweep_grace)?,
        );

        Ok(Self {
            state: AppState {
                store,
                engine: Arc::new(engine),
                directory,
                registry,
                settlement,
                events,
                redis_url: config.redis_url.clone(),
                started_at: Instant::now(),
            },
            sweeper,
            scheduler,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", post(handlers::transactions::process_transaction))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/transactions/:id/cancel", post(handlers::transactions::cancel_transaction))
        .route("/transactions/:id/reverse", post(handlers::transactions::reverse_transaction))
        .route("/transactions/:id/history", get(handlers::transactions::transaction_history))
        .route("/rrn/:rrn", get(handlers::transactions::get_by_rrn))
        .route("/vpas", post(handlers::vpa::register_vpa))
        .route("/vpas/:vpa", axum::routing::delete(handlers::vpa::deactivate_vpa))
        .route("/vpas/:vpa/resolve", get(handlers::vpa::resolve_vpa))
        .route("/vpas/:vpa/transactions", get(handlers::transactions::list_by_vpa))
        .route(
            "/banks",
            get(handlers::banks::list_banks).post(handlers::banks::register_bank),
        )
        .route("/banks/:code", get(handlers::banks::get_bank_status))
        .route("/banks/:code/status", axum::routing::put(handlers::banks::update_bank_status))
        .route("/banks/:code/heartbeat", post(handlers::banks::heartbeat))
        .route(
            "/settlements",
            get(handlers::settlements::list_settlements).post(handlers::settlements::initiate_settlement),
        )
        .route("/settlements/:id", get(handlers::settlements::get_settlement))
        .route("/settlements/:id/report", get(handlers::settlements::settlement_report))
        .route("/audit/:entity_type/:entity_id", get(handlers::audit_trail))
        .route("/ws/transactions", get(handlers::ws::transaction_events))
        .layer(cors)
        .with_state(state)
}
