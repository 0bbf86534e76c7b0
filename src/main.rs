use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upi_switch::adapters::{MemoryStore, PgStore};
use upi_switch::bank::{BankGateway, GatewaySettings, SimulatedBank};
use upi_switch::cli::{Cli, Commands, DbCommands, SettlementCommands, TxCommands};
use upi_switch::config::{Config, LogFormat, StoreBackend};
use upi_switch::ports::SwitchStore;
use upi_switch::services::{InMemoryVpaCache, RedisVpaCache, VpaCache};
use upi_switch::{cli, create_app, db, startup, Switch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let command = Cli::parse().command.unwrap_or(Commands::Serve);

    match command {
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Serve => serve(config).await,
        Commands::Tx(TxCommands::Status { transaction_id }) => {
            let switch = build(&config).await?;
            cli::handle_tx_status(&switch.state.engine, &transaction_id).await
        }
        Commands::Tx(TxCommands::Sweep) => {
            let switch = build(&config).await?;
            cli::handle_tx_sweep(&switch.sweeper).await
        }
        Commands::Settlement(SettlementCommands::Run { date }) => {
            let switch = build(&config).await?;
            cli::handle_settlement_run(&switch.state.settlement, date).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SwitchStore>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(config).await?;
            db::run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn open_cache(config: &Config) -> anyhow::Result<Arc<dyn VpaCache>> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("VPA cache backed by Redis");
            Ok(Arc::new(RedisVpaCache::new(url)?))
        }
        None => Ok(Arc::new(InMemoryVpaCache::new())),
    }
}

async fn build(config: &Config) -> anyhow::Result<Switch> {
    let store = open_store(config).await?;
    let cache = open_cache(config)?;

    let settings = GatewaySettings::from_config(config);
    let gateway = if config.bank_simulator {
        tracing::warn!("BANK_SIMULATOR is set; unmapped banks are answered in-process");
        Arc::new(BankGateway::with_fallback(settings, Arc::new(SimulatedBank::new())))
    } else {
        Arc::new(BankGateway::new(settings))
    };

    let switch = Switch::assemble(config, store, gateway, cache)?;
    let endpoints = switch.state.registry.sync_gateway().await?;
    tracing::info!(endpoints, "Bank gateway initialized");
    Ok(switch)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let switch = build(&config).await?;

    let report = startup::validate_environment(&config, switch.state.store.as_ref()).await;
    if !report.is_valid() {
        report.print();
        anyhow::bail!("startup validation failed");
    }

    let Switch {
        state,
        sweeper,
        scheduler,
    } = switch;
    sweeper.start();
    scheduler.start();

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
