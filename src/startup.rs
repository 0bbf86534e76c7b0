use crate::config::{Config, StoreBackend};
use crate::ports::{AuditRepository, BankRepository, SwitchStore};
use anyhow::{Context, Result};

pub struct ValidationReport {
    pub environment: bool,
    pub store: bool,
    pub redis: bool,
    pub bank_endpoints: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.store && self.redis && self.bank_endpoints
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Store Connectivity:    {}", status(self.store));
        println!("Redis Connectivity:    {}", status(self.redis));
        println!("Bank Endpoints:        {}", status(self.bank_endpoints));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, store: &dyn SwitchStore) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        store: true,
        redis: true,
        bank_endpoints: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }

    if let Err(e) = store.ping().await {
        report.store = false;
        report.errors.push(format!("Store: {}", e));
    }

    // Without Redis the directory falls back to a process-local cache.
    if let Some(url) = &config.redis_url {
        if let Err(e) = validate_redis(url).await {
            report.redis = false;
            report.errors.push(format!("Redis: {:#}", e));
        }
    }

    if !config.bank_simulator {
        if let Err(e) = validate_bank_endpoints(store).await {
            report.bank_endpoints = false;
            report.errors.push(format!("Banks: {:#}", e));
        }
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.store_backend == StoreBackend::Postgres && config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.transaction_ttl.is_zero() {
        anyhow::bail!("TRANSACTION_TTL_SECS must be greater than 0");
    }
    if config.bank_timeout >= config.transaction_ttl {
        anyhow::bail!("BANK_TIMEOUT_MS must be shorter than the transaction TTL");
    }
    if let Some(url) = &config.redis_url {
        url::Url::parse(url).context("REDIS_URL is not a valid URL")?;
    }
    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("Redis PING failed")?;

    Ok(())
}

/// Every registered bank needs an endpoint the gateway can call.
async fn validate_bank_endpoints(store: &dyn SwitchStore) -> Result<()> {
    let banks = store.list_banks(None).await.context("Failed to list banks")?;
    let invalid: Vec<String> = banks
        .iter()
        .filter(|bank| url::Url::parse(&bank.endpoint).is_err())
        .map(|bank| bank.bank_code.clone())
        .collect();

    if !invalid.is_empty() {
        anyhow::bail!("invalid endpoint for {}", invalid.join(", "));
    }
    Ok(())
}
