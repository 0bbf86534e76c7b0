use anyhow::Context;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub instance_id: String,
    pub signing_secret: Option<String>,
    pub transaction_ttl: Duration,
    pub bank_timeout: Duration,
    pub bank_timeouts: HashMap<String, Duration>,
    pub circuit_failure_threshold: u32,
    pub circuit_reset: Duration,
    pub heartbeat_stale: Duration,
    pub success_rate_floor: f64,
    pub health_ema_alpha: f64,
    pub vpa_cache_ttl: Duration,
    pub idempotency_ttl: Duration,
    pub sweep_interval: Duration,
    pub sweep_grace: Duration,
    pub settlement_cron: String,
    pub settlement_lock_ttl: Duration,
    pub bank_simulator: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch process env.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_backend = match get("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        };

        let database_url = match (store_backend, get("DATABASE_URL")) {
            (_, Some(url)) => url,
            (StoreBackend::Memory, None) => String::new(),
            (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is required for the postgres backend"),
        };

        let log_format = match get("LOG_FORMAT").as_deref().unwrap_or("text") {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        };

        let success_rate_floor: f64 = parse_or(&get, "SUCCESS_RATE_FLOOR", 0.90)?;
        if !(0.0..=1.0).contains(&success_rate_floor) {
            anyhow::bail!("SUCCESS_RATE_FLOOR must be within [0, 1]");
        }
        let health_ema_alpha: f64 = parse_or(&get, "HEALTH_EMA_ALPHA", 0.2)?;
        if !(health_ema_alpha > 0.0 && health_ema_alpha <= 1.0) {
            anyhow::bail!("HEALTH_EMA_ALPHA must be within (0, 1]");
        }

        let settlement_cron = get("SETTLEMENT_CRON").unwrap_or_else(|| "0 30 0 * * *".to_string());
        cron::Schedule::from_str(&settlement_cron)
            .map_err(|e| anyhow::anyhow!("SETTLEMENT_CRON is not a valid schedule: {}", e))?;

        Ok(Config {
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            store_backend,
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: get("REDIS_URL"),
            instance_id: get("INSTANCE_ID").unwrap_or_else(|| format!("switch-{}", uuid::Uuid::new_v4())),
            signing_secret: get("SIGNING_SECRET"),
            transaction_ttl: Duration::from_secs(parse_or(&get, "TRANSACTION_TTL_SECS", 300)?),
            bank_timeout: Duration::from_millis(parse_or(&get, "BANK_TIMEOUT_MS", 5000)?),
            bank_timeouts: parse_bank_timeouts(get("BANK_TIMEOUTS").as_deref().unwrap_or(""))?,
            circuit_failure_threshold: parse_or(&get, "CIRCUIT_FAILURE_THRESHOLD", 3)?,
            circuit_reset: Duration::from_secs(parse_or(&get, "CIRCUIT_RESET_SECS", 30)?),
            heartbeat_stale: Duration::from_secs(parse_or(&get, "HEARTBEAT_STALE_SECS", 300)?),
            success_rate_floor,
            health_ema_alpha,
            vpa_cache_ttl: Duration::from_secs(parse_or(&get, "VPA_CACHE_TTL_SECS", 300)?),
            idempotency_ttl: Duration::from_secs(3600 * parse_or::<u64, _>(&get, "IDEMPOTENCY_TTL_HOURS", 24)?),
            sweep_interval: Duration::from_secs(parse_or(&get, "SWEEP_INTERVAL_SECS", 30)?),
            sweep_grace: Duration::from_secs(parse_or(&get, "SWEEP_GRACE_SECS", 60)?),
            settlement_cron,
            settlement_lock_ttl: Duration::from_secs(parse_or(&get, "SETTLEMENT_LOCK_TTL_SECS", 600)?),
            bank_simulator: parse_or(&get, "BANK_SIMULATOR", false)?,
            log_format,
        })
    }

    /// Deadline for one call to `bank_code`, before capping at the transaction expiry.
    pub fn timeout_for(&self, bank_code: &str) -> Duration {
        self.bank_timeouts
            .get(bank_code)
            .copied()
            .unwrap_or(self.bank_timeout)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Parses `HDFC=2000,SBI=8000` into per-bank timeouts.
fn parse_bank_timeouts(raw: &str) -> anyhow::Result<HashMap<String, Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (code, ms) = entry
                .split_once('=')
                .with_context(|| format!("BANK_TIMEOUTS entry '{}' must be CODE=ms", entry))?;
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("BANK_TIMEOUTS entry '{}' has a bad duration", entry))?;
            Ok((code.trim().to_uppercase(), Duration::from_millis(ms)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_for_memory_backend() {
        let config = config_from(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.transaction_ttl, Duration::from_secs(300));
        assert_eq!(config.circuit_failure_threshold, 3);
        assert_eq!(config.idempotency_ttl, Duration::from_secs(86_400));
        assert!(config.redis_url.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("DATABASE_URL", "postgres://u:p@localhost/db")]).is_ok());
    }

    #[test]
    fn per_bank_timeouts_override_default() {
        let config = config_from(&[
            ("STORE_BACKEND", "memory"),
            ("BANK_TIMEOUT_MS", "1500"),
            ("BANK_TIMEOUTS", "hdfc=200, SBI=9000"),
        ])
        .unwrap();
        assert_eq!(config.timeout_for("HDFC"), Duration::from_millis(200));
        assert_eq!(config.timeout_for("SBI"), Duration::from_millis(9000));
        assert_eq!(config.timeout_for("ICIC"), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_values_fail_with_context() {
        let err = config_from(&[("STORE_BACKEND", "memory"), ("SERVER_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));

        assert!(config_from(&[("STORE_BACKEND", "memory"), ("BANK_TIMEOUTS", "HDFC")]).is_err());
        assert!(config_from(&[("STORE_BACKEND", "memory"), ("SUCCESS_RATE_FLOOR", "1.5")]).is_err());
        assert!(config_from(&[("STORE_BACKEND", "memory"), ("SETTLEMENT_CRON", "daily")]).is_err());
    }
}
