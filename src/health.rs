use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::ports::{AuditRepository, SwitchStore};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

/// Round-trips the durable store, whichever backend is configured.
pub struct StoreChecker {
    store: Arc<dyn SwitchStore>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn SwitchStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for StoreChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker {
    url: String,
}

impl RedisChecker {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        let client = match redis::Client::open(self.url.as_str()) {
            Ok(client) => client,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// The store is critical; the VPA cache only degrades resolution latency.
pub async fn check_health(
    store: StoreChecker,
    redis: Option<RedisChecker>,
    start_time: Instant,
) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let redis_check = async {
        match redis {
            Some(checker) => Some(timeout(timeout_duration, checker.check()).await),
            None => None,
        }
    };
    let (store_result, redis_result) =
        tokio::join!(timeout(timeout_duration, store.check()), redis_check);

    let mut dependencies = HashMap::new();
    dependencies.insert(
        "store".to_string(),
        store_result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout")),
    );
    if let Some(result) = redis_result {
        dependencies.insert(
            "redis".to_string(),
            result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout")),
        );
    }

    HealthResponse {
        status: determine_overall_status(&dependencies),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>) -> String {
    let critical_deps = ["store"];
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical_deps.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    #[test]
    fn test_redis_failure_only_degrades() {
        let mut deps = HashMap::new();
        deps.insert("store".to_string(), DependencyStatus::healthy(Instant::now()));
        deps.insert("redis".to_string(), DependencyStatus::unhealthy("refused"));
        assert_eq!(determine_overall_status(&deps), "degraded");

        deps.insert("store".to_string(), DependencyStatus::unhealthy("down"));
        assert_eq!(determine_overall_status(&deps), "unhealthy");
    }

    #[tokio::test]
    async fn test_memory_store_reports_healthy() {
        let store: Arc<dyn SwitchStore> = Arc::new(MemoryStore::new());
        let report = check_health(StoreChecker::new(store), None, Instant::now()).await;
        assert_eq!(report.status, "healthy");
        assert!(report.dependencies.contains_key("store"));
        assert!(!report.dependencies.contains_key("redis"));
    }
}
