use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BankStatus {
    Active,
    Inactive,
    Maintenance,
    Suspended,
}

impl BankStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankStatus::Active => "ACTIVE",
            BankStatus::Inactive => "INACTIVE",
            BankStatus::Maintenance => "MAINTENANCE",
            BankStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for BankStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BankStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(BankStatus::Active),
            "INACTIVE" => Ok(BankStatus::Inactive),
            "MAINTENANCE" => Ok(BankStatus::Maintenance),
            "SUSPENDED" => Ok(BankStatus::Suspended),
            other => Err(format!("unknown bank status: {}", other)),
        }
    }
}

/// A participating bank and its rolling health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    pub bank_code: String,
    pub name: String,
    pub endpoint: String,
    pub public_key: Option<String>,
    pub status: BankStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Fraction in [0, 1].
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One heartbeat observation reported by (or probed from) a bank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub success_rate: f64,
    pub response_time_ms: f64,
}

impl Bank {
    pub fn new(bank_code: String, name: String, endpoint: String, public_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            bank_code,
            name,
            endpoint,
            public_key,
            status: BankStatus::Active,
            last_heartbeat: Some(now),
            success_rate: 1.0,
            avg_response_time_ms: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds a sample into the rolling metrics with an exponential moving average.
    pub fn apply_heartbeat(&mut self, sample: HealthSample, alpha: f64, at: DateTime<Utc>) {
        let alpha = alpha.clamp(0.0, 1.0);
        let observed = sample.success_rate.clamp(0.0, 1.0);
        self.success_rate = alpha * observed + (1.0 - alpha) * self.success_rate;
        self.avg_response_time_ms =
            alpha * sample.response_time_ms.max(0.0) + (1.0 - alpha) * self.avg_response_time_ms;
        self.last_heartbeat = Some(at);
        self.updated_at = at;
    }

    pub fn heartbeat_is_fresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.last_heartbeat
            .map(|at| now - at <= staleness)
            .unwrap_or(false)
    }

    pub fn routing(&self, now: DateTime<Utc>, policy: &RoutingPolicy) -> Routing {
        if self.status != BankStatus::Active {
            return Routing::Ineligible(format!("bank {} is {}", self.bank_code, self.status));
        }
        if !self.heartbeat_is_fresh(now, policy.heartbeat_staleness) {
            return Routing::Ineligible(format!("bank {} heartbeat is stale", self.bank_code));
        }
        if self.success_rate < policy.success_rate_floor {
            Routing::Deprioritized
        } else {
            Routing::Preferred
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingPolicy {
    pub heartbeat_staleness: Duration,
    pub success_rate_floor: f64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            heartbeat_staleness: Duration::seconds(300),
            success_rate_floor: 0.9,
        }
    }
}

/// Ordered from most to least preferred.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Routing {
    Preferred,
    Deprioritized,
    Ineligible(String),
}

impl Routing {
    pub fn is_eligible(&self) -> bool {
        !matches!(self, Routing::Ineligible(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> Bank {
        Bank::new("HDFC".into(), "HDFC Bank".into(), "http://hdfc".into(), None)
    }

    #[test]
    fn heartbeat_uses_exponential_moving_average() {
        let mut b = bank();
        let now = Utc::now();
        b.apply_heartbeat(HealthSample { success_rate: 0.5, response_time_ms: 100.0 }, 0.2, now);
        assert!((b.success_rate - 0.9).abs() < 1e-9);
        assert!((b.avg_response_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(b.last_heartbeat, Some(now));
    }

    #[test]
    fn low_success_rate_deprioritizes_but_keeps_eligible() {
        let mut b = bank();
        b.success_rate = 0.5;
        let routing = b.routing(Utc::now(), &RoutingPolicy::default());
        assert_eq!(routing, Routing::Deprioritized);
        assert!(routing.is_eligible());
    }

    #[test]
    fn suspended_or_stale_bank_is_ineligible() {
        let mut b = bank();
        b.status = BankStatus::Suspended;
        assert!(!b.routing(Utc::now(), &RoutingPolicy::default()).is_eligible());

        let mut stale = bank();
        stale.last_heartbeat = Some(Utc::now() - Duration::hours(1));
        assert!(!stale.routing(Utc::now(), &RoutingPolicy::default()).is_eligible());
    }

    #[test]
    fn recovery_moves_bank_back_to_preferred() {
        let mut b = bank();
        b.success_rate = 0.5;
        let now = Utc::now();
        for _ in 0..20 {
            b.apply_heartbeat(HealthSample { success_rate: 1.0, response_time_ms: 10.0 }, 0.2, now);
        }
        assert_eq!(b.routing(now, &RoutingPolicy::default()), Routing::Preferred);
    }
}
