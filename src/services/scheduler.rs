use chrono::{Duration, NaiveDate, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::{error, info, warn};

use super::settlement::SettlementService;
use crate::error::AppError;

/// Builds the previous UTC day's settlement batch on a cron schedule.
pub struct SettlementScheduler {
    settlement: SettlementService,
    schedule: Schedule,
}

impl SettlementScheduler {
    pub fn new(settlement: SettlementService, expression: &str) -> Result<Self, AppError> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| AppError::Validation(format!("invalid settlement schedule: {}", e)))?;
        Ok(Self {
            settlement,
            schedule,
        })
    }

    /// The date a run at `now` settles.
    pub fn target_date(now: chrono::DateTime<Utc>) -> NaiveDate {
        (now - Duration::days(1)).date_naive()
    }

    /// Start the settlement background task
    pub fn start(self) {
        tokio::spawn(async move {
            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    warn!("settlement schedule has no upcoming runs; scheduler stopped");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                let date = Self::target_date(Utc::now());
                match self.settlement.create_batch(date).await {
                    Ok(view) => info!(
                        batch_id = %view.batch.batch_id,
                        %date,
                        total_amount = view.batch.total_amount,
                        "scheduled settlement completed"
                    ),
                    Err(AppError::SettlementInProgress(_)) => {
                        info!(%date, "settlement already being built by another instance")
                    }
                    Err(e) => error!(%date, error = %e, "scheduled settlement failed"),
                }
            }
        });
    }
}
