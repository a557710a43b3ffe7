use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{AppConfig, ConfigError};
use crate::core::Orchestrator;

/// Longest single sleep; keeps the trigger close to wall-clock time across suspends
/// and clock adjustments.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Fires a production backup once a day at a fixed local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    at: NaiveTime,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.trigger_time()?))
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Today's trigger time if it is still ahead of `now`, otherwise tomorrow's.
    pub fn next_fire_naive(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.at);
        if today > now {
            today
        } else {
            today + TimeDelta::days(1)
        }
    }

    pub fn next_fire(&self, now: DateTime<Local>) -> DateTime<Local> {
        let naive = self.next_fire_naive(now.naive_local());

        // A trigger inside a DST gap fires once the clock is past the gap
        Local
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                Local
                    .from_local_datetime(&(naive + TimeDelta::hours(1)))
                    .earliest()
            })
            .unwrap_or_else(|| now + TimeDelta::days(1))
    }

    /// Run production backups daily until `cancel` fires. A failed run is logged and
    /// the loop carries on.
    pub async fn run(self, orchestrator: Arc<Orchestrator>, cancel: CancellationToken) {
        info!(at = %self.at.format("%H:%M"), "Scheduler started");

        loop {
            let next = self.next_fire(Local::now());
            info!(next = %next.format("%Y-%m-%d %H:%M"), "Next scheduled backup");

            loop {
                let now = Local::now();
                if now >= next {
                    break;
                }
                let remaining = (next - now).to_std().unwrap_or_default().min(MAX_SLEEP);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Scheduler stopped");
                        return;
                    }
                    _ = tokio::time::sleep(remaining) => {}
                }
            }

            let report = orchestrator
                .clone()
                .run_scheduled(cancel.child_token())
                .await;

            for line in report.lines() {
                if report.is_done() {
                    info!(run_id = %report.run_id, "{line}");
                } else {
                    error!(run_id = %report.run_id, "{line}");
                }
            }
        }
    }
}
