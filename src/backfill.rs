use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use crate::activity_store::{ActivityStore, WeatherPatch};
use crate::cascade::{WeatherCascade, WeatherResolution};
use crate::domain::Provenance;
use crate::error::IngestError;
use crate::retry::{RetryPolicy, Sleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillWindow {
    min_days: u32,
    max_days: u32,
}

impl Default for BackfillWindow {
    fn default() -> Self {
        Self {
            min_days: 3,
            max_days: 7,
        }
    }
}

impl BackfillWindow {
    pub fn new(min_days: u32, max_days: u32) -> Result<Self, IngestError> {
        if min_days > max_days {
            return Err(IngestError::InvalidDateRange(format!(
                "backfill window {min_days}..{max_days} days"
            )));
        }
        Ok(Self { min_days, max_days })
    }

    pub fn dates(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let oldest = today
            .checked_sub_days(Days::new(u64::from(self.max_days)))
            .unwrap_or(NaiveDate::MIN);
        let newest = today
            .checked_sub_days(Days::new(u64::from(self.min_days)))
            .unwrap_or(NaiveDate::MIN);
        (oldest, newest)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub upgraded: usize,
    pub still_forecast: usize,
    pub failed: usize,
    pub skipped_no_coordinates: usize,
    pub errors: Vec<String>,
}

pub struct BackfillReconciler<'a> {
    store: &'a dyn ActivityStore,
    cascade: WeatherCascade<'a>,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    dry_run: bool,
}

impl<'a> BackfillReconciler<'a> {
    pub fn new(
        store: &'a dyn ActivityStore,
        cascade: WeatherCascade<'a>,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            store,
            cascade,
            sleeper,
            policy: RetryPolicy::new(3, Duration::from_secs(1), 2.0),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&self, window: BackfillWindow, today: NaiveDate) -> Result<BackfillReport, IngestError> {
        let (oldest, newest) = window.dates(today);
        let candidates = self.policy.run(self.sleeper, "backfill candidates", |_| {
            self.store.forecast_candidates(oldest, newest)
        })?;

        let mut report = BackfillReport {
            candidates: candidates.len(),
            ..BackfillReport::default()
        };
        info!(%oldest, %newest, candidates = candidates.len(), "backfill sweep");

        for candidate in candidates {
            let Some(point) = candidate.start_point() else {
                report.skipped_no_coordinates += 1;
                continue;
            };
            match self.cascade.resolve(Some(point), candidate.start_date) {
                WeatherResolution::Resolved {
                    observation,
                    provenance: Provenance::Archive,
                } => {
                    if self.dry_run {
                        info!(activity = %candidate.id, "dry run: would upgrade to archive weather");
                        report.upgraded += 1;
                        continue;
                    }
                    let patch = WeatherPatch::archive(observation);
                    let result = self.policy.run(self.sleeper, "weather patch", |_| {
                        self.store.patch_weather(&candidate.id, &patch)
                    });
                    match result {
                        Ok(()) => {
                            info!(activity = %candidate.id, "weather upgraded to archive");
                            report.upgraded += 1;
                        }
                        Err(failure) => {
                            warn!(activity = %candidate.id, error = %failure, "weather patch failed");
                            report.failed += 1;
                            report.errors.push(format!("{}: {failure}", candidate.id));
                        }
                    }
                }
                WeatherResolution::Resolved { .. } | WeatherResolution::Degraded { .. } => {
                    report.still_forecast += 1;
                }
                WeatherResolution::Failed { reason } => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {reason}", candidate.id));
                }
            }
        }
        Ok(report)
    }
}
