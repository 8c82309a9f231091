use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::activity_store::{ActivityStore, WeatherPatch};
use crate::domain::{Activity, Interval, Sample};
use crate::error::IngestError;
use crate::normalize;
use crate::retry::{RetryPolicy, Sleeper};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReport {
    pub samples_written: usize,
    pub sample_batches_failed: usize,
    pub intervals_written: usize,
    pub errors: Vec<String>,
}

impl WriteReport {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub struct ActivityWriter<'a> {
    store: &'a dyn ActivityStore,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    batch_size: usize,
}

impl<'a> ActivityWriter<'a> {
    pub fn new(store: &'a dyn ActivityStore, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            store,
            sleeper,
            policy: RetryPolicy::new(3, Duration::from_secs(1), 2.0),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn write(
        &self,
        activity: &Activity,
        samples: &[Sample],
        intervals: &[Interval],
    ) -> Result<WriteReport, IngestError> {
        self.policy.run(self.sleeper, "activity upsert", |_| {
            self.store.upsert_activity(activity)
        })?;
        if let Some(patch) = WeatherPatch::from_activity(activity) {
            self.policy.run(self.sleeper, "weather write", |_| {
                self.store.record_weather(&activity.id, &patch)
            })?;
        }

        let mut report = WriteReport::default();
        let rows = normalize::sample_rows(&activity.id, samples);
        for (index, batch) in rows.chunks(self.batch_size).enumerate() {
            let result = self.policy.run(self.sleeper, "sample batch", |_| {
                self.store.insert_samples(batch)
            });
            match result {
                Ok(()) => report.samples_written += batch.len(),
                Err(failure) => {
                    warn!(
                        activity = %activity.id,
                        batch = index,
                        rows = batch.len(),
                        error = %failure,
                        "sample batch failed; continuing"
                    );
                    report.sample_batches_failed += 1;
                    report
                        .errors
                        .push(format!("{}: sample batch {index}: {failure}", activity.id));
                }
            }
        }

        let interval_rows = normalize::interval_rows(&activity.id, intervals, samples.len());
        if !interval_rows.is_empty() {
            let result = self.policy.run(self.sleeper, "interval upsert", |_| {
                self.store.insert_intervals(&interval_rows)
            });
            match result {
                Ok(()) => report.intervals_written = interval_rows.len(),
                Err(failure) => {
                    warn!(activity = %activity.id, error = %failure, "interval write failed");
                    report
                        .errors
                        .push(format!("{}: intervals: {failure}", activity.id));
                }
            }
        }

        if report.is_degraded() {
            warn!(
                activity = %activity.id,
                samples = report.samples_written,
                errors = report.errors.len(),
                "activity written with gaps"
            );
        } else {
            info!(
                activity = %activity.id,
                samples = report.samples_written,
                intervals = report.intervals_written,
                "activity written"
            );
        }
        Ok(report)
    }
}
