use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{GeoPoint, Provenance, WeatherObservation};
use crate::retry::{RetryFailure, RetryPolicy, Sleeper};
use crate::weather::WeatherClient;

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherResolution {
    Resolved {
        observation: WeatherObservation,
        provenance: Provenance,
    },
    Degraded {
        observation: WeatherObservation,
        provenance: Provenance,
        advisory: String,
    },
    Failed { reason: String },
}

impl WeatherResolution {
    pub fn provenance(&self) -> Option<Provenance> {
        match self {
            WeatherResolution::Resolved { provenance, .. }
            | WeatherResolution::Degraded { provenance, .. } => Some(*provenance),
            WeatherResolution::Failed { .. } => None,
        }
    }

    pub fn into_parts(self) -> (WeatherObservation, Option<Provenance>, Option<String>) {
        match self {
            WeatherResolution::Resolved {
                observation,
                provenance,
            } => (observation, Some(provenance), None),
            WeatherResolution::Degraded {
                observation,
                provenance,
                advisory,
            } => (observation, Some(provenance), Some(advisory)),
            WeatherResolution::Failed { reason } => {
                (WeatherObservation::default(), None, Some(reason))
            }
        }
    }
}

pub struct WeatherCascade<'a> {
    client: &'a dyn WeatherClient,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
}

impl<'a> WeatherCascade<'a> {
    pub fn new(client: &'a dyn WeatherClient, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            client,
            sleeper,
            policy: Self::default_policy(),
        }
    }

    pub fn default_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), 2.0).persistent()
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resolve(&self, point: Option<GeoPoint>, at: DateTime<Utc>) -> WeatherResolution {
        let Some(point) = point.filter(GeoPoint::is_valid) else {
            return WeatherResolution::Failed {
                reason: "no valid start coordinates; weather lookup skipped".to_string(),
            };
        };

        let archive = self.policy.run(self.sleeper, "archive weather", |_| {
            self.client.fetch_archive(point, at)
        });
        let archive_failure = match archive {
            Ok(observation) => {
                return WeatherResolution::Resolved {
                    observation,
                    provenance: Provenance::Archive,
                };
            }
            Err(failure) => failure,
        };
        info!(error = %archive_failure.cause, "archive weather unavailable, trying forecast");

        let forecast = self.policy.run(self.sleeper, "forecast weather", |_| {
            self.client.fetch_forecast(point, at)
        });
        match forecast {
            Ok(observation) => WeatherResolution::Degraded {
                observation,
                provenance: Provenance::Forecast,
                advisory: format!(
                    "archive weather unavailable ({}); using forecast data",
                    archive_failure.cause
                ),
            },
            Err(forecast_failure) => {
                let reason = failure_reason(&archive_failure, &forecast_failure);
                warn!(%reason, "weather enrichment failed");
                WeatherResolution::Failed { reason }
            }
        }
    }
}

fn failure_reason(archive: &RetryFailure, forecast: &RetryFailure) -> String {
    format!(
        "weather unavailable after {} attempts: archive: {}; forecast: {}",
        archive.attempts + forecast.attempts,
        archive.cause,
        forecast.cause
    )
}
