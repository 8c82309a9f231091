use std::fmt::Write as _;

use serde::Serialize;

use crate::backfill::BackfillReport;
use crate::domain::{ActivitySource, Provenance, WeatherObservation};
use crate::writer::WriteReport;

pub const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub dry_run: bool,
    pub activities_skipped: bool,
    pub athletes: usize,
    pub activities_seen: usize,
    pub activities_processed: usize,
    pub activities_failed: usize,
    pub decoded_sensor_log: usize,
    pub decoded_stream_fallback: usize,
    pub metadata_only: usize,
    pub cache_hits: usize,
    pub weather_complete: usize,
    pub weather_archive: usize,
    pub weather_forecast: usize,
    pub weather_missing: usize,
    pub air_quality_present: usize,
    pub hr_complete: usize,
    pub hr_missing: usize,
    pub metadata_inserted: usize,
    pub records_inserted: usize,
    pub intervals_inserted: usize,
    pub sample_batches_failed: usize,
    pub summary_view_refreshed: bool,
    pub backfill: Option<BackfillReport>,
    pub errors: Vec<String>,
    pub errors_truncated: usize,
}

impl RunStats {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(message.into());
        } else {
            self.errors_truncated += 1;
        }
    }

    pub fn record_source(&mut self, source: ActivitySource) {
        match source {
            ActivitySource::SensorLog => self.decoded_sensor_log += 1,
            ActivitySource::StreamFallback => self.decoded_stream_fallback += 1,
            ActivitySource::BasicMetadataOnly => self.metadata_only += 1,
        }
    }

    pub fn record_weather(&mut self, observation: &WeatherObservation, source: Option<Provenance>) {
        match source {
            Some(Provenance::Archive) => self.weather_archive += 1,
            Some(Provenance::Forecast) => self.weather_forecast += 1,
            None => self.weather_missing += 1,
        }
        if observation.is_complete() {
            self.weather_complete += 1;
        }
        if observation.has_air_quality() {
            self.air_quality_present += 1;
        }
    }

    pub fn record_heartrate(&mut self, present: bool) {
        if present {
            self.hr_complete += 1;
        } else {
            self.hr_missing += 1;
        }
    }

    pub fn record_write(&mut self, report: &WriteReport) {
        self.metadata_inserted += 1;
        self.records_inserted += report.samples_written;
        self.intervals_inserted += report.intervals_written;
        self.sample_batches_failed += report.sample_batches_failed;
        for error in &report.errors {
            self.record_error(error.clone());
        }
    }

    pub fn record_backfill(&mut self, report: BackfillReport) {
        for error in &report.errors {
            self.record_error(format!("backfill: {error}"));
        }
        self.backfill = Some(report);
    }

    pub fn is_success(&self) -> bool {
        if self.dry_run {
            return true;
        }
        if self.activities_skipped {
            return self.backfill.is_some() || self.summary_view_refreshed;
        }
        self.activities_processed > 0
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(out, "Ingestion summary{mode}");
        let _ = writeln!(
            out,
            "  activities: {} seen, {} processed, {} failed across {} athlete(s)",
            self.activities_seen, self.activities_processed, self.activities_failed, self.athletes
        );
        let _ = writeln!(
            out,
            "  decoded: {} sensor log, {} stream fallback, {} metadata only ({} from cache)",
            self.decoded_sensor_log, self.decoded_stream_fallback, self.metadata_only, self.cache_hits
        );
        let _ = writeln!(
            out,
            "  weather: {} archive, {} forecast, {} missing, {} complete, {} with air quality",
            self.weather_archive,
            self.weather_forecast,
            self.weather_missing,
            self.weather_complete,
            self.air_quality_present
        );
        let _ = writeln!(
            out,
            "  heart rate: {} complete, {} missing",
            self.hr_complete, self.hr_missing
        );
        let _ = writeln!(
            out,
            "  inserted: {} metadata, {} records, {} intervals ({} failed batches)",
            self.metadata_inserted,
            self.records_inserted,
            self.intervals_inserted,
            self.sample_batches_failed
        );
        if let Some(backfill) = &self.backfill {
            let _ = writeln!(
                out,
                "  backfill: {} candidates, {} upgraded, {} still forecast, {} failed, {} without coordinates",
                backfill.candidates,
                backfill.upgraded,
                backfill.still_forecast,
                backfill.failed,
                backfill.skipped_no_coordinates
            );
        }
        if self.summary_view_refreshed {
            let _ = writeln!(out, "  summary view refreshed");
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "  errors:");
            for error in &self.errors {
                let _ = writeln!(out, "    - {error}");
            }
            if self.errors_truncated > 0 {
                let _ = writeln!(out, "    ... and {} more", self.errors_truncated);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_errors_only() {
        let mut stats = RunStats::new(false);
        for i in 0..15 {
            stats.record_error(format!("error {i}"));
        }
        assert_eq!(stats.errors.len(), MAX_ERRORS);
        assert_eq!(stats.errors[0], "error 0");
        assert_eq!(stats.errors_truncated, 5);
        assert!(stats.summary().contains("and 5 more"));
    }

    #[test]
    fn success_rules() {
        assert!(RunStats::new(true).is_success());
        let mut live = RunStats::new(false);
        assert!(!live.is_success());
        live.activities_processed = 1;
        assert!(live.is_success());
    }

    #[test]
    fn weather_counters() {
        let mut stats = RunStats::new(false);
        stats.record_weather(&WeatherObservation::default(), None);
        stats.record_weather(
            &WeatherObservation {
                temperature_c: Some(10.0),
                ..WeatherObservation::default()
            },
            Some(Provenance::Forecast),
        );
        assert_eq!(stats.weather_missing, 1);
        assert_eq!(stats.weather_forecast, 1);
        assert_eq!(stats.weather_complete, 0);
    }
}
