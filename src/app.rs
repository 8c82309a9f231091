use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::activity_store::ActivityStore;
use crate::backfill::{BackfillReconciler, BackfillWindow};
use crate::cache::SeriesCache;
use crate::cascade::WeatherCascade;
use crate::decode::{DecodeResult, DecodedActivity};
use crate::domain::{
    Activity, ActivityId, ActivitySource, ActivityType, Athlete, AthleteId, DateRange, GeoPoint,
    Interval, Sample, WeatherObservation,
};
use crate::error::IngestError;
use crate::moving_time;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::sensor_log::SensorLogDecoder;
use crate::stats::RunStats;
use crate::streams::StreamDecoder;
use crate::upstream::{self, ActivitySummary, UpstreamClient};
use crate::weather::WeatherClient;
use crate::writer::{ActivityWriter, DEFAULT_BATCH_SIZE};

pub const WEATHER_DISABLED: &str = "weather enrichment disabled";

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub range: DateRange,
    pub athlete: Option<AthleteId>,
    pub dry_run: bool,
    pub skip_activities: bool,
    pub skip_weather: bool,
    pub backfill_only: bool,
    pub backfill_window: BackfillWindow,
    pub today: NaiveDate,
}

impl IngestOptions {
    pub fn new(range: DateRange, today: NaiveDate) -> Self {
        Self {
            range,
            athlete: None,
            dry_run: false,
            skip_activities: false,
            skip_weather: false,
            backfill_only: false,
            backfill_window: BackfillWindow::default(),
            today,
        }
    }

    fn ingests_activities(&self) -> bool {
        !self.backfill_only && !self.skip_activities
    }

    fn runs_backfill(&self) -> bool {
        self.backfill_only || !self.skip_weather
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<U: UpstreamClient, W: WeatherClient, S: ActivityStore> {
    upstream: U,
    weather: W,
    store: S,
    roster: Vec<Athlete>,
    sleeper: Arc<dyn Sleeper>,
    cache: Option<Arc<dyn SeriesCache>>,
    batch_size: usize,
}

impl<U: UpstreamClient, W: WeatherClient, S: ActivityStore> App<U, W, S> {
    pub fn new(upstream: U, weather: W, store: S) -> Self {
        Self {
            upstream,
            weather,
            store,
            roster: Vec::new(),
            sleeper: Arc::new(ThreadSleeper),
            cache: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_roster(mut self, roster: Vec<Athlete>) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn SeriesCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(&self, options: &IngestOptions, sink: &dyn ProgressSink) -> Result<RunStats, IngestError> {
        let started = Instant::now();
        let emit = |message: String| {
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            })
        };

        let mut stats = RunStats::new(options.dry_run);
        stats.activities_skipped = !options.ingests_activities();

        if options.ingests_activities() {
            emit("phase=Roster; loading athletes".to_string());
            let athletes = self.load_athletes(options.athlete.as_ref())?;
            stats.athletes = athletes.len();
            for athlete in &athletes {
                emit(format!("phase=Athlete; {} ({})", athlete.id, athlete.name));
                self.ingest_athlete(athlete, options, &mut stats, &emit);
            }
        }

        if options.runs_backfill() {
            emit(format!(
                "phase=Backfill; sweeping forecast weather {:?}",
                options.backfill_window.dates(options.today)
            ));
            let cascade = WeatherCascade::new(&self.weather, self.sleeper.as_ref());
            let reconciler = BackfillReconciler::new(&self.store, cascade, self.sleeper.as_ref())
                .dry_run(options.dry_run);
            match reconciler.run(options.backfill_window, options.today) {
                Ok(report) => stats.record_backfill(report),
                Err(err) if options.backfill_only => return Err(err),
                Err(err) => {
                    warn!(error = %err, "backfill sweep failed");
                    stats.record_error(format!("backfill: {err}"));
                }
            }
        }

        if options.dry_run {
            info!("dry run: summary view refresh skipped");
        } else {
            emit("phase=Refresh; refreshing summary view".to_string());
            let result = self.store_policy().run(self.sleeper.as_ref(), "summary view refresh", |_| {
                self.store.refresh_summary_view()
            });
            match result {
                Ok(()) => stats.summary_view_refreshed = true,
                Err(failure) => {
                    warn!(error = %failure, "summary view refresh failed");
                    stats.record_error(failure.to_string());
                }
            }
        }

        emit(format!(
            "phase=Done; {} processed, {} failed",
            stats.activities_processed, stats.activities_failed
        ));
        Ok(stats)
    }

    fn upstream_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), 2.0)
    }

    fn store_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), 2.0)
    }

    fn load_athletes(&self, filter: Option<&AthleteId>) -> Result<Vec<Athlete>, IngestError> {
        let roster = if self.roster.is_empty() {
            self.store_policy()
                .run(self.sleeper.as_ref(), "athlete roster", |_| {
                    self.store.load_athletes()
                })
                .map_err(|failure| IngestError::RosterUnavailable(failure.to_string()))?
        } else {
            self.roster.clone()
        };

        let roster: Vec<Athlete> = match filter {
            Some(id) => roster.into_iter().filter(|athlete| &athlete.id == id).collect(),
            None => roster,
        };
        if roster.is_empty() {
            return Err(IngestError::RosterUnavailable(match filter {
                Some(id) => format!("athlete {id} is not in the roster"),
                None => "no athletes configured".to_string(),
            }));
        }
        Ok(roster)
    }

    fn ingest_athlete(
        &self,
        athlete: &Athlete,
        options: &IngestOptions,
        stats: &mut RunStats,
        emit: &dyn Fn(String),
    ) {
        let listed = self.upstream_policy().run(self.sleeper.as_ref(), "activity list", |_| {
            self.upstream.list_activities(athlete, options.range)
        });
        let summaries = match listed {
            Ok(summaries) => summaries,
            Err(failure) => {
                warn!(athlete = %athlete.id, error = %failure, "activity list failed");
                stats.record_error(format!("{}: {failure}", athlete.id));
                return;
            }
        };
        info!(athlete = %athlete.id, activities = summaries.len(), "activities listed");

        for summary in &summaries {
            stats.activities_seen += 1;
            emit(format!("phase=Activity; {} {}", athlete.id, summary.id));
            match self.process_activity(athlete, summary, options, stats) {
                Ok(()) => stats.activities_processed += 1,
                Err(err) => {
                    warn!(athlete = %athlete.id, activity = %summary.id, error = %err, "activity failed");
                    stats.activities_failed += 1;
                    stats.record_error(format!("{}: {err}", summary.id));
                }
            }
        }
    }

    fn process_activity(
        &self,
        athlete: &Athlete,
        summary: &ActivitySummary,
        options: &IngestOptions,
        stats: &mut RunStats,
    ) -> Result<(), IngestError> {
        let id: ActivityId = summary.id.parse()?;
        let kind = summary.kind();
        let start_date = summary
            .start_time()
            .ok_or_else(|| IngestError::InvalidDate(format!("activity {id} has no start date")))?;

        let mut activity = Activity {
            id: id.clone(),
            athlete_id: athlete.id.clone(),
            name: summary.name.clone(),
            activity_type: kind,
            start_date,
            duration_s: summary.moving_time.or(summary.elapsed_time),
            distance_m: summary.distance,
            avg_hr: summary.average_heartrate,
            source: ActivitySource::BasicMetadataOnly,
            start_lat: None,
            start_lng: None,
            start_elevation_m: None,
            weather: WeatherObservation::default(),
            weather_source: None,
            weather_error: None,
        };

        if !kind.is_endurance() {
            stats.record_source(ActivitySource::BasicMetadataOnly);
            return self.write(&activity, &[], &[], options, stats);
        }

        let decoded = self.decode(athlete, &id, kind, stats)?;
        stats.record_source(decoded.source);
        stats.record_heartrate(decoded.has_heartrate());

        let start_point = summary_point(summary).or_else(|| decoded.start_point());
        activity.source = decoded.source;
        activity.start_lat = start_point.map(|point| point.lat);
        activity.start_lng = start_point.map(|point| point.lng);
        activity.start_elevation_m = decoded.start_elevation();
        activity.duration_s = decoded.duration_s.or(activity.duration_s);
        activity.distance_m = decoded.distance_m.or(activity.distance_m);
        activity.avg_hr = decoded.avg_hr.or(activity.avg_hr);

        let (weather, source, message) = if options.skip_weather {
            (WeatherObservation::default(), None, Some(WEATHER_DISABLED.to_string()))
        } else {
            WeatherCascade::new(&self.weather, self.sleeper.as_ref())
                .resolve(start_point, start_date)
                .into_parts()
        };
        stats.record_weather(&weather, source);
        activity.weather = weather;
        activity.weather_source = source;
        activity.weather_error = message;

        let mut intervals = self.intervals(athlete, &id, &decoded);
        moving_time::project_intervals(&mut intervals, &decoded.samples);

        self.write(&activity, &decoded.samples, &intervals, options, stats)
    }

    fn decode(
        &self,
        athlete: &Athlete,
        id: &ActivityId,
        kind: ActivityType,
        stats: &mut RunStats,
    ) -> Result<DecodedActivity, IngestError> {
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(id)) {
            stats.cache_hits += 1;
            return Ok(cached);
        }

        let sensor_log = SensorLogDecoder::new(&self.upstream, self.sleeper.as_ref())
            .decode(athlete, id);
        let primary_reason = match sensor_log {
            DecodeResult::Success(decoded) => return Ok(self.remember(id, decoded)),
            DecodeResult::NotAvailable(reason) => {
                info!(activity = %id, %reason, "sensor log not available; using streams");
                reason
            }
            DecodeResult::Failed(reason) => {
                warn!(activity = %id, %reason, "sensor log failed; using streams");
                reason
            }
        };

        match StreamDecoder::new(&self.upstream, self.sleeper.as_ref()).decode(athlete, id, kind) {
            DecodeResult::Success(decoded) => Ok(self.remember(id, decoded)),
            DecodeResult::NotAvailable(reason) | DecodeResult::Failed(reason) => Err(
                IngestError::Stream(format!("sensor log: {primary_reason}; streams: {reason}")),
            ),
        }
    }

    fn remember(&self, id: &ActivityId, decoded: DecodedActivity) -> DecodedActivity {
        if let Some(cache) = &self.cache
            && let Err(err) = cache.put(id, &decoded)
        {
            warn!(activity = %id, error = %err, "series cache write failed");
        }
        decoded
    }

    fn intervals(&self, athlete: &Athlete, id: &ActivityId, decoded: &DecodedActivity) -> Vec<Interval> {
        let fetched = self.upstream_policy().run(self.sleeper.as_ref(), "intervals", |_| {
            self.upstream.fetch_intervals(athlete, id)
        });
        let intervals = match fetched {
            Ok(body) => upstream::parse_intervals(&body),
            Err(failure) => {
                warn!(activity = %id, error = %failure, "intervals unavailable");
                Vec::new()
            }
        };
        if intervals.is_empty() {
            decoded.laps.clone()
        } else {
            intervals
        }
    }

    fn write(
        &self,
        activity: &Activity,
        samples: &[Sample],
        intervals: &[Interval],
        options: &IngestOptions,
        stats: &mut RunStats,
    ) -> Result<(), IngestError> {
        if options.dry_run {
            info!(
                activity = %activity.id,
                samples = samples.len(),
                intervals = intervals.len(),
                "dry run: write skipped"
            );
            return Ok(());
        }
        let report = ActivityWriter::new(&self.store, self.sleeper.as_ref())
            .with_batch_size(self.batch_size)
            .write(activity, samples, intervals)?;
        stats.record_write(&report);
        Ok(())
    }
}

fn summary_point(summary: &ActivitySummary) -> Option<GeoPoint> {
    match summary.start_latlng.as_deref() {
        Some([lat, lng, ..]) => Some(GeoPoint::new(*lat, *lng)).filter(GeoPoint::is_valid),
        _ => None,
    }
}
