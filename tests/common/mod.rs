#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};

use stride_ingest::activity_store::{ActivityStore, BackfillCandidate, WeatherPatch};
use stride_ingest::app::{ProgressEvent, ProgressSink};
use stride_ingest::domain::{
    Activity, ActivityId, Athlete, AthleteId, DateRange, GeoPoint, WeatherObservation,
};
use stride_ingest::fit::{self, FIT_EPOCH_OFFSET};
use stride_ingest::normalize::{IntervalRow, SampleRow};
use stride_ingest::retry::CallError;
use stride_ingest::upstream::{ActivitySummary, UpstreamClient};
use stride_ingest::weather::WeatherClient;

pub const ACTIVITY_START: &str = "2024-05-01T06:30:00Z";

pub fn activity_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

pub fn activity_start() -> DateTime<Utc> {
    ACTIVITY_START.parse().unwrap()
}

pub fn day_range() -> DateRange {
    DateRange::new(activity_day(), activity_day()).unwrap()
}

pub fn athlete(id: &str) -> Athlete {
    Athlete {
        id: id.parse::<AthleteId>().unwrap(),
        name: format!("Athlete {id}"),
        api_key: "secret".to_string(),
    }
}

pub fn summary(id: &str, kind: &str) -> ActivitySummary {
    ActivitySummary {
        id: id.to_string(),
        name: Some("Morning Run".to_string()),
        activity_type: Some(kind.to_string()),
        start_date: Some(ACTIVITY_START.to_string()),
        ..ActivitySummary::default()
    }
}

pub fn observation(temperature: f64) -> WeatherObservation {
    WeatherObservation {
        temperature_c: Some(temperature),
        humidity_pct: Some(71.0),
        dew_point_c: Some(6.2),
        wind_speed_kmh: Some(11.0),
        wind_gust_kmh: Some(24.0),
        wind_direction_deg: Some(240.0),
        pressure_hpa: Some(1014.0),
        cloud_cover_pct: Some(40.0),
        precipitation_mm: Some(0.0),
        ..WeatherObservation::default()
    }
}

pub fn server_error() -> CallError {
    CallError::Server {
        status: 500,
        message: "internal error".to_string(),
    }
}

pub fn not_found() -> CallError {
    CallError::Client {
        status: 404,
        message: "not found".to_string(),
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Upstream service with canned responses per activity id.
#[derive(Clone, Default)]
pub struct MockUpstream {
    pub activities: Arc<Mutex<Vec<ActivitySummary>>>,
    pub sensor_logs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub streams: Arc<Mutex<HashMap<String, Value>>>,
    pub intervals: Arc<Mutex<HashMap<String, Value>>>,
    pub sensor_log_calls: Arc<Mutex<usize>>,
    pub stream_calls: Arc<Mutex<usize>>,
}

impl MockUpstream {
    pub fn with_activity(self, summary: ActivitySummary) -> Self {
        self.activities.lock().unwrap().push(summary);
        self
    }

    pub fn with_sensor_log(self, id: &str, bytes: Vec<u8>) -> Self {
        self.sensor_logs.lock().unwrap().insert(id.to_string(), bytes);
        self
    }

    pub fn with_streams(self, id: &str, body: Value) -> Self {
        self.streams.lock().unwrap().insert(id.to_string(), body);
        self
    }

    pub fn with_intervals(self, id: &str, body: Value) -> Self {
        self.intervals.lock().unwrap().insert(id.to_string(), body);
        self
    }

    pub fn sensor_log_calls(&self) -> usize {
        *self.sensor_log_calls.lock().unwrap()
    }

    pub fn stream_calls(&self) -> usize {
        *self.stream_calls.lock().unwrap()
    }
}

impl UpstreamClient for MockUpstream {
    fn list_activities(
        &self,
        _athlete: &Athlete,
        _range: DateRange,
    ) -> Result<Vec<ActivitySummary>, CallError> {
        Ok(self.activities.lock().unwrap().clone())
    }

    fn download_sensor_log(
        &self,
        _athlete: &Athlete,
        id: &ActivityId,
    ) -> Result<Vec<u8>, CallError> {
        *self.sensor_log_calls.lock().unwrap() += 1;
        self.sensor_logs
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(not_found)
    }

    fn fetch_streams(&self, _athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError> {
        *self.stream_calls.lock().unwrap() += 1;
        self.streams
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(not_found)
    }

    fn fetch_intervals(&self, _athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError> {
        Ok(self
            .intervals
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| json!([])))
    }
}

type Script = Arc<Mutex<Vec<Result<WeatherObservation, CallError>>>>;

/// Weather provider that replays a script per endpoint; the last entry
/// repeats once the script runs out.
#[derive(Clone)]
pub struct ScriptedWeather {
    archive: Script,
    forecast: Script,
    pub archive_calls: Arc<Mutex<usize>>,
    pub forecast_calls: Arc<Mutex<usize>>,
}

impl ScriptedWeather {
    pub fn new(
        archive: Vec<Result<WeatherObservation, CallError>>,
        forecast: Vec<Result<WeatherObservation, CallError>>,
    ) -> Self {
        Self {
            archive: Arc::new(Mutex::new(archive)),
            forecast: Arc::new(Mutex::new(forecast)),
            archive_calls: Arc::default(),
            forecast_calls: Arc::default(),
        }
    }

    pub fn archive_ok() -> Self {
        Self::new(vec![Ok(observation(9.5))], vec![Ok(observation(10.0))])
    }

    pub fn archive_calls(&self) -> usize {
        *self.archive_calls.lock().unwrap()
    }

    pub fn forecast_calls(&self) -> usize {
        *self.forecast_calls.lock().unwrap()
    }

    fn next(script: &Script) -> Result<WeatherObservation, CallError> {
        let mut script = script.lock().unwrap();
        match script.len() {
            0 => Err(CallError::Other("no scripted response".to_string())),
            1 => script[0].clone(),
            _ => script.remove(0),
        }
    }
}

impl WeatherClient for ScriptedWeather {
    fn fetch_archive(
        &self,
        _point: GeoPoint,
        _at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError> {
        *self.archive_calls.lock().unwrap() += 1;
        Self::next(&self.archive)
    }

    fn fetch_forecast(
        &self,
        _point: GeoPoint,
        _at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError> {
        *self.forecast_calls.lock().unwrap() += 1;
        Self::next(&self.forecast)
    }
}

/// In-memory table store with merge-on-conflict semantics.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub athletes: Arc<Mutex<Option<Vec<Athlete>>>>,
    pub activities: Arc<Mutex<BTreeMap<ActivityId, Activity>>>,
    pub samples: Arc<Mutex<BTreeMap<(ActivityId, i64), SampleRow>>>,
    pub intervals: Arc<Mutex<BTreeMap<(ActivityId, u32), IntervalRow>>>,
    pub upsert_calls: Arc<Mutex<usize>>,
    pub patch_calls: Arc<Mutex<usize>>,
    pub refresh_calls: Arc<Mutex<usize>>,
    pub weather_writes: Arc<Mutex<usize>>,
    /// Sample batches whose first offset matches fail with a server error.
    pub fail_batch_at: Arc<Mutex<Option<i64>>>,
    pub fail_upsert: Arc<Mutex<bool>>,
    pub fail_intervals: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn with_athletes(self, athletes: Vec<Athlete>) -> Self {
        *self.athletes.lock().unwrap() = Some(athletes);
        self
    }

    pub fn seed(&self, activity: Activity) {
        self.activities
            .lock()
            .unwrap()
            .insert(activity.id.clone(), activity);
    }

    pub fn activity(&self, id: &str) -> Option<Activity> {
        let id: ActivityId = id.parse().unwrap();
        self.activities.lock().unwrap().get(&id).cloned()
    }

    pub fn activity_count(&self) -> usize {
        self.activities.lock().unwrap().len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn sample_rows(&self) -> Vec<SampleRow> {
        self.samples.lock().unwrap().values().cloned().collect()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.lock().unwrap().len()
    }

    pub fn upsert_calls(&self) -> usize {
        *self.upsert_calls.lock().unwrap()
    }

    pub fn patch_calls(&self) -> usize {
        *self.patch_calls.lock().unwrap()
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }

    pub fn weather_writes(&self) -> usize {
        *self.weather_writes.lock().unwrap()
    }

    pub fn failing_upserts(self) -> Self {
        *self.fail_upsert.lock().unwrap() = true;
        self
    }

    pub fn failing_intervals(self) -> Self {
        *self.fail_intervals.lock().unwrap() = true;
        self
    }
}

impl ActivityStore for MemoryStore {
    fn load_athletes(&self) -> Result<Vec<Athlete>, CallError> {
        self.athletes
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CallError::Client {
                status: 401,
                message: "invalid service key".to_string(),
            })
    }

    /// Merge semantics of the real table: stored weather columns survive,
    /// a new row starts without weather.
    fn upsert_activity(&self, activity: &Activity) -> Result<(), CallError> {
        *self.upsert_calls.lock().unwrap() += 1;
        if *self.fail_upsert.lock().unwrap() {
            return Err(server_error());
        }
        let mut activities = self.activities.lock().unwrap();
        let mut row = activity.clone();
        match activities.get(&activity.id) {
            Some(stored) => {
                row.weather = stored.weather.clone();
                row.weather_source = stored.weather_source;
                row.weather_error = stored.weather_error.clone();
            }
            None => {
                row.weather = WeatherObservation::default();
                row.weather_source = None;
                row.weather_error = None;
            }
        }
        activities.insert(row.id.clone(), row);
        Ok(())
    }

    fn record_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError> {
        *self.weather_writes.lock().unwrap() += 1;
        let mut activities = self.activities.lock().unwrap();
        let activity = activities.get_mut(id).ok_or_else(not_found)?;
        if patch.guard().allows(activity.weather_source) {
            activity.weather = patch.weather.clone();
            activity.weather_source = patch.weather_source;
            activity.weather_error = patch.weather_error.clone();
        }
        Ok(())
    }

    fn insert_samples(&self, rows: &[SampleRow]) -> Result<(), CallError> {
        let fail_at = *self.fail_batch_at.lock().unwrap();
        if fail_at.is_some() && rows.first().map(|row| row.offset_ms) == fail_at {
            return Err(server_error());
        }
        let mut samples = self.samples.lock().unwrap();
        for row in rows {
            samples.insert((row.activity_id.clone(), row.offset_ms), row.clone());
        }
        Ok(())
    }

    fn insert_intervals(&self, rows: &[IntervalRow]) -> Result<(), CallError> {
        if *self.fail_intervals.lock().unwrap() {
            return Err(server_error());
        }
        let mut intervals = self.intervals.lock().unwrap();
        for row in rows {
            intervals.insert((row.activity_id.clone(), row.ordinal), row.clone());
        }
        Ok(())
    }

    fn forecast_candidates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BackfillCandidate>, CallError> {
        Ok(self
            .activities
            .lock()
            .unwrap()
            .values()
            .filter(|activity| {
                let day = activity.start_date.date_naive();
                activity.weather_source == Some(stride_ingest::domain::Provenance::Forecast)
                    && day >= from
                    && day <= to
            })
            .map(|activity| BackfillCandidate {
                id: activity.id.clone(),
                start_date: activity.start_date,
                start_lat: activity.start_lat,
                start_lng: activity.start_lng,
            })
            .collect())
    }

    fn patch_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError> {
        *self.patch_calls.lock().unwrap() += 1;
        let mut activities = self.activities.lock().unwrap();
        let activity = activities.get_mut(id).ok_or_else(not_found)?;
        activity.weather = patch.weather.clone();
        activity.weather_source = patch.weather_source;
        activity.weather_error = patch.weather_error.clone();
        Ok(())
    }

    fn refresh_summary_view(&self) -> Result<(), CallError> {
        *self.refresh_calls.lock().unwrap() += 1;
        Ok(())
    }
}

/// Builds FIT files byte by byte for decoder tests.
#[derive(Default)]
pub struct FitBuilder {
    records: Vec<u8>,
}

/// `(field number, size, base type)`.
pub type FieldSpec = (u8, u8, u8);

pub const UINT8: u8 = 0x02;
pub const ENUM: u8 = 0x00;
pub const SINT32: u8 = 0x85;
pub const UINT32: u8 = 0x86;
pub const UINT16: u8 = 0x84;
pub const FLOAT32: u8 = 0x88;
pub const STRING: u8 = 0x07;

impl FitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, local: u8, global: u16, fields: &[FieldSpec]) -> &mut Self {
        self.define_with_dev(local, global, fields, &[])
    }

    /// `dev_fields` are `(field number, size, developer index)`.
    pub fn define_with_dev(
        &mut self,
        local: u8,
        global: u16,
        fields: &[FieldSpec],
        dev_fields: &[FieldSpec],
    ) -> &mut Self {
        let header = if dev_fields.is_empty() {
            0x40 | local
        } else {
            0x60 | local
        };
        self.records.extend_from_slice(&[header, 0, 0]);
        self.records.extend_from_slice(&global.to_le_bytes());
        self.records.push(fields.len() as u8);
        for (num, size, base) in fields {
            self.records.extend_from_slice(&[*num, *size, *base]);
        }
        if !dev_fields.is_empty() {
            self.records.push(dev_fields.len() as u8);
            for (num, size, index) in dev_fields {
                self.records.extend_from_slice(&[*num, *size, *index]);
            }
        }
        self
    }

    pub fn data(&mut self, local: u8, payload: &[u8]) -> &mut Self {
        self.records.push(local & 0x0F);
        self.records.extend_from_slice(payload);
        self
    }

    /// Registers developer field `num` of developer 0 under `name`.
    pub fn describe_dev_field(&mut self, local: u8, num: u8, base: u8, name: &str) -> &mut Self {
        let mut label = name.as_bytes().to_vec();
        label.resize(32, 0);
        self.define(
            local,
            fit::MESG_FIELD_DESCRIPTION,
            &[(0, 1, UINT8), (1, 1, UINT8), (2, 1, UINT8), (3, 32, STRING)],
        );
        let mut payload = vec![0, num, base];
        payload.extend_from_slice(&label);
        self.data(local, &payload)
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = vec![12u8, 0x20, 0x08, 0x08];
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        out.extend_from_slice(b".FIT");
        out.extend_from_slice(&self.records);
        let crc = fit::crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}

pub fn semicircles(degrees: f64) -> i32 {
    (degrees * 2_147_483_648.0 / 180.0).round() as i32
}

pub fn fit_timestamp(at: DateTime<Utc>) -> u32 {
    (at.timestamp() - FIT_EPOCH_OFFSET) as u32
}

pub struct RecordSpec {
    pub lat: f64,
    pub lng: f64,
    pub heart_rate: u8,
    pub enhanced_speed_mm_s: u32,
    pub power: u32,
}

/// A running sensor log: session summary plus one record per second.
/// Power is written as a 32-bit field so 65535 survives the base-type
/// invalid check and reaches the decoder.
pub fn running_log(start: DateTime<Utc>, records: &[RecordSpec]) -> Vec<u8> {
    let base = fit_timestamp(start);
    let mut builder = FitBuilder::new();
    builder.define(
        0,
        fit::MESG_SESSION,
        &[
            (253, 4, UINT32),
            (2, 4, UINT32),
            (5, 1, ENUM),
            (6, 1, ENUM),
            (8, 4, UINT32),
            (9, 4, UINT32),
            (16, 1, UINT8),
        ],
    );
    let mut session = Vec::new();
    session.extend_from_slice(&(base + records.len() as u32).to_le_bytes());
    session.extend_from_slice(&base.to_le_bytes());
    session.push(1);
    session.push(0);
    session.extend_from_slice(&((records.len() as u32) * 1000).to_le_bytes());
    session.extend_from_slice(&((records.len() as u32) * 300).to_le_bytes());
    session.push(150);
    builder.data(0, &session);

    builder.define(
        1,
        fit::MESG_RECORD,
        &[
            (253, 4, UINT32),
            (0, 4, SINT32),
            (1, 4, SINT32),
            (3, 1, UINT8),
            (73, 4, UINT32),
            (7, 4, UINT32),
        ],
    );
    for (index, record) in records.iter().enumerate() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(base + index as u32).to_le_bytes());
        payload.extend_from_slice(&semicircles(record.lat).to_le_bytes());
        payload.extend_from_slice(&semicircles(record.lng).to_le_bytes());
        payload.push(record.heart_rate);
        payload.extend_from_slice(&record.enhanced_speed_mm_s.to_le_bytes());
        payload.extend_from_slice(&record.power.to_le_bytes());
        builder.data(1, &payload);
    }
    builder.finish()
}

/// `count` one-second records moving north at 3 m/s from Vienna.
pub fn steady_run(count: usize) -> Vec<RecordSpec> {
    (0..count)
        .map(|i| RecordSpec {
            lat: 48.2 + i as f64 * 0.000027,
            lng: 16.37,
            heart_rate: 140 + (i % 10) as u8,
            enhanced_speed_mm_s: 3000,
            power: 250,
        })
        .collect()
}

pub fn steady_log(count: usize) -> Vec<u8> {
    running_log(activity_start(), &steady_run(count))
}

/// Stream payload with velocity but no heart rate.
pub fn velocity_streams(count: usize) -> Value {
    let time: Vec<usize> = (0..count).collect();
    let velocity: Vec<f64> = (0..count).map(|i| 2.5 + (i % 5) as f64 * 0.1).collect();
    let latlng: Vec<[f64; 2]> = (0..count)
        .map(|i| [48.2 + i as f64 * 0.00002, 16.37])
        .collect();
    json!({
        "time": time,
        "velocity_smooth": velocity,
        "latlng": latlng,
    })
}
