use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static id pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AthleteId(String);

impl AthleteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AthleteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AthleteId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !ID_PATTERN.is_match(trimmed) {
            return Err(IngestError::InvalidAthleteId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActivityId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !ID_PATTERN.is_match(trimmed) {
            return Err(IngestError::InvalidActivityId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Run,
    Trail,
    Virtual,
    Other,
}

impl ActivityType {
    pub fn from_upstream(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "run" | "running" => ActivityType::Run,
            "trailrun" | "trail_run" | "trail" => ActivityType::Trail,
            "virtualrun" | "virtual_run" | "treadmill" => ActivityType::Virtual,
            _ => ActivityType::Other,
        }
    }

    pub fn is_endurance(self) -> bool {
        !matches!(self, ActivityType::Other)
    }

    pub fn moving_speed_threshold(self) -> f64 {
        match self {
            ActivityType::Run => 0.8,
            ActivityType::Trail => 0.5,
            ActivityType::Virtual => 0.3,
            ActivityType::Other => 0.5,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityType::Run => write!(f, "run"),
            ActivityType::Trail => write!(f, "trail"),
            ActivityType::Virtual => write!(f, "virtual"),
            ActivityType::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    SensorLog,
    StreamFallback,
    BasicMetadataOnly,
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivitySource::SensorLog => write!(f, "sensor_log"),
            ActivitySource::StreamFallback => write!(f, "stream_fallback"),
            ActivitySource::BasicMetadataOnly => write!(f, "basic_metadata_only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Archive,
    Forecast,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Archive => write!(f, "archive"),
            Provenance::Forecast => write!(f, "forecast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
            && !(self.lat == 0.0 && self.lng == 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, IngestError> {
        if end < start {
            return Err(IngestError::InvalidDateRange(format!(
                "end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, IngestError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| IngestError::InvalidDate(value.to_string()))
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Athlete {
    pub id: AthleteId,
    pub name: String,
    pub api_key: String,
}

impl fmt::Debug for Athlete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Athlete")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub dew_point_c: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub ozone: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    pub aqi: Option<f64>,
}

impl WeatherObservation {
    pub fn is_usable(&self) -> bool {
        self.temperature_c.is_some()
    }

    pub fn is_complete(&self) -> bool {
        [
            self.temperature_c,
            self.humidity_pct,
            self.dew_point_c,
            self.wind_speed_kmh,
            self.wind_gust_kmh,
            self.wind_direction_deg,
            self.pressure_hpa,
            self.cloud_cover_pct,
            self.precipitation_mm,
        ]
        .iter()
        .all(Option::is_some)
    }

    pub fn has_air_quality(&self) -> bool {
        [
            self.pm2_5, self.pm10, self.ozone, self.no2, self.so2, self.co, self.aqi,
        ]
        .iter()
        .any(Option::is_some)
    }

    pub fn merge_air_quality(&mut self, other: &WeatherObservation) {
        self.pm2_5 = other.pm2_5;
        self.pm10 = other.pm10;
        self.ozone = other.ozone;
        self.no2 = other.no2;
        self.so2 = other.so2;
        self.co = other.co;
        self.aqi = other.aqi;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub athlete_id: AthleteId,
    pub name: Option<String>,
    pub activity_type: ActivityType,
    pub start_date: DateTime<Utc>,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub avg_hr: Option<f64>,
    pub source: ActivitySource,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub start_elevation_m: Option<f64>,
    #[serde(flatten)]
    pub weather: WeatherObservation,
    pub weather_source: Option<Provenance>,
    pub weather_error: Option<String>,
}

impl Activity {
    pub fn start_point(&self) -> Option<GeoPoint> {
        match (self.start_lat, self.start_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)).filter(GeoPoint::is_valid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub offset_ms: i64,
    pub elapsed_s: f64,
    pub t_active_s: f64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub altitude_m: Option<f64>,
    pub speed: Option<f64>,
    pub enhanced_speed: Option<f64>,
    pub distance_m: Option<f64>,
    pub heartrate: Option<f64>,
    pub cadence: Option<f64>,
    pub power: Option<f64>,
    pub vertical_oscillation: Option<f64>,
    pub ground_contact_time: Option<f64>,
    pub stance_time_balance: Option<f64>,
    pub vertical_ratio: Option<f64>,
    pub step_length: Option<f64>,
    pub leg_spring_stiffness: Option<f64>,
}

impl Sample {
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)).filter(GeoPoint::is_valid),
            _ => None,
        }
    }

    pub fn best_speed(&self) -> Option<f64> {
        self.enhanced_speed.or(self.speed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Warmup,
    Work,
    Rest,
    Cooldown,
    Other,
}

impl IntervalKind {
    pub fn from_upstream(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "warmup" | "warm_up" | "warm-up" => IntervalKind::Warmup,
            "work" | "active" | "interval" => IntervalKind::Work,
            "rest" | "recovery" => IntervalKind::Rest,
            "cooldown" | "cool_down" | "cool-down" => IntervalKind::Cooldown,
            _ => IntervalKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub ordinal: u32,
    pub kind: IntervalKind,
    pub label: Option<String>,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time_s: f64,
    pub end_time_s: f64,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub avg_hr: Option<f64>,
    pub avg_power: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub avg_speed: Option<f64>,
    pub start_t_active: Option<f64>,
    pub end_t_active: Option<f64>,
}
