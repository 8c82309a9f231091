use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::StoreSettings;
use crate::domain::{
    Activity, ActivityId, ActivitySource, ActivityType, Athlete, AthleteId, GeoPoint, Provenance,
    WeatherObservation,
};
use crate::http;
use crate::normalize::{IntervalRow, SampleRow};
use crate::retry::CallError;

const ACTIVITIES: &str = "activities";
const SAMPLES: &str = "activity_samples";
const INTERVALS: &str = "activity_intervals";
const ATHLETES: &str = "athletes";

pub trait ActivityStore: Send + Sync {
    fn load_athletes(&self) -> Result<Vec<Athlete>, CallError>;

    fn upsert_activity(&self, activity: &Activity) -> Result<(), CallError>;

    fn record_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError>;

    fn insert_samples(&self, rows: &[SampleRow]) -> Result<(), CallError>;

    fn insert_intervals(&self, rows: &[IntervalRow]) -> Result<(), CallError>;

    fn forecast_candidates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BackfillCandidate>, CallError>;

    fn patch_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError>;

    fn refresh_summary_view(&self) -> Result<(), CallError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillCandidate {
    pub id: ActivityId,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub start_lat: Option<f64>,
    #[serde(default)]
    pub start_lng: Option<f64>,
}

impl BackfillCandidate {
    pub fn start_point(&self) -> Option<GeoPoint> {
        match (self.start_lat, self.start_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)).filter(GeoPoint::is_valid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherPatch {
    #[serde(flatten)]
    pub weather: WeatherObservation,
    pub weather_source: Option<Provenance>,
    pub weather_error: Option<String>,
}

impl WeatherPatch {
    pub fn archive(weather: WeatherObservation) -> Self {
        Self {
            weather,
            weather_source: Some(Provenance::Archive),
            weather_error: None,
        }
    }

    pub fn from_activity(activity: &Activity) -> Option<Self> {
        if activity.weather_source.is_none() && activity.weather_error.is_none() {
            return None;
        }
        Some(Self {
            weather: activity.weather.clone(),
            weather_source: activity.weather_source,
            weather_error: activity.weather_error.clone(),
        })
    }

    pub fn guard(&self) -> WeatherGuard {
        match self.weather_source {
            Some(Provenance::Archive) => WeatherGuard::Any,
            Some(Provenance::Forecast) => WeatherGuard::NotArchive,
            None => WeatherGuard::Unset,
        }
    }
}

/// Which stored rows a weather write may touch. Provenance only moves
/// forward: nothing replaces archive weather, and an empty outcome only
/// fills rows that have no weather yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherGuard {
    Any,
    NotArchive,
    Unset,
}

impl WeatherGuard {
    pub fn allows(self, stored: Option<Provenance>) -> bool {
        match self {
            WeatherGuard::Any => true,
            WeatherGuard::NotArchive => stored != Some(Provenance::Archive),
            WeatherGuard::Unset => stored.is_none(),
        }
    }

    fn filter(self) -> Option<(&'static str, &'static str)> {
        match self {
            WeatherGuard::Any => None,
            WeatherGuard::NotArchive => {
                Some(("or", "(weather_source.is.null,weather_source.neq.archive)"))
            }
            WeatherGuard::Unset => Some(("weather_source", "is.null")),
        }
    }
}

#[derive(Debug, Serialize)]
struct ActivityRow<'a> {
    id: &'a ActivityId,
    athlete_id: &'a AthleteId,
    name: Option<&'a str>,
    activity_type: &'a ActivityType,
    start_date: DateTime<Utc>,
    duration_s: Option<f64>,
    distance_m: Option<f64>,
    avg_hr: Option<f64>,
    source: &'a ActivitySource,
    start_lat: Option<f64>,
    start_lng: Option<f64>,
    start_elevation_m: Option<f64>,
}

impl<'a> From<&'a Activity> for ActivityRow<'a> {
    fn from(activity: &'a Activity) -> Self {
        Self {
            id: &activity.id,
            athlete_id: &activity.athlete_id,
            name: activity.name.as_deref(),
            activity_type: &activity.activity_type,
            start_date: activity.start_date,
            duration_s: activity.duration_s,
            distance_m: activity.distance_m,
            avg_hr: activity.avg_hr,
            source: &activity.source,
            start_lat: activity.start_lat,
            start_lng: activity.start_lng,
            start_elevation_m: activity.start_elevation_m,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AthleteRow {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

#[derive(Clone)]
pub struct RestActivityStore {
    client: Client,
    base_url: String,
    summary_view: String,
}

impl RestActivityStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, CallError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&settings.api_key)
            .map_err(|err| CallError::Other(format!("invalid store key: {err}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
            .map_err(|err| CallError::Other(format!("invalid store key: {err}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = http::build_client(Duration::from_secs(settings.timeout_secs), headers)?;
        Ok(Self {
            client,
            base_url: rest_base(&settings.url),
            summary_view: settings.summary_view.clone(),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn upsert<T: Serialize>(&self, table: &str, on_conflict: &str, rows: &T) -> Result<(), CallError> {
        let request = self
            .client
            .post(self.table(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);
        execute(request)
    }

    fn patch_activity(
        &self,
        id: &ActivityId,
        filter: Option<(&str, &str)>,
        patch: &WeatherPatch,
    ) -> Result<(), CallError> {
        let mut query = vec![("id", format!("eq.{}", id.as_str()))];
        if let Some((column, condition)) = filter {
            query.push((column, condition.to_string()));
        }
        let request = self
            .client
            .patch(self.table(ACTIVITIES))
            .query(&query)
            .header("Prefer", "return=minimal")
            .json(patch);
        execute(request)
    }
}

fn rest_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with("/rest/v1") {
        url.to_string()
    } else {
        format!("{url}/rest/v1")
    }
}

fn execute(request: RequestBuilder) -> Result<(), CallError> {
    http::send(request).map(|_| ())
}

impl ActivityStore for RestActivityStore {
    fn load_athletes(&self) -> Result<Vec<Athlete>, CallError> {
        let request = self
            .client
            .get(self.table(ATHLETES))
            .query(&[("select", "id,name,api_key")]);
        let rows: Vec<AthleteRow> = http::send(request)?
            .json()
            .map_err(|err| CallError::InvalidPayload(err.to_string()))?;

        let mut athletes = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(api_key) = row.api_key.filter(|key| !key.trim().is_empty()) else {
                warn!(athlete = %row.id, "athlete has no api key; skipping");
                continue;
            };
            match row.id.parse() {
                Ok(id) => athletes.push(Athlete {
                    name: row.name.unwrap_or_else(|| row.id.clone()),
                    id,
                    api_key,
                }),
                Err(err) => warn!(error = %err, "skipping athlete row"),
            }
        }
        Ok(athletes)
    }

    fn upsert_activity(&self, activity: &Activity) -> Result<(), CallError> {
        self.upsert(ACTIVITIES, "id", &[ActivityRow::from(activity)])
    }

    fn record_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError> {
        self.patch_activity(id, patch.guard().filter(), patch)
    }

    fn insert_samples(&self, rows: &[SampleRow]) -> Result<(), CallError> {
        self.upsert(SAMPLES, "activity_id,offset_ms", &rows)
    }

    fn insert_intervals(&self, rows: &[IntervalRow]) -> Result<(), CallError> {
        self.upsert(INTERVALS, "activity_id,ordinal", &rows)
    }

    fn forecast_candidates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BackfillCandidate>, CallError> {
        let request = self.client.get(self.table(ACTIVITIES)).query(&[
            ("select", "id,start_date,start_lat,start_lng".to_string()),
            ("weather_source", "eq.forecast".to_string()),
            ("start_date", format!("gte.{}", from.format("%Y-%m-%d"))),
            (
                "start_date",
                format!("lt.{}", to.succ_opt().unwrap_or(to).format("%Y-%m-%d")),
            ),
            ("order", "start_date.asc".to_string()),
        ]);
        http::send(request)?
            .json()
            .map_err(|err| CallError::InvalidPayload(err.to_string()))
    }

    fn patch_weather(&self, id: &ActivityId, patch: &WeatherPatch) -> Result<(), CallError> {
        self.patch_activity(id, None, patch)
    }

    fn refresh_summary_view(&self) -> Result<(), CallError> {
        let url = format!("{}/rpc/refresh_{}", self.base_url, self.summary_view);
        execute(self.client.post(url).json(&serde_json::json!({})))
    }
}
