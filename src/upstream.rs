use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::UpstreamSettings;
use crate::domain::{ActivityId, ActivityType, Athlete, DateRange, Interval, IntervalKind};
use crate::http;
use crate::retry::CallError;

pub trait UpstreamClient: Send + Sync {
    fn list_activities(
        &self,
        athlete: &Athlete,
        range: DateRange,
    ) -> Result<Vec<ActivitySummary>, CallError>;

    fn download_sensor_log(&self, athlete: &Athlete, id: &ActivityId)
    -> Result<Vec<u8>, CallError>;

    fn fetch_streams(&self, athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError>;

    fn fetch_intervals(&self, athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError>;
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivitySummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub start_date_local: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub moving_time: Option<f64>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
    #[serde(default)]
    pub start_latlng: Option<Vec<f64>>,
}

impl ActivitySummary {
    pub fn kind(&self) -> ActivityType {
        self.activity_type
            .as_deref()
            .map(ActivityType::from_upstream)
            .unwrap_or(ActivityType::Other)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .as_deref()
            .or(self.start_date_local.as_deref())
            .and_then(parse_timestamp)
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[derive(Clone)]
pub struct IntervalsHttpClient {
    client: Client,
    sensor_log_client: Client,
    base_url: String,
}

impl IntervalsHttpClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, CallError> {
        let client = http::build_client(Duration::from_secs(settings.timeout_secs), HeaderMap::new())?;
        let sensor_log_client = http::build_client(
            Duration::from_secs(settings.sensor_log_timeout_secs),
            HeaderMap::new(),
        )?;
        Ok(Self {
            client,
            sensor_log_client,
            base_url: settings.base_url.clone(),
        })
    }

    fn get(&self, client: &Client, athlete: &Athlete, path: &str) -> reqwest::blocking::RequestBuilder {
        client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth("API_KEY", Some(&athlete.api_key))
    }

    fn get_json(&self, athlete: &Athlete, path: &str) -> Result<Value, CallError> {
        http::send(self.get(&self.client, athlete, path))?
            .json::<Value>()
            .map_err(|err| CallError::InvalidPayload(err.to_string()))
    }
}

impl UpstreamClient for IntervalsHttpClient {
    fn list_activities(
        &self,
        athlete: &Athlete,
        range: DateRange,
    ) -> Result<Vec<ActivitySummary>, CallError> {
        let path = format!("/athlete/{}/activities", athlete.id.as_str());
        let request = self.get(&self.client, athlete, &path).query(&[
            ("oldest", range.start().format("%Y-%m-%d").to_string()),
            ("newest", range.end().format("%Y-%m-%d").to_string()),
        ]);
        http::send(request)?
            .json::<Vec<ActivitySummary>>()
            .map_err(|err| CallError::InvalidPayload(err.to_string()))
    }

    fn download_sensor_log(
        &self,
        athlete: &Athlete,
        id: &ActivityId,
    ) -> Result<Vec<u8>, CallError> {
        let path = format!("/activity/{}/fit-file", id.as_str());
        let bytes = http::send(self.get(&self.sensor_log_client, athlete, &path))?
            .bytes()
            .map_err(http::classify_transport)?;
        Ok(bytes.to_vec())
    }

    fn fetch_streams(&self, athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError> {
        self.get_json(athlete, &format!("/activity/{}/streams.json", id.as_str()))
    }

    fn fetch_intervals(&self, athlete: &Athlete, id: &ActivityId) -> Result<Value, CallError> {
        self.get_json(athlete, &format!("/activity/{}/intervals", id.as_str()))
    }
}

pub fn parse_intervals(body: &Value) -> Vec<Interval> {
    let items = body
        .as_array()
        .or_else(|| body.get("icu_intervals").and_then(Value::as_array))
        .cloned()
        .unwrap_or_default();

    items
        .iter()
        .enumerate()
        .filter_map(|(ordinal, item)| {
            let f = |key: &str| item.get(key).and_then(Value::as_f64);
            let start_index = item.get("start_index").and_then(Value::as_u64)? as usize;
            let end_index = item.get("end_index").and_then(Value::as_u64)? as usize;
            Some(Interval {
                ordinal: ordinal as u32,
                kind: item
                    .get("type")
                    .and_then(Value::as_str)
                    .map(IntervalKind::from_upstream)
                    .unwrap_or(IntervalKind::Other),
                label: item
                    .get("label")
                    .or_else(|| item.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                start_index,
                end_index,
                start_time_s: f("start_time").unwrap_or_default(),
                end_time_s: f("end_time").unwrap_or_default(),
                duration_s: f("moving_time").or_else(|| f("elapsed_time")),
                distance_m: f("distance"),
                avg_hr: f("average_heartrate"),
                avg_power: f("average_watts"),
                avg_cadence: f("average_cadence"),
                avg_speed: f("average_speed"),
                start_t_active: None,
                end_t_active: None,
            })
        })
        .collect()
}
