use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WeatherSettings;
use crate::domain::{GeoPoint, WeatherObservation};
use crate::http;
use crate::retry::CallError;

const WEATHER_FIELDS: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "wind_speed_10m",
    "wind_gusts_10m",
    "wind_direction_10m",
    "pressure_msl",
    "cloud_cover",
    "precipitation",
];

const AIR_QUALITY_FIELDS: &[&str] = &[
    "pm2_5",
    "pm10",
    "ozone",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "carbon_monoxide",
    "us_aqi",
];

pub trait WeatherClient: Send + Sync {
    fn fetch_archive(
        &self,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError>;

    fn fetch_forecast(
        &self,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError>;
}

#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Client,
    archive_url: String,
    forecast_url: String,
    air_quality_url: String,
    forecast_past_days: u32,
}

impl OpenMeteoClient {
    pub fn new(settings: &WeatherSettings) -> Result<Self, CallError> {
        let client = http::build_client(
            Duration::from_secs(settings.timeout_secs),
            HeaderMap::new(),
        )?;
        Ok(Self {
            client,
            archive_url: settings.archive_url.clone(),
            forecast_url: settings.forecast_url.clone(),
            air_quality_url: settings.air_quality_url.clone(),
            forecast_past_days: settings.forecast_past_days,
        })
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, CallError> {
        let response = http::send(self.client.get(url).query(query))?;
        response
            .json::<Value>()
            .map_err(|err| CallError::InvalidPayload(err.to_string()))
    }

    fn base_query(point: GeoPoint, hourly: &[&str]) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", format!("{:.4}", point.lat)),
            ("longitude", format!("{:.4}", point.lng)),
            ("hourly", hourly.join(",")),
            ("timezone", "GMT".to_string()),
            ("timeformat", "unixtime".to_string()),
            ("wind_speed_unit", "kmh".to_string()),
        ]
    }

    fn air_quality(&self, point: GeoPoint, at: DateTime<Utc>) -> WeatherObservation {
        let mut query = Self::base_query(point, AIR_QUALITY_FIELDS);
        query.extend(date_window(at));
        match self.get_json(&self.air_quality_url, &query) {
            Ok(body) => observation_from_hourly(&body, at),
            Err(err) => {
                warn!(error = %err, "air quality lookup failed");
                WeatherObservation::default()
            }
        }
    }

    fn finish(
        &self,
        label: &str,
        body: Value,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError> {
        let mut observation = observation_from_hourly(&body, at);
        if !observation.is_usable() {
            return Err(CallError::InvalidPayload(format!(
                "{label} response has no temperature"
            )));
        }
        let air = self.air_quality(point, at);
        observation.merge_air_quality(&air);
        debug!(label, temperature = ?observation.temperature_c, "weather resolved");
        Ok(observation)
    }
}

impl WeatherClient for OpenMeteoClient {
    fn fetch_archive(
        &self,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError> {
        let mut query = Self::base_query(point, WEATHER_FIELDS);
        query.extend(date_window(at));
        let body = self.get_json(&self.archive_url, &query)?;
        self.finish("archive", body, point, at)
    }

    fn fetch_forecast(
        &self,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<WeatherObservation, CallError> {
        let horizon = Utc::now() - ChronoDuration::days(i64::from(self.forecast_past_days));
        if at < horizon {
            return Err(CallError::Other(format!(
                "{at} is older than the {}-day forecast history",
                self.forecast_past_days
            )));
        }
        let mut query = Self::base_query(point, WEATHER_FIELDS);
        query.extend(date_window(at));
        let body = self.get_json(&self.forecast_url, &query)?;
        self.finish("forecast", body, point, at)
    }
}

fn date_window(at: DateTime<Utc>) -> [(&'static str, String); 2] {
    let start = (at - ChronoDuration::hours(1)).date_naive();
    let end = (at + ChronoDuration::hours(1)).date_naive();
    [
        ("start_date", start.format("%Y-%m-%d").to_string()),
        ("end_date", end.format("%Y-%m-%d").to_string()),
    ]
}

fn slot<'a>(observation: &'a mut WeatherObservation, field: &str) -> Option<&'a mut Option<f64>> {
    let slot = match field {
        "temperature_2m" => &mut observation.temperature_c,
        "relative_humidity_2m" => &mut observation.humidity_pct,
        "dew_point_2m" => &mut observation.dew_point_c,
        "wind_speed_10m" => &mut observation.wind_speed_kmh,
        "wind_gusts_10m" => &mut observation.wind_gust_kmh,
        "wind_direction_10m" => &mut observation.wind_direction_deg,
        "pressure_msl" => &mut observation.pressure_hpa,
        "cloud_cover" => &mut observation.cloud_cover_pct,
        "precipitation" => &mut observation.precipitation_mm,
        "pm2_5" => &mut observation.pm2_5,
        "pm10" => &mut observation.pm10,
        "ozone" => &mut observation.ozone,
        "nitrogen_dioxide" => &mut observation.no2,
        "sulphur_dioxide" => &mut observation.so2,
        "carbon_monoxide" => &mut observation.co,
        "us_aqi" => &mut observation.aqi,
        _ => return None,
    };
    Some(slot)
}

pub fn observation_from_hourly(body: &Value, at: DateTime<Utc>) -> WeatherObservation {
    let mut observation = WeatherObservation::default();
    let Some(hourly) = body.get("hourly").and_then(Value::as_object) else {
        return observation;
    };
    let times: Vec<Option<i64>> = hourly
        .get("time")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(Value::as_i64).collect())
        .unwrap_or_default();
    if times.is_empty() {
        return observation;
    }

    let target = at.timestamp();
    for (field, values) in hourly {
        let Some(values) = values.as_array() else {
            continue;
        };
        let Some(entry) = slot(&mut observation, field) else {
            continue;
        };
        let values: Vec<Option<f64>> = values.iter().map(Value::as_f64).collect();
        *entry = nearest_value(&times, &values, target);
    }
    observation
}

pub const MAX_SLOT_DISTANCE_S: i64 = 3600;

pub fn nearest_value(times: &[Option<i64>], values: &[Option<f64>], target: i64) -> Option<f64> {
    times
        .iter()
        .zip(values)
        .filter_map(|(time, value)| Some(((*time)?, (*value)?)))
        .filter(|(time, _)| (time - target).abs() <= MAX_SLOT_DISTANCE_S)
        .min_by_key(|(time, _)| (time - target).abs())
        .map(|(_, value)| value)
}
