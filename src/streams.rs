use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::decode::{DecodeResult, DecodedActivity};
use crate::domain::{ActivityId, ActivitySource, ActivityType, Athlete, Sample};
use crate::error::IngestError;
use crate::moving_time;
use crate::retry::{RetryPolicy, Sleeper};
use crate::upstream::UpstreamClient;

pub struct StreamDecoder<'a> {
    upstream: &'a dyn UpstreamClient,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
}

impl<'a> StreamDecoder<'a> {
    pub fn new(upstream: &'a dyn UpstreamClient, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            upstream,
            sleeper,
            policy: RetryPolicy::new(3, Duration::from_secs(2), 2.0),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn decode(
        &self,
        athlete: &Athlete,
        id: &ActivityId,
        activity_type: ActivityType,
    ) -> DecodeResult {
        let body = match self.policy.run(self.sleeper, "stream download", |_| {
            self.upstream.fetch_streams(athlete, id)
        }) {
            Ok(body) => body,
            Err(failure) if failure.cause.is_not_found() => {
                return DecodeResult::NotAvailable(failure.to_string());
            }
            Err(failure) => return DecodeResult::Failed(failure.to_string()),
        };

        match samples_from_streams(&body, activity_type) {
            Ok(samples) if samples.is_empty() => {
                DecodeResult::NotAvailable("stream payload has no samples".to_string())
            }
            Ok(samples) => {
                info!(activity = %id, samples = samples.len(), "decoded streams");
                let mut decoded = DecodedActivity {
                    source: ActivitySource::StreamFallback,
                    activity_type: Some(activity_type),
                    start_time: None,
                    duration_s: samples.last().map(|s| s.t_active_s),
                    distance_m: samples.iter().rev().find_map(|s| s.distance_m),
                    avg_hr: None,
                    samples,
                    laps: Vec::new(),
                };
                decoded.avg_hr = decoded.mean_heartrate();
                DecodeResult::Success(decoded)
            }
            Err(err) => DecodeResult::Failed(err.to_string()),
        }
    }
}

pub fn samples_from_streams(
    body: &Value,
    activity_type: ActivityType,
) -> Result<Vec<Sample>, IngestError> {
    let streams = collect_streams(body)?;

    let numbers = |key: &str| -> Option<Vec<Option<f64>>> {
        streams
            .get(key)
            .map(|stream| stream.data.iter().map(Value::as_f64).collect())
    };

    let time = numbers("time");
    let altitude = numbers("altitude");
    let velocity = numbers("velocity_smooth").or_else(|| numbers("velocity"));
    let distance = numbers("distance");
    let heartrate = numbers("heartrate");
    let cadence = numbers("cadence");
    let watts = numbers("watts");
    let positions = streams.get("latlng").map(latlng_pairs);

    let len = streams
        .iter()
        .map(|(key, stream)| {
            if key == "latlng" && stream.is_interleaved_latlng() {
                stream.data.len() / 2
            } else {
                stream.data.len()
            }
        })
        .max()
        .unwrap_or(0);

    let at = |series: &Option<Vec<Option<f64>>>, index: usize| {
        series.as_ref().and_then(|values| values.get(index).copied().flatten())
    };

    let mut samples = Vec::with_capacity(len);
    for index in 0..len {
        let (lat, lng) = positions
            .as_ref()
            .and_then(|pairs| pairs.get(index).copied().flatten())
            .map_or((None, None), |(lat, lng)| (Some(lat), Some(lng)));
        samples.push(Sample {
            offset_ms: index as i64 * 1000,
            elapsed_s: at(&time, index).unwrap_or(index as f64),
            t_active_s: 0.0,
            lat,
            lng,
            altitude_m: at(&altitude, index),
            speed: at(&velocity, index),
            distance_m: at(&distance, index),
            heartrate: at(&heartrate, index),
            cadence: at(&cadence, index),
            power: at(&watts, index),
            ..Sample::default()
        });
    }

    moving_time::apply(&mut samples, activity_type);
    Ok(samples)
}

struct Stream {
    data: Vec<Value>,
    data2: Option<Vec<Value>>,
}

impl Stream {
    fn is_interleaved_latlng(&self) -> bool {
        self.data2.is_none() && self.data.first().is_some_and(|v| !v.is_array())
    }
}

fn collect_streams(body: &Value) -> Result<HashMap<String, Stream>, IngestError> {
    match body {
        Value::Object(map) => Ok(map
            .iter()
            .filter_map(|(key, value)| {
                value.as_array().map(|data| {
                    (
                        key.clone(),
                        Stream {
                            data: data.clone(),
                            data2: None,
                        },
                    )
                })
            })
            .collect()),
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(|item| {
                let kind = item.get("type")?.as_str()?;
                let data = item.get("data")?.as_array()?.clone();
                let data2 = item.get("data2").and_then(Value::as_array).cloned();
                Some((kind.to_string(), Stream { data, data2 }))
            })
            .collect()),
        other => Err(IngestError::Stream(format!(
            "unexpected stream payload: {}",
            crate::http::truncate(&other.to_string(), 120)
        ))),
    }
}

/// Lat/lng arrive as `[[lat, lng], ...]`, as a flat interleaved array, or as
/// `data` (lat) plus `data2` (lng).
fn latlng_pairs(stream: &Stream) -> Vec<Option<(f64, f64)>> {
    if let Some(lngs) = &stream.data2 {
        return stream
            .data
            .iter()
            .zip(lngs)
            .map(|(lat, lng)| Some((lat.as_f64()?, lng.as_f64()?)))
            .collect();
    }
    if stream.is_interleaved_latlng() {
        return stream
            .data
            .chunks(2)
            .map(|pair| match pair {
                [lat, lng] => Some((lat.as_f64()?, lng.as_f64()?)),
                _ => None,
            })
            .collect();
    }
    stream
        .data
        .iter()
        .map(|pair| {
            let pair = pair.as_array()?;
            Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
        })
        .collect()
}
