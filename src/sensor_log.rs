use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::decode::{DecodeResult, DecodedActivity};
use crate::domain::{ActivityId, ActivitySource, ActivityType, Athlete, Interval, IntervalKind, Sample};
use crate::error::IngestError;
use crate::fit::{self, FIT_EPOCH_OFFSET, FitMessage, MESG_LAP, MESG_RECORD, MESG_SESSION};
use crate::moving_time;
use crate::payload;
use crate::retry::{RetryPolicy, Sleeper};
use crate::upstream::UpstreamClient;

/// Degrees per semicircle: 180 / 2^31.
pub const SEMICIRCLE_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

pub const POWER_SENTINEL: f64 = 65535.0;

mod record {
    pub const POSITION_LAT: u8 = 0;
    pub const POSITION_LONG: u8 = 1;
    pub const ALTITUDE: u8 = 2;
    pub const HEART_RATE: u8 = 3;
    pub const CADENCE: u8 = 4;
    pub const DISTANCE: u8 = 5;
    pub const SPEED: u8 = 6;
    pub const POWER: u8 = 7;
    pub const VERTICAL_OSCILLATION: u8 = 39;
    pub const STANCE_TIME: u8 = 41;
    pub const ENHANCED_SPEED: u8 = 73;
    pub const ENHANCED_ALTITUDE: u8 = 78;
    pub const VERTICAL_RATIO: u8 = 83;
    pub const STANCE_TIME_BALANCE: u8 = 84;
    pub const STEP_LENGTH: u8 = 85;
}

mod session {
    pub const START_TIME: u8 = 2;
    pub const SPORT: u8 = 5;
    pub const SUB_SPORT: u8 = 6;
    pub const TOTAL_TIMER_TIME: u8 = 8;
    pub const TOTAL_DISTANCE: u8 = 9;
    pub const AVG_HEART_RATE: u8 = 16;
}

mod lap {
    pub const START_TIME: u8 = 2;
    pub const TOTAL_ELAPSED_TIME: u8 = 7;
    pub const TOTAL_TIMER_TIME: u8 = 8;
    pub const TOTAL_DISTANCE: u8 = 9;
    pub const AVG_SPEED: u8 = 13;
    pub const AVG_HEART_RATE: u8 = 15;
    pub const AVG_CADENCE: u8 = 17;
    pub const AVG_POWER: u8 = 19;
    pub const INTENSITY: u8 = 23;
}

pub struct SensorLogDecoder<'a> {
    upstream: &'a dyn UpstreamClient,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
}

impl<'a> SensorLogDecoder<'a> {
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

    pub fn decode(&self, athlete: &Athlete, id: &ActivityId) -> DecodeResult {
        let download = self.policy.run(self.sleeper, "sensor log download", |_| {
            self.upstream.download_sensor_log(athlete, id)
        });
        let bytes = match download {
            Ok(bytes) if bytes.is_empty() => {
                return DecodeResult::NotAvailable("sensor log is empty".to_string());
            }
            Ok(bytes) => bytes,
            Err(failure) if failure.cause.is_not_found() => {
                return DecodeResult::NotAvailable(failure.to_string());
            }
            Err(failure) => return DecodeResult::Failed(failure.to_string()),
        };

        let decoded = payload::unwrap_sensor_log(bytes).and_then(|raw| decode_sensor_log(&raw));
        match decoded {
            Ok(activity) if activity.samples.is_empty() => {
                DecodeResult::NotAvailable("sensor log has no samples".to_string())
            }
            Ok(activity) => {
                info!(
                    activity = %id,
                    samples = activity.samples.len(),
                    "decoded sensor log"
                );
                DecodeResult::Success(activity)
            }
            Err(err) => DecodeResult::Failed(err.to_string()),
        }
    }
}

pub fn decode_sensor_log(bytes: &[u8]) -> Result<DecodedActivity, IngestError> {
    let messages = fit::decode(bytes).map_err(|err| IngestError::SensorLog(err.to_string()))?;

    let records: Vec<&FitMessage> = messages.iter().filter(|m| m.global == MESG_RECORD).collect();
    let session = messages.iter().find(|m| m.global == MESG_SESSION);

    let first_timestamp = records.iter().find_map(|m| m.timestamp());
    let mut samples = Vec::with_capacity(records.len());
    let mut last_elapsed = 0.0;
    for (index, message) in records.iter().enumerate() {
        let elapsed = match (message.timestamp(), first_timestamp) {
            (Some(ts), Some(first)) => f64::from(ts.saturating_sub(first)),
            _ if index == 0 => 0.0,
            _ => last_elapsed + 1.0,
        };
        last_elapsed = elapsed;
        samples.push(sample_from_record(message, index, elapsed));
    }

    let activity_type = session.and_then(session_activity_type);
    moving_time::apply(&mut samples, activity_type.unwrap_or(ActivityType::Run));

    let start_time = session
        .and_then(|s| s.raw_f64(session::START_TIME))
        .or_else(|| first_timestamp.map(f64::from))
        .and_then(fit_time);
    let duration_s = session
        .and_then(|s| s.scaled(session::TOTAL_TIMER_TIME, 1000.0, 0.0))
        .or_else(|| samples.last().map(|s| s.t_active_s));
    let distance_m = session
        .and_then(|s| s.scaled(session::TOTAL_DISTANCE, 100.0, 0.0))
        .or_else(|| samples.iter().rev().find_map(|s| s.distance_m));

    let laps = first_timestamp
        .map(|first| {
            messages
                .iter()
                .filter(|m| m.global == MESG_LAP)
                .enumerate()
                .filter_map(|(ordinal, m)| lap_interval(m, ordinal, first, &samples))
                .collect()
        })
        .unwrap_or_default();

    let mut decoded = DecodedActivity {
        source: ActivitySource::SensorLog,
        activity_type,
        start_time,
        duration_s,
        distance_m,
        avg_hr: session.and_then(|s| s.raw_f64(session::AVG_HEART_RATE)),
        samples,
        laps,
    };
    if decoded.avg_hr.is_none() {
        decoded.avg_hr = decoded.mean_heartrate();
    }
    moving_time::project_intervals(&mut decoded.laps, &decoded.samples);
    debug!(laps = decoded.laps.len(), "sensor log laps");
    Ok(decoded)
}

fn sample_from_record(message: &FitMessage, index: usize, elapsed: f64) -> Sample {
    let semicircles = |field| message.raw_f64(field).map(|v| v * SEMICIRCLE_TO_DEGREES);
    let altitude = message
        .scaled(record::ENHANCED_ALTITUDE, 5.0, 500.0)
        .or_else(|| message.scaled(record::ALTITUDE, 5.0, 500.0));
    let enhanced_speed = message.scaled(record::ENHANCED_SPEED, 1000.0, 0.0);
    let speed = enhanced_speed.or_else(|| message.scaled(record::SPEED, 1000.0, 0.0));
    let power = message
        .raw_f64(record::POWER)
        .filter(|value| *value != POWER_SENTINEL)
        .or_else(|| {
            message
                .developer_f64("Power")
                .filter(|value| *value != POWER_SENTINEL)
        });

    Sample {
        offset_ms: index as i64 * 1000,
        elapsed_s: elapsed,
        t_active_s: 0.0,
        lat: semicircles(record::POSITION_LAT),
        lng: semicircles(record::POSITION_LONG),
        altitude_m: altitude,
        speed,
        enhanced_speed,
        distance_m: message.scaled(record::DISTANCE, 100.0, 0.0),
        heartrate: message.raw_f64(record::HEART_RATE),
        cadence: message.raw_f64(record::CADENCE),
        power,
        vertical_oscillation: message
            .scaled(record::VERTICAL_OSCILLATION, 10.0, 0.0)
            .or_else(|| message.developer_f64("Vertical Oscillation")),
        ground_contact_time: message
            .scaled(record::STANCE_TIME, 10.0, 0.0)
            .or_else(|| message.developer_f64("Ground Time")),
        stance_time_balance: message.scaled(record::STANCE_TIME_BALANCE, 100.0, 0.0),
        vertical_ratio: message.scaled(record::VERTICAL_RATIO, 100.0, 0.0),
        step_length: message.scaled(record::STEP_LENGTH, 10.0, 0.0),
        leg_spring_stiffness: message.developer_f64("Leg Spring Stiffness"),
    }
}

fn session_activity_type(message: &FitMessage) -> Option<ActivityType> {
    let sport = message.get(session::SPORT)?.as_i64()?;
    let sub_sport = message
        .get(session::SUB_SPORT)
        .and_then(|value| value.as_i64())
        .unwrap_or(0);
    Some(match (sport, sub_sport) {
        (1, 3) => ActivityType::Trail,
        (1, 1) | (1, 58) => ActivityType::Virtual,
        (1, _) => ActivityType::Run,
        _ => ActivityType::Other,
    })
}

fn fit_time(raw: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(raw as i64 + FIT_EPOCH_OFFSET, 0)
}

fn lap_interval(
    message: &FitMessage,
    ordinal: usize,
    first_timestamp: u32,
    samples: &[Sample],
) -> Option<Interval> {
    let start = message.raw_f64(lap::START_TIME)? - f64::from(first_timestamp);
    let end = match message.timestamp() {
        Some(ts) => f64::from(ts) - f64::from(first_timestamp),
        None => start + message.scaled(lap::TOTAL_ELAPSED_TIME, 1000.0, 0.0)?,
    };
    let start_index = samples.iter().position(|s| s.elapsed_s >= start)?;
    let end_index = samples.iter().rposition(|s| s.elapsed_s <= end)?;
    if end_index < start_index {
        return None;
    }
    let kind = match message.get(lap::INTENSITY).and_then(|v| v.as_i64()) {
        Some(0) => IntervalKind::Work,
        Some(1) => IntervalKind::Rest,
        Some(2) => IntervalKind::Warmup,
        Some(3) => IntervalKind::Cooldown,
        _ => IntervalKind::Other,
    };
    Some(Interval {
        ordinal: ordinal as u32,
        kind,
        label: Some(format!("Lap {}", ordinal + 1)),
        start_index,
        end_index,
        start_time_s: samples[start_index].elapsed_s,
        end_time_s: samples[end_index].elapsed_s,
        duration_s: message.scaled(lap::TOTAL_TIMER_TIME, 1000.0, 0.0),
        distance_m: message.scaled(lap::TOTAL_DISTANCE, 100.0, 0.0),
        avg_hr: message.raw_f64(lap::AVG_HEART_RATE),
        avg_power: message.raw_f64(lap::AVG_POWER),
        avg_cadence: message.raw_f64(lap::AVG_CADENCE),
        avg_speed: message.scaled(lap::AVG_SPEED, 1000.0, 0.0),
        start_t_active: None,
        end_t_active: None,
    })
}
