use serde::{Deserialize, Serialize};

use crate::domain::{ActivityId, Interval, IntervalKind, Sample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub activity_id: ActivityId,
    pub offset_ms: i64,
    pub elapsed_s: i64,
    pub t_active_s: i64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub altitude_m: Option<i64>,
    pub speed: Option<f64>,
    pub enhanced_speed: Option<f64>,
    pub distance_m: Option<f64>,
    pub heartrate: Option<i64>,
    pub cadence: Option<i64>,
    pub power: Option<i64>,
    pub vertical_oscillation: Option<f64>,
    pub ground_contact_time: Option<f64>,
    pub stance_time_balance: Option<f64>,
    pub vertical_ratio: Option<f64>,
    pub step_length: Option<f64>,
    pub leg_spring_stiffness: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRow {
    pub activity_id: ActivityId,
    pub ordinal: u32,
    pub kind: IntervalKind,
    pub label: Option<String>,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time_s: i64,
    pub end_time_s: i64,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub avg_hr: Option<i64>,
    pub avg_power: Option<i64>,
    pub avg_cadence: Option<i64>,
    pub avg_speed: Option<f64>,
    pub start_t_active: Option<i64>,
    pub end_t_active: Option<i64>,
}

pub fn round_int(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.round() as i64)
}

fn round_opt(value: Option<f64>) -> Option<i64> {
    value.and_then(round_int)
}

pub fn sample_row(activity_id: &ActivityId, sample: &Sample) -> SampleRow {
    SampleRow {
        activity_id: activity_id.clone(),
        offset_ms: sample.offset_ms,
        elapsed_s: round_int(sample.elapsed_s).unwrap_or_default(),
        t_active_s: round_int(sample.t_active_s).unwrap_or_default(),
        lat: sample.lat,
        lng: sample.lng,
        altitude_m: round_opt(sample.altitude_m),
        speed: sample.speed,
        enhanced_speed: sample.enhanced_speed,
        distance_m: sample.distance_m,
        heartrate: round_opt(sample.heartrate),
        cadence: round_opt(sample.cadence),
        power: round_opt(sample.power),
        vertical_oscillation: sample.vertical_oscillation,
        ground_contact_time: sample.ground_contact_time,
        stance_time_balance: sample.stance_time_balance,
        vertical_ratio: sample.vertical_ratio,
        step_length: sample.step_length,
        leg_spring_stiffness: sample.leg_spring_stiffness,
    }
}

pub fn sample_rows(activity_id: &ActivityId, samples: &[Sample]) -> Vec<SampleRow> {
    samples
        .iter()
        .map(|sample| sample_row(activity_id, sample))
        .collect()
}

pub fn interval_rows(
    activity_id: &ActivityId,
    intervals: &[Interval],
    sample_count: usize,
) -> Vec<IntervalRow> {
    if sample_count == 0 {
        return Vec::new();
    }
    let last = sample_count - 1;
    intervals
        .iter()
        .filter(|interval| interval.start_index <= last)
        .map(|interval| IntervalRow {
            activity_id: activity_id.clone(),
            ordinal: interval.ordinal,
            kind: interval.kind,
            label: interval.label.clone(),
            start_index: interval.start_index,
            end_index: interval.end_index.clamp(interval.start_index, last),
            start_time_s: round_int(interval.start_time_s).unwrap_or_default(),
            end_time_s: round_int(interval.end_time_s).unwrap_or_default(),
            duration_s: interval.duration_s,
            distance_m: interval.distance_m,
            avg_hr: round_opt(interval.avg_hr),
            avg_power: round_opt(interval.avg_power),
            avg_cadence: round_opt(interval.avg_cadence),
            avg_speed: interval.avg_speed,
            start_t_active: round_opt(interval.start_t_active),
            end_t_active: round_opt(interval.end_t_active),
        })
        .collect()
}
