use thiserror::Error;
use tracing::warn;

use crate::domain::{ActivityType, GeoPoint, Interval, Sample};

pub const MAX_ACTIVE_GAP_S: f64 = 10.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MovingTimeError {
    #[error("non-finite elapsed time at sample {0}")]
    NonFinite(usize),
    #[error("elapsed time goes backwards at sample {0}")]
    NonMonotonic(usize),
}

pub fn estimate(samples: &[Sample], activity_type: ActivityType) -> Vec<f64> {
    match try_estimate(samples, activity_type) {
        Ok(series) => series,
        Err(err) => {
            warn!(error = %err, "active time estimate failed, using zeros");
            vec![0.0; samples.len()]
        }
    }
}

pub fn try_estimate(
    samples: &[Sample],
    activity_type: ActivityType,
) -> Result<Vec<f64>, MovingTimeError> {
    let threshold = activity_type.moving_speed_threshold();
    let mut series = Vec::with_capacity(samples.len());
    let mut active = 0.0;

    for (index, sample) in samples.iter().enumerate() {
        if !sample.elapsed_s.is_finite() {
            return Err(MovingTimeError::NonFinite(index));
        }
        if index > 0 {
            let previous = &samples[index - 1];
            let dt = sample.elapsed_s - previous.elapsed_s;
            if dt < 0.0 {
                return Err(MovingTimeError::NonMonotonic(index));
            }
            if dt > 0.0 && dt <= MAX_ACTIVE_GAP_S && is_moving(previous, sample, dt, threshold) {
                active += dt;
            }
        }
        series.push(active);
    }
    Ok(series)
}

pub fn apply(samples: &mut [Sample], activity_type: ActivityType) {
    let series = estimate(samples, activity_type);
    for (sample, value) in samples.iter_mut().zip(series) {
        sample.t_active_s = value;
    }
}

fn is_moving(previous: &Sample, current: &Sample, dt: f64, threshold: f64) -> bool {
    if let Some(speed) = current.best_speed() {
        return speed >= threshold;
    }
    if let (Some(from), Some(to)) = (previous.position(), current.position()) {
        return haversine_m(from, to) / dt >= threshold;
    }
    if let (Some(from), Some(to)) = (previous.distance_m, current.distance_m) {
        return (to - from) / dt >= threshold;
    }
    if let Some(cadence) = current.cadence {
        return cadence > 0.0;
    }
    // No movement signal at all: count wall-clock time.
    true
}

pub fn haversine_m(from: GeoPoint, to: GeoPoint) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (to.lng - from.lng).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

pub fn project_intervals(intervals: &mut [Interval], samples: &[Sample]) {
    let last = samples.len().saturating_sub(1);
    for interval in intervals {
        let start = samples.get(interval.start_index);
        interval.start_t_active = start.map(|s| s.t_active_s);
        interval.end_t_active = start
            .and_then(|_| samples.get(interval.end_index.min(last)))
            .map(|s| s.t_active_s);
    }
}
