use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ActivitySource, ActivityType, GeoPoint, Interval, Sample};

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    Success(DecodedActivity),
    NotAvailable(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedActivity {
    pub source: ActivitySource,
    pub activity_type: Option<ActivityType>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub avg_hr: Option<f64>,
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub laps: Vec<Interval>,
}

impl DecodedActivity {
    pub fn start_point(&self) -> Option<GeoPoint> {
        self.samples.iter().find_map(Sample::position)
    }

    pub fn start_elevation(&self) -> Option<f64> {
        self.samples.iter().find_map(|sample| sample.altitude_m)
    }

    pub fn mean_heartrate(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|sample| sample.heartrate)
            .collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn has_heartrate(&self) -> bool {
        self.samples.iter().any(|sample| sample.heartrate.is_some())
    }
}
