mod common;

use std::collections::BTreeSet;

use serde_json::Value;

use stride_ingest::domain::{ActivityId, ActivityType};
use stride_ingest::normalize::sample_rows;
use stride_ingest::streams::samples_from_streams;

use common::velocity_streams;

fn keys(row: &Value) -> BTreeSet<String> {
    row.as_object().unwrap().keys().cloned().collect()
}

#[test]
fn rows_without_heart_rate_keep_uniform_columns() {
    let id: ActivityId = "i200".parse().unwrap();
    let samples = samples_from_streams(&velocity_streams(1000), ActivityType::Run).unwrap();
    let rows: Vec<Value> = sample_rows(&id, &samples)
        .iter()
        .map(|row| serde_json::to_value(row).unwrap())
        .collect();

    assert_eq!(rows.len(), 1000);
    let expected = keys(&rows[0]);
    assert!(expected.contains("heartrate"));
    for row in &rows {
        assert_eq!(keys(row), expected);
        assert_eq!(row["heartrate"], Value::Null);
        assert!(row["offset_ms"].is_i64());
        assert!(row["t_active_s"].is_i64());
    }
    assert_eq!(rows[999]["offset_ms"], 999_000);
}

#[test]
fn active_time_is_non_decreasing_and_integral() {
    let id: ActivityId = "i200".parse().unwrap();
    let samples = samples_from_streams(&velocity_streams(300), ActivityType::Run).unwrap();
    let rows = sample_rows(&id, &samples);

    assert!(rows.windows(2).all(|pair| pair[1].t_active_s >= pair[0].t_active_s));
    assert_eq!(rows.last().unwrap().t_active_s, 299);
}
