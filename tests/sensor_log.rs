mod common;

use std::io::Write;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use stride_ingest::decode::DecodeResult;
use stride_ingest::domain::{ActivityId, ActivitySource, ActivityType, IntervalKind};
use stride_ingest::fit;
use stride_ingest::retry::RecordingSleeper;
use stride_ingest::sensor_log::{SensorLogDecoder, decode_sensor_log};

use common::*;

fn activity_id(value: &str) -> ActivityId {
    value.parse().unwrap()
}

fn record_bytes(timestamp: u32, heart_rate: u8) -> Vec<u8> {
    let mut payload = timestamp.to_le_bytes().to_vec();
    payload.push(heart_rate);
    payload
}

#[test]
fn power_sentinel_is_dropped() {
    let mut records = steady_run(3);
    records[1].power = 65535;
    let decoded = decode_sensor_log(&running_log(activity_start(), &records)).unwrap();

    assert_eq!(decoded.samples[0].power, Some(250.0));
    assert_eq!(decoded.samples[1].power, None);
    assert_eq!(decoded.samples[2].power, Some(250.0));
}

#[test]
fn positions_are_converted_from_semicircles() {
    let decoded = decode_sensor_log(&steady_log(2)).unwrap();
    let first = &decoded.samples[0];

    assert!((first.lat.unwrap() - 48.2).abs() < 1e-6);
    assert!((first.lng.unwrap() - 16.37).abs() < 1e-6);
    assert_eq!(first.enhanced_speed, Some(3.0));
    assert_eq!(first.speed, Some(3.0));
}

#[test]
fn session_fields_become_summary() {
    let decoded = decode_sensor_log(&steady_log(60)).unwrap();

    assert_eq!(decoded.source, ActivitySource::SensorLog);
    assert_eq!(decoded.activity_type, Some(ActivityType::Run));
    assert_eq!(decoded.start_time, Some(activity_start()));
    assert_eq!(decoded.duration_s, Some(60.0));
    assert_eq!(decoded.distance_m, Some(180.0));
    assert_eq!(decoded.avg_hr, Some(150.0));
    assert_eq!(decoded.samples.len(), 60);
    assert_eq!(decoded.samples[59].offset_ms, 59_000);
    assert_eq!(decoded.samples[59].elapsed_s, 59.0);
    assert_eq!(decoded.samples[59].t_active_s, 59.0);
}

#[test]
fn developer_fields_fill_running_dynamics() {
    let base = fit_timestamp(activity_start());
    let mut builder = FitBuilder::new();
    builder.describe_dev_field(0, 0, FLOAT32, "Leg Spring Stiffness");
    builder.describe_dev_field(0, 1, UINT16, "Ground Time");
    builder.define_with_dev(
        1,
        fit::MESG_RECORD,
        &[(253, 4, UINT32), (3, 1, UINT8)],
        &[(0, 4, 0), (1, 2, 0)],
    );
    for i in 0..3u32 {
        let mut payload = record_bytes(base + i, 150);
        payload.extend_from_slice(&11.5f32.to_le_bytes());
        payload.extend_from_slice(&245u16.to_le_bytes());
        builder.data(1, &payload);
    }

    let decoded = decode_sensor_log(&builder.finish()).unwrap();

    assert_eq!(decoded.samples.len(), 3);
    assert_eq!(decoded.samples[0].leg_spring_stiffness, Some(11.5));
    assert_eq!(decoded.samples[0].ground_contact_time, Some(245.0));
    assert_eq!(decoded.mean_heartrate(), Some(150.0));
}

#[test]
fn laps_become_intervals() {
    let base = fit_timestamp(activity_start());
    let mut builder = FitBuilder::new();
    builder.define(0, fit::MESG_RECORD, &[(253, 4, UINT32), (3, 1, UINT8)]);
    for i in 0..20u32 {
        builder.data(0, &record_bytes(base + i, 140));
    }
    builder.define(
        1,
        fit::MESG_LAP,
        &[(253, 4, UINT32), (2, 4, UINT32), (23, 1, ENUM)],
    );
    for (start, end, intensity) in [(0u32, 9u32, 2u8), (10, 19, 0)] {
        let mut payload = (base + end).to_le_bytes().to_vec();
        payload.extend_from_slice(&(base + start).to_le_bytes());
        payload.push(intensity);
        builder.data(1, &payload);
    }

    let decoded = decode_sensor_log(&builder.finish()).unwrap();

    assert_eq!(decoded.laps.len(), 2);
    let warmup = &decoded.laps[0];
    assert_eq!(warmup.kind, IntervalKind::Warmup);
    assert_eq!(warmup.label.as_deref(), Some("Lap 1"));
    assert_eq!((warmup.start_index, warmup.end_index), (0, 9));
    let work = &decoded.laps[1];
    assert_eq!(work.kind, IntervalKind::Work);
    assert_eq!((work.start_index, work.end_index), (10, 19));
    assert!(work.start_t_active.is_some());
}

#[test]
fn gzip_wrapped_log_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&steady_log(30)).unwrap();
    let upstream = MockUpstream::default().with_sensor_log("i100", encoder.finish().unwrap());
    let sleeper = RecordingSleeper::new();

    let result = SensorLogDecoder::new(&upstream, &sleeper).decode(&athlete("A1"), &activity_id("i100"));

    assert_matches!(result, DecodeResult::Success(decoded) if decoded.samples.len() == 30);
}

#[test]
fn missing_log_is_not_available() {
    let upstream = MockUpstream::default();
    let sleeper = RecordingSleeper::new();

    let result = SensorLogDecoder::new(&upstream, &sleeper).decode(&athlete("A1"), &activity_id("i100"));

    assert_matches!(result, DecodeResult::NotAvailable(_));
    assert_eq!(upstream.sensor_log_calls(), 1);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn corrupt_log_fails() {
    let upstream = MockUpstream::default().with_sensor_log("i100", b"not a sensor log".to_vec());
    let sleeper = RecordingSleeper::new();

    let result = SensorLogDecoder::new(&upstream, &sleeper).decode(&athlete("A1"), &activity_id("i100"));

    assert_matches!(result, DecodeResult::Failed(_));
}
