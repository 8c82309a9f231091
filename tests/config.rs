use std::fs;

use assert_matches::assert_matches;

use stride_ingest::config::{AthleteEntry, Config, ConfigLoader};
use stride_ingest::error::IngestError;

fn store_env(key: &str) -> Option<String> {
    match key {
        "STORE_URL" => Some("https://db.example.com".to_string()),
        "STORE_SERVICE_KEY" => Some("service".to_string()),
        _ => None,
    }
}

#[test]
fn parse_detailed_config() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "store": {"summary_view": "weekly_load"},
            "upstream": {"base_url": "https://fitness.example.com/api/v1/"},
            "weather": {"forecast_past_days": 3},
            "athletes": [
                {"id": "i12345", "name": "Ana", "api_key": "k1"},
                "i67890"
            ],
            "sample_batch_size": 250,
            "cache_dir": "/tmp/stride-cache"
        }"#,
    )
    .unwrap();
    assert_matches!(config.athletes[1], AthleteEntry::Shorthand(_));

    let env = |key: &str| match key {
        "INTERVALS_API_KEY" => Some("shared".to_string()),
        other => store_env(other),
    };
    let resolved = ConfigLoader::resolve_config_with_env(config, env).unwrap();

    assert_eq!(resolved.store.summary_view, "weekly_load");
    assert_eq!(resolved.upstream.base_url, "https://fitness.example.com/api/v1");
    assert_eq!(resolved.weather.forecast_past_days, 3);
    assert_eq!(resolved.sample_batch_size, 250);
    assert_eq!(resolved.cache_dir.as_deref().map(|p| p.as_str()), Some("/tmp/stride-cache"));
    assert_eq!(resolved.athletes[0].name, "Ana");
    assert_eq!(resolved.athletes[0].api_key, "k1");
    assert_eq!(resolved.athletes[1].name, "i67890");
    assert_eq!(resolved.athletes[1].api_key, "shared");
}

#[test]
fn athlete_without_key_is_rejected() {
    let config = Config {
        athletes: vec![AthleteEntry::Shorthand("i1".to_string())],
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config_with_env(config, store_env).unwrap_err();
    assert_matches!(err, IngestError::ConfigParse(_));
}

#[test]
fn invalid_athlete_id_is_rejected() {
    let config = Config {
        athletes: vec![AthleteEntry::Shorthand("not an id".to_string())],
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config_with_env(config, store_env).unwrap_err();
    assert_matches!(err, IngestError::InvalidAthleteId(_));
}

#[test]
fn empty_env_values_are_ignored() {
    let config = Config::default();
    let env = |key: &str| match key {
        "STORE_URL" => Some("  ".to_string()),
        other => store_env(other),
    };
    let err = ConfigLoader::resolve_config_with_env(config, env).unwrap_err();
    assert_matches!(err, IngestError::MissingStoreCredentials(_));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stride-ingest.json");
    fs::write(&path, "{ athletes: ").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, IngestError::ConfigParse(_));
}

#[test]
fn file_settings_are_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stride-ingest.json");
    fs::write(
        &path,
        r#"{
            "store": {"url": "https://db.example.com", "api_key": "file-key"},
            "athletes": [{"id": "i1", "api_key": "k1"}]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.athletes.len(), 1);
    assert_eq!(resolved.athletes[0].id.as_str(), "i1");
    assert_eq!(resolved.store.summary_view, "activity_summary");
}
