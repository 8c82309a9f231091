use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Athlete, AthleteId};
use crate::error::IngestError;

pub const DEFAULT_CONFIG_FILE: &str = "stride-ingest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub store: StoreEntry,
    #[serde(default)]
    pub upstream: UpstreamEntry,
    #[serde(default)]
    pub weather: WeatherEntry,
    #[serde(default)]
    pub athletes: Vec<AthleteEntry>,
    #[serde(default)]
    pub sample_batch_size: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub summary_view: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpstreamEntry {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WeatherEntry {
    #[serde(default)]
    pub archive_url: Option<String>,
    #[serde(default)]
    pub forecast_url: Option<String>,
    #[serde(default)]
    pub air_quality_url: Option<String>,
    #[serde(default)]
    pub forecast_past_days: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AthleteEntry {
    Shorthand(String),
    Detailed(AthleteEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AthleteEntryObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub api_key: String,
    pub summary_view: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub sensor_log_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub archive_url: String,
    pub forecast_url: String,
    pub air_quality_url: String,
    pub forecast_past_days: u32,
    pub timeout_secs: u64,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            archive_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            air_quality_url: "https://air-quality-api.open-meteo.com/v1/air-quality".to_string(),
            forecast_past_days: 7,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: StoreSettings,
    pub upstream: UpstreamSettings,
    pub weather: WeatherSettings,
    pub athletes: Vec<Athlete>,
    pub sample_batch_size: usize,
    pub cache_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| IngestError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IngestError> {
        Self::resolve_config_with_env(config, |key| std::env::var(key).ok())
    }

    pub fn resolve_config_with_env<E>(config: Config, env: E) -> Result<ResolvedConfig, IngestError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let schema_version = config.schema_version.unwrap_or(1);
        let env_value = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let url = env_value("STORE_URL")
            .or(config.store.url)
            .ok_or_else(|| IngestError::MissingStoreCredentials("store url".to_string()))?;
        let api_key = env_value("STORE_SERVICE_KEY")
            .or(config.store.api_key)
            .ok_or_else(|| IngestError::MissingStoreCredentials("store api key".to_string()))?;
        let store = StoreSettings {
            url: url.trim_end_matches('/').to_string(),
            api_key,
            summary_view: config
                .store
                .summary_view
                .unwrap_or_else(|| "activity_summary".to_string()),
            timeout_secs: 30,
        };

        let upstream = UpstreamSettings {
            base_url: config
                .upstream
                .base_url
                .unwrap_or_else(|| "https://intervals.icu/api/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: 30,
            sensor_log_timeout_secs: 60,
        };

        let defaults = WeatherSettings::default();
        let weather = WeatherSettings {
            archive_url: config.weather.archive_url.unwrap_or(defaults.archive_url),
            forecast_url: config.weather.forecast_url.unwrap_or(defaults.forecast_url),
            air_quality_url: config
                .weather
                .air_quality_url
                .unwrap_or(defaults.air_quality_url),
            forecast_past_days: config
                .weather
                .forecast_past_days
                .unwrap_or(defaults.forecast_past_days),
            timeout_secs: defaults.timeout_secs,
        };

        let shared_key = env_value("INTERVALS_API_KEY");
        let athletes = config
            .athletes
            .into_iter()
            .map(|entry| {
                let (id, name, api_key) = match entry {
                    AthleteEntry::Shorthand(id) => (id, None, None),
                    AthleteEntry::Detailed(obj) => (obj.id, obj.name, obj.api_key),
                };
                let id: AthleteId = id.parse()?;
                let api_key = api_key.or_else(|| shared_key.clone()).ok_or_else(|| {
                    IngestError::ConfigParse(format!(
                        "athlete {id} has no api_key and INTERVALS_API_KEY is unset"
                    ))
                })?;
                Ok(Athlete {
                    name: name.unwrap_or_else(|| id.to_string()),
                    id,
                    api_key,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            store,
            upstream,
            weather,
            athletes,
            sample_batch_size: config.sample_batch_size.unwrap_or(500).max(1),
            cache_dir: config.cache_dir.map(Utf8PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn env_with_store(key: &str) -> Option<String> {
        match key {
            "STORE_URL" => Some("https://db.example.com/rest/v1/".to_string()),
            "STORE_SERVICE_KEY" => Some("service".to_string()),
            "INTERVALS_API_KEY" => Some("shared".to_string()),
            _ => None,
        }
    }

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            athletes: vec![AthleteEntry::Shorthand("A1".to_string())],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config_with_env(config, env_with_store).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.store.url, "https://db.example.com/rest/v1");
        assert_eq!(resolved.athletes.len(), 1);
        assert_eq!(resolved.athletes[0].api_key, "shared");
        assert_eq!(resolved.sample_batch_size, 500);
    }

    #[test]
    fn missing_store_credentials_are_fatal() {
        let err = ConfigLoader::resolve_config_with_env(Config::default(), |_| None).unwrap_err();
        assert_matches!(err, IngestError::MissingStoreCredentials(_));
    }
}
