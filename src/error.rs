use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid athlete id: {0}")]
    InvalidAthleteId(String),

    #[error("invalid activity id: {0}")]
    InvalidActivityId(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing store credentials: {0}")]
    #[diagnostic(help("set STORE_URL and STORE_SERVICE_KEY or the `store` section of the config"))]
    MissingStoreCredentials(String),

    #[error("athlete roster unavailable: {0}")]
    RosterUnavailable(String),

    #[error("upstream request failed: {0}")]
    UpstreamHttp(String),

    #[error("weather request failed: {0}")]
    WeatherHttp(String),

    #[error("store request failed: {0}")]
    StoreHttp(String),

    #[error("sensor log decode failed: {0}")]
    SensorLog(String),

    #[error("sample stream decode failed: {0}")]
    Stream(String),

    #[error("{label} failed after {attempts} attempt(s): {cause}")]
    RetryExhausted {
        label: String,
        attempts: u32,
        cause: String,
    },

    #[error("series cache error: {0}")]
    Cache(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
