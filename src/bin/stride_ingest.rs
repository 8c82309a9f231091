use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Days, Utc};
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stride_ingest::activity_store::RestActivityStore;
use stride_ingest::app::{App, IngestOptions, ProgressSink};
use stride_ingest::backfill::BackfillWindow;
use stride_ingest::cache::{DiskSeriesCache, SeriesCache};
use stride_ingest::config::ConfigLoader;
use stride_ingest::domain::{AthleteId, DateRange, parse_date};
use stride_ingest::error::IngestError;
use stride_ingest::output::{self, HumanOutput, JsonOutput, OutputMode};
use stride_ingest::upstream::IntervalsHttpClient;
use stride_ingest::weather::OpenMeteoClient;

#[derive(Parser)]
#[command(name = "stride-ingest")]
#[command(about = "Ingest running telemetry with weather enrichment into the activity store")]
#[command(version, author)]
struct Cli {
    #[arg(long, help = "First activity date (YYYY-MM-DD); defaults to yesterday")]
    start: Option<String>,

    #[arg(long, help = "Last activity date (YYYY-MM-DD); defaults to today")]
    end: Option<String>,

    #[arg(long, help = "Only ingest this athlete")]
    athlete: Option<String>,

    #[arg(long, help = "Process everything but write nothing")]
    dry_run: bool,

    #[arg(long)]
    skip_activities: bool,

    #[arg(long)]
    skip_weather: bool,

    #[arg(long, help = "Only upgrade forecast weather to archive weather")]
    backfill_only: bool,

    #[arg(long, default_value_t = 3)]
    backfill_min_days: u32,

    #[arg(long, default_value_t = 7)]
    backfill_max_days: u32,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,

    #[arg(long, help = "Bypass the sample-series cache")]
    no_cache: bool,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("no activities were processed successfully")]
struct NothingProcessed;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        if report.downcast_ref::<NothingProcessed>().is_some() {
            return ExitCode::from(4);
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::MissingStoreCredentials(_)
        | IngestError::RosterUnavailable(_)
        | IngestError::InvalidAthleteId(_)
        | IngestError::InvalidDate(_)
        | IngestError::InvalidDateRange(_) => 2,
        IngestError::UpstreamHttp(_)
        | IngestError::WeatherHttp(_)
        | IngestError::StoreHttp(_)
        | IngestError::RetryExhausted { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;

    let today = Utc::now().date_naive();
    let end = match cli.end.as_deref() {
        Some(value) => parse_date(value)?,
        None => today,
    };
    let start = match cli.start.as_deref() {
        Some(value) => parse_date(value)?,
        None => end.checked_sub_days(Days::new(1)).unwrap_or(end),
    };

    let mut options = IngestOptions::new(DateRange::new(start, end)?, today);
    options.athlete = cli
        .athlete
        .as_deref()
        .map(str::parse::<AthleteId>)
        .transpose()?;
    options.dry_run = cli.dry_run;
    options.skip_activities = cli.skip_activities;
    options.skip_weather = cli.skip_weather;
    options.backfill_only = cli.backfill_only;
    options.backfill_window = BackfillWindow::new(cli.backfill_min_days, cli.backfill_max_days)?;

    let upstream = IntervalsHttpClient::new(&resolved.upstream)
        .map_err(|err| IngestError::UpstreamHttp(err.to_string()))?;
    let weather = OpenMeteoClient::new(&resolved.weather)
        .map_err(|err| IngestError::WeatherHttp(err.to_string()))?;
    let store = RestActivityStore::new(&resolved.store)
        .map_err(|err| IngestError::StoreHttp(err.to_string()))?;

    let cache: Option<Arc<dyn SeriesCache>> = if cli.no_cache {
        None
    } else {
        let disk = match resolved.cache_dir.clone() {
            Some(root) => DiskSeriesCache::with_root(root),
            None => DiskSeriesCache::new()?,
        };
        info!(path = %disk.root(), "series cache");
        Some(Arc::new(disk))
    };

    let app = App::new(upstream, weather, store)
        .with_roster(resolved.athletes.clone())
        .with_cache(cache)
        .with_batch_size(resolved.sample_batch_size);

    let sink: &dyn ProgressSink = match mode {
        OutputMode::Human => &HumanOutput,
        OutputMode::Json => &JsonOutput,
    };
    let stats = app.run(&options, sink)?;
    output::print_stats(mode, &stats).into_diagnostic()?;

    if !stats.is_success() {
        return Err(NothingProcessed.into());
    }
    Ok(())
}
