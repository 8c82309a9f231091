use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::stats::RunStats;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_stats(stats: &RunStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_stats(stats: &RunStats) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(stats.summary().as_bytes())?;
        Ok(())
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        let elapsed = event
            .elapsed
            .map(|elapsed| format!("[{:>6.1}s] ", elapsed.as_secs_f64()))
            .unwrap_or_default();
        eprintln!("{elapsed}{}", event.message);
    }
}

pub fn print_stats(mode: OutputMode, stats: &RunStats) -> io::Result<()> {
    match mode {
        OutputMode::Human => HumanOutput::print_stats(stats),
        OutputMode::Json => JsonOutput::print_stats(stats),
    }
}
