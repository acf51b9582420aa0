// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use clap::{Parser, ValueEnum};

/// Command-line arguments for `stardag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stardag",
    version,
    about = "Run a star-schema ETL pipeline defined as a task DAG.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline definition (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: PathBuf,

    /// Logical date of the run: `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
    ///
    /// Default: now (UTC), truncated to the hour.
    #[arg(long, value_name = "DATE", value_parser = parse_logical_date)]
    pub date: Option<NaiveDateTime>,

    /// Run id; derived from the logical date when omitted.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Run parameter, available to templates as `{params.KEY}`. Repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Object store root directory; overrides `[storage].root`.
    #[arg(long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Write the run report as JSON to this file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Run one task at a time.
    #[arg(long)]
    pub sequential: bool,

    /// Parse + validate, print the execution plan, but don't run any task.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STARDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    /// The logical date to run for.
    pub fn logical_date(&self) -> NaiveDateTime {
        self.date.unwrap_or_else(|| {
            let now = Utc::now().naive_utc();
            now.with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(now)
        })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_logical_date(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid date '{s}' (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)"))
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("invalid parameter '{s}' (expected KEY=VALUE)")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
