//! CLI argument definitions for the CleanCity application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use cleancity_api::params::EventQuery;
use cleancity_core::config::CleanCityConfig;

/// CleanCity - log litter detections, find hotspots and draft cleanup reports.
#[derive(Parser, Debug)]
#[command(name = "cleancity", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Directory holding the event database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API (the default).
    Serve,
    /// Run the JSON-RPC tool server on stdin/stdout.
    Tools,
    /// Record a detection event.
    Log {
        #[arg(long)]
        location: Option<String>,
        /// Number of litter items seen.
        #[arg(long, allow_hyphen_values = true)]
        items: i64,
        #[arg(long)]
        notes: Option<String>,
        /// JSON file with the detections array.
        #[arg(long)]
        detections: Option<PathBuf>,
    },
    /// List events, newest first, with summary statistics.
    Events(FilterArgs),
    /// Show recurring-problem locations.
    Hotspots {
        #[arg(long)]
        window_days: Option<i64>,
        #[arg(long)]
        min_events: Option<u32>,
    },
    /// Estimate cleanup resources for an item count.
    Estimate {
        #[arg(long, allow_hyphen_values = true)]
        items: i64,
    },
    /// Render a report for a logged event.
    Report {
        id: i64,
        /// email, markdown or plain.
        #[arg(long, default_value = "email")]
        format: String,
        /// Rewrite the report with the configured provider.
        #[arg(long)]
        enhance: bool,
    },
    /// Delete an event by id.
    Delete { id: i64 },
    /// Remove events older than the retention window.
    Purge {
        /// Overrides `storage.retention_days`.
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Detect litter in an image, log it and print a report.
    Analyze {
        #[arg(long)]
        image: PathBuf,
        /// JSON file of detections to use instead of the vision provider.
        #[arg(long)]
        detections: Option<PathBuf>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Do not store the event.
        #[arg(long)]
        no_log: bool,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        enhance: bool,
    },
}

/// Event filters shared by listing commands.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    /// Case-insensitive location substring.
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub severity: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound, inclusive.
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,
    /// Only events from the last N days.
    #[arg(long)]
    pub days: Option<i64>,
    #[arg(long)]
    pub min_items: Option<i64>,
    #[arg(long)]
    pub limit: Option<u32>,
}

impl From<FilterArgs> for EventQuery {
    fn from(args: FilterArgs) -> Self {
        EventQuery {
            location: args.location,
            severity: args.severity,
            start: args.start,
            end: args.end,
            days: args.days,
            min_item_count: args.min_items,
            limit: args.limit,
        }
    }
}

impl CliArgs {
    /// The subcommand to run; `serve` when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CLEANCITY_CONFIG env var > ~/.cleancity/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(|k| std::env::var(k).ok())
    }

    fn resolve_config_path_with<F>(&self, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env("CLEANCITY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Layer flags and environment variables over a loaded config.
    pub fn apply_overrides(&self, config: &mut CleanCityConfig) {
        self.apply_overrides_with(config, |k| std::env::var(k).ok());
    }

    fn apply_overrides_with<F>(&self, config: &mut CleanCityConfig, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = self
            .port
            .or_else(|| env("CLEANCITY_PORT").and_then(|v| v.parse().ok()))
        {
            config.general.port = port;
        }

        if let Some(dir) = self
            .data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| env("CLEANCITY_DATA_DIR"))
        {
            config.general.data_dir = dir;
        }

        if let Some(level) = self
            .log_level
            .clone()
            .or_else(|| env("CLEANCITY_LOG_LEVEL"))
        {
            config.general.log_level = level;
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(".cleancity").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}
