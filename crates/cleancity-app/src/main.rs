//! CleanCity application binary - composition root.
//!
//! 1. Parse the CLI and resolve configuration (flags > env > file > defaults)
//! 2. Initialize tracing
//! 3. Open the event database and build the providers
//! 4. Run the requested subcommand: HTTP API, stdio tool server, or a
//!    one-shot operation that prints JSON

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use cleancity_api::params::{AnalyzeOptions, HotspotQuery, PurgeRequest};
use cleancity_api::state::AppState;
use cleancity_api::{rpc, workflow};
use cleancity_core::config::CleanCityConfig;
use cleancity_core::error::{CleanCityError, Result};
use cleancity_core::types::{Detection, ReportFormat};
use cleancity_providers::{
    build_enhancer, build_vision, OfflineVision, ReportEnhancer, StaticVision, VisionProvider,
};
use cleancity_storage::{Database, NewEvent};

use crate::cli::{CliArgs, Command};

/// Expand `~` to the home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir
        .strip_prefix("~/")
        .or_else(|| data_dir.strip_prefix("~\\"))
    {
        Some(rest) => cli::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(data_dir),
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_detections(path: &Path) -> Result<Vec<Detection>> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| CleanCityError::validation("detections", e.to_string()))
}

/// The configured detector. A missing API key disables image analysis
/// instead of failing startup.
fn configured_vision(config: &CleanCityConfig) -> Arc<dyn VisionProvider> {
    match build_vision(&config.vision) {
        Ok(vision) => vision,
        Err(e) => {
            tracing::warn!(error = %e, "Vision provider unavailable, image analysis disabled");
            Arc::new(OfflineVision)
        }
    }
}

fn open_state(config: &CleanCityConfig, vision: Arc<dyn VisionProvider>) -> Result<AppState> {
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join(&config.storage.db_file);
    let database = Database::new(&db_path, &config.storage)?;
    tracing::info!(path = %db_path.display(), "Event database opened");

    let enhancer = build_enhancer(&config.provider);
    tracing::info!(provider = enhancer.name(), vision = vision.name(), "Providers ready");
    Ok(AppState::new(config.clone(), database, enhancer, vision))
}

async fn run(args: CliArgs, config: CleanCityConfig) -> Result<()> {
    let command = args.command();

    let vision: Arc<dyn VisionProvider> = match &command {
        Command::Analyze {
            detections: Some(path),
            ..
        } => Arc::new(StaticVision::new(read_detections(path)?)),
        _ => configured_vision(&config),
    };
    let state = open_state(&config, vision)?;

    match command {
        Command::Serve => {
            tracing::info!("Starting CleanCity v{}", env!("CARGO_PKG_VERSION"));
            cleancity_api::start_server(&config, state).await
        }
        Command::Tools => Ok(rpc::serve_stdio(state).await?),
        Command::Log {
            location,
            items,
            notes,
            detections,
        } => {
            let detections = match detections {
                Some(path) => read_detections(&path)?,
                None => Vec::new(),
            };
            let event = state.store.log_event(NewEvent {
                location,
                item_count: items,
                detections,
                notes,
            })?;
            print_json(&event)
        }
        Command::Events(filters) => print_json(&workflow::query_events(&state, filters.into())?),
        Command::Hotspots {
            window_days,
            min_events,
        } => print_json(&workflow::hotspots(
            &state,
            HotspotQuery {
                window_days,
                min_events,
            },
        )?),
        Command::Estimate { items } => print_json(&state.estimator.estimate(items, None)?),
        Command::Report {
            id,
            format,
            enhance,
        } => {
            let format: ReportFormat = format.parse()?;
            match workflow::generate_report(&state, id, format, enhance).await? {
                Some(report) => {
                    println!("{}", report.body);
                    Ok(())
                }
                None => Err(CleanCityError::validation(
                    "id",
                    format!("no event with id {}", id),
                )),
            }
        }
        Command::Delete { id } => {
            let deleted = state.store.delete_event(id)?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))
        }
        Command::Purge { days, dry_run } => {
            print_json(&workflow::purge(&state, PurgeRequest { days, dry_run })?)
        }
        Command::Analyze {
            image,
            location,
            notes,
            no_log,
            format,
            enhance,
            ..
        } => {
            let bytes = std::fs::read(&image)?;
            let options = AnalyzeOptions {
                location,
                notes,
                log: !no_log,
                format,
                enhance,
            };
            print_json(&workflow::analyze(&state, &bytes, options).await?)
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let loaded = config_file
        .exists()
        .then(|| CleanCityConfig::load(&config_file));
    let (mut config, load_error) = match loaded {
        Some(Ok(config)) => (config, None),
        Some(Err(e)) => (CleanCityConfig::default(), Some(e)),
        None => (CleanCityConfig::default(), None),
    };
    args.apply_overrides(&mut config);

    // Only the HTTP server may write logs to stdout.
    let to_stderr = !matches!(args.command(), Command::Serve);
    init_tracing(&config.general.log_level, to_stderr);

    match load_error {
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
        None => tracing::debug!(path = %config_file.display(), "Configuration resolved"),
    }
    config.validate()?;

    if let Err(e) = run(args, config).await {
        tracing::error!(kind = e.kind(), error = %e, "Command failed");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_data_dir_plain_path() {
        assert_eq!(resolve_data_dir("/var/lib/cleancity"), PathBuf::from("/var/lib/cleancity"));
    }

    #[test]
    fn test_resolve_data_dir_expands_home() {
        let resolved = resolve_data_dir("~/.cleancity/data");
        assert!(resolved.ends_with(".cleancity/data"));
        assert!(!resolved.starts_with("~"));
    }

    #[test]
    fn test_read_detections_accepts_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(
            &path,
            r#"[{"label": "can", "score": 0.8, "bbox": [1, 2, 3, 4]}]"#,
        )
        .unwrap();
        let detections = read_detections(&path).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].object_type, "can");
    }

    #[test]
    fn test_read_detections_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(read_detections(&path).unwrap_err().field(), Some("detections"));
    }

    #[test]
    fn test_configured_vision_defaults_offline() {
        let config = CleanCityConfig::default();
        assert_eq!(configured_vision(&config).name(), "offline");

        let mut config = CleanCityConfig::default();
        config.vision.kind = cleancity_core::config::VisionKind::Gemini;
        config.vision.api_key_env = "CLEANCITY_TEST_UNSET_VISION_KEY".to_string();
        assert_eq!(configured_vision(&config).name(), "offline");
    }

    #[test]
    fn test_open_state_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CleanCityConfig::default();
        config.general.data_dir = dir.path().join("nested").to_string_lossy().to_string();

        let state = open_state(&config, Arc::new(OfflineVision)).unwrap();
        state.store.log_event(NewEvent::new("Pier", 2)).unwrap();
        assert!(dir.path().join("nested").join("trash_events.db").exists());
    }
}
