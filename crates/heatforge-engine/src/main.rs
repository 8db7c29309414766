//! Command-line heatmap renderer for the Heatforge engine.
//!
//! Reads one JSON-lines event file per match, aggregates them through a
//! single session over the chosen map, and writes the resulting heatmap as
//! a PNG.
//!
//! # Run Sequence
//!
//! 1. Parse the command line
//! 2. Load configuration (`--config`, else `./heatforge.yaml`, else defaults)
//! 3. Initialize structured logging (tracing)
//! 4. Register every match file with the JSON-lines ingestor
//! 5. Open a session and wait for background ingestion to finish
//! 6. Request the heatmap and write the PNG
//! 7. Close the session

mod cli;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use heatforge_core::config::LoggingConfig;
use heatforge_core::{EngineConfig, EventIngestor, JsonLinesIngestor, SessionManager};
use heatforge_types::{HeatmapParams, MatchId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::CliArgs;
use crate::error::EngineError;

/// Configuration file picked up from the working directory.
const DEFAULT_CONFIG: &str = "heatforge.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration, ingestion, or output fail.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let (config, config_source) = load_config(args.config.as_deref())?;
    init_logging(&config.logging);
    match &config_source {
        Some(path) => info!(path = %path.display(), maps = config.maps.len(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }

    run(&args, &config).await?;
    Ok(())
}

async fn run(args: &CliArgs, config: &EngineConfig) -> Result<(), EngineError> {
    let ingestor = Arc::new(JsonLinesIngestor::new());
    let match_ids: Vec<MatchId> = args.files.iter().map(|path| ingestor.register(path.clone())).collect();
    for (match_id, path) in match_ids.iter().zip(&args.files) {
        info!(match_id = %match_id, path = %path.display(), "Match file registered");
    }

    let manager = SessionManager::new(
        config,
        Arc::clone(&ingestor) as Arc<dyn EventIngestor>,
        Arc::new(config.map_provider()),
    );
    let session = manager.open_session(match_ids.iter().copied(), args.map_id.clone()).await?;
    manager.wait_idle(session).await?;

    let status = manager.status(session).await?;
    for (match_id, diagnostics) in &status.diagnostics {
        let path = ingestor.path_of(*match_id).unwrap_or_default();
        let events = diagnostics.events;
        if let Some(error) = &diagnostics.ingestion_error {
            warn!(path = %path.display(), accepted = events.accepted, error = %error, "Match only partially ingested");
        } else {
            info!(
                path = %path.display(),
                accepted = events.accepted,
                filtered_out = events.filtered_out,
                out_of_range = events.out_of_range,
                non_finite = events.non_finite,
                "Match ingested"
            );
        }
    }

    let tone = args.tone.apply(manager.default_tone());
    let params = HeatmapParams::new(args.map_id.clone(), args.filter, match_ids).with_tone(tone);
    let heatmap = manager.request_heatmap(session, &params).await?;
    let png = heatmap.raster.encode_png()?;
    tokio::fs::write(&args.out, &png)
        .await
        .map_err(|source| EngineError::Output {
            path: args.out.clone(),
            source,
        })?;
    info!(
        out = %args.out.display(),
        width = heatmap.raster.width(),
        height = heatmap.raster.height(),
        level = heatmap.resolution_level,
        max_count = heatmap.raster.max_count(),
        matches = heatmap.match_ids.len(),
        omitted = heatmap.omitted_matches.len(),
        "Heatmap written"
    );

    if args.print_status {
        let status = manager.status(session).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    manager.close_session(session).await?;
    Ok(())
}

/// Load configuration from `explicit`, else from `heatforge.yaml` in the
/// working directory, else defaults. Returns the file actually read.
fn load_config(explicit: Option<&Path>) -> Result<(EngineConfig, Option<PathBuf>), EngineError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG);
            if !fallback.exists() {
                return Ok((EngineConfig::from_env(), None));
            }
            fallback
        }
    };
    let config = EngineConfig::from_file(&path)?;
    Ok((config, Some(path)))
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}
