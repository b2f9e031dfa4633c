// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_engine::config::LoggingConfig;
use telemetry_engine::{
    load_config_with_env, FileKeyValueStore, InstallationIdentity, TelemetryEngine,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Telemetry CLI - record events into the local queue and upload them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Verbose per-event diagnostics
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one event
    Record {
        name: String,

        /// Single value attached to the event
        #[arg(long, conflicts_with = "pair")]
        value: Option<String>,

        /// Key/value pair, repeatable: --pair key=value
        #[arg(long = "pair", value_parser = parse_pair)]
        pair: Vec<(String, String)>,
    },

    /// Record a JSON object envelope
    RecordJson { envelope: String },

    /// Upload everything pending and wait for the result
    Upload {
        #[arg(long, default_value_t = 30)]
        wait_seconds: u64,
    },

    /// Print engine status as JSON
    Status,

    /// Print the installation id
    Id,
}

fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if args.debug {
        config.logging.debug_mode = true;
    }
    // Uploads only happen on request from the CLI
    config.upload.upload_on_start = false;

    init_logging(&config.logging)?;

    info!("Loaded configuration from: {:?}", args.config);
    info!("Storage directory: {}", config.queue.storage_dir.display());

    let identity = InstallationIdentity::new(Arc::new(FileKeyValueStore::in_dir(
        &config.queue.storage_dir,
    )));
    let installation_id = identity.get_or_create();

    let engine = TelemetryEngine::with_config(config, &installation_id)?;

    match args.command {
        Command::Record { name, value, pair } => {
            let recorded = match value {
                Some(value) => engine.log_event_value(&name, value),
                None if !pair.is_empty() => engine.log_event_pairs(&name, pair),
                None => engine.log_event(&name),
            };
            if !recorded {
                bail!("Failed to record event '{}'", name);
            }
            info!("Recorded event '{}'", name);
        }
        Command::RecordJson { envelope } => {
            if !engine.log_json_event(&envelope) {
                bail!("Failed to record JSON event");
            }
            info!("Recorded JSON event");
        }
        Command::Upload { wait_seconds } => {
            upload_pending(&engine, Duration::from_secs(wait_seconds)).await?;
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }
        Command::Id => {
            println!("{}", installation_id);
        }
    }

    engine.shutdown();
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // Initialize tracing with configured level
    let log_level = match logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // Debug mode diagnostics are emitted at debug level
    let log_level = if logging.debug_mode {
        log_level.max(Level::DEBUG)
    } else {
        log_level
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Force uploads until the queue is drained, an attempt fails, or `wait` runs out.
async fn upload_pending(engine: &TelemetryEngine, wait: Duration) -> Result<()> {
    if !engine.queue().has_pending() {
        info!("Nothing to upload");
        return Ok(());
    }

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let completed = engine.status().scheduler.completed_attempts;
        engine.force_upload();

        if tokio::time::timeout_at(deadline, engine.wait_for_attempts(completed + 1))
            .await
            .is_err()
        {
            bail!("Upload did not finish within {:?}", wait);
        }

        let status = engine.status();
        if !engine.queue().has_pending() {
            info!(
                "Upload complete: {} events sent, checkpoint {}",
                status.scheduler.uploaded_events, status.queue.checkpoint
            );
            return Ok(());
        }
        if let Some(error) = status.scheduler.last_error {
            bail!("Upload failed: {}", error);
        }
    }
}
