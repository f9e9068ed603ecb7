//! Sensor Anomaly Core - Main Entry Point
//!
//! stdout carries the newline-delimited JSON progress channel only; logs go
//! to stderr through env_logger.

mod api;
mod logic;
pub mod constants;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use api::commands::{self, CommandStatus};
use logic::config::PipelineConfig;
use logic::events::JsonLinesSink;

#[derive(Parser)]
#[command(name = constants::APP_NAME, version = constants::APP_VERSION)]
#[command(about = "Reconstruction-based anomaly detection for sensor telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train (or fine-tune) the model for one machine
    Train {
        user_id: String,
        machine_id: String,
        /// Delimited telemetry file
        data_source: PathBuf,
        /// Comma-separated sensor columns; empty to auto-detect
        sensor_columns: Option<String>,
        /// Maximum rows to read
        row_limit: Option<String>,
    },

    /// Score a telemetry file against the stored model
    Predict {
        user_id: String,
        machine_id: String,
        input_source: PathBuf,
    },

    /// Score one reading given as a JSON object of sensor -> value
    PredictReading {
        user_id: String,
        machine_id: String,
        reading_json: String,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let config = PipelineConfig::from_env();
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return ExitCode::from(2);
    }
    log::info!(
        "{} v{} (artifacts in {})",
        constants::APP_NAME,
        constants::APP_VERSION,
        config.artifact_root.display()
    );

    let sink = JsonLinesSink::stdout();
    let status = match cli.command {
        Commands::Train {
            user_id,
            machine_id,
            data_source,
            sensor_columns,
            row_limit,
        } => commands::train(
            &user_id,
            &machine_id,
            &data_source,
            sensor_columns.as_deref(),
            row_limit.as_deref(),
            &config,
            &sink,
        ),
        Commands::Predict {
            user_id,
            machine_id,
            input_source,
        } => commands::predict(&user_id, &machine_id, &input_source, &config, &sink),
        Commands::PredictReading {
            user_id,
            machine_id,
            reading_json,
        } => commands::predict_reading(&user_id, &machine_id, &reading_json, &config, &sink),
    };

    if let CommandStatus::Usage(message) = &status {
        eprintln!("{}", message);
    }
    ExitCode::from(status.exit_code() as u8)
}
