mod config;
mod gpu;
mod liquidctl;
mod message;
mod models;
mod mqtt_service;
mod parser;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::Config;
use crate::liquidctl::CommandError;
use crate::message::MessageBuilder;
use crate::mqtt_service::MqttService;
use crate::parser::parse_status_output;

const DEFAULT_LOG_FILE: &str = "/var/log/liquidctl2mqtt.log";

/// Log to stdout and, when it can be opened, to the log file as well.
/// Cron swallows stdout unless mailing is set up, so the file is what
/// operators usually read.
fn init_logging() {
    let path =
        std::env::var("LIQUIDCTL_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path);

    match file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Arc::new(file)))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_ansi(false)
                .init();
            warn!("Failed to open log file {}: {}, logging to stdout only", path, e);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env first: the log file path is read from the environment.
    dotenvy::dotenv().ok();
    init_logging();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let output = match liquidctl::run_status(config.command_timeout_secs).await {
        Ok(output) => output,
        Err(e @ CommandError::EmptyOutput { .. }) => {
            warn!("{}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut readings = parse_status_output(&output, &config.classification);
    info!("Parsed {} readings from liquidctl", readings.len());

    if config.gpu_enabled {
        let gpu_readings = gpu::collect(config.command_timeout_secs, &config.classification).await;
        if !gpu_readings.is_empty() {
            info!("Collected {} GPU readings", gpu_readings.len());
        }
        readings.extend(gpu_readings);
    }

    if readings.is_empty() {
        warn!("No publishable readings found, nothing to do");
        return ExitCode::FAILURE;
    }

    let builder = MessageBuilder::new(&config);

    let mut service = match MqttService::connect(&config, readings.len()).await {
        Ok(service) => service,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut queued = 0usize;
    for reading in &readings {
        let message = match builder.build(reading) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode reading {:?}: {}", reading.original_key, e);
                continue;
            }
        };
        info!(
            "Publishing to {}: {} {}",
            message.topic,
            reading.value,
            reading.unit.as_deref().unwrap_or("")
        );
        match service.publish(&message).await {
            Ok(()) => queued += 1,
            Err(e) => error!("Failed to publish to {}: {}", message.topic, e),
        }
    }

    let delivered = match service.drain().await {
        Ok(delivered) => delivered,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    service.disconnect().await;

    info!("Published {} of {} readings", delivered, queued);
    ExitCode::SUCCESS
}
