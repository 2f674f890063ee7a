use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{default_classification, ClassificationRule};

const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,

    /// Fixed device name for all topics; detected device names apply when unset.
    pub device_name_override: Option<String>,
    pub units_enabled: bool,
    pub gpu_enabled: bool,
    pub command_timeout_secs: u64,
    pub classification: Vec<ClassificationRule>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be a valid number")]
    InvalidNumber(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk layout of config.json. Every field is optional; missing sections
/// fall back to defaults and environment variables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    mqtt: MqttSection,
    liquidctl: LiquidctlSection,
    classification: Option<Vec<ClassificationRule>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MqttSection {
    host: Option<String>,
    // Accepts both a JSON number and a numeric string, for hand-written
    // configs.
    port: Option<serde_json::Value>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LiquidctlSection {
    device_name: Option<String>,
    units_enabled: Option<bool>,
    gpu_enabled: Option<bool>,
    command_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read the config file if present. A missing or unreadable file is not
    /// an error; the run continues with defaults and environment variables.
    pub fn read(path: &Path) -> Self {
        if !path.exists() {
            info!(
                "No {} found, using defaults and environment variables",
                path.display()
            );
            return Self::default();
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(parsed) => {
                info!("Loaded configuration from {}", path.display());
                parsed
            }
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

impl Config {
    /// Validate port and timeout values before any work starts.
    fn validate(&self) -> Result<(), ConfigError> {
        const MAX_TIMEOUT_SECS: u64 = 300;

        if self.mqtt_port == 0 {
            return Err(ConfigError::Invalid("MQTT port must not be 0".to_string()));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.command_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "command_timeout_secs must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    /// Resolve the full configuration from the config file and the process
    /// environment. The caller is responsible for loading `.env` beforehand.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("LIQUIDCTL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let file = FileConfig::read(Path::new(&path));
        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Resolve each option as environment variable over file value over
    /// built-in default. The environment is passed as a lookup so the
    /// precedence rules can be tested without touching process state.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mqtt_port = match env("MQTT_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidNumber("MQTT_PORT".to_string()))?,
            None => match &file.mqtt.port {
                Some(value) => file_port(value)?,
                None => DEFAULT_MQTT_PORT,
            },
        };

        let config = Self {
            mqtt_host: env("MQTT_HOST")
                .or(file.mqtt.host)
                .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            mqtt_port,
            mqtt_username: env("MQTT_USER").or(file.mqtt.username).unwrap_or_default(),
            mqtt_password: env("MQTT_PASSWORD")
                .or(file.mqtt.password)
                .unwrap_or_default(),

            device_name_override: env("LIQUIDCTL_DEVICE_NAME")
                .or(file.liquidctl.device_name)
                .filter(|name| !name.trim().is_empty()),
            units_enabled: bool_env(&env, "LIQUIDCTL_UNITS_ENABLED")
                .or(file.liquidctl.units_enabled)
                .unwrap_or(false),
            gpu_enabled: bool_env(&env, "LIQUIDCTL_GPU_ENABLED")
                .or(file.liquidctl.gpu_enabled)
                .unwrap_or(true),
            command_timeout_secs: file
                .liquidctl
                .command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            classification: match file.classification {
                Some(rules) if !rules.is_empty() => rules,
                Some(_) => {
                    warn!("Ignoring empty classification table, using built-in rules");
                    default_classification()
                }
                None => default_classification(),
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn file_port(value: &serde_json::Value) -> Result<u16, ConfigError> {
    let port = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.ok_or_else(|| ConfigError::InvalidNumber("mqtt.port".to_string()))
}

/// Parse a boolean environment variable. Unset returns None; an
/// unrecognized value is logged and ignored rather than aborting the run.
fn bool_env<F>(env: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}={:?}: not a boolean", key, raw);
            None
        }
    }
}
