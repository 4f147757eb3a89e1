use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::commands::CommandTable;
use crate::http::HttpConfig;
use crate::session::{DriverConfig, SessionConfig};

static COUNTRY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,4}$").expect("static regex"));

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// Shared secret for the control API (`x-api-key`).
    api_key: Option<String>,
    cors_origin: Option<String>,
    #[serde(default = "default_country_code")]
    country_code: String,
    #[serde(default = "default_reconnect_delay_secs")]
    reconnect_delay_secs: u64,
    /// Per-call limit on transport operations. 0 = wait forever.
    #[serde(default = "default_transport_timeout_secs")]
    transport_timeout_secs: u64,
    /// Executable of the protocol driver (e.g. "node").
    driver_command: String,
    #[serde(default)]
    driver_args: Vec<String>,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
    /// Phone number that receives forwarded log lines.
    log_phone: Option<String>,
    /// Overrides the built-in command table.
    commands: Option<CommandTable>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_country_code() -> String {
    "90".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_transport_timeout_secs() -> u64 {
    30
}

#[derive(Debug)]
pub struct Config {
    /// Path to the config file this was loaded from.
    pub config_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub cors_origin: Option<String>,
    pub country_code: String,
    pub reconnect_delay: Duration,
    pub transport_timeout: Option<Duration>,
    pub driver_command: String,
    pub driver_args: Vec<String>,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub log_phone: Option<String>,
    pub commands: CommandTable,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load `path`, letting `env` override `PORT`, `API_SECRET_KEY` and
    /// `MAIN_APP_URL` (the allowed CORS origin).
    pub fn load_with_env<P: AsRef<Path>>(
        path: P,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if let Some(port) = env("PORT") {
            file.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("PORT is not a valid port: {port:?}"))
            })?;
        }
        if let Some(key) = env("API_SECRET_KEY") {
            file.api_key = Some(key);
        }
        if let Some(origin) = env("MAIN_APP_URL") {
            file.cors_origin = Some(origin);
        }

        if file.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".into()));
        }
        if !COUNTRY_CODE.is_match(&file.country_code) {
            return Err(ConfigError::Validation(format!(
                "country_code must be 1-4 digits, got {:?}",
                file.country_code
            )));
        }
        if file.driver_command.trim().is_empty() {
            return Err(ConfigError::Validation("driver_command is required".into()));
        }
        if file.reconnect_delay_secs == 0 {
            return Err(ConfigError::Validation("reconnect_delay_secs must be at least 1".into()));
        }

        let commands = file.commands.unwrap_or_default();
        if !(0.0..1.0).contains(&commands.threshold) {
            return Err(ConfigError::Validation(format!(
                "commands.threshold must be in [0, 1), got {}",
                commands.threshold
            )));
        }
        if let Some(empty) = commands.categories.iter().find(|c| c.variants.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "command '{}' has no variants",
                empty.name
            )));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            host: file.host,
            port: file.port,
            api_key: file.api_key.filter(|k| !k.is_empty()),
            cors_origin: file.cors_origin.filter(|o| !o.is_empty()),
            country_code: file.country_code,
            reconnect_delay: Duration::from_secs(file.reconnect_delay_secs),
            transport_timeout: Some(file.transport_timeout_secs)
                .filter(|&s| s > 0)
                .map(Duration::from_secs),
            driver_command: file.driver_command,
            driver_args: file.driver_args,
            data_dir,
            log_phone: file.log_phone.filter(|p| !p.trim().is_empty()),
            commands,
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            country_code: self.country_code.clone(),
            reconnect_delay: self.reconnect_delay,
            transport_timeout: self.transport_timeout,
        }
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
            cors_origin: self.cors_origin.clone(),
        }
    }

    pub fn driver(&self) -> DriverConfig {
        DriverConfig {
            command: self.driver_command.clone(),
            args: self.driver_args.clone(),
        }
    }
}
