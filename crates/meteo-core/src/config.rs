use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable pointing at an explicit config file.
pub const ENV_CONFIG_PATH: &str = "METEO_CONFIG";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_app_title")]
    pub app_title: String,

    /// Message bus connection
    #[serde(default)]
    pub bus: BusConfig,

    /// Reading storage
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Background acquisition loop
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// External weather API
    #[serde(default)]
    pub weather: WeatherConfig,
}

fn default_app_title() -> String {
    "WEB API Project".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// NATS server URL
    #[serde(default = "default_bus_url")]
    pub url: String,

    /// Subject used for both publishing and subscribing
    #[serde(default = "default_bus_subject")]
    pub subject: String,

    /// Connection name reported to the server
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// How long a connect attempt may take before the relay gives up
    #[serde(default = "default_bus_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_bus_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_bus_subject() -> String {
    "items.updates".to_string()
}

fn default_client_name() -> String {
    "web-api-project".to_string()
}

fn default_bus_connect_timeout() -> u64 {
    5
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            subject: default_bus_subject(),
            client_name: default_client_name(),
            connect_timeout_secs: default_bus_connect_timeout(),
        }
    }
}

impl BusConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./meteo.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// City fetched by the background loop
    #[serde(default = "default_city")]
    pub default_city: String,

    /// Seconds between background cycles
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Settling delay before the first background cycle
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

fn default_city() -> String {
    "Yekaterinburg".to_string()
}

fn default_period_secs() -> u64 {
    300
}

fn default_initial_delay_secs() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_city: default_city(),
            period_secs: default_period_secs(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Forecast endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Whole-request timeout applied to every attempt
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,

    /// Connect timeout applied to every attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on attempts per fetch
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_total_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    6
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            total_timeout_secs: default_total_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_title: default_app_title(),
            bus: BusConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Reads `$METEO_CONFIG` if set, otherwise `<config_dir>/meteo/config.toml`
    /// when it exists, otherwise defaults. Environment overrides are applied last.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path()? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and validate, logging warnings and failing on errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Ok(Self::from_toml_str(&contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NATS_URL") {
            self.bus.url = url;
        }
        if let Some(subject) = lookup("NATS_SUBJECT") {
            self.bus.subject = subject;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("BACKGROUND_PERIOD_SECONDS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.scheduler.period_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid BACKGROUND_PERIOD_SECONDS: {}", raw),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.bus.url, "bus.url", &["nats", "tls"], &mut result);
        if self.bus.subject.trim().is_empty() {
            result.add_error("bus.subject", "Subject cannot be empty");
        }

        self.validate_url(
            &self.weather.api_url,
            "weather.api_url",
            &["http", "https"],
            &mut result,
        );
        if self.weather.max_attempts == 0 {
            result.add_error("weather.max_attempts", "At least one attempt is required");
        }
        if self.weather.total_timeout_secs == 0 {
            result.add_error("weather.total_timeout_secs", "Timeout must be greater than 0");
        }
        if self.weather.connect_timeout_secs > self.weather.total_timeout_secs {
            result.add_warning(
                "weather.connect_timeout_secs",
                "Connect timeout exceeds the total request timeout",
            );
        }

        if self.scheduler.default_city.trim().is_empty() {
            result.add_error("scheduler.default_city", "Default city cannot be empty");
        }
        if self.scheduler.period_secs == 0 {
            result.add_error("scheduler.period_secs", "Period must be greater than 0");
        } else if self.scheduler.period_secs > 86_400 {
            result.add_warning(
                "scheduler.period_secs",
                "Background period is more than 24 hours",
            );
        }

        if self.database.path.as_os_str().is_empty() {
            result.add_error("database.path", "Database path cannot be empty");
        }

        result
    }

    fn validate_url(
        &self,
        url_str: &str,
        field_name: &str,
        schemes: &[&str],
        result: &mut ValidationResult,
    ) {
        match Url::parse(url_str) {
            Ok(url) => {
                if !schemes.contains(&url.scheme()) {
                    result.add_error(
                        field_name,
                        format!(
                            "URL must use one of [{}], got: {}",
                            schemes.join(", "),
                            url.scheme()
                        ),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Explicit path from the environment, or the per-user file if present.
    fn config_path() -> Result<Option<PathBuf>> {
        if let Ok(explicit) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(explicit);
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()).into());
            }
            return Ok(Some(path));
        }

        let user_path = dirs::config_dir().map(|dir| dir.join("meteo").join("config.toml"));
        Ok(user_path.filter(|p| p.exists()))
    }
}
