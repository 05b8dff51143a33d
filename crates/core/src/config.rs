//! Monitor configuration.
//!
//! Loaded once at startup from a JSON file (every section optional, missing
//! keys take defaults) and then overlaid with environment variables. A
//! configuration that fails to load or validate is the only fatal error in
//! the system.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sensor::{SensorConfig, SensorRegistry, DEFAULT_SENSOR_COUNT};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "NH3_CONFIG";

/// Configuration file used when `NH3_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Longest accepted alert cooldown (one week).
pub const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;

/// Longest accepted gap between retention passes (one year).
pub const MAX_PRUNE_INTERVAL_HOURS: u64 = 365 * 24;

/// Longest accepted retention window.
pub const MAX_RETENTION_DAYS: u32 = 100 * 365;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {var}")]
    InvalidOverride { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Field bus timing and connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    /// Serial device of the RS-485 converter.
    pub port: String,
    pub baudrate: u32,
    /// Per-read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Consecutive failed reads before a sensor is flagged degraded.
    pub retries: u32,
    /// Acquisition tick period in milliseconds.
    pub scan_interval_ms: u64,
    /// Use the built-in simulated transport instead of the field bus.
    pub simulate: bool,
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            timeout_ms: 1000,
            retries: 3,
            scan_interval_ms: 1000,
            simulate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Master switch for external notifications.
    pub enabled: bool,
    pub cooldown_minutes: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// sqlx connection string, e.g. `sqlite://nh3_monitor.db`.
    pub url: String,
    pub retention_days: u32,
    pub prune_interval_hours: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://nh3_monitor.db".to_string(),
            retention_days: 30,
            prune_interval_hours: 24,
        }
    }
}

/// SMTP channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub recipients: Vec<String>,
    pub subject_prefix: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            username: None,
            password: None,
            from_address: "nh3-monitor@localhost".to_string(),
            recipients: Vec::new(),
            subject_prefix: "[NH3 Alert]".to_string(),
        }
    }
}

/// Twilio WhatsApp channel settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSettings {
    pub enabled: bool,
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, e.g. `whatsapp:+14155238886`.
    pub from_number: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub email: EmailSettings,
    pub whatsapp: WhatsAppSettings,
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

/// Complete monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub modbus: ModbusSettings,
    #[serde(default = "factory_sensors")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

fn factory_sensors() -> Vec<SensorConfig> {
    (1..=DEFAULT_SENSOR_COUNT).map(SensorConfig::factory).collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            modbus: ModbusSettings::default(),
            sensors: factory_sensors(),
            alerts: AlertSettings::default(),
            database: DatabaseSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl MonitorConfig {
    /// Path of the configuration file, from `NH3_CONFIG` or the default.
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Parse a configuration file. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Parse `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay values from the process environment.
    ///
    /// | Variable                 | Overrides                          |
    /// |--------------------------|------------------------------------|
    /// | `DATABASE_URL`           | `database.url`                     |
    /// | `RETENTION_DAYS`         | `database.retention_days`          |
    /// | `SCAN_INTERVAL_MS`       | `modbus.scan_interval_ms`          |
    /// | `ALERT_COOLDOWN_MINUTES` | `alerts.cooldown_minutes`          |
    /// | `SMTP_HOST`              | `notifications.email.smtp_host` (enables email) |
    /// | `SMTP_PORT`              | `notifications.email.smtp_port`    |
    /// | `SMTP_FROM`              | `notifications.email.from_address` |
    /// | `SMTP_USER`              | `notifications.email.username`     |
    /// | `SMTP_PASSWORD`          | `notifications.email.password`     |
    /// | `ALERT_EMAIL_TO`         | `notifications.email.recipients` (comma-separated) |
    /// | `TWILIO_ACCOUNT_SID`     | `notifications.whatsapp.account_sid` (enables WhatsApp) |
    /// | `TWILIO_AUTH_TOKEN`      | `notifications.whatsapp.auth_token` |
    /// | `TWILIO_WHATSAPP_FROM`   | `notifications.whatsapp.from_number` |
    /// | `WHATSAPP_TO`            | `notifications.whatsapp.recipients` (comma-separated) |
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(days) = parse_var(&lookup, "RETENTION_DAYS")? {
            self.database.retention_days = days;
        }
        if let Some(ms) = parse_var(&lookup, "SCAN_INTERVAL_MS")? {
            self.modbus.scan_interval_ms = ms;
        }
        if let Some(minutes) = parse_var(&lookup, "ALERT_COOLDOWN_MINUTES")? {
            self.alerts.cooldown_minutes = minutes;
        }

        let email = &mut self.notifications.email;
        if let Some(host) = lookup("SMTP_HOST") {
            email.smtp_host = host;
            email.enabled = true;
        }
        if let Some(port) = parse_var(&lookup, "SMTP_PORT")? {
            email.smtp_port = port;
        }
        if let Some(from) = lookup("SMTP_FROM") {
            email.from_address = from;
        }
        if let Some(user) = lookup("SMTP_USER") {
            email.username = Some(user);
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            email.password = Some(password);
        }
        if let Some(to) = lookup("ALERT_EMAIL_TO") {
            email.recipients = split_list(&to);
        }

        let whatsapp = &mut self.notifications.whatsapp;
        if let Some(sid) = lookup("TWILIO_ACCOUNT_SID") {
            whatsapp.account_sid = sid;
            whatsapp.enabled = true;
        }
        if let Some(token) = lookup("TWILIO_AUTH_TOKEN") {
            whatsapp.auth_token = token;
        }
        if let Some(from) = lookup("TWILIO_WHATSAPP_FROM") {
            whatsapp.from_number = from;
        }
        if let Some(to) = lookup("WHATSAPP_TO") {
            whatsapp.recipients = split_list(&to);
        }

        Ok(())
    }

    /// Validate timing values and build the sensor registry.
    pub fn validate(&self) -> Result<SensorRegistry, ConfigError> {
        if self.modbus.scan_interval_ms == 0 {
            return Err(invalid("modbus.scan_interval_ms must be positive"));
        }
        if self.modbus.timeout_ms == 0 {
            return Err(invalid("modbus.timeout_ms must be positive"));
        }
        if self.modbus.retries == 0 {
            return Err(invalid("modbus.retries must be at least 1"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.database.retention_days) {
            return Err(invalid(&format!(
                "database.retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        if !(1..=MAX_PRUNE_INTERVAL_HOURS).contains(&self.database.prune_interval_hours) {
            return Err(invalid(&format!(
                "database.prune_interval_hours must be between 1 and {MAX_PRUNE_INTERVAL_HOURS}"
            )));
        }
        if self.alerts.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(invalid(&format!(
                "alerts.cooldown_minutes must be at most {MAX_COOLDOWN_MINUTES}"
            )));
        }
        Ok(SensorRegistry::new(self.sensors.clone())?)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.modbus.scan_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.modbus.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alerts.cooldown_minutes.saturating_mul(60))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.database.prune_interval_hours.saturating_mul(3600))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(CoreError::Validation(message.to_string()))
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride { var, value }),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
