//! Daemon configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use myco_types::{Mode, ThresholdTable};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device identity.
    pub device: DeviceConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Control loop settings.
    pub control: ControlConfig,
    /// Ledger storage settings.
    pub storage: StorageConfig,
    /// Remote sync settings.
    pub sync: SyncConfig,
    /// Alert lifecycle settings.
    pub alerts: AlertConfig,
    /// Threshold bands per mode.
    pub thresholds: ThresholdTable,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all violations at once.
    ///
    /// Threshold ordering is enforced here as well as at the API boundary,
    /// so an invalid band never reaches the control engine from either
    /// direction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.device.validate());
        errors.extend(self.server.validate());
        errors.extend(self.control.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.alerts.validate());

        if let Err(e) = self.thresholds.validate() {
            errors.push(ValidationError {
                field: "thresholds".to_string(),
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Every actuator named by any threshold band, deduplicated.
    #[must_use]
    pub fn actuator_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for set in [&self.thresholds.spawning, &self.thresholds.fruiting] {
            for band in &set.bands {
                names.insert(band.actuator.clone());
            }
        }
        names.into_iter().collect()
    }
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stable identifier for this chamber.
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "chamber-1".to_string(),
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.id.is_empty() {
            errors.push(ValidationError {
                field: "device.id".to_string(),
                message: "device id cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!("'{}' is not a valid host:port address", self.bind),
            });
        }
        errors
    }
}

/// Control loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Seconds between control ticks.
    pub tick_interval_secs: u64,
    /// Readings older than this are held, not acted on.
    pub staleness_limit_secs: u64,
    /// Initial mode at startup.
    pub mode: Mode,
    /// Whether automatic control starts enabled.
    pub automation: bool,
    /// How long a manual override holds before automatic control resumes.
    /// Omit for overrides that hold until explicitly cleared.
    pub override_expiry_secs: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            staleness_limit_secs: 60,
            mode: Mode::Fruiting,
            automation: true,
            override_expiry_secs: Some(3600),
        }
    }
}

impl ControlConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.tick_interval_secs == 0 {
            errors.push(ValidationError {
                field: "control.tick_interval_secs".to_string(),
                message: "tick interval must be at least 1 second".to_string(),
            });
        }
        if self.staleness_limit_secs == 0 {
            errors.push(ValidationError {
                field: "control.staleness_limit_secs".to_string(),
                message: "staleness limit must be at least 1 second".to_string(),
            });
        }
        errors
    }

    /// Staleness limit as a duration.
    #[must_use]
    pub fn staleness_limit(&self) -> time::Duration {
        time::Duration::seconds(self.staleness_limit_secs as i64)
    }

    /// Override expiry as a duration, if one is configured.
    #[must_use]
    pub fn override_expiry(&self) -> Option<time::Duration> {
        self.override_expiry_secs
            .map(|s| time::Duration::seconds(s as i64))
    }
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Ledger database path.
    pub path: PathBuf,
    /// Maximum ledger rows before appends start purging.
    pub max_entries: u64,
    /// Days synced rows are kept before becoming purgeable.
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: myco_ledger::default_db_path(),
            max_entries: 50_000,
            retention_days: 7,
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "storage path cannot be empty".to_string(),
            });
        }
        if self.max_entries == 0 {
            errors.push(ValidationError {
                field: "storage.max_entries".to_string(),
                message: "max_entries must be positive".to_string(),
            });
        }
        errors
    }

    /// Ledger settings derived from this config.
    #[must_use]
    pub fn ledger_config(&self) -> myco_ledger::LedgerConfig {
        myco_ledger::LedgerConfig {
            max_entries: self.max_entries,
            retention: time::Duration::days(i64::from(self.retention_days)),
        }
    }
}

/// Remote sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote batch endpoint. Empty disables sync (fully offline device).
    pub endpoint: String,
    /// Maximum entries per batch.
    pub batch_size: u64,
    /// Seconds between sync cycles when nothing nudges the agent sooner.
    pub interval_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// First backoff step after a transient failure, in seconds.
    pub initial_backoff_secs: u64,
    /// Backoff ceiling in seconds.
    pub max_backoff_secs: u64,
    /// Transient retries after which a stalled-sync alert is raised.
    pub retry_alert_threshold: u32,
    /// Seconds an in-flight batch gets to finish at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            batch_size: 50,
            interval_secs: 30,
            request_timeout_secs: 10,
            initial_backoff_secs: 2,
            max_backoff_secs: 300,
            retry_alert_threshold: 5,
            shutdown_grace_secs: 5,
        }
    }
}

impl SyncConfig {
    /// Whether sync is enabled at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled()
            && !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"))
        {
            errors.push(ValidationError {
                field: "sync.endpoint".to_string(),
                message: format!("'{}' is not an http(s) URL", self.endpoint),
            });
        }
        if self.batch_size == 0 {
            errors.push(ValidationError {
                field: "sync.batch_size".to_string(),
                message: "batch_size must be positive".to_string(),
            });
        }
        if self.max_backoff_secs < self.initial_backoff_secs {
            errors.push(ValidationError {
                field: "sync.max_backoff_secs".to_string(),
                message: "backoff ceiling below the initial backoff".to_string(),
            });
        }
        errors
    }
}

/// Alert lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Seconds during which a re-occurrence refreshes instead of re-raising.
    pub cooldown_secs: u64,
    /// Seconds a parameter must stay in range before auto-resolve.
    pub resolve_after_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 900,
            resolve_after_secs: 600,
        }
    }
}

impl AlertConfig {
    fn validate(&self) -> Vec<ValidationError> {
        Vec::new()
    }

    /// Cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> time::Duration {
        time::Duration::seconds(self.cooldown_secs as i64)
    }

    /// Resolve window as a duration.
    #[must_use]
    pub fn resolve_after(&self) -> time::Duration {
        time::Duration::seconds(self.resolve_after_secs as i64)
    }
}

/// A single validation failure.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the config file.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Could not parse the config file.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// Could not serialize the config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Could not write the config file.
    #[error("failed to write config {path}: {source}")]
    Write {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// One or more fields failed validation.
    #[error("invalid configuration: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Default config path following platform conventions.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("myco")
        .join("mycod.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn invalid_threshold_is_rejected_at_the_boundary() {
        let mut config = Config::default();
        config.thresholds.fruiting.bands[0].min = 99_999.0;

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.field == "thresholds"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let mut config = Config::default();
        config.server.bind = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let mut config = Config::default();
        config.control.tick_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sync_disabled_when_endpoint_empty() {
        let config = Config::default();
        assert!(!config.sync.enabled());
        config.validate().unwrap();

        let mut config = Config::default();
        config.sync.endpoint = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.sync.endpoint = "https://api.example.com/v1/events".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn actuator_names_are_deduplicated_across_modes() {
        let config = Config::default();
        let names = config.actuator_names();
        assert_eq!(names, vec!["exhaust_fan", "heater", "humidifier"]);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mycod.toml");

        let mut config = Config::default();
        config.device.id = "chamber-42".to_string();
        config.sync.endpoint = "https://api.example.com/v1/events".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert_eq!(loaded.device.id, "chamber-42");
        assert!(loaded.sync.enabled());
        assert_eq!(
            loaded.thresholds.fruiting.bands.len(),
            config.thresholds.fruiting.bands.len()
        );
    }

    #[test]
    fn collects_every_violation_at_once() {
        let mut config = Config::default();
        config.device.id = String::new();
        config.control.tick_interval_secs = 0;
        config.sync.batch_size = 0;

        match config.validate().unwrap_err() {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
