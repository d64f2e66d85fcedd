//! Configuration module for PlumeSync.
//!
//! Typed configuration structs mapping to the YAML configuration file, with
//! loading, validation, defaults, and a builder for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for PlumeSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub watcher: WatcherConfig,
    pub eviction: EvictionConfig,
    pub logging: LoggingConfig,
}

/// Reconciliation and setup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding one local folder per account.
    pub data_root: PathBuf,
    /// Files above this size (in MiB) are skipped by walks and uploads.
    pub max_file_size_mb: u64,
    /// Attempts per remote operation inside a walk.
    pub walk_retry_attempts: u32,
    /// Seconds between shared-folder polling rounds during setup.
    pub setup_poll_interval: u64,
    /// Minutes before an unfinished setup attempt is abandoned.
    pub setup_timeout_minutes: u64,
}

/// Remote agent HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote agent, e.g. `https://agent.example.com`.
    pub base_url: String,
    /// Shared secret sent in the `Authorization` header.
    pub shared_secret: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per request before giving up.
    pub retries: u32,
    /// Maximum requests in flight at once.
    pub max_concurrent: u32,
    /// Minimum milliseconds between request starts.
    pub min_spacing_ms: u64,
}

/// Filesystem watcher and event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Milliseconds a burst of events for one path is coalesced.
    pub debounce_ms: u64,
    /// Bounded capacity of each per-account event queue.
    pub queue_capacity: usize,
    /// Minimum milliseconds between dispatches from one account's queue.
    pub dispatch_spacing_ms: u64,
}

/// Disk-pressure eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Aggregate local cache budget across all accounts (in MiB).
    pub max_usage_mb: u64,
    /// Percentage of `max_usage_mb` that triggers a sweep (1-100).
    pub threshold_percent: u8,
    /// Minutes between background sweeps.
    pub sweep_interval_minutes: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file.
    pub file: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/plumesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("plumesync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

// Config derives Default because all its fields implement Default.

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("plumesync")
                .join("accounts"),
            max_file_size_mb: 150,
            walk_retry_attempts: 3,
            setup_poll_interval: 10,
            setup_timeout_minutes: 120,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            shared_secret: String::new(),
            timeout_secs: 10,
            retries: 3,
            max_concurrent: 4,
            min_spacing_ms: 100,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            queue_capacity: 512,
            dispatch_spacing_ms: 100,
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_usage_mb: 1024,
            threshold_percent: 80,
            sweep_interval_minutes: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("plumesync");
        Self {
            level: "info".to_string(),
            file: data_dir.join("plumesync.log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"remote.timeout_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.max_file_size_mb == 0 {
            errors.push(ValidationError {
                field: "sync.max_file_size_mb".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.walk_retry_attempts == 0 {
            errors.push(ValidationError {
                field: "sync.walk_retry_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.setup_poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.setup_poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.setup_timeout_minutes == 0 {
            errors.push(ValidationError {
                field: "sync.setup_timeout_minutes".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- remote ---
        if self.remote.base_url.is_empty() {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: "must not be empty".into(),
            });
        }
        if self.remote.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.retries == 0 {
            errors.push(ValidationError {
                field: "remote.retries".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.max_concurrent == 0 {
            errors.push(ValidationError {
                field: "remote.max_concurrent".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- watcher ---
        if self.watcher.queue_capacity == 0 {
            errors.push(ValidationError {
                field: "watcher.queue_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- eviction ---
        if self.eviction.max_usage_mb == 0 {
            errors.push(ValidationError {
                field: "eviction.max_usage_mb".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.eviction.threshold_percent == 0 || self.eviction.threshold_percent > 100 {
            errors.push(ValidationError {
                field: "eviction.threshold_percent".into(),
                message: "must be in range 1..=100".into(),
            });
        }
        if self.eviction.sweep_interval_minutes == 0 {
            errors.push(ValidationError {
                field: "eviction.sweep_interval_minutes".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use plumesync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_data_root(PathBuf::from("/srv/plumesync/accounts"))
///     .remote_base_url("https://agent.example.com")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_data_root(mut self, root: PathBuf) -> Self {
        self.config.sync.data_root = root;
        self
    }

    pub fn sync_max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.sync.max_file_size_mb = mb;
        self
    }

    pub fn sync_walk_retry_attempts(mut self, n: u32) -> Self {
        self.config.sync.walk_retry_attempts = n;
        self
    }

    pub fn sync_setup_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.setup_poll_interval = seconds;
        self
    }

    pub fn sync_setup_timeout_minutes(mut self, minutes: u64) -> Self {
        self.config.sync.setup_timeout_minutes = minutes;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.remote.shared_secret = secret.into();
        self
    }

    pub fn remote_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.timeout_secs = seconds;
        self
    }

    pub fn remote_retries(mut self, n: u32) -> Self {
        self.config.remote.retries = n;
        self
    }

    pub fn remote_max_concurrent(mut self, n: u32) -> Self {
        self.config.remote.max_concurrent = n;
        self
    }

    pub fn remote_min_spacing_ms(mut self, ms: u64) -> Self {
        self.config.remote.min_spacing_ms = ms;
        self
    }

    // --- watcher ---

    pub fn watcher_debounce_ms(mut self, ms: u64) -> Self {
        self.config.watcher.debounce_ms = ms;
        self
    }

    pub fn watcher_queue_capacity(mut self, n: usize) -> Self {
        self.config.watcher.queue_capacity = n;
        self
    }

    pub fn watcher_dispatch_spacing_ms(mut self, ms: u64) -> Self {
        self.config.watcher.dispatch_spacing_ms = ms;
        self
    }

    // --- eviction ---

    pub fn eviction_max_usage_mb(mut self, mb: u64) -> Self {
        self.config.eviction.max_usage_mb = mb;
        self
    }

    pub fn eviction_threshold_percent(mut self, percent: u8) -> Self {
        self.config.eviction.threshold_percent = percent;
        self
    }

    pub fn eviction_sweep_interval_minutes(mut self, minutes: u64) -> Self {
        self.config.eviction.sweep_interval_minutes = minutes;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = file;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.max_file_size_mb, 150);
        assert_eq!(cfg.sync.walk_retry_attempts, 3);
        assert_eq!(cfg.sync.setup_poll_interval, 10);
        assert_eq!(cfg.sync.setup_timeout_minutes, 120);
        assert_eq!(cfg.remote.timeout_secs, 10);
        assert_eq!(cfg.remote.retries, 3);
        assert_eq!(cfg.remote.max_concurrent, 4);
        assert_eq!(cfg.remote.min_spacing_ms, 100);
        assert_eq!(cfg.watcher.debounce_ms, 500);
        assert_eq!(cfg.watcher.queue_capacity, 512);
        assert_eq!(cfg.watcher.dispatch_spacing_ms, 100);
        assert_eq!(cfg.eviction.max_usage_mb, 1024);
        assert_eq!(cfg.eviction.threshold_percent, 80);
        assert_eq!(cfg.eviction.sweep_interval_minutes, 30);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  data_root: /srv/plumesync/accounts
  max_file_size_mb: 200
  walk_retry_attempts: 5
  setup_poll_interval: 15
  setup_timeout_minutes: 60
remote:
  base_url: https://agent.example.com
  shared_secret: s3cret
  timeout_secs: 20
  retries: 4
  max_concurrent: 8
  min_spacing_ms: 50
watcher:
  debounce_ms: 250
  queue_capacity: 128
  dispatch_spacing_ms: 200
eviction:
  max_usage_mb: 2048
  threshold_percent: 70
  sweep_interval_minutes: 15
logging:
  level: debug
  file: /tmp/plumesync.log
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.data_root, PathBuf::from("/srv/plumesync/accounts"));
        assert_eq!(cfg.sync.max_file_size_mb, 200);
        assert_eq!(cfg.sync.walk_retry_attempts, 5);
        assert_eq!(cfg.remote.base_url, "https://agent.example.com");
        assert_eq!(cfg.remote.shared_secret, "s3cret");
        assert_eq!(cfg.remote.timeout_secs, 20);
        assert_eq!(cfg.remote.retries, 4);
        assert_eq!(cfg.watcher.debounce_ms, 250);
        assert_eq!(cfg.watcher.queue_capacity, 128);
        assert_eq!(cfg.eviction.max_usage_mb, 2048);
        assert_eq!(cfg.eviction.threshold_percent, 70);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.file, PathBuf::from("/tmp/plumesync.log"));
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.remote.retries, 3);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_sync_values() {
        let mut cfg = Config::default();
        cfg.sync.max_file_size_mb = 0;
        cfg.sync.walk_retry_attempts = 0;
        cfg.sync.setup_poll_interval = 0;
        cfg.sync.setup_timeout_minutes = 0;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"sync.max_file_size_mb"));
        assert!(fields.contains(&"sync.walk_retry_attempts"));
        assert!(fields.contains(&"sync.setup_poll_interval"));
        assert!(fields.contains(&"sync.setup_timeout_minutes"));
    }

    #[test]
    fn validate_catches_empty_base_url() {
        let mut cfg = Config::default();
        cfg.remote.base_url = String::new();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "remote.base_url"));
    }

    #[test]
    fn validate_catches_zero_remote_values() {
        let mut cfg = Config::default();
        cfg.remote.timeout_secs = 0;
        cfg.remote.retries = 0;
        cfg.remote.max_concurrent = 0;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"remote.timeout_secs"));
        assert!(fields.contains(&"remote.retries"));
        assert!(fields.contains(&"remote.max_concurrent"));
    }

    #[test]
    fn validate_catches_zero_queue_capacity() {
        let mut cfg = Config::default();
        cfg.watcher.queue_capacity = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "watcher.queue_capacity"));
    }

    #[test]
    fn validate_catches_invalid_eviction_threshold() {
        for bad in [0u8, 101] {
            let mut cfg = Config::default();
            cfg.eviction.threshold_percent = bad;
            let errors = cfg.validate();
            assert!(
                errors.iter().any(|e| e.field == "eviction.threshold_percent"),
                "threshold {bad} should be rejected"
            );
        }
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let mut cfg = Config::default();
            cfg.logging.level = level.to_string();
            let errors = cfg.validate();
            assert!(
                !errors.iter().any(|e| e.field == "logging.level"),
                "level '{level}' should be valid"
            );
        }
    }

    // -- Builder --

    #[test]
    fn builder_starts_from_defaults() {
        let cfg = ConfigBuilder::new().build();
        assert_eq!(cfg.remote.retries, 3);
        assert_eq!(cfg.eviction.threshold_percent, 80);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .sync_data_root(PathBuf::from("/custom/accounts"))
            .sync_max_file_size_mb(500)
            .remote_base_url("https://agent.internal")
            .remote_shared_secret("hunter2")
            .remote_retries(6)
            .watcher_debounce_ms(100)
            .eviction_max_usage_mb(4096)
            .logging_level("trace")
            .build();

        assert_eq!(cfg.sync.data_root, PathBuf::from("/custom/accounts"));
        assert_eq!(cfg.sync.max_file_size_mb, 500);
        assert_eq!(cfg.remote.base_url, "https://agent.internal");
        assert_eq!(cfg.remote.shared_secret, "hunter2");
        assert_eq!(cfg.remote.retries, 6);
        assert_eq!(cfg.watcher.debounce_ms, 100);
        assert_eq!(cfg.eviction.max_usage_mb, 4096);
        assert_eq!(cfg.logging.level, "trace");
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new()
            .remote_retries(0)
            .logging_level("nope")
            .build_validated();
        let errors = result.unwrap_err();
        assert!(errors.len() >= 2);
    }

    // -- default_path --

    #[test]
    fn default_path_ends_with_config_yaml() {
        let p = Config::default_path();
        assert!(p.ends_with("plumesync/config.yaml"));
    }

    // -- ValidationError Display --

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "remote.retries".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "remote.retries: must be greater than 0");
    }
}
