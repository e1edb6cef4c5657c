//! Configuration module for MailVault.
//!
//! The YAML file at [`Config::default_path`] supplies defaults for a backup
//! run. Every section is optional; missing keys fall back to the built-in
//! values below. Command-line flags override whatever is loaded here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::session_config::{Backoff, RetryPolicy};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for MailVault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub retry: RetryConfig,
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Backup run defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Mailbox provider: `gmail` or `office365`.
    pub provider: String,
    /// Default data folder when `--path` is not given.
    pub data_folder: Option<PathBuf>,
    /// Simultaneous message downloads.
    pub max_connections: u32,
    /// Remove local files whose message was deleted remotely.
    pub sync_deletes: bool,
}

/// Retry policy for transient download failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// `exponential` or `fixed`.
    pub backoff: String,
    /// Fixed delay, or the first exponential delay (in milliseconds).
    pub base_delay_ms: u64,
    /// Cap on exponential delays (in milliseconds).
    pub max_delay_ms: u64,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Timeout for each API request (seconds).
    pub request_timeout_secs: u64,
    /// How long to wait for the OAuth redirect (seconds).
    pub auth_timeout_secs: u64,
    /// Local port for the OAuth redirect listener.
    pub redirect_port: u16,
}

/// Authentication / OAuth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth client id, used when `--client-id` is not given.
    pub client_id: Option<String>,
    /// Cache refresh tokens in the system keyring.
    pub use_keyring: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
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
    /// Typically `$XDG_CONFIG_HOME/mailvault/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mailvault")
            .join("config.yaml")
    }

    /// The retry section as a domain [`RetryPolicy`].
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.retry.base_delay_ms);
        let backoff = if self.retry.backoff == "fixed" {
            Backoff::Fixed { delay: base }
        } else {
            Backoff::Exponential {
                base,
                max: Duration::from_millis(self.retry.max_delay_ms),
            }
        };
        RetryPolicy {
            max_retries: self.retry.max_retries,
            backoff,
        }
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_secs)
    }

    /// Wait limit for the interactive OAuth redirect.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.network.auth_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Section defaults
// ---------------------------------------------------------------------------

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            provider: "gmail".into(),
            data_folder: None,
            max_connections: 1,
            sync_deletes: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: "exponential".into(),
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            auth_timeout_secs: 300,
            redirect_port: 8400,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            use_keyring: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"retry.max_retries"`.
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

/// Valid values for `backup.provider`.
pub const VALID_PROVIDERS: &[&str] = &["gmail", "office365"];

/// Valid values for `retry.backoff`.
const VALID_BACKOFFS: &[&str] = &["exponential", "fixed"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- backup ---
        if !VALID_PROVIDERS.contains(&self.backup.provider.as_str()) {
            errors.push(ValidationError {
                field: "backup.provider".into(),
                message: format!(
                    "must be one of {:?}, got '{}'",
                    VALID_PROVIDERS, self.backup.provider
                ),
            });
        }
        if self.backup.max_connections == 0 {
            errors.push(ValidationError {
                field: "backup.max_connections".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- retry ---
        if !VALID_BACKOFFS.contains(&self.retry.backoff.as_str()) {
            errors.push(ValidationError {
                field: "retry.backoff".into(),
                message: format!(
                    "must be one of {:?}, got '{}'",
                    VALID_BACKOFFS, self.retry.backoff
                ),
            });
        }
        if self.retry.backoff == "exponential" && self.retry.max_delay_ms < self.retry.base_delay_ms
        {
            errors.push(ValidationError {
                field: "retry.max_delay_ms".into(),
                message: "must not be smaller than retry.base_delay_ms".into(),
            });
        }

        // --- network ---
        if self.network.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "network.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.network.auth_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "network.auth_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.network.redirect_port == 0 {
            errors.push(ValidationError {
                field: "network.redirect_port".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "must be one of {:?}, got '{}'",
                    VALID_LOG_LEVELS, self.logging.level
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- backup ---

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.config.backup.provider = provider.into();
        self
    }

    pub fn data_folder(mut self, folder: PathBuf) -> Self {
        self.config.backup.data_folder = Some(folder);
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.backup.max_connections = n;
        self
    }

    pub fn sync_deletes(mut self, enabled: bool) -> Self {
        self.config.backup.sync_deletes = enabled;
        self
    }

    // --- retry ---

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn backoff(mut self, backoff: impl Into<String>) -> Self {
        self.config.retry.backoff = backoff.into();
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_delay_ms = ms;
        self
    }

    // --- network ---

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.network.request_timeout_secs = secs;
        self
    }

    pub fn auth_timeout_secs(mut self, secs: u64) -> Self {
        self.config.network.auth_timeout_secs = secs;
        self
    }

    pub fn redirect_port(mut self, port: u16) -> Self {
        self.config.network.redirect_port = port;
        self
    }

    // --- auth ---

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.auth.client_id = Some(client_id.into());
        self
    }

    pub fn use_keyring(mut self, enabled: bool) -> Self {
        self.config.auth.use_keyring = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
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
