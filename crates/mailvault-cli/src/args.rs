//! Command-line arguments and their merge with the configuration file
//!
//! Every value resolves as: command-line flag, then YAML config file, then
//! built-in default.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, ValueEnum};
use mailvault_core::config::Config;
use mailvault_core::domain::{parse_date, FilterSpec, SessionConfig};
use mailvault_remote::ProviderKind;

/// Retry delay schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffArg {
    Fixed,
    Exponential,
}

impl BackoffArg {
    fn as_str(&self) -> &'static str {
        match self {
            BackoffArg::Fixed => "fixed",
            BackoffArg::Exponential => "exponential",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mailvault",
    version,
    about = "Back up a Gmail or Office 365 mailbox to a folder of .eml files",
    after_help = "Example: mailvault --client-id ID --client-secret SECRET -p ./backup -f in:sent -s 2023/09/01 -e 2023/09/15 -c 5 -d"
)]
pub struct Cli {
    /// OAuth client ID of the registered application
    #[arg(long)]
    pub client_id: Option<String>,

    /// OAuth client secret of the registered application
    #[arg(long)]
    pub client_secret: String,

    /// Directory to save messages to
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Mailbox provider: gmail or office365
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// Provider filter applied when listing messages (e.g. "in:sent")
    #[arg(short, long)]
    pub filter: Option<String>,

    /// First day of the date range, inclusive (YYYY/MM/DD)
    #[arg(short, long, value_parser = parse_day)]
    pub start: Option<NaiveDate>,

    /// Last day of the date range, inclusive (YYYY/MM/DD)
    #[arg(short, long, value_parser = parse_day)]
    pub end: Option<NaiveDate>,

    /// Number of simultaneous connections
    #[arg(short, long)]
    pub connections: Option<u32>,

    /// Delete local files of messages that no longer exist remotely
    ///
    /// Compares against the filtered listing, so local files outside
    /// --filter/--start/--end are deleted too.
    #[arg(short = 'd', long)]
    pub sync_deletes: bool,

    /// Timeout for each remote request, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries after a failed download before the message is skipped
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay schedule between retries
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffArg>,

    /// Delay before the first retry, in milliseconds
    #[arg(long, value_name = "MS")]
    pub retry_delay: Option<u64>,

    /// Use alternate config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Loads the config file named by `--config`, or the default one if present
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config file {}", path.display())),
            None => {
                let path = Config::default_path();
                if path.exists() {
                    Config::load(&path)
                        .with_context(|| format!("Failed to load config file {}", path.display()))
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    /// Overlays the command-line values on a loaded configuration
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(kind) = self.provider {
            config.backup.provider = kind.as_str().to_string();
        }
        if let Some(path) = &self.path {
            config.backup.data_folder = Some(path.clone());
        }
        if let Some(n) = self.connections {
            config.backup.max_connections = n;
        }
        if self.sync_deletes {
            config.backup.sync_deletes = true;
        }
        if let Some(secs) = self.timeout {
            config.network.request_timeout_secs = secs;
        }
        if let Some(n) = self.retries {
            config.retry.max_retries = n;
        }
        if let Some(backoff) = self.backoff {
            config.retry.backoff = backoff.as_str().to_string();
        }
        if let Some(ms) = self.retry_delay {
            config.retry.base_delay_ms = ms;
            config.retry.max_delay_ms = config.retry.max_delay_ms.max(ms);
        }
        if let Some(id) = &self.client_id {
            config.auth.client_id = Some(id.clone());
        }
        config
    }

    /// Builds the per-run session configuration
    pub fn session_config(&self, config: &Config) -> Result<SessionConfig> {
        let errors = config.validate();
        if !errors.is_empty() {
            let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(anyhow!("Invalid configuration: {}", details.join("; ")));
        }

        let data_folder = config
            .backup
            .data_folder
            .clone()
            .ok_or_else(|| anyhow!("A data folder is required (--path)"))?;
        let client_id = config
            .auth
            .client_id
            .clone()
            .ok_or_else(|| anyhow!("A client id is required (--client-id)"))?;

        let mut session = SessionConfig::new(data_folder, client_id, self.client_secret.clone());
        session.filter = FilterSpec::new(self.filter.clone(), self.start, self.end)?;
        session.max_connections = config.backup.max_connections as usize;
        session.sync_deletes = config.backup.sync_deletes;
        session.retry = config.retry_policy();
        session.request_timeout = config.request_timeout();
        session.validate()?;
        Ok(session)
    }

    /// The provider selected by the merged configuration
    pub fn provider_kind(config: &Config) -> Result<ProviderKind> {
        config
            .backup
            .provider
            .parse::<ProviderKind>()
            .map_err(|e| anyhow!(e))
    }
}
