//! Per-run session configuration and retry policy

use std::path::PathBuf;
use std::time::Duration;

use super::errors::DomainError;
use super::filter::FilterSpec;

/// Number of parallel fetches when none is configured
pub const DEFAULT_MAX_CONNECTIONS: usize = 1;

/// Retries after the first failed attempt before a message is skipped
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Timeout applied to every remote call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay: Duration },
    /// `base * 2^(n-1)` before retry `n`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Retry policy for transient per-message failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Returns the delay to wait before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32
                    .checked_shl(retry.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Returns true while another retry is allowed after `retries_done`
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

/// Everything one backup run needs to know
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Folder holding one file per backed-up message
    pub data_folder: PathBuf,
    /// Remote listing filter and date range
    pub filter: FilterSpec,
    /// Upper bound on simultaneous fetches
    pub max_connections: usize,
    /// Delete local files whose message no longer exists remotely
    pub sync_deletes: bool,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Retry policy for transient fetch failures
    pub retry: RetryPolicy,
    /// Timeout for each remote call
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Creates a config with default filter, concurrency and retry settings
    pub fn new(
        data_folder: impl Into<PathBuf>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            data_folder: data_folder.into(),
            filter: FilterSpec::all(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sync_deletes: false,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Checks the invariants a session relies on
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.data_folder.as_os_str().is_empty() {
            return Err(DomainError::ValidationFailed(
                "data folder must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(DomainError::ValidationFailed(
                "max connections must be at least 1".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "client id must not be empty".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(DomainError::ValidationFailed(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
