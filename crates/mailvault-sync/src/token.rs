//! Access token shared by all workers of a session
//!
//! Refreshes happen under a single lock, so when several workers notice an
//! expiring or rejected token at the same time only one of them calls the
//! provider and the others pick up the result. Each refresh is bounded by a
//! timeout, so a stalled token endpoint cannot hold the lock indefinitely.

use std::sync::Arc;
use std::time::Duration;

use mailvault_core::ports::{AuthError, AuthRequest, ITokenProvider, Token};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Refresh ahead of expiry by this much
const REFRESH_MARGIN_SECS: i64 = 60;

/// Upper bound on one refresh call unless overridden
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

/// Session-scoped holder of the current access token
pub struct SessionToken {
    provider: Arc<dyn ITokenProvider>,
    request: AuthRequest,
    current: Mutex<Token>,
    refresh_timeout: Duration,
}

impl SessionToken {
    /// Runs the provider's authorization and wraps the issued token
    pub async fn authorize(
        provider: Arc<dyn ITokenProvider>,
        request: AuthRequest,
    ) -> Result<Self, AuthError> {
        let token = provider.authorize(&request).await?;
        info!(
            expires_at = ?token.expires_at,
            has_refresh_token = token.refresh_token.is_some(),
            "Authorization obtained"
        );
        Ok(Self {
            provider,
            request,
            current: Mutex::new(token),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    /// Sets how long a single refresh may take
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Returns a usable access token, refreshing it if it is about to expire
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;
        if current.expires_within(chrono::Duration::seconds(REFRESH_MARGIN_SECS)) {
            debug!("Access token about to expire");
            let refreshed = self.refresh(&current).await?;
            *current = refreshed;
            info!("Access token refreshed");
        }
        Ok(current.access_token.clone())
    }

    /// Refreshes after the server rejected `rejected`
    ///
    /// If another worker already replaced that token, the newer one is
    /// returned without calling the provider again.
    pub async fn refresh_rejected(&self, rejected: &str) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;
        if current.access_token != rejected {
            return Ok(current.access_token.clone());
        }
        let refreshed = self.refresh(&current).await?;
        *current = refreshed;
        info!("Access token refreshed after rejection");
        Ok(current.access_token.clone())
    }

    async fn refresh(&self, token: &Token) -> Result<Token, AuthError> {
        match tokio::time::timeout(
            self.refresh_timeout,
            self.provider.refresh(&self.request, token),
        )
        .await
        {
            Ok(refreshed) => refreshed,
            Err(_) => {
                warn!(timeout_ms = self.refresh_timeout.as_millis() as u64, "Token refresh timed out");
                Err(AuthError::Timeout(self.refresh_timeout))
            }
        }
    }
}
