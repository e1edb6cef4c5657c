//! Download scheduler - bounded worker pool fetching message bodies
//!
//! Each message in the fetch list becomes one task in a `JoinSet`; a
//! `Semaphore` with `max_connections` permits bounds how many run at once.
//!
//! ## Per-message flow
//!
//! ```text
//! cancelled? ──yes──→ (nothing)
//!     │
//! recheck local ──present──→ Before{skip: true}
//!     │
//! Before{skip: false}
//!     │
//! fetch (timeout) ──ok──→ write .part + rename ──→ After
//!     │                        └─fail──→ MessageError{retryable: false}
//!    err
//!     ├─ 401 (first time) → refresh token, fetch again
//!     ├─ transient, retries left → MessageError{retryable: true}, back off
//!     └─ otherwise → MessageError{retryable: false}
//! ```
//!
//! Only an authorization failure stops the pool; everything else is local to
//! its message.

use std::sync::Arc;
use std::time::Duration;

use mailvault_core::domain::{BackupEvent, MessageRef, RetryPolicy, SessionConfig, SessionCounters};
use mailvault_core::ports::{AuthError, IMailboxProvider, ProviderError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::EventBus;
use crate::store::LocalStore;
use crate::token::SessionToken;

/// Code reported for local write failures
const WRITE_ERROR_CODE: i32 = -1;

/// State shared by every worker of one run
struct WorkerContext {
    mailbox: Arc<dyn IMailboxProvider>,
    token: Arc<SessionToken>,
    store: Arc<LocalStore>,
    events: Arc<EventBus>,
    counters: Arc<SessionCounters>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

/// Bounded-concurrency downloader
pub struct DownloadScheduler {
    context: Arc<WorkerContext>,
    max_connections: usize,
}

impl DownloadScheduler {
    pub fn new(
        mailbox: Arc<dyn IMailboxProvider>,
        token: Arc<SessionToken>,
        store: Arc<LocalStore>,
        events: Arc<EventBus>,
        counters: Arc<SessionCounters>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            context: Arc::new(WorkerContext {
                mailbox,
                token,
                store,
                events,
                counters,
                retry: config.retry,
                request_timeout: config.request_timeout,
            }),
            max_connections: config.max_connections.max(1),
        }
    }

    /// Downloads `messages`, returning once every started worker finished
    ///
    /// Cancelling `cancel` stops new messages from starting and abandons
    /// in-flight fetches; writes already under way complete.
    ///
    /// # Errors
    /// Returns the first [`AuthError`] a worker hit. The remaining workers
    /// are stopped before returning.
    pub async fn run(
        &self,
        messages: Vec<MessageRef>,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let queued = messages.len();
        info!(
            messages = queued,
            max_connections = self.max_connections,
            "Starting downloads"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let stop = cancel.child_token();
        let mut workers = JoinSet::new();

        for message in messages {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let context = Arc::clone(&self.context);
            let stop = stop.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = context.process(message, &stop).await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            });
        }

        let mut outcome = Ok(());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if outcome.is_ok() {
                        error!(error = %e, "Authorization lost, stopping downloads");
                        outcome = Err(e);
                    }
                }
                Err(e) => error!(error = %e, "Download worker panicked"),
            }
        }

        debug!(queued, "Downloads drained");
        outcome
    }
}

impl WorkerContext {
    async fn process(&self, message: MessageRef, stop: &CancellationToken) -> Result<(), AuthError> {
        if stop.is_cancelled() {
            return Ok(());
        }

        let id = message.id().clone();
        let backup_file = self.store.path_for(&id);

        if self.store.contains(&id).await {
            debug!(%id, "Message appeared locally, skipping");
            self.events.emit(BackupEvent::BeforeMessageBackup {
                id,
                backup_file,
                skip: true,
            });
            return Ok(());
        }

        self.events.emit(BackupEvent::BeforeMessageBackup {
            id: id.clone(),
            backup_file,
            skip: false,
        });

        let mut retries = 0u32;
        let mut refreshed_after_401 = false;

        loop {
            let access_token = tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(()),
                access_token = self.token.access_token() => access_token?,
            };

            let fetched = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(%id, "Fetch abandoned");
                    return Ok(());
                }
                result = tokio::time::timeout(
                    self.request_timeout,
                    self.mailbox.fetch_message(&access_token, &message),
                ) => result.unwrap_or(Err(ProviderError::Timeout(self.request_timeout))),
            };

            let error = match fetched {
                Ok(bytes) => {
                    self.persist(&message, &bytes).await;
                    return Ok(());
                }
                Err(error) => error,
            };

            if error == ProviderError::Unauthorized && !refreshed_after_401 {
                refreshed_after_401 = true;
                debug!(%id, "Access token rejected, refreshing");
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return Ok(()),
                    refreshed = self.token.refresh_rejected(&access_token) => refreshed?,
                };
                continue;
            }

            let retryable = error.is_transient() && self.retry.allows_retry(retries);
            self.events.emit(BackupEvent::MessageError {
                id: id.clone(),
                code: error.code(),
                message: error.to_string(),
                retryable,
            });

            if !retryable {
                self.counters.record_failed();
                return Ok(());
            }

            retries += 1;
            let mut delay = self.retry.delay_for(retries);
            if let Some(after) = error.retry_after() {
                delay = delay.max(after);
            }
            debug!(%id, retry = retries, delay_ms = delay.as_millis() as u64, "Backing off");

            tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn persist(&self, message: &MessageRef, bytes: &[u8]) {
        let id = message.id();
        match self.store.write_atomic(id, bytes).await {
            Ok(record) => {
                let completed = self.counters.record_backed_up();
                self.events.emit(BackupEvent::AfterMessageBackup {
                    id: id.clone(),
                    backup_file: record.file_path().to_path_buf(),
                    size_bytes: record.size_bytes(),
                    completed,
                    total: self.counters.total(),
                });
            }
            Err(e) => {
                warn!(%id, error = %e, "Could not write message");
                self.counters.record_failed();
                self.events.emit(BackupEvent::MessageError {
                    id: id.clone(),
                    code: WRITE_ERROR_CODE,
                    message: e.to_string(),
                    retryable: false,
                });
            }
        }
    }
}
