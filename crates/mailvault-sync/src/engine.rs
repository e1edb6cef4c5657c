//! Backup engine
//!
//! The [`BackupEngine`] runs one backup session from authorization to the
//! final `EndBackup` event.
//!
//! ## Session Flow
//!
//! 1. **Authorizing**: obtain an access token from the token provider
//! 2. **Listing**: open and scan the data folder, page through the remote
//!    listing, drop messages outside the date range
//! 3. **Syncing**: skip what is already local, download the rest, then
//!    (optionally) delete local files whose message is gone remotely
//! 4. **Completed**: emit exactly one `EndBackup`
//!
//! Authorization failures, data folder failures and a listing that keeps
//! failing move the session to `Failed`; no `EndBackup` is emitted then.
//! Cancelling before a token is obtained counts as an authorization
//! failure ([`AuthError::Cancelled`]); once authorized, cancellation ends the
//! session normally with a cancelled summary.
//!
//! ## Retry Logic
//!
//! Listing pages are retried with the same policy as message downloads.
//! A rejected access token is refreshed once per page without counting as
//! a retry.

use std::sync::Arc;

use mailvault_core::domain::{
    BackupEvent, BackupSession, BackupSummary, LocalRecord, LogLevel, MessageRef, PageToken,
    SessionConfig, SessionCounters, SessionState,
};
use mailvault_core::ports::{AuthError, AuthRequest, IMailboxProvider, ITokenProvider, MessagePage, ProviderError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::diff::DiffEngine;
use crate::events::EventBus;
use crate::scheduler::DownloadScheduler;
use crate::store::LocalStore;
use crate::token::SessionToken;
use crate::BackupError;

/// Code reported when a local file cannot be deleted
const DELETE_ERROR_CODE: i32 = -1;

/// Orchestrates backup sessions against one mailbox
pub struct BackupEngine {
    mailbox: Arc<dyn IMailboxProvider>,
    token_provider: Arc<dyn ITokenProvider>,
    events: Arc<EventBus>,
}

impl BackupEngine {
    /// Creates an engine delivering events to `events`
    pub fn new(
        mailbox: Arc<dyn IMailboxProvider>,
        token_provider: Arc<dyn ITokenProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            mailbox,
            token_provider,
            events: Arc::new(events),
        }
    }

    /// Runs one backup session
    ///
    /// Cancelling `cancel` ends the session early but cleanly: messages not
    /// yet started are left alone, the delete pass is skipped and the
    /// summary is flagged as cancelled.
    ///
    /// # Errors
    /// Returns a [`BackupError`] when the session fails; per-message errors
    /// are reported as events only.
    #[tracing::instrument(skip_all, fields(provider = %self.mailbox.name(), folder = %config.data_folder.display()))]
    pub async fn run(
        &self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<BackupSummary, BackupError> {
        let mut session = BackupSession::new();
        info!(session_id = %session.id(), "Starting backup session");

        match self.execute(&mut session, config, &cancel).await {
            Ok(()) => {
                let summary = session.summary();
                info!(
                    session_id = %summary.session_id,
                    backed_up = summary.backed_up,
                    skipped = summary.skipped,
                    deleted = summary.deleted,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    duration_ms = summary.duration_ms,
                    "Backup session completed"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(session_id = %session.id(), state = %session.state(), error = %e, "Backup session failed");
                session.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        session: &mut BackupSession,
        config: &SessionConfig,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        config
            .validate()
            .map_err(|e| BackupError::Config(e.to_string()))?;

        // Authorizing
        session.transition_to(SessionState::Authorizing)?;
        let request = AuthRequest {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: self.mailbox.default_scopes(),
        };
        let authorized = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = SessionToken::authorize(Arc::clone(&self.token_provider), request) => result,
        };
        let token = Arc::new(authorized?.with_refresh_timeout(config.request_timeout));

        // Listing
        session.transition_to(SessionState::Listing)?;
        let store = Arc::new(LocalStore::open(config.data_folder.clone()).await?);
        let local = store.scan().await?;
        let remote = self.list_remote(&token, config, cancel).await?;
        let plan = DiffEngine::compute(&remote, &local, config.sync_deletes);

        let counters = Arc::clone(session.counters());
        counters.set_total(plan.total() as u64);

        // Syncing
        session.transition_to(SessionState::Syncing)?;
        self.events.emit(BackupEvent::log(format!(
            "Found {} messages, {} already backed up, {} to download",
            plan.total(),
            plan.already_present.len(),
            plan.to_fetch.len()
        )));

        for record in &plan.already_present {
            self.events.emit(BackupEvent::BeforeMessageBackup {
                id: record.id().clone(),
                backup_file: record.file_path().to_path_buf(),
                skip: true,
            });
        }

        DownloadScheduler::new(
            Arc::clone(&self.mailbox),
            Arc::clone(&token),
            Arc::clone(&store),
            Arc::clone(&self.events),
            Arc::clone(&counters),
            config,
        )
        .run(plan.to_fetch, cancel)
        .await?;

        if cancel.is_cancelled() {
            counters.mark_cancelled();
            warn!("Backup cancelled");
            self.events.emit(BackupEvent::Log {
                level: LogLevel::Warn,
                message: "Backup cancelled, remaining messages were not downloaded".to_string(),
            });
        } else if config.sync_deletes {
            self.delete_pass(&store, &plan.to_delete, &counters, cancel)
                .await;
        }

        // Completed
        session.transition_to(SessionState::Completed)?;
        self.events.emit(session.end_event());
        Ok(())
    }

    /// Pages through the remote listing, keeping messages inside the date range
    async fn list_remote(
        &self,
        token: &SessionToken,
        config: &SessionConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageRef>, BackupError> {
        let mut messages = Vec::new();
        let mut page_token: Option<PageToken> = None;
        let mut pages = 0u32;
        let mut outside_range = 0usize;

        loop {
            if cancel.is_cancelled() {
                info!(pages, "Listing interrupted by cancellation");
                break;
            }

            let page = self
                .list_page_with_retry(token, config, page_token.as_ref(), cancel)
                .await?;
            pages += 1;

            for message in page.messages {
                if config.filter.matches_date(message.metadata().received_at) {
                    messages.push(message);
                } else {
                    outside_range += 1;
                }
            }

            match page.next_page {
                Some(next) if page_token.as_ref() == Some(&next) => {
                    return Err(BackupError::Listing(ProviderError::InvalidResponse(
                        format!("Listing returned the same page token twice: {}", next.as_str()),
                    )));
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(
            pages,
            messages = messages.len(),
            outside_range,
            "Remote listing complete"
        );
        Ok(messages)
    }

    async fn list_page_with_retry(
        &self,
        token: &SessionToken,
        config: &SessionConfig,
        page: Option<&PageToken>,
        cancel: &CancellationToken,
    ) -> Result<MessagePage, BackupError> {
        let mut retries = 0u32;
        let mut refreshed_after_401 = false;

        loop {
            let access_token = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(MessagePage::default()),
                access_token = token.access_token() => access_token?,
            };
            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(MessagePage::default()),
                result = tokio::time::timeout(
                    config.request_timeout,
                    self.mailbox.list_page(&access_token, &config.filter, page),
                ) => result.unwrap_or(Err(ProviderError::Timeout(config.request_timeout))),
            };

            let error = match listed {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };

            if error == ProviderError::Unauthorized && !refreshed_after_401 {
                refreshed_after_401 = true;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(MessagePage::default()),
                    refreshed = token.refresh_rejected(&access_token) => refreshed?,
                };
                continue;
            }

            if !error.is_transient() || !config.retry.allows_retry(retries) {
                return Err(BackupError::Listing(error));
            }

            retries += 1;
            let mut delay = config.retry.delay_for(retries);
            if let Some(after) = error.retry_after() {
                delay = delay.max(after);
            }
            warn!(error = %error, retry = retries, delay_ms = delay.as_millis() as u64, "Listing failed, retrying");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(MessagePage::default()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Removes local files whose message is gone remotely, one at a time
    async fn delete_pass(
        &self,
        store: &LocalStore,
        records: &[LocalRecord],
        counters: &SessionCounters,
        cancel: &CancellationToken,
    ) {
        if records.is_empty() {
            debug!("Nothing to delete");
            return;
        }
        info!(files = records.len(), "Deleting local messages missing remotely");

        for record in records {
            if cancel.is_cancelled() {
                counters.mark_cancelled();
                warn!("Delete pass interrupted by cancellation");
                return;
            }
            match store.remove(record).await {
                Ok(()) => {
                    counters.record_deleted();
                    self.events.emit(BackupEvent::MessageDelete {
                        id: record.id().clone(),
                        backup_file: record.file_path().to_path_buf(),
                    });
                }
                Err(e) => {
                    self.events.emit(BackupEvent::MessageError {
                        id: record.id().clone(),
                        code: DELETE_ERROR_CODE,
                        message: e.to_string(),
                        retryable: false,
                    });
                }
            }
        }
    }
}
