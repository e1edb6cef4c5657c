//! In-memory providers and helpers for session tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailvault_core::domain::{
    Backoff, BackupEvent, FilterSpec, MessageId, MessageMetadata, MessageRef, PageToken,
    RetryPolicy, SessionConfig,
};
use mailvault_core::ports::{
    AuthError, AuthRequest, IMailboxProvider, ITokenProvider, MessagePage, ProviderError, Token,
};
use mailvault_sync::store::file_name_for;
use mailvault_sync::{BackupEngine, EventBus};
use tokio::sync::mpsc;

/// What a fake fetch returns for one message
#[derive(Clone)]
#[allow(dead_code)]
pub enum FetchBehavior {
    /// Always fails with this error
    AlwaysFail(ProviderError),
    /// Fails with this error the first `n` times, then succeeds
    FailTimes(ProviderError, u32),
}

/// Mailbox served from memory
pub struct FakeMailbox {
    messages: Vec<MessageRef>,
    page_size: usize,
    behaviors: HashMap<String, FetchBehavior>,
    fetch_delay: Duration,
    list_error: Option<ProviderError>,
    fetch_counts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_calls: AtomicU32,
}

#[allow(dead_code)]
impl FakeMailbox {
    pub fn new(ids: &[&str]) -> Self {
        Self::with_messages(ids.iter().map(|id| message(id)).collect())
    }

    pub fn with_messages(messages: Vec<MessageRef>) -> Self {
        Self {
            messages,
            page_size: 2,
            behaviors: HashMap::new(),
            fetch_delay: Duration::ZERO,
            list_error: None,
            fetch_counts: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            list_calls: AtomicU32::new(0),
        }
    }

    pub fn behavior(mut self, id: &str, behavior: FetchBehavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn list_error(mut self, error: ProviderError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn fetches(&self, id: &str) -> u32 {
        self.fetch_counts
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

/// Body served for a message
pub fn body_of(id: &str) -> Vec<u8> {
    format!("Message-ID: <{id}@example.com>\r\nSubject: {id}\r\n\r\nBody of {id}\r\n").into_bytes()
}

#[async_trait::async_trait]
impl IMailboxProvider for FakeMailbox {
    fn name(&self) -> &str {
        "fake"
    }

    fn default_scopes(&self) -> Vec<String> {
        vec!["mail.read".to_string()]
    }

    async fn list_page(
        &self,
        _access_token: &str,
        _filter: &FilterSpec,
        page: Option<&PageToken>,
    ) -> Result<MessagePage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.list_error {
            return Err(error.clone());
        }

        let start: usize = page.map(|p| p.as_str().parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(self.messages.len());
        let next_page = (end < self.messages.len()).then(|| PageToken::new(end.to_string()).unwrap());
        Ok(MessagePage {
            messages: self.messages[start..end].to_vec(),
            next_page,
        })
    }

    async fn fetch_message(
        &self,
        _access_token: &str,
        message: &MessageRef,
    ) -> Result<Vec<u8>, ProviderError> {
        let id = message.id().as_str().to_string();
        let attempt = {
            let mut counts = self.fetch_counts.lock().unwrap();
            let count = counts.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behaviors.get(&id) {
            Some(FetchBehavior::AlwaysFail(error)) => Err(error.clone()),
            Some(FetchBehavior::FailTimes(error, n)) if attempt <= *n => Err(error.clone()),
            _ => Ok(body_of(&id)),
        }
    }
}

/// Token provider that never talks to anyone
#[derive(Default)]
pub struct FakeTokenProvider {
    pub deny: bool,
    /// `authorize` never returns, like a user who never finishes consent
    pub hang_authorize: bool,
    pub fail_refresh: bool,
    pub refreshes: AtomicU32,
}

#[async_trait::async_trait]
impl ITokenProvider for FakeTokenProvider {
    async fn authorize(&self, _request: &AuthRequest) -> Result<Token, AuthError> {
        if self.hang_authorize {
            std::future::pending::<()>().await;
        }
        if self.deny {
            return Err(AuthError::Denied("access_denied".to_string()));
        }
        Ok(Token {
            access_token: "access-0".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn refresh(&self, _request: &AuthRequest, _token: &Token) -> Result<Token, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_refresh {
            return Err(AuthError::Refresh("invalid_grant".to_string()));
        }
        Ok(Token {
            access_token: format!("access-{n}"),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }
}

pub fn message(id: &str) -> MessageRef {
    MessageRef::new(MessageId::new(id).unwrap())
}

#[allow(dead_code)]
pub fn dated_message(id: &str, received_at: DateTime<Utc>) -> MessageRef {
    MessageRef::with_metadata(
        MessageId::new(id).unwrap(),
        MessageMetadata {
            size_bytes: None,
            received_at: Some(received_at),
            folder: None,
        },
    )
}

/// Session config with instant retries
pub fn config(folder: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(folder, "client-id", "client-secret");
    config.retry = RetryPolicy {
        max_retries: 5,
        backoff: Backoff::Fixed {
            delay: Duration::ZERO,
        },
    };
    config.request_timeout = Duration::from_secs(5);
    config
}

/// Puts a previously backed-up message into the folder
pub fn seed(folder: &Path, id: &str) {
    let path = folder.join(file_name_for(&MessageId::new(id).unwrap()));
    std::fs::write(path, body_of(id)).unwrap();
}

pub fn backup_exists(folder: &Path, id: &str) -> bool {
    folder
        .join(file_name_for(&MessageId::new(id).unwrap()))
        .is_file()
}

/// Engine wired to an event channel
pub fn engine(
    mailbox: Arc<FakeMailbox>,
    tokens: Arc<FakeTokenProvider>,
) -> (BackupEngine, mpsc::UnboundedReceiver<BackupEvent>) {
    let mut bus = EventBus::new();
    let rx = bus.channel();
    (BackupEngine::new(mailbox, tokens, bus), rx)
}

/// Drains every event already sent
pub fn drain(rx: &mut mpsc::UnboundedReceiver<BackupEvent>) -> Vec<BackupEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Ids of events of one kind, sorted
#[allow(dead_code)]
pub fn ids_of(events: &[BackupEvent], kind: &str) -> Vec<String> {
    let mut ids: Vec<String> = events
        .iter()
        .filter(|e| e.kind() == kind)
        .filter_map(|e| e.message_id().map(|id| id.as_str().to_string()))
        .collect();
    ids.sort();
    ids
}

/// Ids of `BeforeMessageBackup` events with the given skip flag, sorted
#[allow(dead_code)]
pub fn before_ids(events: &[BackupEvent], skip: bool) -> Vec<String> {
    let mut ids: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::BeforeMessageBackup { id, skip: s, .. } if *s == skip => {
                Some(id.as_str().to_string())
            }
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

/// The `EndBackup` counts, asserting it is the last event and unique
pub fn end_counts(events: &[BackupEvent]) -> (u64, u64, u64, u64) {
    let ends = events.iter().filter(|e| e.kind() == "end_backup").count();
    assert_eq!(ends, 1, "expected exactly one EndBackup");
    match events.last() {
        Some(BackupEvent::EndBackup {
            backed_up,
            skipped,
            deleted,
            total,
        }) => (*backed_up, *skipped, *deleted, *total),
        other => panic!("EndBackup is not the last event: {other:?}"),
    }
}
