//! Per-message retry behavior

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mailvault_core::domain::BackupEvent;
use mailvault_core::ports::ProviderError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, FakeMailbox, FakeTokenProvider, FetchBehavior};

fn errors_for<'a>(events: &'a [BackupEvent], wanted: &str) -> Vec<(i32, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::MessageError {
                id, code, retryable, ..
            } if id.as_str() == wanted => Some((*code, *retryable)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_persistent_transient_failure_is_bounded() {
    let tmp = TempDir::new().unwrap();
    let server_error = ProviderError::Server {
        status: 503,
        message: "backend error".to_string(),
    };
    let mailbox = Arc::new(
        FakeMailbox::new(&["ok", "flaky"]).behavior("flaky", FetchBehavior::AlwaysFail(server_error)),
    );
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let summary = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    let errors = errors_for(&events, "flaky");
    assert_eq!(errors.len(), 6);
    assert!(errors[..5].iter().all(|(code, retryable)| *code == 503 && *retryable));
    assert_eq!(errors[5], (503, false));
    assert_eq!(mailbox.fetches("flaky"), 6);

    assert_eq!(common::ids_of(&events, "after_message_backup"), vec!["ok"]);
    assert_eq!(common::end_counts(&events), (1, 1, 0, 2));
    assert_eq!(summary.failed, 1);
    assert!(!common::backup_exists(tmp.path(), "flaky"));
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["m"]).behavior(
        "m",
        FetchBehavior::FailTimes(ProviderError::Network("connection reset".to_string()), 2),
    ));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(errors_for(&events, "m"), vec![(-1, true), (-1, true)]);
    assert_eq!(common::end_counts(&events), (1, 0, 0, 1));
    assert_eq!(mailbox.fetches("m"), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["gone"]).behavior(
        "gone",
        FetchBehavior::AlwaysFail(ProviderError::NotFound("deleted".to_string())),
    ));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(errors_for(&events, "gone"), vec![(404, false)]);
    assert_eq!(mailbox.fetches("gone"), 1);
    assert_eq!(common::end_counts(&events), (0, 1, 0, 1));
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_without_counting_a_retry() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(
        FakeMailbox::new(&["m"]).behavior("m", FetchBehavior::FailTimes(ProviderError::Unauthorized, 1)),
    );
    let tokens = Arc::new(FakeTokenProvider::default());
    let (engine, mut rx) = common::engine(mailbox.clone(), tokens.clone());

    engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert!(errors_for(&events, "m").is_empty());
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(mailbox.fetches("m"), 2);
    assert_eq!(common::end_counts(&events), (1, 0, 0, 1));
}

#[tokio::test]
async fn test_slow_fetch_times_out_as_retryable() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["slow"]).fetch_delay(Duration::from_secs(10)));
    let (engine, mut rx) = common::engine(mailbox, Arc::new(FakeTokenProvider::default()));

    let mut config = common::config(tmp.path());
    config.request_timeout = Duration::from_millis(20);
    config.retry.max_retries = 1;
    engine.run(&config, CancellationToken::new()).await.unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(errors_for(&events, "slow"), vec![(-2, true), (-2, false)]);
    assert_eq!(common::end_counts(&events), (0, 1, 0, 1));
}
