//! Sessions that fail, and per-message failures that must not fail them

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mailvault_core::domain::BackupEvent;
use mailvault_core::ports::{AuthError, ProviderError};
use mailvault_sync::BackupError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, FakeMailbox, FakeTokenProvider, FetchBehavior};

#[tokio::test]
async fn test_authorization_failure_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["A"]));
    let tokens = Arc::new(FakeTokenProvider {
        deny: true,
        ..Default::default()
    });
    let (engine, mut rx) = common::engine(mailbox.clone(), tokens);

    let err = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Auth(AuthError::Denied(_))));
    assert_eq!(mailbox.list_calls(), 0);
    let events = common::drain(&mut rx);
    assert!(events.iter().all(|e| e.kind() != "end_backup"));
}

#[tokio::test]
async fn test_failed_refresh_during_downloads_stops_the_session() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(
        FakeMailbox::new(&["A", "B", "C"])
            .behavior("A", FetchBehavior::AlwaysFail(ProviderError::Unauthorized)),
    );
    let tokens = Arc::new(FakeTokenProvider {
        fail_refresh: true,
        ..Default::default()
    });
    let (engine, mut rx) = common::engine(mailbox.clone(), tokens.clone());

    let err = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap_err();
    let events = common::drain(&mut rx);

    assert!(matches!(err, BackupError::Auth(AuthError::Refresh(_))));
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(mailbox.fetches("A"), 1);
    // Queued messages are never started once authorization is lost
    assert_eq!(mailbox.fetches("B"), 0);
    assert_eq!(mailbox.fetches("C"), 0);
    assert_eq!(common::before_ids(&events, false), vec!["A"]);
    assert!(events.iter().all(|e| e.kind() != "end_backup"));
    assert!(!common::backup_exists(tmp.path(), "B"));
}

#[tokio::test]
async fn test_data_folder_that_is_a_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("backup");
    std::fs::write(&file, b"not a folder").unwrap();

    let (engine, mut rx) = common::engine(
        Arc::new(FakeMailbox::new(&["A"])),
        Arc::new(FakeTokenProvider::default()),
    );
    let err = engine
        .run(&common::config(&file), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::DataFolder(_)));
    assert!(common::drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_listing_failure_after_retries_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["A"]).list_error(ProviderError::Server {
        status: 500,
        message: "internal".to_string(),
    }));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let err = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Listing(ProviderError::Server { status: 500, .. })));
    assert_eq!(mailbox.list_calls(), 6);
    assert!(common::drain(&mut rx).iter().all(|e| e.kind() != "end_backup"));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let (engine, _rx) = common::engine(
        Arc::new(FakeMailbox::new(&[])),
        Arc::new(FakeTokenProvider::default()),
    );
    let mut config = common::config(tmp.path());
    config.max_connections = 0;

    let err = engine.run(&config, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, BackupError::Config(_)));
}

#[tokio::test]
async fn test_write_failure_skips_only_that_message() {
    let tmp = TempDir::new().unwrap();
    // A directory squatting on the final name makes the rename fail
    std::fs::create_dir(tmp.path().join("B.eml")).unwrap();

    let (engine, mut rx) = common::engine(
        Arc::new(FakeMailbox::new(&["A", "B", "C"])),
        Arc::new(FakeTokenProvider::default()),
    );
    let summary = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    let write_errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::MessageError {
                id, code, retryable, ..
            } => Some((id.as_str().to_string(), *code, *retryable)),
            _ => None,
        })
        .collect();
    assert_eq!(write_errors, vec![("B".to_string(), -1, false)]);
    assert_eq!(common::ids_of(&events, "after_message_backup"), vec!["A", "C"]);
    assert_eq!(common::end_counts(&events), (2, 1, 0, 3));
    assert_eq!(summary.failed, 1);
    assert!(!tmp.path().join("B.eml.part").exists());
}
