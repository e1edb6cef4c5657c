//! Cooperative cancellation

use std::sync::Arc;
use std::time::Duration;

use mailvault_core::domain::BackupEvent;
use mailvault_core::ports::AuthError;
use mailvault_sync::BackupError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, FakeMailbox, FakeTokenProvider};

#[tokio::test]
async fn test_cancel_stops_downloads_and_still_ends() {
    let tmp = TempDir::new().unwrap();
    common::seed(tmp.path(), "stale");
    let mailbox = Arc::new(
        FakeMailbox::new(&["A", "B", "C", "D"]).fetch_delay(Duration::from_secs(30)),
    );
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let mut config = common::config(tmp.path());
    config.sync_deletes = true;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), engine.run(&config, cancel))
        .await
        .expect("cancelled session did not finish")
        .unwrap();
    let events = common::drain(&mut rx);

    assert!(summary.cancelled);
    assert_eq!(summary.backed_up, 0);
    assert_eq!(common::end_counts(&events), (0, 4, 0, 4));
    // Only the first message was in flight with one connection
    assert_eq!(common::before_ids(&events, false), vec!["A"]);
    assert_eq!(mailbox.fetches("B"), 0);
    // Delete pass skipped
    assert!(common::backup_exists(tmp.path(), "stale"));
    assert!(!tmp.path().join("A.eml").exists());
    assert!(!tmp.path().join("A.eml.part").exists());
    assert!(events
        .iter()
        .any(|e| matches!(e, BackupEvent::Log { message, .. } if message.contains("cancelled"))));
}

#[tokio::test]
async fn test_cancel_before_start_fails_authorization() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["A"]));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .run(&common::config(tmp.path()), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Auth(AuthError::Cancelled)));
    assert_eq!(mailbox.list_calls(), 0);
    assert!(common::drain(&mut rx).iter().all(|e| e.kind() != "end_backup"));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_consent() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["A"]));
    let tokens = Arc::new(FakeTokenProvider {
        hang_authorize: true,
        ..Default::default()
    });
    let (engine, mut rx) = common::engine(mailbox.clone(), tokens);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        engine.run(&common::config(tmp.path()), cancel),
    )
    .await
    .expect("session kept waiting for authorization after cancel");

    assert!(matches!(result, Err(BackupError::Auth(AuthError::Cancelled))));
    assert_eq!(mailbox.list_calls(), 0);
    assert!(common::drain(&mut rx).iter().all(|e| e.kind() != "end_backup"));
}
