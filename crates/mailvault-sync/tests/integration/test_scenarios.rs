//! End-to-end sessions against a healthy mailbox

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use mailvault_core::domain::{BackupEvent, FilterSpec};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, FakeMailbox, FakeTokenProvider};

#[tokio::test]
async fn test_partial_local_copy_fetches_the_rest() {
    let tmp = TempDir::new().unwrap();
    common::seed(tmp.path(), "B");

    let mailbox = Arc::new(FakeMailbox::new(&["A", "B", "C"]));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let summary = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .expect("backup failed");
    let events = common::drain(&mut rx);

    assert_eq!(common::before_ids(&events, true), vec!["B"]);
    assert_eq!(common::before_ids(&events, false), vec!["A", "C"]);
    assert_eq!(common::ids_of(&events, "after_message_backup"), vec!["A", "C"]);
    assert!(common::ids_of(&events, "message_delete").is_empty());
    assert_eq!(common::end_counts(&events), (2, 1, 0, 3));

    assert_eq!(summary.backed_up, 2);
    assert_eq!(summary.skipped, 1);
    assert!(!summary.cancelled);
    assert_eq!(mailbox.fetches("B"), 0);
    for id in ["A", "B", "C"] {
        assert!(common::backup_exists(tmp.path(), id));
    }
    assert_eq!(
        std::fs::read(tmp.path().join("A.eml")).unwrap(),
        common::body_of("A")
    );
}

#[tokio::test]
async fn test_sync_deletes_removes_missing_messages() {
    let tmp = TempDir::new().unwrap();
    common::seed(tmp.path(), "A");
    common::seed(tmp.path(), "B");

    let mailbox = Arc::new(FakeMailbox::new(&["A"]));
    let (engine, mut rx) = common::engine(mailbox, Arc::new(FakeTokenProvider::default()));

    let mut config = common::config(tmp.path());
    config.sync_deletes = true;
    let summary = engine.run(&config, CancellationToken::new()).await.unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(common::before_ids(&events, true), vec!["A"]);
    assert_eq!(common::ids_of(&events, "message_delete"), vec!["B"]);
    assert_eq!(common::end_counts(&events), (0, 1, 1, 1));
    assert_eq!(summary.deleted, 1);
    assert!(common::backup_exists(tmp.path(), "A"));
    assert!(!common::backup_exists(tmp.path(), "B"));
}

#[tokio::test]
async fn test_no_deletes_without_sync_deletes() {
    let tmp = TempDir::new().unwrap();
    common::seed(tmp.path(), "A");
    common::seed(tmp.path(), "B");
    common::seed(tmp.path(), "C");

    let mailbox = Arc::new(FakeMailbox::new(&["A"]));
    let (engine, mut rx) = common::engine(mailbox, Arc::new(FakeTokenProvider::default()));

    engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert!(common::ids_of(&events, "message_delete").is_empty());
    assert_eq!(common::end_counts(&events), (0, 1, 0, 1));
    assert!(common::backup_exists(tmp.path(), "B"));
    assert!(common::backup_exists(tmp.path(), "C"));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let ids = ["m1", "m2", "m3", "m4", "m5"];
    let mailbox = Arc::new(FakeMailbox::new(&ids));

    let (first, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));
    first
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(common::end_counts(&common::drain(&mut rx)), (5, 0, 0, 5));

    let (second, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));
    let summary = second
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert!(common::ids_of(&events, "after_message_backup").is_empty());
    assert_eq!(common::before_ids(&events, true).len(), 5);
    assert_eq!(common::end_counts(&events), (0, 5, 0, 5));
    assert_eq!(summary.backed_up + summary.skipped, summary.total);
    for id in ids {
        assert_eq!(mailbox.fetches(id), 1, "{id} fetched more than once");
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_max_connections() {
    let tmp = TempDir::new().unwrap();
    let ids: Vec<String> = (0..20).map(|i| format!("msg{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mailbox = Arc::new(
        FakeMailbox::new(&id_refs)
            .page_size(7)
            .fetch_delay(Duration::from_millis(20)),
    );
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let mut config = common::config(tmp.path());
    config.max_connections = 3;
    let summary = engine.run(&config, CancellationToken::new()).await.unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(mailbox.max_in_flight(), 3, "workers did not overlap up to the limit");
    assert_eq!(mailbox.list_calls(), 3);
    assert_eq!(summary.backed_up, 20);
    assert_eq!(common::end_counts(&events), (20, 0, 0, 20));

    let mut completed: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::AfterMessageBackup { completed, total, .. } => {
                assert_eq!(*total, 20);
                Some(*completed)
            }
            _ => None,
        })
        .collect();
    completed.sort_unstable();
    assert_eq!(completed, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_duplicate_listing_entries_are_fetched_once() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["A", "B", "A", "C", "B"]));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(common::end_counts(&events), (3, 0, 0, 3));
    assert_eq!(mailbox.fetches("A"), 1);
    assert_eq!(mailbox.fetches("B"), 1);
}

#[tokio::test]
async fn test_date_range_excludes_out_of_range_messages() {
    let tmp = TempDir::new().unwrap();
    let at = |d: u32| Utc.with_ymd_and_hms(2023, 9, d, 12, 0, 0).unwrap();
    let mailbox = Arc::new(FakeMailbox::with_messages(vec![
        common::dated_message("early", at(1)),
        common::dated_message("inside", at(10)),
        common::dated_message("last-day", at(15)),
        common::dated_message("late", at(20)),
        common::message("undated"),
    ]));
    let (engine, mut rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));

    let mut config = common::config(tmp.path());
    config.filter = FilterSpec::new(
        None,
        NaiveDate::from_ymd_opt(2023, 9, 5),
        NaiveDate::from_ymd_opt(2023, 9, 15),
    )
    .unwrap();
    engine.run(&config, CancellationToken::new()).await.unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(
        common::ids_of(&events, "after_message_backup"),
        vec!["inside", "last-day", "undated"]
    );
    assert_eq!(common::end_counts(&events), (3, 0, 0, 3));
    assert_eq!(mailbox.fetches("early"), 0);
}

#[tokio::test]
async fn test_ids_unsafe_for_file_names_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mailbox = Arc::new(FakeMailbox::new(&["AAMk/ABC+def==", ".hidden"]));

    let (first, _rx) = common::engine(mailbox.clone(), Arc::new(FakeTokenProvider::default()));
    first
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();

    let (second, mut rx) = common::engine(mailbox, Arc::new(FakeTokenProvider::default()));
    second
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    let events = common::drain(&mut rx);

    assert_eq!(
        common::before_ids(&events, true),
        vec![".hidden", "AAMk/ABC+def=="]
    );
    assert_eq!(common::end_counts(&events), (0, 2, 0, 2));
}

#[tokio::test]
async fn test_empty_mailbox_completes() {
    let tmp = TempDir::new().unwrap();
    let (engine, mut rx) = common::engine(
        Arc::new(FakeMailbox::new(&[])),
        Arc::new(FakeTokenProvider::default()),
    );

    let summary = engine
        .run(&common::config(tmp.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(common::end_counts(&common::drain(&mut rx)), (0, 0, 0, 0));
}
