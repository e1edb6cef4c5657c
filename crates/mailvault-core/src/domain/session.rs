//! BackupSession domain entity
//!
//! This module defines the BackupSession entity which tracks the lifecycle
//! and counters of one backup run. The state machine is:
//!
//! ```text
//! Idle -> Authorizing -> Listing -> Syncing -> Completed
//!   \________\______________\_________\_____-> Failed
//! ```
//!
//! Counters live in [`SessionCounters`], shared with download workers
//! through an `Arc` and updated with atomic increments.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::event::BackupEvent;
use super::newtypes::SessionId;

/// Lifecycle state of a backup session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Waiting for an access token
    Authorizing,
    /// Enumerating remote messages and scanning the data folder
    Listing,
    /// Downloading and (optionally) deleting
    Syncing,
    /// All work drained and `EndBackup` emitted
    Completed,
    /// Aborted by an authorization or data folder failure
    Failed,
}

impl SessionState {
    /// Returns true for `Completed` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Checks whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Authorizing)
            | (Authorizing, Listing)
            | (Listing, Syncing)
            | (Syncing, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Authorizing => "authorizing",
            SessionState::Listing => "listing",
            SessionState::Syncing => "syncing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Counters mutated concurrently by download workers
#[derive(Debug, Default)]
pub struct SessionCounters {
    total: AtomicU64,
    backed_up: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicBool,
}

impl SessionCounters {
    /// Sets the number of remote messages matching the filter
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Records a successful backup, returning the new backed-up count
    pub fn record_backed_up(&self) -> u64 {
        self.backed_up.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records a local deletion, returning the new deleted count
    pub fn record_deleted(&self) -> u64 {
        self.deleted.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records a message given up on after its final error
    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Flags the run as cancelled by the user
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn backed_up(&self) -> u64 {
        self.backed_up.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Everything matching the filter that was not backed up in this run
    pub fn skipped(&self) -> u64 {
        self.total().saturating_sub(self.backed_up())
    }
}

/// Final counts of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub session_id: SessionId,
    pub backed_up: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub total: u64,
    /// Messages skipped because their final attempt failed
    pub failed: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Represents one backup run
#[derive(Debug)]
pub struct BackupSession {
    id: SessionId,
    state: SessionState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    failure: Option<String>,
    counters: Arc<SessionCounters>,
}

impl BackupSession {
    /// Creates a new session in `Idle` with zero counters
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the reason recorded by [`BackupSession::fail`]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Returns a handle to the shared counters
    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    // --- Transitions ---

    /// Moves to `next`, rejecting transitions outside the lifecycle graph
    pub fn transition_to(&mut self, next: SessionState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Moves to `Failed`, recording the reason
    ///
    /// A session already in a terminal state is left unchanged.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Failed;
        self.failure = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// Returns the final counts
    pub fn summary(&self) -> BackupSummary {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let duration_ms = (end - self.started_at).num_milliseconds().max(0) as u64;
        BackupSummary {
            session_id: self.id,
            backed_up: self.counters.backed_up(),
            skipped: self.counters.skipped(),
            deleted: self.counters.deleted(),
            total: self.counters.total(),
            failed: self.counters.failed(),
            cancelled: self.counters.is_cancelled(),
            duration_ms,
        }
    }

    /// Builds the `EndBackup` event from the current counters
    pub fn end_event(&self) -> BackupEvent {
        BackupEvent::EndBackup {
            backed_up: self.counters.backed_up(),
            skipped: self.counters.skipped(),
            deleted: self.counters.deleted(),
            total: self.counters.total(),
        }
    }
}

impl Default for BackupSession {
    fn default() -> Self {
        Self::new()
    }
}
