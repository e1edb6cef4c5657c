//! Remote/local set difference
//!
//! Given the remote listing R and the local index L:
//!
//! - `to_fetch` = R − L, in listing order
//! - `already_present` = R ∩ L, in listing order
//! - `to_delete` = L − R, only when deletions are enabled, sorted by id
//!
//! Providers may repeat an id across pages; only its first occurrence counts.

use std::collections::HashSet;

use mailvault_core::domain::{LocalRecord, MessageId, MessageRef};
use tracing::debug;

use crate::store::LocalIndex;

/// What a session has to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Remote messages with no local file
    pub to_fetch: Vec<MessageRef>,
    /// Local records of remote messages already backed up
    pub already_present: Vec<LocalRecord>,
    /// Local records whose message is gone remotely
    pub to_delete: Vec<LocalRecord>,
}

impl SyncPlan {
    /// Number of distinct remote messages covered by the plan
    pub fn total(&self) -> usize {
        self.to_fetch.len() + self.already_present.len()
    }
}

/// Computes [`SyncPlan`]s
pub struct DiffEngine;

impl DiffEngine {
    pub fn compute(remote: &[MessageRef], local: &LocalIndex, sync_deletes: bool) -> SyncPlan {
        let mut seen: HashSet<&MessageId> = HashSet::with_capacity(remote.len());
        let mut plan = SyncPlan::default();

        for message in remote {
            if !seen.insert(message.id()) {
                continue;
            }
            match local.get(message.id()) {
                Some(record) => plan.already_present.push(record.clone()),
                None => plan.to_fetch.push(message.clone()),
            }
        }

        if sync_deletes {
            plan.to_delete = local
                .values()
                .filter(|record| !seen.contains(record.id()))
                .cloned()
                .collect();
            plan.to_delete.sort_by(|a, b| a.id().cmp(b.id()));
        }

        debug!(
            remote = remote.len(),
            local = local.len(),
            to_fetch = plan.to_fetch.len(),
            already_present = plan.already_present.len(),
            to_delete = plan.to_delete.len(),
            "Computed sync plan"
        );
        plan
    }
}
