//! Event sink port (driven/secondary port)
//!
//! Anything that wants to observe a backup session implements `IEventSink`.
//! Delivery is synchronous and fire-and-forget: sinks must not block, and
//! there is no way for a sink to influence the session.

use crate::domain::event::BackupEvent;

/// Receiver of backup events
pub trait IEventSink: Send + Sync {
    /// Handles one event
    fn emit(&self, event: &BackupEvent);
}

impl<F> IEventSink for F
where
    F: Fn(&BackupEvent) + Send + Sync,
{
    fn emit(&self, event: &BackupEvent) {
        self(event)
    }
}
