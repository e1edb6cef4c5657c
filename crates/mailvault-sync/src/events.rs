//! Event fan-out
//!
//! [`EventBus`] delivers every [`BackupEvent`] to the registered sinks in
//! registration order and mirrors it into `tracing`. Sinks are registered
//! before the session starts; the bus is immutable while it runs.

use std::sync::Arc;

use mailvault_core::domain::{BackupEvent, LogLevel};
use mailvault_core::ports::IEventSink;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Forwards events into an unbounded channel
struct ChannelSink {
    tx: mpsc::UnboundedSender<BackupEvent>,
}

impl IEventSink for ChannelSink {
    fn emit(&self, event: &BackupEvent) {
        // A dropped receiver just stops listening
        let _ = self.tx.send(event.clone());
    }
}

/// Fan-out of backup events to subscribers
#[derive(Default, Clone)]
pub struct EventBus {
    sinks: Vec<Arc<dyn IEventSink>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink
    pub fn subscribe(&mut self, sink: Arc<dyn IEventSink>) {
        self.sinks.push(sink);
    }

    /// Registers a channel and returns its receiving end
    ///
    /// The channel closes once the bus (and every clone of it) is dropped.
    pub fn channel(&mut self) -> mpsc::UnboundedReceiver<BackupEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Arc::new(ChannelSink { tx }));
        rx
    }

    /// Number of registered sinks
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Delivers an event to every sink
    pub fn emit(&self, event: BackupEvent) {
        trace_event(&event);
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

fn trace_event(event: &BackupEvent) {
    match event {
        BackupEvent::BeforeMessageBackup { id, skip, .. } => {
            debug!(%id, skip, "Before message backup");
        }
        BackupEvent::AfterMessageBackup {
            id,
            completed,
            total,
            ..
        } => debug!(%id, completed, total, "Message backed up"),
        BackupEvent::MessageError {
            id,
            code,
            message,
            retryable,
        } => warn!(%id, code, retryable, "Message error: {}", message),
        BackupEvent::MessageDelete { id, backup_file } => {
            info!(%id, file = %backup_file.display(), "Local message deleted");
        }
        BackupEvent::Log { level, message } => match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Debug => debug!("{}", message),
        },
        BackupEvent::EndBackup {
            backed_up,
            skipped,
            deleted,
            total,
        } => info!(backed_up, skipped, deleted, total, "Backup completed"),
    }
}
