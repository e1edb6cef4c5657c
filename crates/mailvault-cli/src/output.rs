use mailvault_core::domain::{BackupEvent, BackupSummary, LogLevel};

/// Trait for formatting CLI output
pub trait OutputFormatter: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    /// Shows the authorization URL the user has to open
    fn auth_url(&self, url: &str);
    /// Renders one backup event as it happens
    fn event(&self, event: &BackupEvent);
    /// Renders the final summary of a finished session
    fn summary(&self, summary: &BackupSummary);
}

/// Human-readable text for an event, `None` for events that print nothing
pub fn describe_event(event: &BackupEvent) -> Option<String> {
    match event {
        BackupEvent::BeforeMessageBackup {
            backup_file, skip, ..
        } => skip.then(|| {
            format!(
                "Message exists locally, skipping: {}",
                backup_file.display()
            )
        }),
        BackupEvent::AfterMessageBackup {
            completed, total, ..
        } => Some(format!(
            "Message backed up successfully. Progress: {}/{}",
            completed, total
        )),
        BackupEvent::MessageError {
            code,
            message,
            retryable,
            ..
        } => {
            let action = if *retryable { "retrying" } else { "skipping" };
            Some(format!(
                "Error backing up message, {}: {}: {}",
                action, code, message
            ))
        }
        BackupEvent::MessageDelete { backup_file, .. } => Some(format!(
            "Message not present remotely, deleting local file: {}",
            backup_file.display()
        )),
        BackupEvent::Log { level, message } => match level {
            LogLevel::Debug => None,
            LogLevel::Info | LogLevel::Warn => Some(message.clone()),
        },
        BackupEvent::EndBackup { .. } => None,
    }
}

/// Closing lines printed for `EndBackup`
///
/// The deleted count only appears when deletes were synchronized.
pub fn completion_lines(
    backed_up: u64,
    skipped: u64,
    deleted: u64,
    sync_deletes: bool,
) -> Vec<String> {
    let mut lines = vec![
        "Backup Completed".to_string(),
        format!("Messages backed up: {}", backed_up),
        format!("Messages skipped: {}", skipped),
    ];
    if sync_deletes {
        lines.push(format!("Messages deleted: {}", deleted));
    }
    lines
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter {
    sync_deletes: bool,
}

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn auth_url(&self, url: &str) {
        println!("To begin, please authorize MailVault by opening this URL in your browser:");
        println!();
        println!("  {}", url);
        println!();
    }
    fn event(&self, event: &BackupEvent) {
        match event {
            BackupEvent::EndBackup {
                backed_up,
                skipped,
                deleted,
                ..
            } => {
                let lines = completion_lines(*backed_up, *skipped, *deleted, self.sync_deletes);
                if let Some((title, counts)) = lines.split_first() {
                    self.success(title);
                    for line in counts {
                        self.info(line);
                    }
                }
            }
            BackupEvent::MessageError {
                retryable: false, ..
            }
            | BackupEvent::Log {
                level: LogLevel::Warn,
                ..
            } => {
                if let Some(text) = describe_event(event) {
                    self.warn(&text);
                }
            }
            _ => {
                if let Some(text) = describe_event(event) {
                    println!("{}", text);
                }
            }
        }
    }
    fn summary(&self, summary: &BackupSummary) {
        if summary.failed > 0 {
            self.warn(&format!(
                "{} message(s) could not be backed up",
                summary.failed
            ));
        }
        if summary.cancelled {
            self.warn("Backup was cancelled before all messages were processed");
        }
    }
}

/// JSON lines output formatter
pub struct JsonFormatter;

impl JsonFormatter {
    fn line(value: &serde_json::Value) -> String {
        serde_json::to_string(value).unwrap_or_default()
    }
}

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!(
            "{}",
            serde_json::json!({"success": true, "message": message})
        );
    }
    fn error(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"success": false, "error": message})
        );
    }
    fn warn(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"level": "warning", "message": message})
        );
    }
    fn info(&self, _message: &str) {}
    fn auth_url(&self, url: &str) {
        println!(
            "{}",
            Self::line(&serde_json::json!({"event": "authorization_url", "url": url}))
        );
    }
    fn event(&self, event: &BackupEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, kind = event.kind(), "Could not serialize event"),
        }
    }
    fn summary(&self, summary: &BackupSummary) {
        println!(
            "{}",
            Self::line(&serde_json::json!({"summary": summary}))
        );
    }
}

pub fn get_formatter(json: bool, sync_deletes: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(HumanFormatter { sync_deletes })
    }
}
