//! MailVault CLI - back up a mailbox to a folder of `.eml` files
//!
//! Exit codes:
//! - 0: backup completed (possibly with per-message failures or cancelled)
//! - 1: invalid arguments or configuration
//! - 2: authorization failed
//! - 3: data folder unusable
//! - 4: message listing failed

mod args;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use mailvault_core::config::Config;
use mailvault_core::domain::BackupEvent;
use mailvault_remote::auth::AuthUrlNotice;
use mailvault_remote::OAuthTokenProvider;
use mailvault_sync::{BackupEngine, BackupError, EventBus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Cli;
use crate::output::{get_formatter, OutputFormatter};

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Usage = 1,
    Auth = 2,
    DataFolder = 3,
    Listing = 4,
}

impl Exit {
    fn for_error(error: &BackupError) -> Self {
        match error {
            BackupError::Auth(_) => Exit::Auth,
            BackupError::DataFolder(_) => Exit::DataFolder,
            BackupError::Listing(_) => Exit::Listing,
            BackupError::Config(_) | BackupError::Domain(_) => Exit::Usage,
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

type Failure = (Exit, String);

fn usage(error: anyhow::Error) -> Failure {
    (Exit::Usage, format!("{:#}", error))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let exit = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => Exit::Usage.into(),
            };
            let _ = e.print();
            return exit;
        }
    };

    let config = match cli.load_config() {
        Ok(file) => cli.apply(file),
        Err(e) => {
            get_formatter(cli.json, false).error(&format!("{:#}", e));
            return Exit::Usage.into();
        }
    };

    init_tracing(&cli, &config);

    let formatter: Arc<dyn OutputFormatter> =
        Arc::from(get_formatter(cli.json, config.backup.sync_deletes));

    match run(&cli, &config, Arc::clone(&formatter)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err((exit, message)) => {
            formatter.error(&message);
            exit.into()
        }
    }
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli, config: &Config, formatter: Arc<dyn OutputFormatter>) -> Result<(), Failure> {
    let session = cli.session_config(config).map_err(usage)?;
    let kind = Cli::provider_kind(config).map_err(usage)?;
    let mailbox = kind.mailbox(session.request_timeout).map_err(usage)?;

    let notice_output = Arc::clone(&formatter);
    let notice: AuthUrlNotice = Arc::new(move |url: &str| notice_output.auth_url(url));
    let tokens = OAuthTokenProvider::new(kind)
        .with_redirect_port(config.network.redirect_port)
        .with_auth_timeout(config.auth_timeout())
        .with_request_timeout(session.request_timeout)
        .with_keyring(config.auth.use_keyring)
        .with_auth_url_notice(notice);

    let mut events = EventBus::new();
    let event_output = Arc::clone(&formatter);
    events.subscribe(Arc::new(move |event: &BackupEvent| event_output.event(event)));

    let engine = BackupEngine::new(mailbox, Arc::new(tokens), events);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    formatter.info(&format!(
        "Starting {} backup into {}",
        kind,
        session.data_folder.display()
    ));
    formatter.info("Retrieving message list (note: this operation may take some time).");

    match engine.run(&session, cancel).await {
        Ok(summary) => {
            formatter.summary(&summary);
            Ok(())
        }
        Err(e) => Err((Exit::for_error(&e), e.to_string())),
    }
}

/// Cancels `token` on Ctrl+C or SIGTERM
///
/// In-flight messages finish or are abandoned; the session still ends with
/// its summary.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping backup"),
        _ = terminate => info!("Received SIGTERM, stopping backup"),
    }

    token.cancel();
}
