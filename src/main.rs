//! mailround - Entry point for the mail round trip probe

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use mailround::config::Settings;
use mailround::providers::email::EndpointRegistry;
use mailround::providers::notify::{LogNotifier, Notifier, WebhookNotifier};
use mailround::services::{sweep_mailbox, Scheduler, StatusLogEngine};

/// Verifies end-to-end mail delivery between mailbox pairs.
#[derive(Debug, Parser)]
#[command(name = "mailround", version, about)]
struct Cli {
    /// Log at DEBUG level and include DEBUG lines in failure reports
    #[arg(short, long)]
    verbose: bool,

    /// Leave matched test mails in the inbound mailboxes
    #[arg(long)]
    no_cleanup: bool,

    /// Delete all test mails from every inbound mailbox and exit
    #[arg(long)]
    full_clean: bool,

    /// Read settings from this file before the environment
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env(cli.env_file.as_deref());

    let debug = cli.verbose || settings.as_ref().is_ok_and(|s| s.debug);
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting mailround");

    let mut settings = settings.context("loading settings")?;
    if cli.no_cleanup {
        settings.cleanup = false;
    }
    if cli.verbose {
        settings.debug = true;
    }

    let registry = EndpointRegistry::from_settings(&settings);

    if cli.full_clean {
        return full_clean(&registry).await;
    }

    settings.validate().context("invalid configuration")?;
    let settings = Arc::new(settings);

    let notifier: Arc<dyn Notifier> = match &settings.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone()).context("building webhook client")?,
        ),
        None => {
            tracing::warn!("No webhook configured, failures are only logged");
            Arc::new(LogNotifier)
        }
    };

    let engine = StatusLogEngine::start(Arc::clone(&settings), Some(Arc::clone(&notifier)));
    let scheduler = Scheduler::new(
        Arc::clone(&settings),
        registry,
        notifier,
        engine.handle(),
    );

    tracing::info!(
        rounds = settings.rounds.len(),
        interval_secs = settings.check_interval.as_secs(),
        "Monitoring started"
    );

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await;

    engine.stop().await;
    tracing::info!("mailround stopped");
    Ok(())
}

async fn full_clean(registry: &EndpointRegistry) -> Result<()> {
    let mut failures = 0;

    for (name, mailbox) in registry.mailboxes() {
        match sweep_mailbox(name, mailbox.as_ref()).await {
            Ok(deleted) => println!("{}: deleted {} test mails", name, deleted),
            Err(e) => {
                tracing::error!(mailbox = name, error = %e, "Full clean failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} mailboxes could not be cleaned", failures);
    }
    Ok(())
}
