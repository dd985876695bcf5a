use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use inbox_relay::config::RelayConfig;
use inbox_relay::mailbox::ImapMailbox;
use inbox_relay::notify::TelegramNotifier;
use inbox_relay::relay::{Relay, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage. An error only
    // means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(summary) => {
            info!(
                forwarded = summary.forwarded,
                examined = summary.examined,
                "Mail check complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<RunSummary> {
    let config = RelayConfig::from_env().context("incomplete configuration")?;

    info!(
        account = %config.mailbox.username,
        host = %config.mailbox.imap_host,
        senders = %config.rules.allowed_senders.join(", "),
        secondary = config.rules.secondary.is_some(),
        "Checking mail"
    );

    let notifier = TelegramNotifier::new(&config.telegram).context("building Telegram client")?;

    let mut mailbox = ImapMailbox::connect(&config.mailbox)
        .await
        .with_context(|| {
            format!(
                "connecting to {}:{}",
                config.mailbox.imap_host, config.mailbox.imap_port
            )
        })?;

    let relay = Relay::new(&config, Arc::new(notifier));
    let summary = relay
        .run(&mut mailbox)
        .await
        .with_context(|| format!("scanning mailbox {}", config.mailbox.mailbox))?;

    Ok(summary)
}
