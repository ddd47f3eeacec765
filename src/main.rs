use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use inbox_responder::channels::{ImapConnector, SmtpDispatcher};
use inbox_responder::config::ResponderConfig;
use inbox_responder::error::{MailboxError, WatchError};
use inbox_responder::llm::create_provider;
use inbox_responder::pipeline::{LlmReplyService, MessagePipeline};
use inbox_responder::watcher::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    // Optional .env next to the binary's working directory
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match ResponderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Set it in the environment or in a .env file.");
            return ExitCode::from(2);
        }
    };

    eprintln!("📬 Inbox Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   IMAP: {}:{} ({})",
        config.mailbox.host, config.mailbox.port, config.mailbox.folder
    );
    eprintln!("   SMTP: {}:{}", config.smtp.host, config.smtp.port);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Attachment: {}", config.profile.attachment_path.display());
    eprintln!("   Press Ctrl-C to stop.\n");

    let mut supervisor = match build_supervisor(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    match supervisor.run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(WatchError::Mailbox(MailboxError::Folder { folder, reason })) => {
            eprintln!("Error: folder {folder:?} cannot be opened: {reason}");
            eprintln!("  Check IMAP_FOLDER.");
            ExitCode::from(2)
        }
        Err(e) if e.is_fatal() => {
            eprintln!("Invalid credentials. Authentication failed.");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

fn build_supervisor(config: ResponderConfig) -> anyhow::Result<Supervisor> {
    let llm = create_provider(&config.llm).context("failed to create LLM provider")?;
    let service = Arc::new(LlmReplyService::new(llm));

    let own_address = config.smtp.from_address.clone();
    let dispatcher = Arc::new(SmtpDispatcher::new(
        config.smtp,
        config.watch.service_timeout,
    ));

    let connector = Arc::new(
        ImapConnector::new(config.mailbox).context("failed to prepare IMAP connector")?,
    );

    let pipeline = MessagePipeline::new(service, dispatcher, config.profile, own_address);
    Ok(Supervisor::new(connector, pipeline, config.watch))
}
