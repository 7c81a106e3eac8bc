use std::sync::Arc;

use anyhow::Context;

use dlp_gateway::classifier::http::HttpClassifier;
use dlp_gateway::config::GatewayConfig;
use dlp_gateway::relay::SmtpRelay;
use dlp_gateway::routing::MailRouter;
use dlp_gateway::session::SessionHandler;
use dlp_gateway::smtp::SmtpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(writer)
        .init();

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;

    eprintln!("🛡️  DLP Gateway v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP intake: {}", config.smtp.listen_addr);
    eprintln!("   Classifier: {}/classify", config.classifier.api_url.trim_end_matches('/'));
    eprintln!("   Relay: {}:{}", config.relay.host, config.relay.port);
    eprintln!(
        "   Policy: {} (on classifier failure: {})",
        config.thresholds.version(),
        config.failure_action.label()
    );
    eprintln!(
        "   Mailboxes: quarantine={} security={}\n",
        config.mailboxes.quarantine, config.mailboxes.security
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let classifier = HttpClassifier::new(&config.classifier, config.thresholds)
        .context("Failed to build classifier client")?;
    let relay = SmtpRelay::new(&config.relay);
    let router = MailRouter::new(Arc::new(relay), config.mailboxes.clone());
    let handler = Arc::new(SessionHandler::new(
        Arc::new(classifier),
        router,
        config.failure_action,
    ));

    // ── SMTP intake ──────────────────────────────────────────────────────
    let server = SmtpServer::bind(config.smtp.clone(), handler)
        .await
        .context("Failed to start SMTP intake")?;

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
