//! mailmint - entry point for the ingestion daemon

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting mailmint");

    if let Err(e) = mailmint::daemon::run().await {
        tracing::error!("Daemon error: {:#}", e);
        std::process::exit(1);
    }
}
