//! Daemon assembly: wires providers, services, and background loops.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::providers::ai::OpenAiClient;
use crate::providers::fx::HttpRateSource;
use crate::providers::mail::GmailClient;
use crate::providers::oauth::GoogleOAuth;
use crate::services::{
    CategoryClassifier, CredentialVault, ExchangeRateCache, LedgerUpserter, MailboxScanner,
    Notifier, SyncJobCoordinator, TransactionExtractor,
};
use crate::storage::Database;

/// Currency assigned to transactions whose alert names no known currency.
const BASE_CURRENCY: &str = "USD";

/// Default database location under the platform data directory.
fn database_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "mailmint")
        .ok_or_else(|| anyhow!("could not determine a data directory for this platform"))?;
    Ok(dirs.data_dir().join("mailmint.db"))
}

/// Runs the daemon until interrupted.
pub async fn run() -> Result<()> {
    let settings_path = Settings::default_path().context("resolving settings path")?;
    let settings = Settings::load(&settings_path).context("loading settings")?;

    let db_path = database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open(&db_path).await.context("opening database")?;
    info!(path = %db_path.display(), "database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let oauth = Arc::new(GoogleOAuth::new(settings.google.clone()));
    let mail = Arc::new(GmailClient::new());
    let mut ai = OpenAiClient::new(
        settings.ai.api_key.clone(),
        settings.ai.completion_model.clone(),
        settings.ai.embedding_model.clone(),
    );
    if let Some(base_url) = &settings.ai.base_url {
        ai = ai.with_base_url(base_url.clone());
    }
    let ai = Arc::new(ai);
    let rate_source = Arc::new(HttpRateSource::new(
        settings.rates.base_url.clone(),
        settings.rates.access_key.clone(),
    ));

    let vault = Arc::new(CredentialVault::new(db.clone(), oauth, clock.clone()));
    let scanner = Arc::new(MailboxScanner::new(mail));
    let extractor = Arc::new(TransactionExtractor::new(
        ai.clone(),
        settings.ai.temperature,
    ));
    let classifier = Arc::new(CategoryClassifier::new(
        ai.clone(),
        ai.clone(),
        settings.ai.classify_top_k,
        settings.ai.classify_min_similarity,
        settings.ai.temperature,
    ));
    let upserter = Arc::new(LedgerUpserter::new(
        db.clone(),
        classifier.clone(),
        clock.clone(),
        BASE_CURRENCY,
    ));
    let notifier = Arc::new(Notifier::new(db.clone()));

    // Stage L needs category embeddings; a failure here just means freshly
    // added categories stay uncategorized until the next start.
    if let Err(e) = classifier.ensure_embeddings(&db).await {
        warn!(error = %e, "category embedding backfill failed");
    }

    let coordinator = Arc::new(SyncJobCoordinator::new(
        db.clone(),
        vault,
        scanner,
        extractor,
        upserter,
        notifier,
        clock.clone(),
        settings.sync.clone(),
    ));
    let rate_cache = Arc::new(ExchangeRateCache::new(
        db,
        rate_source,
        clock,
        settings.rates.clone(),
    ));

    let worker = tokio::spawn(coordinator.clone().run_worker());
    let sync_scheduler = tokio::spawn(coordinator.clone().run_scheduler());
    let rate_scheduler = tokio::spawn(rate_cache.clone().run_scheduler());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    coordinator.stop();
    rate_cache.stop();
    sync_scheduler.abort();
    rate_scheduler.abort();
    worker.abort();
    Ok(())
}
