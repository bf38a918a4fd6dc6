//! Sync job coordination: queueing, state transitions, and the pipeline.
//!
//! One worker drains a queue of requested jobs so at most one sync runs at
//! a time, and a single-flight guard collapses duplicate requests for the
//! same mailbox. The job lifecycle is tracked on the credential row so the
//! status read model survives restarts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::domain::{CredentialId, MailCredential, NotificationKind, SyncState};
use crate::storage::{queries, Database};

use super::error::{Result, SyncError};
use super::extractor::TransactionExtractor;
use super::notifier::Notifier;
use super::scanner::MailboxScanner;
use super::upserter::{LedgerUpserter, UpsertOutcome};
use super::vault::CredentialVault;

/// Lifecycle event applied to a credential's [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync was requested and queued.
    Requested,
    /// The worker picked the job up.
    Started,
    /// The pipeline ran to the end.
    Succeeded,
    /// The job aborted or timed out.
    Failed,
}

/// Applies a lifecycle event, returning the next state or `None` when the
/// event is not valid in the current state.
pub fn transition(state: SyncState, event: SyncEvent) -> Option<SyncState> {
    match (state, event) {
        (SyncState::Idle | SyncState::Completed | SyncState::Failed, SyncEvent::Requested) => {
            Some(SyncState::Pending)
        }
        (SyncState::Pending, SyncEvent::Started) => Some(SyncState::InProgress),
        (SyncState::InProgress, SyncEvent::Succeeded) => Some(SyncState::Completed),
        // A failure is recordable from any live state, so a timed-out or
        // wedged job can still be marked.
        (SyncState::Pending | SyncState::InProgress, SyncEvent::Failed) => Some(SyncState::Failed),
        _ => None,
    }
}

/// Counters from one sync job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Messages returned by the scan.
    pub scanned: usize,
    /// New ledger rows written.
    pub created: usize,
    /// Messages whose transaction was already in the ledger.
    pub duplicates: usize,
    /// Messages skipped because extraction or persistence failed.
    pub failed: usize,
}

/// Outcome of the pipeline body, carrying partial counters on failure.
struct JobRun {
    report: JobReport,
    error: Option<SyncError>,
}

/// Queues and executes mailbox sync jobs.
pub struct SyncJobCoordinator {
    db: Database,
    vault: Arc<CredentialVault>,
    scanner: Arc<MailboxScanner>,
    extractor: Arc<TransactionExtractor>,
    upserter: Arc<LedgerUpserter>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    queue: mpsc::UnboundedSender<CredentialId>,
    jobs: Mutex<Option<mpsc::UnboundedReceiver<CredentialId>>>,
    in_flight: Mutex<HashSet<CredentialId>>,
    stopped: AtomicBool,
}

impl SyncJobCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        vault: Arc<CredentialVault>,
        scanner: Arc<MailboxScanner>,
        extractor: Arc<TransactionExtractor>,
        upserter: Arc<LedgerUpserter>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        Self {
            db,
            vault,
            scanner,
            extractor,
            upserter,
            notifier,
            clock,
            settings,
            queue,
            jobs: Mutex::new(Some(jobs)),
            in_flight: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Requests a sync for a mailbox.
    ///
    /// Returns `false` without queueing when the mailbox is revoked or a
    /// job for it is already queued or running.
    pub async fn request_sync(&self, credential_id: CredentialId) -> Result<bool> {
        let credential = queries::credentials::get_by_id(&self.db, credential_id)
            .await?
            .ok_or_else(|| SyncError::Config(format!("unknown credential {}", credential_id)))?;
        if credential.revoked {
            return Ok(false);
        }

        {
            let mut in_flight = self.guard();
            if !in_flight.insert(credential_id) {
                return Ok(false);
            }
        }

        self.advance(credential_id, credential.sync_state, SyncEvent::Requested, None)
            .await?;
        if self.queue.send(credential_id).is_err() {
            // Worker is gone; roll the guard back so a restart can retry.
            self.guard().remove(&credential_id);
            return Err(SyncError::Config("sync worker not running".to_string()));
        }
        info!(%credential_id, "sync queued");
        Ok(true)
    }

    /// Drains the job queue until [`stop`](Self::stop) is called and the
    /// sender side is dropped, or the receiver was already taken.
    pub async fn run_worker(self: Arc<Self>) {
        let Some(mut jobs) = self.take_receiver() else {
            warn!("sync worker already running");
            return;
        };
        info!("sync worker started");

        while let Some(credential_id) = jobs.recv().await {
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }
            self.execute(credential_id).await;
        }
        info!("sync worker stopped");
    }

    /// Requests a sync for every active mailbox on a fixed interval.
    pub async fn run_scheduler(self: Arc<Self>) {
        if !self.settings.enabled {
            info!("scheduled sync disabled");
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(self.settings.interval_seconds));
        info!(interval_seconds = self.settings.interval_seconds, "sync scheduler started");

        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::Relaxed) {
                info!("sync scheduler stopped");
                return;
            }
            match queries::credentials::list_active(&self.db).await {
                Ok(credentials) => {
                    for credential in credentials {
                        if let Err(e) = self.request_sync(credential.id).await {
                            error!(credential_id = %credential.id, error = %e, "failed to queue sync");
                        }
                    }
                }
                Err(e) => error!(error = %e, "failed to list mailboxes for scheduled sync"),
            }
        }
    }

    /// Signals the worker and scheduler loops to exit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Runs one queued job to a terminal state and releases the guard.
    async fn execute(&self, credential_id: CredentialId) {
        let run = self.execute_guarded(credential_id).await;
        if let Err(e) = run {
            error!(%credential_id, error = %e, "sync bookkeeping failed");
        }
        self.guard().remove(&credential_id);
    }

    async fn execute_guarded(&self, credential_id: CredentialId) -> Result<()> {
        let Some(credential) = queries::credentials::get_by_id(&self.db, credential_id).await?
        else {
            warn!(%credential_id, "queued mailbox no longer exists");
            return Ok(());
        };

        self.advance(
            credential_id,
            credential.sync_state,
            SyncEvent::Started,
            None,
        )
        .await?;
        self.notifier
            .notify(
                credential_id,
                NotificationKind::SyncStarted,
                format!("Syncing {}", credential.email),
                self.clock.now(),
            )
            .await?;

        let deadline = Duration::from_secs(self.settings.job_timeout_seconds);
        let run = match tokio::time::timeout(deadline, self.run_job(&credential)).await {
            Ok(run) => run,
            Err(_) => JobRun {
                report: JobReport::default(),
                error: Some(SyncError::Upstream(format!(
                    "sync timed out after {}s",
                    self.settings.job_timeout_seconds
                ))),
            },
        };

        match run.error {
            None => self.complete(&credential, run.report).await,
            Some(error) => self.fail(&credential, run.report, error).await,
        }
    }

    /// The pipeline body: validate tokens, scan, then extract and upsert
    /// each message in causal order.
    async fn run_job(&self, credential: &MailCredential) -> JobRun {
        let mut report = JobReport::default();

        let mut credential = match self.vault.ensure_valid(credential).await {
            Ok(credential) => credential,
            Err(e) => return JobRun { report, error: Some(e) },
        };

        let now = self.clock.now();
        let messages = match self.scan(&credential, now).await {
            Ok(messages) => messages,
            Err(SyncError::AuthExpired) => {
                // The provider rejected a token the vault still considered
                // valid. Refresh once and retry before giving up.
                warn!(credential_id = %credential.id, "access token rejected, refreshing");
                credential = match self.vault.force_refresh(&credential).await {
                    Ok(credential) => credential,
                    Err(e) => return JobRun { report, error: Some(e) },
                };
                match self.scan(&credential, now).await {
                    Ok(messages) => messages,
                    Err(e) => return JobRun { report, error: Some(e) },
                }
            }
            Err(e) => return JobRun { report, error: Some(e) },
        };
        report.scanned = messages.len();

        let mut watermark = credential.last_sync_at;
        for (index, message) in messages.iter().enumerate() {
            match self.ingest(credential.id, message).await {
                Ok(UpsertOutcome::Created { .. }) => report.created += 1,
                Ok(UpsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) if e.requires_relink() => {
                    return JobRun { report, error: Some(e) };
                }
                Err(e) => {
                    // One bad email must not sink the rest of the batch.
                    warn!(
                        credential_id = %credential.id,
                        message_id = %message.id,
                        error = %e,
                        "skipping message"
                    );
                    report.failed += 1;
                }
            }
            watermark = Some(watermark.map_or(message.received_at, |w| w.max(message.received_at)));
            self.notifier.progress(credential.id, index + 1, report.scanned);
        }

        if let Err(e) = queries::credentials::record_sync_success(
            &self.db,
            credential.id,
            watermark,
            report.created as i64,
        )
        .await
        {
            return JobRun { report, error: Some(e.into()) };
        }

        JobRun { report, error: None }
    }

    async fn scan(
        &self,
        credential: &MailCredential,
        now: DateTime<Utc>,
    ) -> Result<Vec<super::scanner::ScannedMessage>> {
        self.scanner
            .scan(
                &credential.access_token,
                &self.settings.label_name,
                credential.last_sync_at,
                now,
            )
            .await
    }

    async fn ingest(
        &self,
        credential_id: CredentialId,
        message: &super::scanner::ScannedMessage,
    ) -> Result<UpsertOutcome> {
        let extracted = self.extractor.extract(&message.text).await?;
        self.upserter.upsert(credential_id, &message.id, &extracted).await
    }

    async fn complete(&self, credential: &MailCredential, report: JobReport) -> Result<()> {
        self.advance(credential.id, SyncState::InProgress, SyncEvent::Succeeded, None)
            .await?;
        info!(credential_id = %credential.id, ?report, "sync completed");

        let message = if report.created == 0 {
            "Mailbox already up to date".to_string()
        } else if report.failed == 0 {
            format!("Synced {} new transactions", report.created)
        } else {
            format!(
                "Synced {} new transactions, {} messages skipped",
                report.created, report.failed
            )
        };
        self.notifier
            .notify(credential.id, NotificationKind::SyncCompleted, message, self.clock.now())
            .await?;

        if report.created > 0 {
            self.notifier
                .notify(
                    credential.id,
                    NotificationKind::TransactionsIngested,
                    format!("{} new transactions in your ledger", report.created),
                    self.clock.now(),
                )
                .await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        credential: &MailCredential,
        report: JobReport,
        error: SyncError,
    ) -> Result<()> {
        let reason = error.to_string();
        self.advance(
            credential.id,
            SyncState::InProgress,
            SyncEvent::Failed,
            Some(reason.clone()),
        )
        .await?;
        error!(credential_id = %credential.id, ?report, %reason, "sync failed");

        let (kind, message) = if error.requires_relink() {
            (
                NotificationKind::ReauthRequired,
                format!("Reconnect {} to resume syncing", credential.email),
            )
        } else {
            (
                NotificationKind::SyncFailed,
                format!(
                    "Sync stopped after {} of {} messages: {}",
                    report.created + report.duplicates + report.failed,
                    report.scanned,
                    reason
                ),
            )
        };
        self.notifier
            .notify(credential.id, kind, message, self.clock.now())
            .await?;
        Ok(())
    }

    /// Applies a lifecycle event and persists the new state.
    ///
    /// When the recorded state is out of step, e.g. `in_progress` left over
    /// from a crash, the event's target state is forced so the mailbox does
    /// not wedge.
    async fn advance(
        &self,
        credential_id: CredentialId,
        from: SyncState,
        event: SyncEvent,
        failed_reason: Option<String>,
    ) -> Result<SyncState> {
        let next = match transition(from, event) {
            Some(next) => next,
            None => {
                let forced = match event {
                    SyncEvent::Requested => SyncState::Pending,
                    SyncEvent::Started => SyncState::InProgress,
                    SyncEvent::Succeeded => SyncState::Completed,
                    SyncEvent::Failed => SyncState::Failed,
                };
                warn!(
                    %credential_id,
                    from = from.as_str(),
                    to = forced.as_str(),
                    "sync state out of step, forcing"
                );
                forced
            }
        };
        queries::credentials::set_sync_state(&self.db, credential_id, next, failed_reason).await?;
        Ok(next)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashSet<CredentialId>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<CredentialId>> {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::providers::ai::{
        CompletionRequest, CompletionResponse, EmbeddingClient, LlmClient, LlmError, LlmResult,
    };
    use crate::providers::mail::{
        MailClient, MailError, MailLabel, MailMessage, MessagePage, Result as MailResult,
    };
    use crate::providers::oauth::{CodeGrant, OAuthClient, OAuthError, TokenGrant};
    use crate::services::classifier::CategoryClassifier;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).unwrap()
    }

    struct StaticOAuth;

    #[async_trait]
    impl OAuthClient for StaticOAuth {
        async fn exchange_code(&self, _code: &str) -> std::result::Result<CodeGrant, OAuthError> {
            Ok(CodeGrant {
                access_token: "access".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_in: 3600,
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> std::result::Result<TokenGrant, OAuthError> {
            Ok(TokenGrant {
                access_token: "refreshed".to_string(),
                expires_in: 3600,
            })
        }
    }

    struct StaticMail {
        messages: Vec<MailMessage>,
    }

    #[async_trait]
    impl MailClient for StaticMail {
        async fn list_labels(&self, _token: &str) -> MailResult<Vec<MailLabel>> {
            Ok(vec![MailLabel {
                id: "L9".to_string(),
                name: "Transactions".to_string(),
            }])
        }

        async fn list_message_ids(
            &self,
            _token: &str,
            _label_id: &str,
            after: Option<DateTime<Utc>>,
            _page_token: Option<&str>,
        ) -> MailResult<MessagePage> {
            let ids = self
                .messages
                .iter()
                .filter(|m| after.map_or(true, |after| m.internal_date > after))
                .map(|m| m.id.clone())
                .collect();
            Ok(MessagePage {
                ids,
                next_page_token: None,
            })
        }

        async fn get_message(&self, _token: &str, message_id: &str) -> MailResult<MailMessage> {
            self.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| MailError::NotFound(message_id.to_string()))
        }
    }

    /// Pops canned completion responses in order.
    struct ScriptedLlm {
        responses: std::sync::Mutex<VecDeque<std::result::Result<String, ()>>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<std::result::Result<String, ()>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _r: &CompletionRequest) -> LlmResult<CompletionResponse> {
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => Ok(CompletionResponse { text }),
                Some(Err(())) => Err(LlmError::RateLimited {
                    retry_after_secs: None,
                }),
                None => Err(LlmError::InvalidResponse("script exhausted".to_string())),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedLlm {
        async fn embed(&self, _texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
            Err(LlmError::RateLimited {
                retry_after_secs: None,
            })
        }
    }

    fn mail_message(id: &str, hour: u32, body: &str) -> MailMessage {
        MailMessage {
            id: id.to_string(),
            subject: Some("Transaction alert".to_string()),
            from: Some("alerts@acmebank.example".to_string()),
            internal_date: at_hour(hour),
            body_text: Some(body.to_string()),
            body_html: None,
            snippet: None,
        }
    }

    fn extraction_json(reference: &str, amount: f64) -> String {
        format!(
            r#"{{"type":"debit","amount":{},"currency":"USD","date":"2025-03-14",
                "description":"POS purchase","currentBalance":900.0,
                "transactionId":"{}","accountNumber":"0123","accountName":"Main",
                "bankName":"Acme Bank"}}"#,
            amount, reference
        )
    }

    async fn coordinator(
        db: &Database,
        messages: Vec<MailMessage>,
        responses: Vec<std::result::Result<String, ()>>,
    ) -> Arc<SyncJobCoordinator> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let llm = Arc::new(ScriptedLlm::new(responses));
        let classifier = Arc::new(CategoryClassifier::new(llm.clone(), llm.clone(), 3, 0.6, 0.0));

        Arc::new(SyncJobCoordinator::new(
            db.clone(),
            Arc::new(CredentialVault::new(db.clone(), Arc::new(StaticOAuth), clock.clone())),
            Arc::new(MailboxScanner::new(Arc::new(StaticMail { messages }))),
            Arc::new(TransactionExtractor::new(llm, 0.0)),
            Arc::new(LedgerUpserter::new(db.clone(), classifier, clock.clone(), "USD")),
            Arc::new(Notifier::new(db.clone())),
            clock,
            SyncSettings::default(),
        ))
    }

    async fn connected_credential(db: &Database) -> CredentialId {
        queries::credentials::upsert(
            db,
            queries::credentials::NewCredential {
                email: "user@example.com".to_string(),
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: now() + chrono::Duration::hours(1),
            },
            now(),
        )
        .await
        .unwrap()
        .id
    }

    #[test]
    fn transition_covers_the_job_lifecycle() {
        use SyncEvent::*;
        assert_eq!(transition(SyncState::Idle, Requested), Some(SyncState::Pending));
        assert_eq!(transition(SyncState::Completed, Requested), Some(SyncState::Pending));
        assert_eq!(transition(SyncState::Failed, Requested), Some(SyncState::Pending));
        assert_eq!(transition(SyncState::Pending, Started), Some(SyncState::InProgress));
        assert_eq!(transition(SyncState::InProgress, Succeeded), Some(SyncState::Completed));
        assert_eq!(transition(SyncState::InProgress, Failed), Some(SyncState::Failed));
        assert_eq!(transition(SyncState::Pending, Failed), Some(SyncState::Failed));

        assert_eq!(transition(SyncState::Idle, Started), None);
        assert_eq!(transition(SyncState::InProgress, Requested), None);
        assert_eq!(transition(SyncState::Completed, Succeeded), None);
    }

    #[tokio::test]
    async fn request_sync_is_single_flight_per_mailbox() {
        let db = Database::open_in_memory().await.unwrap();
        let coordinator = coordinator(&db, Vec::new(), Vec::new()).await;
        let cred = connected_credential(&db).await;

        assert!(coordinator.request_sync(cred).await.unwrap());
        assert!(!coordinator.request_sync(cred).await.unwrap());

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn revoked_mailbox_is_not_queued() {
        let db = Database::open_in_memory().await.unwrap();
        let coordinator = coordinator(&db, Vec::new(), Vec::new()).await;
        let cred = connected_credential(&db).await;
        queries::credentials::mark_revoked(&db, cred).await.unwrap();

        assert!(!coordinator.request_sync(cred).await.unwrap());
    }

    #[tokio::test]
    async fn successful_job_ingests_and_advances_watermark() {
        let db = Database::open_in_memory().await.unwrap();
        let messages = vec![
            mail_message("m1", 8, "Debit alert FT-1"),
            mail_message("m2", 9, "Debit alert FT-2"),
        ];
        let responses = vec![
            Ok(extraction_json("FT-1", 10.0)),
            Ok(extraction_json("FT-2", 20.0)),
        ];
        let coordinator = coordinator(&db, messages, responses).await;
        let cred = connected_credential(&db).await;

        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Completed);
        assert_eq!(stored.last_sync_at, Some(at_hour(9)));
        assert_eq!(stored.emails_received, 2);
        assert_eq!(
            queries::transactions::count_for_credential(&db, cred).await.unwrap(),
            2
        );

        let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
        assert_eq!(unread.len(), 3);
        assert_eq!(unread[0].kind, NotificationKind::SyncStarted);
        assert_eq!(unread[0].message, "Syncing user@example.com");
        assert_eq!(unread[1].kind, NotificationKind::SyncCompleted);
        assert_eq!(unread[1].message, "Synced 2 new transactions");
        assert_eq!(unread[2].kind, NotificationKind::TransactionsIngested);
    }

    #[tokio::test]
    async fn rerun_with_no_new_mail_reports_up_to_date() {
        let db = Database::open_in_memory().await.unwrap();
        let messages = vec![mail_message("m1", 8, "Debit alert FT-1")];
        let coordinator = coordinator(
            &db,
            messages.clone(),
            vec![Ok(extraction_json("FT-1", 10.0))],
        )
        .await;
        let cred = connected_credential(&db).await;
        coordinator.execute(cred).await;

        // Second run: the watermark excludes m1, so nothing is scanned.
        let coordinator = self::coordinator(&db, messages, Vec::new()).await;
        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Completed);
        assert_eq!(stored.emails_received, 1);

        let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
        assert_eq!(
            unread.last().unwrap().message,
            "Mailbox already up to date"
        );
    }

    #[tokio::test]
    async fn bad_message_is_skipped_and_counted() {
        let db = Database::open_in_memory().await.unwrap();
        let messages = vec![
            mail_message("m1", 8, "Debit alert FT-1"),
            mail_message("m2", 9, "Promo newsletter"),
            mail_message("m3", 10, "Debit alert FT-3"),
        ];
        let responses = vec![
            Ok(extraction_json("FT-1", 10.0)),
            Ok("not a transaction".to_string()),
            Ok(extraction_json("FT-3", 30.0)),
        ];
        let coordinator = coordinator(&db, messages, responses).await;
        let cred = connected_credential(&db).await;

        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Completed);
        assert_eq!(stored.emails_received, 2);
        assert_eq!(
            queries::transactions::count_for_credential(&db, cred).await.unwrap(),
            2
        );

        let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
        assert_eq!(
            unread[1].message,
            "Synced 2 new transactions, 1 messages skipped"
        );
    }

    #[tokio::test]
    async fn missing_label_fails_the_job_with_partial_counts() {
        let db = Database::open_in_memory().await.unwrap();
        let coordinator = coordinator(&db, Vec::new(), Vec::new()).await;
        let cred = connected_credential(&db).await;

        // Default settings look for "Transactions"; point them elsewhere.
        let coordinator = Arc::new(SyncJobCoordinator::new(
            coordinator.db.clone(),
            coordinator.vault.clone(),
            coordinator.scanner.clone(),
            coordinator.extractor.clone(),
            coordinator.upserter.clone(),
            coordinator.notifier.clone(),
            coordinator.clock.clone(),
            SyncSettings {
                label_name: "Receipts".to_string(),
                ..SyncSettings::default()
            },
        ));
        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Failed);
        assert!(stored.failed_reason.unwrap().contains("Receipts"));
        assert!(stored.last_sync_at.is_none());

        let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
        assert_eq!(unread[0].kind, NotificationKind::SyncStarted);
        assert_eq!(unread[1].kind, NotificationKind::SyncFailed);
    }

    #[tokio::test]
    async fn revoked_refresh_surfaces_reauth_notification() {
        struct RevokingOAuth;

        #[async_trait]
        impl OAuthClient for RevokingOAuth {
            async fn exchange_code(&self, _code: &str) -> std::result::Result<CodeGrant, OAuthError> {
                Err(OAuthError::Rejected {
                    status: 400,
                    body: "unsupported".to_string(),
                })
            }

            async fn refresh(&self, _refresh_token: &str) -> std::result::Result<TokenGrant, OAuthError> {
                Err(OAuthError::Revoked("invalid_grant".to_string()))
            }
        }

        let db = Database::open_in_memory().await.unwrap();
        let base = coordinator(&db, Vec::new(), Vec::new()).await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let coordinator = Arc::new(SyncJobCoordinator::new(
            db.clone(),
            Arc::new(CredentialVault::new(db.clone(), Arc::new(RevokingOAuth), clock)),
            base.scanner.clone(),
            base.extractor.clone(),
            base.upserter.clone(),
            base.notifier.clone(),
            base.clock.clone(),
            SyncSettings::default(),
        ));

        // Token already expired, forcing a refresh that reports revocation.
        let cred = queries::credentials::upsert(
            &db,
            queries::credentials::NewCredential {
                email: "user@example.com".to_string(),
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: now() - chrono::Duration::hours(1),
            },
            now(),
        )
        .await
        .unwrap()
        .id;

        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Failed);
        assert!(stored.revoked);

        let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
        assert_eq!(unread[1].kind, NotificationKind::ReauthRequired);

        // Revoked mailboxes drop out of the schedule.
        assert!(!coordinator.request_sync(cred).await.unwrap());
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_scan_retried() {
        /// Rejects every call until the access token has been refreshed.
        struct TokenGatedMail {
            inner: StaticMail,
        }

        #[async_trait]
        impl MailClient for TokenGatedMail {
            async fn list_labels(&self, token: &str) -> MailResult<Vec<MailLabel>> {
                if token != "refreshed" {
                    return Err(MailError::Authentication("unauthorized".to_string()));
                }
                self.inner.list_labels(token).await
            }

            async fn list_message_ids(
                &self,
                token: &str,
                label_id: &str,
                after: Option<DateTime<Utc>>,
                page_token: Option<&str>,
            ) -> MailResult<MessagePage> {
                self.inner
                    .list_message_ids(token, label_id, after, page_token)
                    .await
            }

            async fn get_message(&self, token: &str, message_id: &str) -> MailResult<MailMessage> {
                self.inner.get_message(token, message_id).await
            }
        }

        let db = Database::open_in_memory().await.unwrap();
        let messages = vec![mail_message("m1", 8, "Debit alert FT-1")];
        let base = coordinator(&db, Vec::new(), vec![Ok(extraction_json("FT-1", 10.0))]).await;
        let coordinator = Arc::new(SyncJobCoordinator::new(
            db.clone(),
            base.vault.clone(),
            Arc::new(MailboxScanner::new(Arc::new(TokenGatedMail {
                inner: StaticMail { messages },
            }))),
            base.extractor.clone(),
            base.upserter.clone(),
            base.notifier.clone(),
            base.clock.clone(),
            SyncSettings::default(),
        ));

        // The stored token is nowhere near expiry, so the vault hands it
        // out as-is and the provider's rejection is only seen mid-job.
        let cred = connected_credential(&db).await;
        coordinator.execute(cred).await;

        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Completed);
        assert_eq!(stored.access_token, "refreshed");
        assert!(!stored.revoked);
        assert_eq!(
            queries::transactions::count_for_credential(&db, cred).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn worker_drains_queued_jobs() {
        let db = Database::open_in_memory().await.unwrap();
        let messages = vec![mail_message("m1", 8, "Debit alert FT-1")];
        let coordinator = coordinator(&db, messages, vec![Ok(extraction_json("FT-1", 10.0))]).await;
        let cred = connected_credential(&db).await;

        let worker = tokio::spawn(coordinator.clone().run_worker());
        assert!(coordinator.request_sync(cred).await.unwrap());

        // Wait for the job to reach a terminal state.
        for _ in 0..200 {
            let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
            if stored.sync_state == SyncState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stored = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Completed);

        // A fresh request must be accepted once the guard is released.
        assert!(coordinator.request_sync(cred).await.unwrap());
        coordinator.stop();
        worker.abort();
    }
}
