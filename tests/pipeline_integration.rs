//! Integration tests for the ingestion pipeline.
//!
//! These tests drive a full sync through the public API with in-memory
//! providers, and verify cross-module properties: causal ordering of
//! ingested transactions, idempotent replays, and deterministic
//! categorization. Each service module contains its own unit tests for
//! detailed logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use mailmint::clock::{Clock, ManualClock};
use mailmint::config::SyncSettings;
use mailmint::domain::{CredentialId, SyncState, TransactionKind};
use mailmint::providers::ai::{
    CompletionRequest, CompletionResponse, EmbeddingClient, LlmClient, LlmError, LlmResult,
};
use mailmint::providers::mail::{
    MailClient, MailError, MailLabel, MailMessage, MessagePage, Result as MailResult,
};
use mailmint::providers::oauth::{CodeGrant, OAuthClient, Result as OAuthResult, TokenGrant};
use mailmint::services::{
    CategoryClassifier, CredentialVault, LedgerUpserter, MailboxScanner, Notifier,
    SyncJobCoordinator, TransactionExtractor,
};
use mailmint::storage::{queries, Database};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
}

struct StaticOAuth;

#[async_trait]
impl OAuthClient for StaticOAuth {
    async fn exchange_code(&self, _code: &str) -> OAuthResult<CodeGrant> {
        Ok(CodeGrant {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: 3600,
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> OAuthResult<TokenGrant> {
        Ok(TokenGrant {
            access_token: "refreshed".to_string(),
            expires_in: 3600,
        })
    }
}

/// In-memory mailbox. Lists ids newest-first, the way the real provider
/// does, so ordering must come from the scanner.
struct StaticMail {
    messages: Vec<MailMessage>,
    /// When false, listing ignores the `after` bound, simulating a replay
    /// of already-seen mail.
    respect_after: bool,
}

#[async_trait]
impl MailClient for StaticMail {
    async fn list_labels(&self, _token: &str) -> MailResult<Vec<MailLabel>> {
        Ok(vec![
            MailLabel {
                id: "INBOX".to_string(),
                name: "INBOX".to_string(),
            },
            MailLabel {
                id: "Label_7".to_string(),
                name: "Transactions".to_string(),
            },
        ])
    }

    async fn list_message_ids(
        &self,
        _token: &str,
        _label_id: &str,
        after: Option<DateTime<Utc>>,
        _page_token: Option<&str>,
    ) -> MailResult<MessagePage> {
        let mut listed: Vec<&MailMessage> = self
            .messages
            .iter()
            .filter(|m| {
                !self.respect_after || after.map_or(true, |after| m.internal_date > after)
            })
            .collect();
        listed.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));
        Ok(MessagePage {
            ids: listed.into_iter().map(|m| m.id.clone()).collect(),
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

/// Extraction stub keyed on the message body, so responses stay correct
/// regardless of how many times or in which order messages are processed.
struct KeyedLlm;

#[async_trait]
impl LlmClient for KeyedLlm {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reference = body
            .split_whitespace()
            .find(|t| t.starts_with("FT-"))
            .ok_or_else(|| LlmError::InvalidResponse("no reference in body".to_string()))?;
        let n: i64 = reference
            .trim_start_matches("FT-")
            .parse()
            .map_err(|_| LlmError::InvalidResponse("bad reference".to_string()))?;

        let text = format!(
            r#"{{"type":"debit","amount":{}.0,"currency":"USD","date":"2025-03-1{}",
                "description":"POS purchase SHOPRITE LEKKI {}","currentBalance":{}.0,
                "transactionId":"{}","accountNumber":"0123456789","accountName":"Main",
                "bankName":"Acme Bank"}}"#,
            100 * n,
            n,
            reference,
            1000 - 100 * n,
            reference
        );
        Ok(CompletionResponse { text })
    }
}

#[async_trait]
impl EmbeddingClient for KeyedLlm {
    async fn embed(&self, _texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        Err(LlmError::ApiError {
            status: 503,
            message: "embeddings offline".to_string(),
        })
    }
}

fn alert(n: i64) -> MailMessage {
    MailMessage {
        id: format!("msg-{}", n),
        subject: Some("Transaction alert".to_string()),
        from: Some("alerts@acmebank.example".to_string()),
        internal_date: Utc.with_ymd_and_hms(2025, 3, 10 + n as u32, 9, 0, 0).unwrap(),
        body_text: Some(format!("Debit alert, reference FT-{}", n)),
        body_html: None,
        snippet: None,
    }
}

fn build_coordinator(db: &Database, mail: StaticMail) -> Arc<SyncJobCoordinator> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(base_time()));
    let llm = Arc::new(KeyedLlm);
    let classifier = Arc::new(CategoryClassifier::new(llm.clone(), llm.clone(), 3, 0.6, 0.0));

    Arc::new(SyncJobCoordinator::new(
        db.clone(),
        Arc::new(CredentialVault::new(db.clone(), Arc::new(StaticOAuth), clock.clone())),
        Arc::new(MailboxScanner::new(Arc::new(mail))),
        Arc::new(TransactionExtractor::new(llm, 0.0)),
        Arc::new(LedgerUpserter::new(db.clone(), classifier, clock.clone(), "USD")),
        Arc::new(Notifier::new(db.clone())),
        clock,
        SyncSettings::default(),
    ))
}

async fn connect_mailbox(db: &Database) -> CredentialId {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(base_time()));
    let vault = CredentialVault::new(db.clone(), Arc::new(StaticOAuth), clock);
    vault
        .connect("user@example.com", "auth-code")
        .await
        .unwrap()
        .id
}

async fn sync_and_wait(
    db: &Database,
    coordinator: Arc<SyncJobCoordinator>,
    credential_id: CredentialId,
) {
    let worker = tokio::spawn(coordinator.clone().run_worker());
    assert!(coordinator.request_sync(credential_id).await.unwrap());

    for _ in 0..400 {
        let credential = queries::credentials::get_by_id(db, credential_id)
            .await
            .unwrap()
            .unwrap();
        if matches!(credential.sync_state, SyncState::Completed | SyncState::Failed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.stop();
    worker.abort();
}

#[tokio::test]
async fn full_sync_ingests_in_causal_order() {
    let db = Database::open_in_memory().await.unwrap();
    let cred = connect_mailbox(&db).await;

    // Three alerts, listed newest-first by the provider.
    let coordinator = build_coordinator(
        &db,
        StaticMail {
            messages: vec![alert(3), alert(1), alert(2)],
            respect_after: true,
        },
    );
    sync_and_wait(&db, coordinator, cred).await;

    let credential = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
    assert_eq!(credential.sync_state, SyncState::Completed);
    assert_eq!(credential.emails_received, 3);
    // Watermark lands on the newest message's receive time.
    assert_eq!(
        credential.last_sync_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 13, 9, 0, 0).unwrap())
    );

    let recent = queries::transactions::list_recent(&db, cred, 10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].reference, "FT-3");
    assert_eq!(recent[0].kind, TransactionKind::Debit);

    // Balances were applied oldest-to-newest, so the account ends on the
    // newest alert's running balance even though listing was newest-first.
    let balance: f64 = db
        .with_conn(|conn| {
            Ok(conn.query_row("SELECT balance FROM accounts LIMIT 1", [], |row| row.get(0))?)
        })
        .await
        .unwrap();
    assert_eq!(balance, 700.0);
}

#[tokio::test]
async fn replayed_mailbox_is_idempotent() {
    let db = Database::open_in_memory().await.unwrap();
    let cred = connect_mailbox(&db).await;

    let coordinator = build_coordinator(
        &db,
        StaticMail {
            messages: vec![alert(1), alert(2)],
            respect_after: true,
        },
    );
    sync_and_wait(&db, coordinator, cred).await;
    assert_eq!(
        queries::transactions::count_for_credential(&db, cred).await.unwrap(),
        2
    );

    // The provider re-serves the same mail, ignoring the watermark. Every
    // message flows through extraction again but lands as a duplicate.
    let coordinator = build_coordinator(
        &db,
        StaticMail {
            messages: vec![alert(1), alert(2)],
            respect_after: false,
        },
    );
    sync_and_wait(&db, coordinator, cred).await;

    let credential = queries::credentials::get_by_id(&db, cred).await.unwrap().unwrap();
    assert_eq!(credential.sync_state, SyncState::Completed);
    assert_eq!(credential.emails_received, 2);
    assert_eq!(
        queries::transactions::count_for_credential(&db, cred).await.unwrap(),
        2
    );

    let unread = queries::notifications::list_unread(&db, cred).await.unwrap();
    assert_eq!(
        unread.last().unwrap().message,
        "Mailbox already up to date"
    );
}

#[tokio::test]
async fn pattern_categories_are_assigned_during_sync() {
    let db = Database::open_in_memory().await.unwrap();
    let cred = connect_mailbox(&db).await;
    let groceries = queries::categories::insert(
        &db,
        queries::categories::NewCategory {
            name: "Groceries".to_string(),
            description: "Food and household shopping".to_string(),
            kind: mailmint::domain::CategoryKind::Expense,
            icon: Some("cart".to_string()),
            patterns: vec!["SHOPRITE".to_string()],
        },
    )
    .await
    .unwrap();

    let coordinator = build_coordinator(
        &db,
        StaticMail {
            messages: vec![alert(1)],
            respect_after: true,
        },
    );
    sync_and_wait(&db, coordinator, cred).await;

    let in_groceries = queries::transactions::list_by_category(&db, groceries.id)
        .await
        .unwrap();
    assert_eq!(in_groceries.len(), 1);
    assert_eq!(in_groceries[0].reference, "FT-1");
}
