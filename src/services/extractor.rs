//! Transaction extractor: turns raw alert text into structured fields.

use std::sync::Arc;

use tracing::debug;

use crate::domain::ExtractedTransaction;
use crate::providers::ai::{CompletionRequest, LlmClient, Message};

use super::error::{Result, SyncError};

const SYSTEM_PROMPT: &str = "You are a parser for transactional bank alert emails. \
Extract the transaction described by the email into a single JSON object with exactly \
these fields: \"type\" (one of \"debit\", \"credit\", \"transfer\", \"payment\", \
\"withdrawal\", \"deposit\", \"reversal\"), \"amount\" (number), \"currency\" \
(ISO code or currency name as printed, or null), \"date\" (YYYY-MM-DD), \"description\" \
(string), \"currentBalance\" (number or null), \"transactionId\" (string or null), \
\"accountNumber\" (string or null), \"accountName\" (string or null), \"bankName\" \
(string or null). Use null for any field the email does not state. Respond with the \
JSON object only.";

/// Extracts canonical transaction fields from alert email text.
pub struct TransactionExtractor {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
}

impl TransactionExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    /// Extracts one transaction from raw text.
    ///
    /// Fails with [`SyncError::Extraction`] when the model output does not
    /// conform to the schema; transport failures surface as upstream
    /// errors. The caller decides whether either aborts the job.
    pub async fn extract(&self, raw_text: &str) -> Result<ExtractedTransaction> {
        if raw_text.trim().is_empty() {
            return Err(SyncError::Extraction("empty message body".to_string()));
        }

        let request = CompletionRequest::new(vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(raw_text),
        ])
        .with_temperature(self.temperature)
        .with_json_mode();

        let response = self.llm.complete(&request).await?;
        let fields = parse_response(&response.text)?;
        debug!(
            kind = fields.kind.as_str(),
            amount = fields.amount,
            reference = fields.transaction_id.as_deref().unwrap_or("-"),
            "extracted transaction"
        );
        Ok(fields)
    }
}

/// Parses the model response, tolerating markdown code fences around the
/// JSON object.
fn parse_response(text: &str) -> Result<ExtractedTransaction> {
    let body = strip_code_fence(text.trim());
    serde_json::from_str(body)
        .map_err(|e| SyncError::Extraction(format!("unparsable extraction output: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;
    use crate::providers::ai::{CompletionResponse, LlmResult};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct MockLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
            assert!(request.json_mode);
            Ok(CompletionResponse {
                text: self.reply.clone(),
            })
        }
    }

    const VALID: &str = r#"{
        "type": "debit",
        "amount": 5000.0,
        "currency": "NGN",
        "date": "2025-03-14",
        "description": "POS purchase SHOPRITE LEKKI",
        "currentBalance": 120000.5,
        "transactionId": "FT-778",
        "accountNumber": "0123456789",
        "accountName": "Main",
        "bankName": "Acme Bank"
    }"#;

    #[tokio::test]
    async fn extracts_valid_response() {
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: VALID.to_string(),
            }),
            0.0,
        );

        let fields = extractor.extract("Debit alert ...").await.unwrap();
        assert_eq!(fields.kind, TransactionKind::Debit);
        assert_eq!(fields.amount, 5000.0);
        assert_eq!(fields.date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert_eq!(fields.transaction_id.as_deref(), Some("FT-778"));
    }

    #[tokio::test]
    async fn tolerates_code_fences() {
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: format!("```json\n{}\n```", VALID),
            }),
            0.0,
        );

        let fields = extractor.extract("Debit alert ...").await.unwrap();
        assert_eq!(fields.bank_name.as_deref(), Some("Acme Bank"));
    }

    #[tokio::test]
    async fn nonconforming_output_is_extraction_error() {
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: "Sorry, I could not find a transaction in this email.".to_string(),
            }),
            0.0,
        );

        let err = extractor.extract("Newsletter content").await.unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }

    #[tokio::test]
    async fn missing_required_field_is_extraction_error() {
        // No amount.
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: r#"{"type":"debit","date":"2025-03-14","description":"x"}"#.to_string(),
            }),
            0.0,
        );

        let err = extractor.extract("Debit alert ...").await.unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }

    #[tokio::test]
    async fn nonstandard_kind_labels_extract_cleanly() {
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: r#"{"type":"reversal","amount":5000.0,"currency":"NGN",
                    "date":"2025-03-14","description":"RVSL POS SHOPRITE",
                    "currentBalance":null,"transactionId":"FT-779",
                    "accountNumber":null,"accountName":null,"bankName":null}"#
                    .to_string(),
            }),
            0.0,
        );

        let fields = extractor.extract("Reversal alert ...").await.unwrap();
        assert_eq!(fields.kind, TransactionKind::Reversal);
    }

    #[tokio::test]
    async fn configured_temperature_reaches_the_model() {
        struct RecordingLlm;

        #[async_trait]
        impl LlmClient for RecordingLlm {
            async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
                assert_eq!(request.temperature, 0.3);
                Ok(CompletionResponse {
                    text: VALID.to_string(),
                })
            }
        }

        let extractor = TransactionExtractor::new(Arc::new(RecordingLlm), 0.3);
        extractor.extract("Debit alert ...").await.unwrap();
    }

    #[tokio::test]
    async fn empty_body_fails_before_calling_model() {
        let extractor = TransactionExtractor::new(
            Arc::new(MockLlm {
                reply: String::new(),
            }),
            0.0,
        );

        let err = extractor.extract("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }
}
