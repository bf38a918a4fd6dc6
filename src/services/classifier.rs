//! Two-stage transaction categorization.
//!
//! Stage R scores every category's merchant patterns against the
//! description with deterministic token-overlap rules. A clear winner is
//! returned without touching the network. Ambiguous or empty results fall
//! through to Stage L: embedding retrieval over the category set followed
//! by a generative pick among the retrieved candidates.
//!
//! Classification is total: any internal failure resolves to `None`, which
//! callers map to the sentinel "Uncategorized" category.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::Category;
use crate::providers::ai::{CompletionRequest, EmbeddingClient, LlmClient, Message};
use crate::storage::{queries, Database};

use super::error::{Result, SyncError};

/// Name of the peer-to-peer sentinel category. It matches nearly any
/// transfer-like description, so Stage R suppresses it unless the
/// description carries explicit transfer language.
pub const P2P_CATEGORY: &str = "Peer-to-Peer Transfer";

/// Score contribution per shared description/pattern token.
const TOKEN_OVERLAP_WEIGHT: i64 = 12;

/// Penalty applied to the peer-to-peer category absent transfer signals.
const P2P_PENALTY: i64 = 1000;

/// Score gap at or below which Stage R declares ambiguity.
const AMBIGUITY_GAP: i64 = 3;

/// Generic banking tokens that carry no category signal.
const STOPLIST: &[&str] = &[
    "WEB", "POS", "TRANSFER", "FEE", "BRANCH", "PYMT", "ATM", "REF", "TRX", "LTD", "INC",
    // 3-letter country codes seen in card descriptors.
    "USA", "GBR", "NGA", "KEN", "GHA", "ZAF", "IND", "CAN", "FRA", "DEU", "CZE", "NLD",
];

/// High-confidence brand tokens and their score boosts.
const BRAND_BOOSTS: &[(&str, i64)] = &[
    ("JETBRAINS", 10),
    ("SPOTIFY", 10),
    ("NETFLIX", 10),
    ("YOUTUBE", 10),
    ("AMAZON", 8),
    ("APPLE", 8),
    ("GOOGLE", 8),
    ("UBER", 8),
    ("BOLT", 8),
    ("SHOPRITE", 8),
];

/// Words that mark a genuine peer-to-peer transfer.
const P2P_SIGNALS: &[&str] = &[
    "TRANSFER",
    "BENEFICIARY",
    "P2P",
    "REVERSAL",
    "PAYMENT TO",
    "MPESA",
    "M-PESA",
    "MOMO",
    "MOBILE MONEY",
];

/// Outcome of the deterministic stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageR {
    /// A single category won by a clear margin.
    Matched(Category),
    /// Multiple categories scored too close together.
    Ambiguous,
    /// No category pattern matched at all.
    NoMatch,
}

/// Assigns categories to transaction descriptions.
pub struct CategoryClassifier {
    llm: Arc<dyn LlmClient>,
    embeddings: Arc<dyn EmbeddingClient>,
    top_k: usize,
    min_similarity: f32,
    temperature: f32,
}

impl CategoryClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embeddings: Arc<dyn EmbeddingClient>,
        top_k: usize,
        min_similarity: f32,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            embeddings,
            top_k,
            min_similarity,
            temperature,
        }
    }

    /// Classifies a description against the known category set.
    ///
    /// Returns `None` when no category can be assigned with confidence;
    /// the caller substitutes the sentinel category. Never fails.
    pub async fn classify(&self, description: &str, categories: &[Category]) -> Option<Category> {
        match stage_r(description, categories) {
            StageR::Matched(category) => {
                debug!(category = %category.name, "classified deterministically");
                Some(category)
            }
            StageR::Ambiguous | StageR::NoMatch => self.stage_l(description, categories).await,
        }
    }

    /// Retrieval + generative disambiguation.
    async fn stage_l(&self, description: &str, categories: &[Category]) -> Option<Category> {
        let query = match self.embeddings.embed(&[description.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "embedding lookup failed, leaving uncategorized");
                return None;
            }
        };

        let mut scored: Vec<(f32, &Category)> = categories
            .iter()
            .filter(|c| !c.is_uncategorized())
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                Some((cosine_similarity(&query, embedding), c))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let candidates: Vec<&Category> = scored
            .into_iter()
            .take(self.top_k)
            .filter(|(similarity, _)| *similarity >= self.min_similarity)
            .map(|(_, c)| c)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        match self.pick_candidate(description, &candidates).await {
            Some(name) => candidates
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&name))
                .map(|c| (*c).clone()),
            None => None,
        }
    }

    /// Asks the generative capability to pick one retrieved candidate.
    async fn pick_candidate(&self, description: &str, candidates: &[&Category]) -> Option<String> {
        let listing = candidates
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(vec![
            Message::system(
                "You assign a category to a bank transaction. Pick exactly one category \
                 from the candidates and reply with its name only, verbatim. If none \
                 fits, reply UNCERTAIN.",
            ),
            Message::user(format!(
                "Transaction description: {}\n\nCandidates:\n{}",
                description, listing
            )),
        ])
        .with_temperature(self.temperature);

        match self.llm.complete(&request).await {
            Ok(response) => {
                let name = response.text.trim().trim_matches('"').to_string();
                if name.is_empty() || name.eq_ignore_ascii_case("UNCERTAIN") {
                    None
                } else {
                    Some(name)
                }
            }
            Err(e) => {
                warn!(error = %e, "candidate pick failed, leaving uncategorized");
                None
            }
        }
    }

    /// Embeds every category that has no stored embedding yet.
    ///
    /// Stage L only considers embedded categories, so this runs at startup
    /// and whenever categories change. Returns how many were embedded.
    pub async fn ensure_embeddings(&self, db: &Database) -> Result<usize> {
        let missing = queries::categories::list_missing_embeddings(db).await?;
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|c| c.embedding_text()).collect();
        let vectors = self.embeddings.embed(&texts).await?;
        if vectors.len() != missing.len() {
            return Err(SyncError::Upstream(format!(
                "embedding count mismatch: asked {}, got {}",
                missing.len(),
                vectors.len()
            )));
        }

        for (category, vector) in missing.iter().zip(vectors) {
            queries::categories::set_embedding(db, category.id, vector).await?;
        }
        debug!(count = missing.len(), "category embeddings backfilled");
        Ok(missing.len())
    }
}

/// Runs the deterministic scoring stage.
pub fn stage_r(description: &str, categories: &[Category]) -> StageR {
    let description_upper = description.to_uppercase();
    // Each distinct token counts once; "UBER UBER TRIP" carries no more
    // signal than "UBER TRIP".
    let mut description_tokens = tokenize(&description_upper);
    description_tokens.sort();
    description_tokens.dedup();

    let mut scored: Vec<(i64, usize, &Category)> = categories
        .iter()
        .filter(|c| !c.patterns.is_empty() && !c.is_uncategorized())
        .filter_map(|category| {
            let (score, matched_len) =
                score_category(category, &description_upper, &description_tokens)?;
            Some((score, matched_len, category))
        })
        .collect();

    // Highest score first; ties go to the longer matched pattern, then to
    // the lexically smaller name so ordering is stable across runs.
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(b.1.cmp(&a.1))
            .then(a.2.name.cmp(&b.2.name))
    });

    let Some(&(top_score, _, top)) = scored.first() else {
        return StageR::NoMatch;
    };
    if top_score <= 0 {
        return StageR::NoMatch;
    }

    if let Some(&(runner_score, _, runner)) = scored.get(1) {
        let gap = top_score - runner_score;
        if gap <= AMBIGUITY_GAP && top.name != P2P_CATEGORY && runner.name != P2P_CATEGORY {
            return StageR::Ambiguous;
        }
    }

    StageR::Matched(top.clone())
}

/// Scores one category, returning `(score, matched_pattern_len)` or `None`
/// when no pattern matched the description.
fn score_category(
    category: &Category,
    description_upper: &str,
    description_tokens: &[String],
) -> Option<(i64, usize)> {
    let matched_len = category
        .patterns
        .iter()
        .filter(|p| description_upper.contains(p.as_str()))
        .map(|p| p.len())
        .max()?;

    let pattern_tokens: Vec<String> = category
        .patterns
        .iter()
        .flat_map(|p| tokenize(&p.to_uppercase()))
        .collect();

    let mut score = 0_i64;
    let mut overlapped = 0_i64;
    for token in description_tokens {
        if pattern_tokens.iter().any(|p| p == token) {
            overlapped += 1;
            if let Some((_, boost)) = BRAND_BOOSTS.iter().find(|(brand, _)| brand == token) {
                score += boost;
            }
        }
    }
    score += TOKEN_OVERLAP_WEIGHT * overlapped;
    score += (matched_len.min(20) / 4) as i64;

    if category.name == P2P_CATEGORY && !has_p2p_signal(description_upper) {
        score -= P2P_PENALTY;
    }

    Some((score, matched_len))
}

fn has_p2p_signal(description_upper: &str) -> bool {
    P2P_SIGNALS
        .iter()
        .any(|signal| description_upper.contains(signal))
}

/// Splits into uppercase alphanumeric tokens of three or more characters,
/// dropping generic banking terms.
fn tokenize(text_upper: &str) -> Vec<String> {
    text_upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .filter(|t| !STOPLIST.contains(t))
        .map(String::from)
        .collect()
}

/// Cosine similarity between two vectors; zero when either has no norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
