//! Transaction categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::CategoryId;

/// Name of the sentinel category every ledger must contain.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Whether a category groups money coming in or going out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense,
}

impl CategoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
        }
    }

    /// Parses the stored string form, defaulting to `Expense` for
    /// anything unrecognized.
    pub fn parse(value: &str) -> Self {
        match value {
            "income" => CategoryKind::Income,
            _ => CategoryKind::Expense,
        }
    }
}

/// A transaction category with its matching hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
    pub kind: CategoryKind,
    /// Icon identifier shown next to the category in clients.
    pub icon: Option<String>,
    /// Uppercase merchant patterns matched against transaction
    /// descriptions, stored pipe-separated in the database.
    pub patterns: Vec<String>,
    /// Embedding of `"{name}: {description}"`, absent until computed.
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// Text sent to the embedding model for this category.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }

    pub fn is_uncategorized(&self) -> bool {
        self.name == UNCATEGORIZED
    }
}
