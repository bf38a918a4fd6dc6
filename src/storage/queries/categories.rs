//! Category CRUD operations, including embedding persistence.

use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Category, CategoryId, CategoryKind, UNCATEGORIZED};
use crate::storage::database::{Database, Result};

use super::parse_utc;

const CATEGORY_COLUMNS: &str = "id, name, description, kind, icon, patterns, embedding, created_at";

/// Fields for a category being created.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub kind: CategoryKind,
    pub icon: Option<String>,
    pub patterns: Vec<String>,
}

/// Inserts a new category. Fails on duplicate names.
pub async fn insert(db: &Database, new: NewCategory) -> Result<Category> {
    db.with_conn(move |conn| {
        conn.execute(
            "INSERT INTO categories (name, description, kind, icon, patterns)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.name,
                new.description,
                new.kind.as_str(),
                new.icon,
                encode_patterns(&new.patterns)
            ],
        )?;
        let id = conn.last_insert_rowid();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE id = ?1",
            CATEGORY_COLUMNS
        ))?;
        Ok(stmt.query_row([id], row_to_category)?)
    })
    .await
}

/// Retrieves a category by its ID.
pub async fn get_by_id(db: &Database, id: CategoryId) -> Result<Option<Category>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE id = ?1",
            CATEGORY_COLUMNS
        ))?;
        Ok(stmt.query_row([id.0], row_to_category).optional()?)
    })
    .await
}

/// Retrieves a category by exact name.
pub async fn get_by_name(db: &Database, name: String) -> Result<Option<Category>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE name = ?1",
            CATEGORY_COLUMNS
        ))?;
        Ok(stmt.query_row([&name], row_to_category).optional()?)
    })
    .await
}

/// Retrieves the sentinel category, if the seed ran.
pub async fn get_uncategorized(db: &Database) -> Result<Option<Category>> {
    get_by_name(db, UNCATEGORIZED.to_string()).await
}

/// Lists all categories ordered by name.
pub async fn list_all(db: &Database) -> Result<Vec<Category>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories ORDER BY name ASC",
            CATEGORY_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_category)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Lists categories that have no embedding yet, for backfill.
pub async fn list_missing_embeddings(db: &Database) -> Result<Vec<Category>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE embedding IS NULL ORDER BY id ASC",
            CATEGORY_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_category)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Updates name and description; clears the stored embedding when the text
/// changed so the backfill recomputes it.
pub async fn update_details(
    db: &Database,
    id: CategoryId,
    name: String,
    description: String,
) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            r#"
            UPDATE categories SET
                embedding = CASE
                    WHEN name = ?2 AND description = ?3 THEN embedding
                    ELSE NULL
                END,
                name = ?2,
                description = ?3
            WHERE id = ?1
            "#,
            params![id.0, name, description],
        )?;
        Ok(())
    })
    .await
}

/// Appends a merchant pattern to a category's pattern list.
pub async fn append_pattern(db: &Database, id: CategoryId, pattern: String) -> Result<()> {
    db.with_conn(move |conn| {
        let existing: String = conn.query_row(
            "SELECT patterns FROM categories WHERE id = ?1",
            [id.0],
            |row| row.get(0),
        )?;

        let mut patterns = decode_patterns(&existing);
        let pattern = pattern.trim().to_uppercase();
        if !pattern.is_empty() && !patterns.contains(&pattern) {
            patterns.push(pattern);
            conn.execute(
                "UPDATE categories SET patterns = ?2 WHERE id = ?1",
                params![id.0, encode_patterns(&patterns)],
            )?;
        }
        Ok(())
    })
    .await
}

/// Stores a computed embedding.
pub async fn set_embedding(db: &Database, id: CategoryId, embedding: Vec<f32>) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE categories SET embedding = ?2 WHERE id = ?1",
            params![id.0, encode_embedding(&embedding)],
        )?;
        Ok(())
    })
    .await
}

fn encode_patterns(patterns: &[String]) -> String {
    patterns.join("|")
}

fn decode_patterns(raw: &str) -> Vec<String> {
    raw.split('|')
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Embeddings are stored as little-endian f32 blobs.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn row_to_category(row: &Row<'_>) -> std::result::Result<Category, rusqlite::Error> {
    let kind: String = row.get(3)?;
    let patterns: String = row.get(5)?;
    let embedding: Option<Vec<u8>> = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Category {
        id: CategoryId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        kind: CategoryKind::parse(&kind),
        icon: row.get(4)?,
        patterns: decode_patterns(&patterns),
        embedding: embedding.map(|b| decode_embedding(&b)),
        created_at: parse_utc(7, created_at)?,
    })
}
