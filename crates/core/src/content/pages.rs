//! Page lookup against the content store.
//!
//! A page resolves in three steps: the published page row, its ordered
//! block references, then one payload row per block read from the table
//! named by the block's collection. Payload columns are read generically
//! since collection schemas are not known here.

use std::collections::HashSet;

use super::connection::ContentDb;
use crate::Error;
use crate::page::{Block, FieldValue, PageData, PageKey};
use tokio_rusqlite::rusqlite::{self, OptionalExtension, types::ValueRef};
use tokio_rusqlite::params;

const PAGE_COLUMNS: &str = "SELECT id, uri, status, title FROM pages";

struct BlockRef {
    collection: String,
    item: String,
}

impl ContentDb {
    /// Load a published page and its blocks.
    ///
    /// Returns `Error::NotFound` when no published page matches the key.
    pub async fn fetch_page(&self, key: &PageKey) -> Result<PageData, Error> {
        let key = key.clone();
        self.conn
            .call(move |conn| -> Result<PageData, Error> { load_page(conn, &key) })
            .await
            .map_err(Error::from)
    }
}

fn load_page(conn: &rusqlite::Connection, key: &PageKey) -> Result<PageData, Error> {
    let mut page = find_page(conn, key)?.ok_or_else(|| Error::NotFound(key.to_string()))?;

    for block_ref in block_refs(conn, page.id)? {
        if !is_identifier(&block_ref.collection) {
            tracing::warn!(collection = %block_ref.collection, page = %key, "skipping block with invalid collection name");
            continue;
        }
        match load_block(conn, &block_ref) {
            Ok(Some(block)) => page.blocks.push(block),
            Ok(None) => {
                tracing::warn!(collection = %block_ref.collection, item = %block_ref.item, page = %key, "block payload row missing");
            }
            Err(e) => {
                tracing::warn!(collection = %block_ref.collection, item = %block_ref.item, page = %key, error = %e, "failed to load block payload");
            }
        }
    }

    Ok(page)
}

fn find_page(conn: &rusqlite::Connection, key: &PageKey) -> Result<Option<PageData>, Error> {
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(PageData { id: row.get(0)?, uri: row.get(1)?, status: row.get(2)?, title: row.get(3)?, blocks: Vec::new() })
    };

    let page = match key {
        PageKey::Root => conn
            .query_row(
                &format!(
                    "{PAGE_COLUMNS} WHERE (uri = '' OR uri IS NULL) AND status = 'published' ORDER BY id LIMIT 1"
                ),
                [],
                map_row,
            )
            .optional()?,
        PageKey::Path(path) => conn
            .query_row(
                &format!("{PAGE_COLUMNS} WHERE uri = ?1 AND status = 'published' ORDER BY id LIMIT 1"),
                params![path],
                map_row,
            )
            .optional()?,
    };

    Ok(page)
}

fn block_refs(conn: &rusqlite::Connection, page_id: i64) -> Result<Vec<BlockRef>, Error> {
    let mut stmt = conn.prepare("SELECT collection, item FROM page_blocks WHERE page_id = ?1 ORDER BY sort ASC, id ASC")?;
    let refs = stmt
        .query_map(params![page_id], |row| Ok(BlockRef { collection: row.get(0)?, item: row.get(1)? }))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(refs)
}

fn load_block(conn: &rusqlite::Connection, block_ref: &BlockRef) -> Result<Option<Block>, rusqlite::Error> {
    let json_columns = json_columns(conn, &block_ref.collection)?;
    let sql = format!("SELECT * FROM \"{}\" WHERE id = ?1", block_ref.collection);
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    stmt.query_row(params![block_ref.item], |row| {
        let mut block = Block::new(block_ref.collection.clone());
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx)?;
            block.push(name.clone(), decode_value(value, json_columns.contains(name)));
        }
        Ok(block)
    })
    .optional()
}

/// Columns declared with a JSON type (`JSON`, `JSONB`). SQLite stores their
/// values as TEXT, so the declaration is the only hint they hold documents.
fn json_columns(conn: &rusqlite::Connection, table: &str) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut json = HashSet::new();
    for row in rows {
        let (name, declared) = row?;
        if declared.to_ascii_uppercase().starts_with("JSON") {
            json.insert(name);
        }
    }
    Ok(json)
}

/// Normalize one column value. Byte payloads, and text in JSON-typed
/// columns, go through [`FieldValue::from_bytes`].
fn decode_value(value: ValueRef<'_>, json_column: bool) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(f) => FieldValue::Real(f),
        ValueRef::Text(t) if json_column => FieldValue::from_bytes(t),
        ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => FieldValue::from_bytes(b),
    }
}

/// Collection names are spliced into SQL, so only plain identifiers pass.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.to_ascii_lowercase().starts_with("sqlite_")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> ContentDb {
        let db = ContentDb::open_in_memory().await.unwrap();
        db.execute_batch(
            "CREATE TABLE block_hero (id INTEGER PRIMARY KEY, headline TEXT, settings BLOB, image BLOB);
             INSERT INTO block_hero (id, headline, settings, image)
                 VALUES (1, 'Welcome', CAST('{\"dark\":true}' AS BLOB), CAST('plain words' AS BLOB));
             CREATE TABLE block_text (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO block_text (id, body) VALUES (7, 'Second block');",
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_fetch_published_page_with_ordered_blocks() {
        let db = seeded().await;
        let page_id = db.insert_page(Some("/about"), "published", "About").await.unwrap();
        db.insert_block(page_id, "block_text", "7", 2).await.unwrap();
        db.insert_block(page_id, "block_hero", "1", 1).await.unwrap();

        let page = db.fetch_page(&PageKey::from_path("/about")).await.unwrap();
        assert_eq!(page.title, "About");
        assert_eq!(page.status, "published");
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].collection, "block_hero");
        assert_eq!(page.blocks[1].collection, "block_text");

        let hero = &page.blocks[0];
        assert_eq!(hero.fields[0].0, "id");
        assert_eq!(hero.get("headline").and_then(FieldValue::as_str), Some("Welcome"));
        assert_eq!(hero.get("settings").and_then(FieldValue::as_json), Some(&serde_json::json!({"dark": true})));
        assert_eq!(hero.get("image"), Some(&FieldValue::Text("plain words".into())));
    }

    #[tokio::test]
    async fn test_json_typed_text_columns_are_decoded() {
        let db = ContentDb::open_in_memory().await.unwrap();
        db.execute_batch(
            "CREATE TABLE block_banner (id INTEGER PRIMARY KEY, settings JSON, extra jsonb, caption TEXT, broken JSON);
             INSERT INTO block_banner VALUES (1, '{\"dark\":true}', '[1,2]', '{\"not\":\"parsed\"}', 'not json');",
        )
        .await
        .unwrap();
        let page_id = db.insert_page(Some("/banner"), "published", "Banner").await.unwrap();
        db.insert_block(page_id, "block_banner", "1", 0).await.unwrap();

        let page = db.fetch_page(&PageKey::from_path("/banner")).await.unwrap();
        let banner = &page.blocks[0];
        assert_eq!(banner.get("settings").and_then(FieldValue::as_json), Some(&serde_json::json!({"dark": true})));
        assert_eq!(banner.get("extra").and_then(FieldValue::as_json), Some(&serde_json::json!([1, 2])));
        assert_eq!(banner.get("caption"), Some(&FieldValue::Text("{\"not\":\"parsed\"}".into())));
        assert_eq!(banner.get("broken"), Some(&FieldValue::Text("not json".into())));
    }

    #[tokio::test]
    async fn test_root_matches_empty_or_null_uri() {
        let db = seeded().await;
        db.insert_page(None, "published", "Home").await.unwrap();

        let page = db.fetch_page(&PageKey::from_path("")).await.unwrap();
        assert_eq!(page.title, "Home");
        assert!(page.uri.is_none());

        let db = seeded().await;
        db.insert_page(Some(""), "published", "Home too").await.unwrap();
        let page = db.fetch_page(&PageKey::Root).await.unwrap();
        assert_eq!(page.title, "Home too");
    }

    #[tokio::test]
    async fn test_draft_page_is_not_found() {
        let db = seeded().await;
        db.insert_page(Some("/draft"), "draft", "Draft").await.unwrap();

        let result = db.fetch_page(&PageKey::from_path("/draft")).await;
        assert!(matches!(result, Err(Error::NotFound(path)) if path == "/draft"));
    }

    #[tokio::test]
    async fn test_unpublished_root_is_not_found() {
        let db = seeded().await;
        db.insert_page(None, "archived", "Old home").await.unwrap();

        let result = db.fetch_page(&PageKey::Root).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_broken_blocks_are_skipped() {
        let db = seeded().await;
        let page_id = db.insert_page(Some("/mixed"), "published", "Mixed").await.unwrap();
        db.insert_block(page_id, "block_missing_table", "1", 0).await.unwrap();
        db.insert_block(page_id, "block_text", "404", 1).await.unwrap();
        db.insert_block(page_id, "pages; DROP TABLE pages", "1", 2).await.unwrap();
        db.insert_block(page_id, "block_text", "7", 3).await.unwrap();

        let page = db.fetch_page(&PageKey::from_path("/mixed")).await.unwrap();
        assert_eq!(page.blocks.len(), 1);
        assert_eq!(page.blocks[0].get("body").and_then(FieldValue::as_str), Some("Second block"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("block_hero"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("block-hero"));
        assert!(!is_identifier("a\"b"));
        assert!(!is_identifier("sqlite_master"));
    }
}
