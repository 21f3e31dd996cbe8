//! Content database connection management with pragma configuration.
//!
//! This module handles opening the SQLite content store, applying pragmas
//! for concurrent readers (WAL mode), and running migrations.

use super::migrations;
use super::pages::is_identifier;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::{Connection, params};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Content database handle.
///
/// Wraps a tokio-rusqlite Connection that runs queries on a background
/// thread. Cloning shares the same connection.
#[derive(Clone, Debug)]
pub struct ContentDb {
    pub(crate) conn: Connection,
}

impl ContentDb {
    /// Open the content store at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.to_string()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory content store for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.to_string()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::from)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }

    /// Run a batch of SQL statements, e.g. a seed script or a collection
    /// table definition.
    pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<(), Error> {
        let sql = sql.into();
        self.conn.call(move |conn| conn.execute_batch(&sql)).await.map_err(Error::from)
    }

    /// Insert a page row and return its id.
    ///
    /// `uri` of `None` (or an empty string) marks the site root.
    pub async fn insert_page(&self, uri: Option<&str>, status: &str, title: &str) -> Result<i64, Error> {
        let uri = uri.map(str::to_string);
        let status = status.to_string();
        let title = title.to_string();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute("INSERT INTO pages (uri, status, title) VALUES (?1, ?2, ?3)", params![uri, status, title])?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Create a block payload table with an integer `id` key and untyped
    /// `columns`. Existing tables are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the table or a column name is not a
    /// plain identifier.
    pub async fn create_collection(&self, name: &str, columns: &[&str]) -> Result<(), Error> {
        if let Some(bad) = std::iter::once(&name).chain(columns).find(|n| !is_identifier(n)) {
            return Err(Error::InvalidInput(format!("not a valid collection identifier: {bad:?}")));
        }
        let mut sql = format!("CREATE TABLE IF NOT EXISTS \"{name}\" (id INTEGER PRIMARY KEY");
        for column in columns.iter().filter(|c| !c.eq_ignore_ascii_case("id")) {
            sql.push_str(&format!(", \"{column}\""));
        }
        sql.push_str(");");
        self.execute_batch(sql).await
    }

    /// Attach a block to a page.
    ///
    /// `item` is the id of the payload row inside the `collection` table.
    pub async fn insert_block(&self, page_id: i64, collection: &str, item: &str, sort: i64) -> Result<i64, Error> {
        let collection = collection.to_string();
        let item = item.to_string();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO page_blocks (page_id, collection, item, sort) VALUES (?1, ?2, ?3, ?4)",
                    params![page_id, collection, item, sort],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }
}
