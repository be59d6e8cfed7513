//! ClickHouse-backed document store.
//!
//! Records live in a `ReplacingMergeTree` versioned by `updated_at`, so the
//! newest write for a key wins once parts merge, and reads use `FINAL` to see
//! that result before they do.

use ::clickhouse::Row;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use super::{DocumentStore, check_record_size};
use crate::config::{ClickHouseConfig, StoreConfig};
use crate::error::StoreError;
use crate::key::StoreKey;

/// Validated table and column names for the document table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    table: String,
    key_column: String,
    content_column: String,
}

impl TableLayout {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        content_column: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let layout = Self {
            table: validate_identifier("table", table.into())?,
            key_column: validate_identifier("key_column", key_column.into())?,
            content_column: validate_identifier("content_column", content_column.into())?,
        };
        if layout.key_column == layout.content_column || layout.key_column == "updated_at" {
            return Err(StoreError::InvalidIdentifier {
                field: "key_column",
                value: layout.key_column,
            });
        }
        if layout.content_column == "updated_at" {
            return Err(StoreError::InvalidIdentifier {
                field: "content_column",
                value: layout.content_column,
            });
        }
        Ok(layout)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{table}`
            (
                `{key}` String,
                `{content}` String CODEC(ZSTD(3)),
                `updated_at` DateTime64(3, 'UTC')
            )
            ENGINE = ReplacingMergeTree(updated_at)
            ORDER BY `{key}`
            "#,
            table = self.table,
            key = self.key_column,
            content = self.content_column,
        )
    }

    fn select_sql(&self) -> String {
        format!(
            r#"
            SELECT `{content}` AS content
            FROM `{table}` FINAL
            WHERE `{key}` = ?
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
            table = self.table,
            key = self.key_column,
            content = self.content_column,
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO `{table}` (`{key}`, `{content}`, `updated_at`)
            VALUES (?, ?, ?)
            "#,
            table = self.table,
            key = self.key_column,
            content = self.content_column,
        )
    }
}

fn validate_identifier(field: &'static str, value: String) -> Result<String, StoreError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if valid {
        Ok(value)
    } else {
        Err(StoreError::InvalidIdentifier { field, value })
    }
}

#[derive(Row, Deserialize)]
struct ContentRow {
    content: String,
}

/// Document store over a ClickHouse table.
pub struct ClickHouseStore {
    inner: ::clickhouse::Client,
    layout: TableLayout,
    max_record_bytes: usize,
}

impl ClickHouseStore {
    /// Create a store from connection and table configuration.
    pub fn new(connection: &ClickHouseConfig, store: &StoreConfig) -> Result<Self, StoreError> {
        let inner = ::clickhouse::Client::default()
            .with_url(connection.url.as_str())
            .with_database(&connection.database)
            .with_user(&connection.user)
            .with_password(&connection.password);

        let layout = TableLayout::new(&store.table, &store.key_column, &store.content_column)?;

        Ok(Self {
            inner,
            layout,
            max_record_bytes: store.max_record_bytes,
        })
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Create the document table if it does not exist.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.inner
            .query(&self.layout.create_table_sql())
            .execute()
            .await
            .map_err(|e| StoreError::Query {
                message: format!("failed to create table {}", self.layout.table),
                source: e,
            })?;
        info!(table = %self.layout.table, "document table ready");
        Ok(())
    }

    /// Check connectivity.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.inner
            .query("SELECT 1")
            .execute()
            .await
            .map_err(|e| StoreError::Query {
                message: "health check failed".into(),
                source: e,
            })
    }
}

impl DocumentStore for ClickHouseStore {
    async fn get(&self, key: &StoreKey) -> Result<String, StoreError> {
        let row = self
            .inner
            .query(&self.layout.select_sql())
            .bind(key.as_str())
            .fetch_optional::<ContentRow>()
            .await
            .map_err(|e| StoreError::Query {
                message: format!("failed to read {key}"),
                source: e,
            })?;

        debug!(key = %key, found = row.is_some(), "fetched document record");
        Ok(row.map(|r| r.content).unwrap_or_default())
    }

    async fn put(&self, key: &StoreKey, content: &str) -> Result<(), StoreError> {
        check_record_size(key, content, self.max_record_bytes);

        // Content goes in the VALUES data, which is streamed rather than
        // counted against max_query_size.
        self.inner
            .query(&self.layout.insert_sql())
            .bind(key.as_str())
            .bind(content)
            .bind(Utc::now().timestamp_millis())
            .execute()
            .await
            .map_err(|e| StoreError::Insert {
                message: format!("failed to write {key}"),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TableLayout {
        TableLayout::new("collab_documents", "doc_key", "content").unwrap()
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        for bad in ["", "1table", "docs; DROP TABLE x", "a-b", "`t`", "naïve"] {
            assert!(
                matches!(
                    TableLayout::new(bad, "doc_key", "content"),
                    Err(StoreError::InvalidIdentifier { field: "table", .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlapping_columns() {
        assert!(TableLayout::new("t", "same", "same").is_err());
        assert!(TableLayout::new("t", "updated_at", "content").is_err());
        assert!(TableLayout::new("t", "doc_key", "updated_at").is_err());
    }

    #[test]
    fn test_sql_uses_configured_names() {
        let layout = TableLayout::new("rooms", "room_id", "body").unwrap();

        let create = layout.create_table_sql();
        assert!(create.contains("CREATE TABLE IF NOT EXISTS `rooms`"));
        assert!(create.contains("`room_id` String"));
        assert!(create.contains("ReplacingMergeTree(updated_at)"));
        assert!(create.contains("ORDER BY `room_id`"));

        let select = layout.select_sql();
        assert!(select.contains("SELECT `body` AS content"));
        assert!(select.contains("FROM `rooms` FINAL"));
        assert!(select.contains("WHERE `room_id` = ?"));

        let insert = layout.insert_sql();
        assert!(insert.contains("INSERT INTO `rooms` (`room_id`, `body`, `updated_at`)"));
        assert!(insert.contains("VALUES (?, ?, ?)"));
        assert!(!insert.contains("SELECT"));
        assert_eq!(insert.matches('?').count(), 3);
    }

    #[test]
    fn test_default_layout_is_valid() {
        assert_eq!(layout().table(), "collab_documents");
    }
}
