//! SQLite-backed [`AnnouncementStore`] implementation.
//!
//! Items live as JSON attribute maps in `announcement_items`. Key conditions
//! (partition equality and sort-key range) run in SQL over `json_extract`
//! expressions on the configured attribute names; the report-type filter is
//! applied to each page after the read, the way a key-value store applies a
//! filter expression after its key condition. Cursors are row offsets.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use disclosure_nlq_core::error::StoreError;
use disclosure_nlq_core::models::DateRange;
use disclosure_nlq_core::plan::{DateFormat, TableSchema};
use disclosure_nlq_core::record::StoreItem;
use disclosure_nlq_core::store::{
    parse_offset_cursor, AnnouncementStore, KeyQuery, Page, PageRequest, ScanQuery,
};
use serde_json::Value;

/// SQLite implementation of the [`AnnouncementStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    label: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_label(pool, "sqlite")
    }

    pub fn with_label(pool: SqlitePool, label: impl Into<String>) -> Self {
        Self {
            pool,
            label: label.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts or replaces items. The item key is its `id` attribute when
    /// present, otherwise the `(partition, sort)` pair.
    pub async fn upsert_items(
        &self,
        items: &[StoreItem],
        schema: &TableSchema,
    ) -> anyhow::Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for item in items {
            let item_id = item_key(item, schema);
            sqlx::query(
                r#"
                INSERT INTO announcement_items (item_id, attributes, loaded_at)
                VALUES (?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    attributes = excluded.attributes,
                    loaded_at = excluded.loaded_at
                "#,
            )
            .bind(&item_id)
            .bind(serde_json::to_string(item)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(items.len())
    }

    pub async fn count(&self) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM announcement_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn fetch(
        &self,
        where_sql: &str,
        binds: Vec<Value>,
        sort_attr: &str,
        descending: bool,
        page: &PageRequest,
    ) -> Result<(Vec<StoreItem>, Option<String>), StoreError> {
        let offset = parse_offset_cursor(page.cursor.as_deref())?;
        let limit = page.limit.max(1);
        let sort = attr_expr(sort_attr);
        let sql = format!(
            "SELECT attributes FROM announcement_items {} \
             ORDER BY ({} IS NULL), {} {}, rowid LIMIT ? OFFSET ?",
            where_sql,
            sort,
            sort,
            if descending { "DESC" } else { "ASC" }
        );

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = match value {
                Value::Number(n) => query.bind(n.as_i64().unwrap_or_default()),
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        // One extra row tells whether another page exists.
        let rows = query
            .bind((limit + 1) as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        let has_more = rows.len() > limit;
        let mut items = Vec::with_capacity(limit);
        for row in rows.into_iter().take(limit) {
            let raw: String = row.try_get("attributes").map_err(classify)?;
            let item: StoreItem = serde_json::from_str(&raw)
                .map_err(|e| StoreError::Permanent(format!("corrupt item: {e}")))?;
            items.push(item);
        }
        let next = has_more.then(|| (offset + limit).to_string());
        Ok((items, next))
    }
}

/// `json_extract` over one top-level attribute.
pub(crate) fn attr_expr(attr: &str) -> String {
    format!(
        "json_extract(attributes, '$.\"{}\"')",
        attr.replace('\'', "''").replace('"', "")
    )
}

fn json_path(attr: &str) -> String {
    format!("$.\"{}\"", attr.replace('"', ""))
}

fn item_key(item: &StoreItem, schema: &TableSchema) -> String {
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if let Some(id) = item.get("id").or_else(|| item.get("item_id")) {
        return text(id);
    }
    let pk = item.get(&schema.partition_key_attr).map(text).unwrap_or_default();
    let sk = item.get(&schema.sort_key_attr).map(text).unwrap_or_default();
    format!("{pk}#{sk}")
}

fn sort_range_sql(
    attr: &str,
    range: &DateRange,
    format: DateFormat,
    binds: &mut Vec<Value>,
) -> String {
    match format {
        DateFormat::IsoDate | DateFormat::IsoDatetime => {
            binds.push(Value::String(range.start.format("%Y-%m-%d").to_string()));
            binds.push(Value::String(range.end.format("%Y-%m-%d").to_string()));
            format!("substr({}, 1, 10) BETWEEN ? AND ?", attr_expr(attr))
        }
        DateFormat::EpochSeconds | DateFormat::EpochMillis => {
            binds.push(format.encode_start(range.start));
            binds.push(format.encode_end(range.end));
            format!("{} BETWEEN ? AND ?", attr_expr(attr))
        }
    }
}

/// Transient: busy or locked database, pool exhaustion, I/O.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            if msg.contains("locked") || msg.contains("busy") {
                StoreError::Transient(err.to_string())
            } else {
                StoreError::Permanent(err.to_string())
            }
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

#[async_trait]
impl AnnouncementStore for SqliteStore {
    async fn query(&self, query: &KeyQuery, page: &PageRequest) -> Result<Page, StoreError> {
        let mut binds = vec![
            Value::String(query.partition_value.clone()),
            Value::String(json_path(&query.partition_attr)),
            Value::String(query.partition_value.clone()),
            Value::String(query.partition_value.clone()),
            Value::String(query.partition_value.clone()),
        ];
        // Scalar equality, list membership, map key, or a boolean marker.
        let mut where_sql = format!(
            "WHERE ({} = ? OR EXISTS (SELECT 1 FROM json_each(announcement_items.attributes, ?) AS je \
             WHERE je.value = ? OR je.key = ? OR (je.type = 'true' AND lower(?) = 'true')))",
            attr_expr(&query.partition_attr)
        );
        if let Some(range) = &query.sort_range {
            where_sql.push_str(" AND ");
            where_sql.push_str(&sort_range_sql(
                &query.sort_attr,
                range,
                query.date_format,
                &mut binds,
            ));
        }

        let (items, next_cursor) = self
            .fetch(&where_sql, binds, &query.sort_attr, query.descending, page)
            .await?;
        Ok(Page {
            items: items.into_iter().filter(|i| query.filter.matches(i)).collect(),
            next_cursor,
        })
    }

    async fn scan(&self, query: &ScanQuery, page: &PageRequest) -> Result<Page, StoreError> {
        let (items, next_cursor) = self
            .fetch("", Vec::new(), &query.sort_attr, query.descending, page)
            .await?;
        Ok(Page {
            items: items.into_iter().filter(|i| query.predicate.matches(i)).collect(),
            next_cursor,
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}
