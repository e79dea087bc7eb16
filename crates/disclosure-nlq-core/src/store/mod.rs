//! Storage abstraction for the query executor.
//!
//! The [`AnnouncementStore`] trait models a partitioned key-value table
//! with secondary indexes: a key query reads one partition of the table or
//! of a named index, ordered by sort key, and a scan reads everything.
//! Both are paginated with opaque cursors.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must classify failures as [`StoreError::Transient`] (retried by the
//! executor) or [`StoreError::Permanent`].

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::DateRange;
use crate::plan::{DateFormat, RecordPredicate};
use crate::record::StoreItem;

/// One partition read, on the base table or a secondary index.
#[derive(Debug, Clone)]
pub struct KeyQuery {
    /// `None` reads the base table.
    pub index_name: Option<String>,
    pub partition_attr: String,
    pub partition_value: String,
    pub sort_attr: String,
    pub sort_range: Option<DateRange>,
    pub date_format: DateFormat,
    pub descending: bool,
    /// Applied after the key condition, before the page is cut.
    pub filter: RecordPredicate,
}

/// A full-table read.
#[derive(Debug, Clone)]
pub struct ScanQuery {
    pub sort_attr: String,
    pub date_format: DateFormat,
    pub descending: bool,
    pub predicate: RecordPredicate,
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<StoreItem>,
    /// `None` once the read is exhausted.
    pub next_cursor: Option<String>,
}

/// Abstract backing store for announcements.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`query`](AnnouncementStore::query) | One page of one partition |
/// | [`scan`](AnnouncementStore::scan) | One page of the whole table |
/// | [`name`](AnnouncementStore::name) | Label for logs |
#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    async fn query(&self, query: &KeyQuery, page: &PageRequest) -> Result<Page, StoreError>;

    async fn scan(&self, query: &ScanQuery, page: &PageRequest) -> Result<Page, StoreError>;

    fn name(&self) -> &str {
        "store"
    }
}

/// Whether an item's partition attribute equals `value`. List-valued
/// attributes match on membership, as a sparse multi-valued index would.
pub fn partition_matches(item: &StoreItem, attr: &str, value: &str) -> bool {
    match item.get(attr) {
        Some(Value::String(s)) => s == value,
        Some(Value::Number(n)) => n.to_string() == value,
        Some(Value::Bool(b)) => b.to_string().eq_ignore_ascii_case(value),
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(value)),
        Some(Value::Object(map)) => map.contains_key(value),
        _ => false,
    }
}

/// Parses an offset cursor as issued by the bundled stores.
pub fn parse_offset_cursor(cursor: Option<&str>) -> Result<usize, StoreError> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .parse()
            .map_err(|_| StoreError::Permanent(format!("invalid cursor '{c}'"))),
    }
}
