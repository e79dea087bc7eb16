//! In-memory [`AnnouncementStore`] for tests and degraded mode.
//!
//! Holds raw items in a `Vec` behind `std::sync::RwLock`. Every read
//! filters, sorts by decoded sort key, and slices by offset, so results are
//! consistent with the SQLite backend for the same data.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::StoreError;
use crate::models::DateRange;
use crate::plan::DateFormat;
use crate::record::StoreItem;

use super::{
    parse_offset_cursor, partition_matches, AnnouncementStore, KeyQuery, Page, PageRequest,
    ScanQuery,
};

pub struct InMemoryStore {
    items: RwLock<Vec<StoreItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: Vec<StoreItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn insert(&self, item: StoreItem) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_sorted<F>(
        &self,
        keep: F,
        sort_attr: &str,
        format: DateFormat,
        descending: bool,
        page: &PageRequest,
    ) -> Result<Page, StoreError>
    where
        F: Fn(&StoreItem, Option<NaiveDateTime>) -> bool,
    {
        let offset = parse_offset_cursor(page.cursor.as_deref())?;
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());

        let mut matched: Vec<(Option<NaiveDateTime>, &StoreItem)> = items
            .iter()
            .map(|item| (item.get(sort_attr).and_then(|v| format.decode(v)), item))
            .filter(|(key, item)| keep(item, *key))
            .collect();
        // Stable: equal keys keep insertion order. Undated items go last.
        matched.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) if descending => b.cmp(a),
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let limit = page.limit.max(1);
        let end = (offset + limit).min(matched.len());
        let slice = matched.get(offset..end).unwrap_or_default();
        Ok(Page {
            items: slice.iter().map(|(_, item)| (*item).clone()).collect(),
            next_cursor: (end < matched.len()).then(|| end.to_string()),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_range(range: Option<&DateRange>, key: Option<NaiveDateTime>) -> bool {
    match (range, key) {
        (None, _) => true,
        (Some(r), Some(k)) => r.contains(k.date()),
        (Some(_), None) => false,
    }
}

#[async_trait]
impl AnnouncementStore for InMemoryStore {
    async fn query(&self, query: &KeyQuery, page: &PageRequest) -> Result<Page, StoreError> {
        self.read_sorted(
            |item, key| {
                partition_matches(item, &query.partition_attr, &query.partition_value)
                    && in_range(query.sort_range.as_ref(), key)
                    && query.filter.matches(item)
            },
            &query.sort_attr,
            query.date_format,
            query.descending,
            page,
        )
    }

    async fn scan(&self, query: &ScanQuery, page: &PageRequest) -> Result<Page, StoreError> {
        self.read_sorted(
            |item, _| query.predicate.matches(item),
            &query.sort_attr,
            query.date_format,
            query.descending,
            page,
        )
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RecordPredicate;
    use chrono::NaiveDate;
    use serde_json::json;

    fn store() -> InMemoryStore {
        let rows = [
            json!({"issuerName": "A", "publicationDate": "2025-07-01", "form_type": "q"}),
            json!({"issuerName": "A", "publicationDate": "2025-09-30T12:00:00Z", "form_type": "y"}),
            json!({"issuerName": "B", "publicationDate": "2025-08-15", "form_type": "q"}),
            json!({"issuerName": "A", "publicationDate": "2024-01-10", "form_type": "q"}),
        ];
        InMemoryStore::from_items(rows.iter().filter_map(|r| r.as_object().cloned()).collect())
    }

    fn key_query(partition: &str, range: Option<DateRange>) -> KeyQuery {
        KeyQuery {
            index_name: None,
            partition_attr: "issuerName".to_string(),
            partition_value: partition.to_string(),
            sort_attr: "publicationDate".to_string(),
            sort_range: range,
            date_format: DateFormat::IsoDate,
            descending: true,
            filter: RecordPredicate::identity(),
        }
    }

    #[tokio::test]
    async fn test_query_orders_and_bounds() {
        let q3 = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
        );
        let page = store()
            .query(&key_query("A", Some(q3)), &PageRequest { limit: 10, cursor: None })
            .await
            .unwrap();
        let dates: Vec<&str> = page
            .items
            .iter()
            .map(|i| i["publicationDate"].as_str().unwrap())
            .collect();
        assert_eq!(dates, vec!["2025-09-30T12:00:00Z", "2025-07-01"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_pagination_cursor() {
        let s = store();
        let q = key_query("A", None);
        let first = s.query(&q, &PageRequest { limit: 2, cursor: None }).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));
        let second = s
            .query(&q, &PageRequest { limit: 2, cursor: first.next_cursor })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_scan_applies_predicate() {
        let q = ScanQuery {
            sort_attr: "publicationDate".to_string(),
            date_format: DateFormat::IsoDate,
            descending: false,
            predicate: RecordPredicate {
                announcement_types: vec!["q".to_string()],
                report_type_attr: "form_type".to_string(),
                mode: Default::default(),
            },
        };
        let page = store().scan(&q, &PageRequest { limit: 10, cursor: None }).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0]["publicationDate"], "2024-01-10");
    }

    #[tokio::test]
    async fn test_bad_cursor_is_permanent() {
        let err = store()
            .query(&key_query("A", None), &PageRequest { limit: 1, cursor: Some("x".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Permanent(_)));
    }
}
