//! Mapping from raw store items to [`AnnouncementRecord`].
//!
//! Stored items are loosely shaped JSON objects; field names vary between
//! ingestion generations. Each output field is taken from the first
//! present candidate attribute, with `"#"` standing in for a missing link.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::models::AnnouncementRecord;
use crate::plan::TableSchema;

/// A raw item as returned by an [`AnnouncementStore`](crate::store::AnnouncementStore).
pub type StoreItem = Map<String, Value>;

const COMPANY_INFO_BASE: &str = "https://maya.tase.co.il/he/companies/";
const STOCK_GRAPH_BASE: &str = "https://market.tase.co.il/he/market_data/security/";
const MISSING_LINK: &str = "#";

fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn first_text(item: &StoreItem, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| item.get(*k).and_then(text))
}

/// Sort-key timestamp of `item`, if it carries a decodable one.
pub fn sort_key(item: &StoreItem, schema: &TableSchema) -> Option<NaiveDateTime> {
    item.get(&schema.sort_key_attr)
        .and_then(|v| schema.date_format.decode(v))
}

fn doc_link(item: &StoreItem) -> Option<String> {
    if let Some(direct) = first_text(item, &["url", "doc_link", "docUrl"]) {
        return Some(direct);
    }
    let attached = item.get("attachedFiles").or_else(|| item.get("files"))?;
    match attached {
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.starts_with('{') || raw.starts_with('[') {
                match serde_json::from_str::<Value>(raw) {
                    Ok(parsed) => link_in(&parsed),
                    Err(_) => Some(raw.to_string()),
                }
            } else {
                (!raw.is_empty()).then(|| raw.to_string())
            }
        }
        other => link_in(other),
    }
}

fn link_in(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => first_text(map, &["url", "href"]),
        Value::Array(entries) => entries.iter().find_map(|e| match e {
            Value::Object(map) => first_text(map, &["url", "href"]),
            other => text(other),
        }),
        other => text(other),
    }
}

fn announcement_type(item: &StoreItem, schema: &TableSchema) -> Option<String> {
    let raw = ["events", "report_type", schema.report_type_attr.as_str()]
        .iter()
        .find_map(|k| item.get(*k).filter(|v| !v.is_null()))?;
    match raw {
        Value::Object(map) => {
            let keys: Vec<&str> = map
                .iter()
                .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
                .map(|(k, _)| k.as_str())
                .collect();
            (!keys.is_empty()).then(|| keys.join(", "))
        }
        Value::Array(values) => {
            let parts: Vec<String> = values.iter().filter_map(text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => text(other),
    }
}

/// Maps one raw item. `ordinal` is used as the id when the item has none.
pub fn from_item(item: &StoreItem, schema: &TableSchema, ordinal: usize) -> AnnouncementRecord {
    let company_name = first_text(
        item,
        &[
            schema.partition_key_attr.as_str(),
            "company_name_he",
            "company_name_en",
        ],
    )
    .unwrap_or_else(|| "Unknown".to_string());

    let announcement_date = sort_key(item, schema)
        .map(|dt| dt.date().format("%Y-%m-%d").to_string())
        .or_else(|| first_text(item, &["submission_date", "publication_date"]))
        .unwrap_or_default();

    let doc_link = doc_link(item).unwrap_or_else(|| MISSING_LINK.to_string());

    let company_info_link = first_text(item, &["companyInfoLink", "company_info_link"])
        .or_else(|| {
            first_text(item, &["registration_number", "companyId", "issuer_id", "issuerId"])
                .map(|id| format!("{COMPANY_INFO_BASE}{id}"))
        })
        .unwrap_or_else(|| MISSING_LINK.to_string());

    let stock_graph_link = first_text(item, &["stockGraphLink", "stock_graph_link"])
        .or_else(|| {
            first_text(item, &["security_id", "securityId", "securityNumber"])
                .map(|id| format!("{STOCK_GRAPH_BASE}{id}/graph"))
        })
        .unwrap_or_else(|| MISSING_LINK.to_string());

    let pro_summary_link = first_text(item, &["pro_url", "proUrl", "analysis_url"])
        .unwrap_or_else(|| doc_link.clone());

    AnnouncementRecord {
        id: first_text(item, &["id", "item_id", "reference"])
            .unwrap_or_else(|| ordinal.to_string()),
        company_name,
        announcement_type: announcement_type(item, schema).unwrap_or_else(|| "Unknown".to_string()),
        announcement_date,
        summary: first_text(item, &["subject", "title", "headline"]).unwrap_or_default(),
        doc_link,
        company_info_link,
        stock_graph_link,
        pro_summary_link,
    }
}
