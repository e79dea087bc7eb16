//! Import of raw announcement items.
//!
//! Accepts a JSON array of items, an object with an `items` (or `Items`)
//! array, or JSON lines with one item per line.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

use disclosure_nlq_core::record::StoreItem;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Parses items from any of the accepted layouts.
pub fn parse_items(text: &str) -> Result<Vec<StoreItem>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return items_from_value(value);
        }
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("line {}: invalid JSON", n + 1))?;
            match value {
                Value::Object(map) => Ok(map),
                _ => bail!("line {}: expected a JSON object", n + 1),
            }
        })
        .collect()
}

fn items_from_value(value: Value) -> Result<Vec<StoreItem>> {
    let array = match value {
        Value::Array(a) => a,
        Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("Items")) {
            Some(Value::Array(a)) => a,
            Some(_) => bail!("'items' must be an array"),
            None => vec![Value::Object(map)],
        },
        _ => bail!("expected a JSON array or object"),
    };
    array
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Object(map) => Ok(map),
            _ => bail!("item {} is not a JSON object", i),
        })
        .collect()
}

/// `nlq load <file>`: upserts every item in `path` into the database.
pub async fn run_load(config: &Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file: {}", path.display()))?;
    let items = parse_items(&text)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let written = store.upsert_items(&items, &config.table).await?;
    let total = store.count().await?;
    store.pool().close().await;

    println!("Loaded {} items ({} total).", written, total);
    Ok(())
}
