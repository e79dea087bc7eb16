use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::attr_expr;

/// Creates the items table and the expression indexes backing the primary
/// key, the category index, and the date index named in `[table]`.
///
/// Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let t = &config.table;

    // Create items table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS announcement_items (
            item_id TEXT PRIMARY KEY,
            attributes TEXT NOT NULL,
            loaded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let indexes = [
        ("primary", &t.partition_key_attr, &t.sort_key_attr),
        (
            t.category_index_name.as_str(),
            &t.category_index_partition_attr,
            &t.category_index_sort_attr,
        ),
        (t.date_index_name.as_str(), &t.date_index_partition_attr, &t.sort_key_attr),
    ];
    for (name, partition, sort) in indexes {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON announcement_items ({}, {})",
            index_name(name),
            attr_expr(partition),
            attr_expr(sort)
        );
        sqlx::query(&sql).execute(&pool).await?;
    }

    pool.close().await;
    Ok(())
}

/// SQLite index name for a logical index.
fn index_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("idx_items_{}", cleaned.to_ascii_lowercase())
}
