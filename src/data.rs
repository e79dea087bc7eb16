//! Static data compiled into the binary: the default alias tables and the
//! degraded-mode dataset. Each can be overridden by a path in the config.

use anyhow::{Context, Result};
use std::path::Path;

use disclosure_nlq_core::alias::{AliasIndex, AliasTable};
use disclosure_nlq_core::record::StoreItem;

use crate::config::Config;
use crate::load::parse_items;

pub const COMPANY_ALIASES: &str = include_str!("../data/company_aliases.json");
pub const ANNOUNCEMENT_ALIASES: &str = include_str!("../data/announcement_aliases.json");
pub const FALLBACK_ANNOUNCEMENTS: &str = include_str!("../data/fallback_announcements.json");

fn read_or(path: Option<&Path>, embedded: &str) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read data file: {}", p.display())),
        None => Ok(embedded.to_string()),
    }
}

/// Builds the alias index from the configured (or embedded) tables.
pub fn build_alias_index(config: &Config) -> Result<AliasIndex> {
    let companies = read_or(config.aliases.companies.as_deref(), COMPANY_ALIASES)?;
    let report_types = read_or(config.aliases.report_types.as_deref(), ANNOUNCEMENT_ALIASES)?;
    let companies = AliasTable::from_json(&companies, "companies")?;
    let report_types = AliasTable::from_json(&report_types, "report_types")?;
    Ok(AliasIndex::build(
        &companies,
        &report_types,
        config.aliases.auto_expand,
    )?)
}

/// Items served when the store is unavailable.
pub fn fallback_items(config: &Config) -> Result<Vec<StoreItem>> {
    let text = read_or(config.fallback.path.as_deref(), FALLBACK_ANNOUNCEMENTS)?;
    parse_items(&text).context("Failed to parse fallback dataset")
}
