//! Alias index: surface forms → canonical entities.
//!
//! Built once from two static alias tables (companies and report types) and
//! never mutated afterwards. Lookups are keyed on [`text::phrase_key`], so
//! matching is case-, diacritic- and punctuation-insensitive.
//!
//! # Table format
//!
//! ```json
//! {
//!   "טבע תעשיות פרמצבטיות בע\"מ": ["טבע", "Teva", {"surface": "TEVA", "weight": 0.7}]
//! }
//! ```
//!
//! # Weights
//!
//! | Source | Default weight |
//! |--------|----------------|
//! | canonical value itself | 1.0 |
//! | declared alias | 0.9 |
//! | expansion-derived variant | 0.8 |
//!
//! # Reload
//!
//! [`SharedAliasIndex`] holds the current index behind `RwLock<Arc<_>>`.
//! Readers take an `Arc` snapshot once per request; a reload swaps the whole
//! `Arc`, so no reader ever sees a partially built index.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use strsim::damerau_levenshtein;

use crate::error::AliasLoadError;
use crate::models::{AliasEntry, EntityType};
use crate::text::{normalize, phrase_key};

const CANONICAL_WEIGHT: f64 = 1.0;
const DECLARED_WEIGHT: f64 = 0.9;
const DERIVED_WEIGHT: f64 = 0.8;

/// Trailing tokens stripped from names during expansion (already normalized).
const LEGAL_SUFFIXES: &[&str] = &["בעמ", "ltd", "limited", "inc", "corp", "plc", "co"];

/// Leading tokens stripped from report-type names during expansion.
const REPORT_HEADS: &[&str] = &["דוח", "דוחות", "דיווח", "דיווחי", "report", "reports"];

/// One declared alias.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AliasSpec {
    Surface(String),
    Weighted { surface: String, weight: f64 },
}

/// A raw alias table: canonical value → declared surface forms.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    pub entries: BTreeMap<String, Vec<AliasSpec>>,
}

impl AliasTable {
    /// Parses a table from JSON. `name` is used in error messages only.
    pub fn from_json(json: &str, name: &str) -> Result<Self, AliasLoadError> {
        let table: AliasTable =
            serde_json::from_str(json).map_err(|source| AliasLoadError::Parse {
                table: name.to_string(),
                source,
            })?;
        if table.entries.is_empty() {
            return Err(AliasLoadError::Empty {
                table: name.to_string(),
            });
        }
        Ok(table)
    }

    /// Adds a canonical with plain string aliases. Mostly for fixtures.
    pub fn insert(&mut self, canonical: &str, aliases: &[&str]) {
        self.entries.insert(
            canonical.to_string(),
            aliases
                .iter()
                .map(|a| AliasSpec::Surface(a.to_string()))
                .collect(),
        );
    }
}

#[derive(Debug, Clone)]
struct IndexedAlias {
    entry: AliasEntry,
    key: String,
}

/// Immutable lookup structure over all alias entries.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    aliases: Vec<IndexedAlias>,
    exact: HashMap<String, Vec<usize>>,
    /// `(key, alias idx)` sorted by key, for prefix range scans.
    sorted_keys: Vec<(String, usize)>,
    max_tokens: usize,
}

impl AliasIndex {
    /// Builds the index from a company table and a report-type table.
    ///
    /// With `auto_expand`, derived variants (legal suffixes stripped,
    /// "דוח"/"report" heads stripped) are added with `derived = true`.
    pub fn build(
        companies: &AliasTable,
        report_types: &AliasTable,
        auto_expand: bool,
    ) -> Result<Self, AliasLoadError> {
        let mut builder = Builder::default();
        builder.add_table(companies, "companies", EntityType::Company, auto_expand)?;
        builder.add_table(report_types, "report_types", EntityType::ReportType, auto_expand)?;
        Ok(builder.finish())
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Token count of the longest indexed surface form.
    pub fn max_phrase_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn entries(&self) -> impl Iterator<Item = &AliasEntry> {
        self.aliases.iter().map(|a| &a.entry)
    }

    /// All matches for `token`: exact phrase matches first, then (for a
    /// single-token input) word-prefix and substring matches. Each group is
    /// ordered by weight, then surface length, both descending.
    pub fn resolve(&self, token: &str) -> Vec<&AliasEntry> {
        let key = phrase_key(token);
        if key.is_empty() {
            return Vec::new();
        }
        let mut out = self.resolve_exact(&key, true);
        if !key.contains(' ') {
            for entry in self.resolve_prefix(&key, true) {
                if !out.iter().any(|e| std::ptr::eq(*e, entry)) {
                    out.push(entry);
                }
            }
            let mut partial: Vec<&AliasEntry> = self
                .aliases
                .iter()
                .filter(|a| a.key.contains(&key))
                .map(|a| &a.entry)
                .filter(|e| !out.iter().any(|o| std::ptr::eq(*o, *e)))
                .collect();
            sort_entries(&mut partial);
            out.extend(partial);
        }
        out
    }

    /// Exact lookup on an already-built phrase key.
    pub fn resolve_exact(&self, key: &str, include_derived: bool) -> Vec<&AliasEntry> {
        let mut out: Vec<&AliasEntry> = self
            .exact
            .get(key)
            .map(|ids| {
                ids.iter()
                    .map(|&i| &self.aliases[i].entry)
                    .filter(|e| include_derived || !e.derived)
                    .collect()
            })
            .unwrap_or_default();
        sort_entries(&mut out);
        out
    }

    /// Entries with a word starting with `key` (a single normalized token).
    pub fn resolve_prefix(&self, key: &str, include_derived: bool) -> Vec<&AliasEntry> {
        let mut out: Vec<&AliasEntry> = Vec::new();
        // Whole-key prefix: contiguous range in the sorted key list.
        let from = self.sorted_keys.partition_point(|(k, _)| k.as_str() < key);
        for (k, idx) in &self.sorted_keys[from..] {
            if !k.starts_with(key) {
                break;
            }
            push_entry(&mut out, &self.aliases[*idx].entry, include_derived);
        }
        // Inner words need a scan.
        for alias in &self.aliases {
            if alias.key.split(' ').skip(1).any(|w| w.starts_with(key)) {
                push_entry(&mut out, &alias.entry, include_derived);
            }
        }
        sort_entries(&mut out);
        out
    }

    /// Entries of the single entity closest to `key` by Damerau-Levenshtein
    /// distance, among keys with the same word count.
    ///
    /// Keys under three characters never match; up to seven characters allow
    /// one edit, longer keys two. Empty when nothing is in range or when two
    /// different entities tie for closest.
    pub fn resolve_fuzzy(&self, key: &str, include_derived: bool) -> Vec<&AliasEntry> {
        let len = key.chars().count();
        let allowed = fuzzy_allowance(len);
        if allowed == 0 {
            return Vec::new();
        }
        let words = key.split(' ').count();
        let mut best = allowed;
        let mut out: Vec<&AliasEntry> = Vec::new();
        for alias in &self.aliases {
            if (!include_derived && alias.entry.derived)
                || alias.key.split(' ').count() != words
                || alias.key.chars().count().abs_diff(len) > best
            {
                continue;
            }
            let distance = damerau_levenshtein(key, &alias.key);
            if distance > best {
                continue;
            }
            if distance < best {
                out.clear();
                best = distance;
            }
            out.push(&alias.entry);
        }
        let Some(first) = out.first() else {
            return out;
        };
        let entity = (first.canonical.clone(), first.entity_type);
        if out.iter().any(|e| e.canonical != entity.0 || e.entity_type != entity.1) {
            return Vec::new();
        }
        sort_entries(&mut out);
        out
    }

    /// Maps a possibly non-canonical name to the canonical of `entity_type`.
    ///
    /// Used to re-validate augmentation output: a name that is already a
    /// canonical value maps to itself; any other name must resolve exactly.
    pub fn canonicalize(&self, name: &str, entity_type: EntityType) -> Option<&str> {
        if let Some(entry) = self
            .aliases
            .iter()
            .find(|a| a.entry.entity_type == entity_type && a.entry.canonical == name)
        {
            return Some(entry.entry.canonical.as_str());
        }
        self.resolve_exact(&phrase_key(name), true)
            .into_iter()
            .find(|e| e.entity_type == entity_type)
            .map(|e| e.canonical.as_str())
    }

    /// Normalized key of an entry, for callers that group by it.
    pub fn key_of(entry: &AliasEntry) -> String {
        phrase_key(&entry.surface_form)
    }
}

fn fuzzy_allowance(chars: usize) -> usize {
    match chars {
        0..=2 => 0,
        3..=7 => 1,
        _ => 2,
    }
}

fn push_entry<'a>(out: &mut Vec<&'a AliasEntry>, entry: &'a AliasEntry, include_derived: bool) {
    if (include_derived || !entry.derived) && !out.iter().any(|e| std::ptr::eq(*e, entry)) {
        out.push(entry);
    }
}

fn sort_entries(entries: &mut [&AliasEntry]) {
    entries.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| b.surface_form.chars().count().cmp(&a.surface_form.chars().count()))
            .then_with(|| a.canonical.cmp(&b.canonical))
            .then_with(|| a.entity_type.cmp(&b.entity_type))
    });
}

#[derive(Default)]
struct Builder {
    aliases: Vec<IndexedAlias>,
    /// `(key, canonical, type)` → position in `aliases`.
    seen: HashMap<(String, String, EntityType), usize>,
}

impl Builder {
    fn add_table(
        &mut self,
        table: &AliasTable,
        name: &str,
        entity_type: EntityType,
        auto_expand: bool,
    ) -> Result<(), AliasLoadError> {
        for (canonical, specs) in &table.entries {
            let canonical = canonical.trim();
            if phrase_key(canonical).is_empty() {
                return Err(AliasLoadError::EmptySurface {
                    table: name.to_string(),
                    canonical: canonical.to_string(),
                });
            }
            self.add(canonical, canonical, entity_type, CANONICAL_WEIGHT, false);

            let mut declared = vec![canonical.to_string()];
            for spec in specs {
                let (surface, weight) = match spec {
                    AliasSpec::Surface(s) => (s.as_str(), DECLARED_WEIGHT),
                    AliasSpec::Weighted { surface, weight } => (surface.as_str(), *weight),
                };
                if phrase_key(surface).is_empty() {
                    return Err(AliasLoadError::EmptySurface {
                        table: name.to_string(),
                        canonical: canonical.to_string(),
                    });
                }
                self.add(surface.trim(), canonical, entity_type, weight.clamp(0.0, 1.0), false);
                declared.push(surface.trim().to_string());
            }

            if auto_expand {
                for surface in &declared {
                    for variant in expand(surface, entity_type) {
                        self.add(&variant, canonical, entity_type, DERIVED_WEIGHT, true);
                    }
                }
            }
        }
        Ok(())
    }

    fn add(
        &mut self,
        surface: &str,
        canonical: &str,
        entity_type: EntityType,
        weight: f64,
        derived: bool,
    ) {
        let key = phrase_key(surface);
        let id = (key.clone(), canonical.to_string(), entity_type);
        if let Some(&idx) = self.seen.get(&id) {
            let existing = &mut self.aliases[idx].entry;
            // Declared beats derived; otherwise keep the heavier weight.
            if existing.derived && !derived {
                existing.derived = false;
                existing.weight = weight;
                existing.surface_form = surface.to_string();
            } else if existing.derived == derived && weight > existing.weight {
                existing.weight = weight;
            }
            return;
        }
        self.seen.insert(id, self.aliases.len());
        self.aliases.push(IndexedAlias {
            entry: AliasEntry {
                surface_form: surface.to_string(),
                canonical: canonical.to_string(),
                entity_type,
                weight,
                derived,
            },
            key,
        });
    }

    fn finish(self) -> AliasIndex {
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut sorted_keys = Vec::with_capacity(self.aliases.len());
        let mut max_tokens = 0;
        for (i, alias) in self.aliases.iter().enumerate() {
            exact.entry(alias.key.clone()).or_default().push(i);
            sorted_keys.push((alias.key.clone(), i));
            max_tokens = max_tokens.max(alias.key.split(' ').count());
        }
        sorted_keys.sort();
        AliasIndex {
            aliases: self.aliases,
            exact,
            sorted_keys,
            max_tokens,
        }
    }
}

/// Derived variants of one surface form.
fn expand(surface: &str, entity_type: EntityType) -> Vec<String> {
    let key = phrase_key(surface);
    let words: Vec<&str> = key.split(' ').collect();
    let mut out = Vec::new();

    let mut end = words.len();
    while end > 1 && LEGAL_SUFFIXES.contains(&words[end - 1]) {
        end -= 1;
    }
    if end < words.len() {
        out.push(words[..end].join(" "));
    }

    if entity_type == EntityType::ReportType
        && words.len() > 1
        && REPORT_HEADS.contains(&words[0])
    {
        out.push(words[1..].join(" "));
    }

    // Hyphenated forms also match written without the separator.
    let normalized = normalize(surface);
    if normalized.contains('-') {
        let joined = normalized.replace('-', "");
        if phrase_key(&joined) != key {
            out.push(joined);
        }
    }
    out
}

/// The process-wide alias index with atomic replace.
pub struct SharedAliasIndex {
    inner: RwLock<Arc<AliasIndex>>,
}

impl SharedAliasIndex {
    pub fn new(index: AliasIndex) -> Self {
        Self {
            inner: RwLock::new(Arc::new(index)),
        }
    }

    /// The current index. Hold the returned `Arc` for the whole request.
    pub fn snapshot(&self) -> Arc<AliasIndex> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swaps in a fully built index. In-flight readers keep their snapshot.
    pub fn replace(&self, index: AliasIndex) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> AliasIndex {
        let mut companies = AliasTable::default();
        companies.insert("טבע תעשיות פרמצבטיות בע\"מ", &["טבע", "Teva"]);
        companies.insert("בנק לאומי לישראל בע\"מ", &["לאומי", "Leumi"]);
        companies.insert("בנק הפועלים בע\"מ", &["הפועלים", "Hapoalim"]);
        let mut reports = AliasTable::default();
        reports.insert("דוח רבעוני", &["רבעוני", "quarterly report"]);
        AliasIndex::build(&companies, &reports, true).unwrap()
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let idx = fixture();
        let hits = idx.resolve("TEVA");
        assert_eq!(hits[0].canonical, "טבע תעשיות פרמצבטיות בע\"מ");
    }

    #[test]
    fn test_canonical_matches_with_any_quote_style() {
        let idx = fixture();
        let hits = idx.resolve_exact(&phrase_key("טבע תעשיות פרמצבטיות בע״מ"), false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].weight, 1.0);
    }

    #[test]
    fn test_suffix_stripped_variant_is_derived() {
        let idx = fixture();
        let key = phrase_key("בנק לאומי לישראל");
        assert_eq!(idx.resolve_exact(&key, true).len(), 1);
        assert!(idx.resolve_exact(&key, false).is_empty());
    }

    #[test]
    fn test_prefix_match_on_inner_word() {
        let idx = fixture();
        let hits = idx.resolve_prefix("פרמצ", true);
        assert!(hits.iter().all(|e| e.canonical.starts_with("טבע")));
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_resolve_orders_exact_before_partial() {
        let idx = fixture();
        let hits = idx.resolve("בנק");
        let canon: Vec<&str> = hits.iter().map(|e| e.canonical.as_str()).collect();
        assert!(canon.contains(&"בנק לאומי לישראל בע\"מ"));
        assert!(canon.contains(&"בנק הפועלים בע\"מ"));
        assert!(hits[0].weight >= hits[hits.len() - 1].weight);
    }

    #[test]
    fn test_no_match_is_empty() {
        assert!(fixture().resolve("xyzzy").is_empty());
    }

    #[test]
    fn test_max_phrase_tokens() {
        assert_eq!(fixture().max_phrase_tokens(), 4);
    }

    #[test]
    fn test_canonicalize_maps_alias_to_canonical() {
        let idx = fixture();
        assert_eq!(
            idx.canonicalize("Leumi", EntityType::Company),
            Some("בנק לאומי לישראל בע\"מ")
        );
        assert_eq!(idx.canonicalize("Leumi", EntityType::ReportType), None);
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let err = AliasTable::from_json("{}", "companies").unwrap_err();
        assert!(matches!(err, AliasLoadError::Empty { .. }));
    }

    #[test]
    fn test_weighted_alias_spec() {
        let table = AliasTable::from_json(r#"{"X Corp": [{"surface": "xc", "weight": 0.5}]}"#, "t")
            .unwrap();
        let idx = AliasIndex::build(&table, &AliasTable::default(), false).unwrap();
        assert_eq!(idx.resolve("xc")[0].weight, 0.5);
    }

    #[test]
    fn test_fuzzy_allows_one_edit_on_short_keys() {
        let idx = fixture();
        let hits = idx.resolve_fuzzy("tevva", true);
        assert_eq!(hits[0].canonical, "טבע תעשיות פרמצבטיות בע\"מ");
        assert_eq!(idx.resolve_fuzzy("טבה", true)[0].surface_form, "טבע");
        assert!(idx.resolve_fuzzy("tvvva", true).is_empty());
        assert!(idx.resolve_fuzzy("טב", true).is_empty());
    }

    #[test]
    fn test_fuzzy_matches_multi_word_keys() {
        let idx = fixture();
        let hits = idx.resolve_fuzzy("quartely report", true);
        assert_eq!(hits[0].canonical, "דוח רבעוני");
        assert_eq!(hits[0].entity_type, EntityType::ReportType);
    }

    #[test]
    fn test_fuzzy_refuses_ties_between_entities() {
        let mut companies = AliasTable::default();
        companies.insert("Alpha Ltd", &["abcd"]);
        companies.insert("Beta Ltd", &["abce"]);
        let idx = AliasIndex::build(&companies, &AliasTable::default(), false).unwrap();
        assert!(idx.resolve_fuzzy("abcf", true).is_empty());
        assert_eq!(idx.resolve_fuzzy("abcdd", true)[0].canonical, "Alpha Ltd");
    }

    #[test]
    fn test_shared_index_replace_keeps_old_snapshot() {
        let shared = SharedAliasIndex::new(fixture());
        let before = shared.snapshot();
        shared.replace(AliasIndex::default());
        assert!(!before.is_empty());
        assert!(shared.snapshot().is_empty());
    }
}
