//! Autocomplete over the alias index.
//!
//! Completions are keyed only on a partial token and never consult the
//! store. Ranking groups, in order: surface forms starting with the input,
//! surface forms with an inner word starting with it, then any surface
//! containing it. Within a group, heavier and longer aliases come first.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::alias::AliasIndex;
use crate::models::{AliasEntry, EntityType};
use crate::text::phrase_key;

pub const DEFAULT_LIMIT: usize = 8;
pub const MAX_LIMIT: usize = 50;

/// How a suggestion matched the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Prefix,
    WordStart,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub text: String,
    pub canonical: String,
    pub entity_type: EntityType,
    pub match_kind: MatchKind,
}

pub struct SuggestionIndex {
    aliases: Arc<AliasIndex>,
}

impl SuggestionIndex {
    pub fn new(aliases: Arc<AliasIndex>) -> Self {
        Self { aliases }
    }

    /// Surface strings for `prefix`, at most `limit` (clamped to 1..=50).
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.suggest_detailed(prefix, limit)
            .into_iter()
            .map(|s| s.text)
            .collect()
    }

    pub fn suggest_detailed(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        let key = phrase_key(prefix);
        if key.is_empty() {
            return Vec::new();
        }
        let limit = limit.clamp(1, MAX_LIMIT);

        let mut ranked: Vec<(MatchKind, &AliasEntry)> = self
            .aliases
            .entries()
            .filter_map(|e| classify(&AliasIndex::key_of(e), &key).map(|k| (k, e)))
            .collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            ka.cmp(kb)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| b.surface_form.chars().count().cmp(&a.surface_form.chars().count()))
                .then_with(|| a.surface_form.cmp(&b.surface_form))
        });

        let mut seen_surface = HashSet::new();
        let mut seen_canonical = HashSet::new();
        let mut out = Vec::new();
        for (kind, entry) in ranked {
            let surface_key = AliasIndex::key_of(entry);
            let canonical_key = (entry.entity_type, entry.canonical.as_str());
            if seen_surface.contains(&surface_key) || seen_canonical.contains(&canonical_key) {
                continue;
            }
            seen_surface.insert(surface_key);
            seen_canonical.insert(canonical_key);
            out.push(Suggestion {
                text: entry.surface_form.clone(),
                canonical: entry.canonical.clone(),
                entity_type: entry.entity_type,
                match_kind: kind,
            });
            if out.len() == limit {
                break;
            }
        }
        out
    }
}

fn classify(surface_key: &str, key: &str) -> Option<MatchKind> {
    if surface_key.starts_with(key) {
        Some(MatchKind::Prefix)
    } else if surface_key.split(' ').skip(1).any(|w| w.starts_with(key)) {
        Some(MatchKind::WordStart)
    } else if surface_key.contains(key) {
        Some(MatchKind::Substring)
    } else {
        None
    }
}
