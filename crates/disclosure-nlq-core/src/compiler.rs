//! Entity & filter compiler.
//!
//! Turns a raw query into a [`FilterConfig`] plus [`Diagnostics`]:
//!
//! 1. normalize + tokenize ([`crate::text`])
//! 2. intent guard (stock prices, investment advice, SQL)
//! 3. longest-match-first alias windows, with Hebrew prefix retry
//! 4. unique-prefix resolution for leftover long tokens
//! 5. temporal resolution over the leftover tokens
//! 6. quantity extraction ("5 latest")
//! 7. typo-tolerant alias matching for whatever is still open
//! 8. confidence scoring and notes
//!
//! Compilation never fails: every problem becomes a note and a confidence
//! penalty.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::alias::AliasIndex;
use crate::models::{AliasEntry, Diagnostics, EntityType, FilterConfig};
use crate::temporal::TemporalResolver;
use crate::text::{self, Token};

/// Confidence penalties and note limits.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `unmatched_token_penalty` | 0.25 | per non-trivial token left unresolved |
/// | `ambiguous_temporal_penalty` | 0.15 | per ambiguous date expression |
/// | `ambiguous_alias_penalty` | 0.10 | per token matching several entities |
/// | `max_notes` | 3 | notes surfaced before summarizing |
/// | `max_window_tokens` | 6 | longest alias window tried |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_unmatched_token_penalty")]
    pub unmatched_token_penalty: f64,
    #[serde(default = "default_ambiguous_temporal_penalty")]
    pub ambiguous_temporal_penalty: f64,
    #[serde(default = "default_ambiguous_alias_penalty")]
    pub ambiguous_alias_penalty: f64,
    #[serde(default = "default_max_notes")]
    pub max_notes: usize,
    #[serde(default = "default_max_window_tokens")]
    pub max_window_tokens: usize,
}

fn default_unmatched_token_penalty() -> f64 {
    0.25
}
fn default_ambiguous_temporal_penalty() -> f64 {
    0.15
}
fn default_ambiguous_alias_penalty() -> f64 {
    0.10
}
fn default_max_notes() -> usize {
    3
}
fn default_max_window_tokens() -> usize {
    6
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            unmatched_token_penalty: default_unmatched_token_penalty(),
            ambiguous_temporal_penalty: default_ambiguous_temporal_penalty(),
            ambiguous_alias_penalty: default_ambiguous_alias_penalty(),
            max_notes: default_max_notes(),
            max_window_tokens: default_max_window_tokens(),
        }
    }
}

/// Per-request compile switches.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Include expansion-derived alias variants.
    pub auto_expand_aliases: bool,
    /// Write absolute `startDate`/`endDate` even for relative expressions.
    pub force_absolute_timeframe: bool,
    pub today: NaiveDate,
}

impl CompileOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            auto_expand_aliases: true,
            force_absolute_timeframe: true,
            today,
        }
    }
}

/// Result of compiling one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compilation {
    pub filters: FilterConfig,
    pub diagnostics: Diagnostics,
}

impl Compilation {
    /// Caps notes for presentation. Call once, after all notes are added.
    pub fn finish(mut self, max_notes: usize) -> Self {
        self.diagnostics.cap_notes(max_notes);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Open,
    Alias,
    Temporal,
    Quantity,
    AmbiguousAlias,
}

/// Compiles queries against a fixed alias index and temporal grammar.
pub struct FilterCompiler {
    aliases: Arc<AliasIndex>,
    temporal: Arc<TemporalResolver>,
    scoring: ScoringConfig,
}

impl FilterCompiler {
    pub fn new(
        aliases: Arc<AliasIndex>,
        temporal: Arc<TemporalResolver>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            aliases,
            temporal,
            scoring,
        }
    }

    /// Compiles `query` with notes capped at `max_notes`.
    pub fn compile(&self, query: &str, opts: &CompileOptions) -> Compilation {
        self.compile_raw(query, opts).finish(self.scoring.max_notes)
    }

    /// Compiles `query` keeping every note, for callers that append their own.
    pub fn compile_raw(&self, query: &str, opts: &CompileOptions) -> Compilation {
        let normalized = text::normalize(query);
        let tokens = text::tokenize(&normalized);
        let mut filters = FilterConfig::default();
        let mut diagnostics = Diagnostics::default();

        if tokens.is_empty() {
            diagnostics.notes.push("empty query: no signal".to_string());
            return Compilation {
                filters,
                diagnostics,
            };
        }

        diagnostics.error = guard_intent(&tokens).map(str::to_string);

        let mut slots = vec![Slot::Open; tokens.len()];
        let mut penalty = 0.0;

        self.match_windows(&tokens, opts, &mut slots, &mut filters, &mut diagnostics);
        penalty += self.match_prefixes(&tokens, opts, &mut slots, &mut filters, &mut diagnostics);
        // Date order follows the whole query, not just the leftovers: a
        // Hebrew company name makes `05/03/2025` day-first.
        let day_first = text::contains_hebrew(&normalized);
        penalty += self.match_temporal(
            &tokens,
            opts,
            day_first,
            &mut slots,
            &mut filters,
            &mut diagnostics,
        );
        extract_quantity(&tokens, &mut slots, &mut filters);
        self.match_fuzzy(&tokens, opts, &mut slots, &mut filters, &mut diagnostics);

        for (token, slot) in tokens.iter().zip(&slots) {
            if *slot == Slot::Open && !text::is_trivial(&token.text) {
                penalty += self.scoring.unmatched_token_penalty;
                diagnostics
                    .notes
                    .push(format!("unmatched token '{}'", token.text));
            }
        }

        let consumed: Vec<&str> = tokens
            .iter()
            .zip(&slots)
            .filter(|(_, s)| matches!(s, Slot::Alias | Slot::Temporal | Slot::Quantity))
            .map(|(t, _)| t.text.as_str())
            .collect();
        let heuristics = consumed.join(" ");
        diagnostics.heuristics_text = Some(heuristics.clone());
        diagnostics.final_text = Some(heuristics);

        diagnostics.confidence = if diagnostics.error.is_some() || filters.is_empty() {
            0.0
        } else {
            (1.0 - penalty).clamp(0.0, 1.0)
        };
        filters.normalize_dates();

        Compilation {
            filters,
            diagnostics,
        }
    }

    fn match_windows(
        &self,
        tokens: &[Token],
        opts: &CompileOptions,
        slots: &mut [Slot],
        filters: &mut FilterConfig,
        diagnostics: &mut Diagnostics,
    ) {
        let max_window = self
            .scoring
            .max_window_tokens
            .min(self.aliases.max_phrase_tokens())
            .max(1);
        let mut i = 0;
        while i < tokens.len() {
            let mut advanced = false;
            let longest = max_window.min(tokens.len() - i);
            for width in (1..=longest).rev() {
                if slots[i..i + width].iter().any(|s| *s != Slot::Open) {
                    continue;
                }
                let window = &tokens[i..i + width];
                if let Some(hits) = self.lookup_window(window, opts.auto_expand_aliases) {
                    let surface = window
                        .iter()
                        .map(|t| t.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    accept(&hits, &surface, filters, diagnostics);
                    slots[i..i + width].fill(Slot::Alias);
                    i += width;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                i += 1;
            }
        }
    }

    /// Exact lookup of a window, retrying with Hebrew prefixes stripped from
    /// its first token.
    fn lookup_window(&self, window: &[Token], include_derived: bool) -> Option<Vec<&AliasEntry>> {
        if window.len() == 1 && text::is_stop_word(&window[0].text) {
            return None;
        }
        let rest: Vec<&str> = window[1..].iter().map(|t| t.text.as_str()).collect();
        let key_with = |head: &str| {
            let mut parts = vec![head];
            parts.extend(rest.iter().copied());
            parts.join(" ")
        };

        let hits = self.aliases.resolve_exact(&key_with(&window[0].text), include_derived);
        if !hits.is_empty() {
            return Some(hits);
        }
        for stripped in text::strip_hebrew_prefixes(&window[0].text) {
            let hits = self.aliases.resolve_exact(&key_with(stripped), include_derived);
            if !hits.is_empty() {
                return Some(hits);
            }
        }
        None
    }

    fn match_prefixes(
        &self,
        tokens: &[Token],
        opts: &CompileOptions,
        slots: &mut [Slot],
        filters: &mut FilterConfig,
        diagnostics: &mut Diagnostics,
    ) -> f64 {
        let mut penalty = 0.0;
        for (token, slot) in tokens.iter().zip(slots.iter_mut()) {
            if *slot != Slot::Open
                || token.char_len() < 4
                || token.is_numeric()
                || text::is_trivial(&token.text)
            {
                continue;
            }
            let hits = self.aliases.resolve_prefix(&token.text, opts.auto_expand_aliases);
            let mut canonicals: Vec<(&str, EntityType)> = Vec::new();
            for hit in &hits {
                let id = (hit.canonical.as_str(), hit.entity_type);
                if !canonicals.contains(&id) {
                    canonicals.push(id);
                }
            }
            match canonicals.len() {
                0 => {}
                1 => {
                    accept(&hits[..1], &token.text, filters, diagnostics);
                    diagnostics.notes.push(format!(
                        "partial match '{}' resolved to '{}'",
                        token.text, hits[0].canonical
                    ));
                    *slot = Slot::Alias;
                }
                n => {
                    let shown: Vec<&str> = canonicals.iter().take(3).map(|(c, _)| *c).collect();
                    let more = if n > 3 {
                        format!(" (+{} more)", n - 3)
                    } else {
                        String::new()
                    };
                    diagnostics.notes.push(format!(
                        "ambiguous token '{}' matches {}{}",
                        token.text,
                        shown.join(", "),
                        more
                    ));
                    penalty += self.scoring.ambiguous_alias_penalty;
                    *slot = Slot::AmbiguousAlias;
                }
            }
        }
        penalty
    }

    /// Offers the leftover tokens to the temporal resolver.
    ///
    /// Leftovers are joined with spaces; a `|` marks each gap left by a
    /// consumed span so that no expression is stitched across it.
    fn match_temporal(
        &self,
        tokens: &[Token],
        opts: &CompileOptions,
        day_first: bool,
        slots: &mut [Slot],
        filters: &mut FilterConfig,
        diagnostics: &mut Diagnostics,
    ) -> f64 {
        let mut residual = String::new();
        let mut spans: Vec<(usize, usize, usize)> = Vec::new();
        let mut previous: Option<usize> = None;
        for (idx, token) in tokens.iter().enumerate() {
            if slots[idx] != Slot::Open {
                continue;
            }
            if let Some(p) = previous {
                residual.push_str(if p + 1 == idx { " " } else { " | " });
            }
            let start = residual.len();
            residual.push_str(&token.text);
            spans.push((idx, start, residual.len()));
            previous = Some(idx);
        }

        let Some(found) = self.temporal.resolve_in_locale(&residual, opts.today, day_first) else {
            return 0.0;
        };

        let mut matched = Vec::new();
        for (idx, start, end) in spans {
            if start < found.span.end && found.span.start < end {
                slots[idx] = Slot::Temporal;
                matched.push(tokens[idx].text.as_str());
            }
        }

        match (found.relative, opts.force_absolute_timeframe) {
            (Some(window), false) => {
                filters.start_date = None;
                filters.end_date = None;
                filters.relative_timeframe = Some(window);
            }
            _ => filters.set_range(found.range),
        }

        if found.ambiguous {
            diagnostics.notes.push(format!(
                "ambiguous date '{}' read as {}..{}",
                matched.join(" "),
                found.range.start,
                found.range.end
            ));
            self.scoring.ambiguous_temporal_penalty
        } else {
            0.0
        }
    }

    /// Last-chance alias lookup tolerating a typo or two.
    ///
    /// Only windows made entirely of open tokens are tried, longest first,
    /// and both ends must be content words. A window is accepted when a
    /// single entity sits closest to it within [`AliasIndex::resolve_fuzzy`]'s
    /// edit allowance.
    fn match_fuzzy(
        &self,
        tokens: &[Token],
        opts: &CompileOptions,
        slots: &mut [Slot],
        filters: &mut FilterConfig,
        diagnostics: &mut Diagnostics,
    ) {
        let candidate =
            |t: &Token| !t.is_numeric() && t.char_len() >= 3 && !text::is_trivial(&t.text);
        let max_window = self
            .scoring
            .max_window_tokens
            .min(self.aliases.max_phrase_tokens())
            .max(1);
        let mut i = 0;
        while i < tokens.len() {
            let longest = max_window.min(tokens.len() - i);
            let mut width = longest;
            let mut advanced = false;
            while width > 0 {
                let window = &tokens[i..i + width];
                let open = slots[i..i + width].iter().all(|s| *s == Slot::Open);
                let ends =
                    window.first().is_some_and(candidate) && window.last().is_some_and(candidate);
                if open && ends {
                    let surface = window
                        .iter()
                        .map(|t| t.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    let hits = self.aliases.resolve_fuzzy(&surface, opts.auto_expand_aliases);
                    if let Some(top) = hits.first() {
                        diagnostics.notes.push(format!(
                            "fuzzy match '{}' resolved to '{}'",
                            surface, top.canonical
                        ));
                        accept(&hits, &surface, filters, diagnostics);
                        slots[i..i + width].fill(Slot::Alias);
                        i += width;
                        advanced = true;
                        break;
                    }
                }
                width -= 1;
            }
            if !advanced {
                i += 1;
            }
        }
    }
}

/// Records the best hit of each entity type among the top-weighted hits.
fn accept(
    hits: &[&AliasEntry],
    surface: &str,
    filters: &mut FilterConfig,
    diagnostics: &mut Diagnostics,
) {
    let Some(top) = hits.first() else {
        return;
    };
    let mut taken: Vec<EntityType> = Vec::new();
    for hit in hits.iter().filter(|h| h.weight == top.weight) {
        if taken.contains(&hit.entity_type) {
            continue;
        }
        taken.push(hit.entity_type);
        match hit.entity_type {
            EntityType::Company => {
                filters.push_company(&hit.canonical);
                diagnostics
                    .matched_company_aliases
                    .insert(surface.to_string(), hit.canonical.clone());
            }
            EntityType::ReportType => {
                filters.push_announcement_type(&hit.canonical);
                diagnostics
                    .matched_report_aliases
                    .insert(surface.to_string(), hit.canonical.clone());
            }
        }
    }
}

/// First free-standing small integer that is not part of a date.
fn extract_quantity(tokens: &[Token], slots: &mut [Slot], filters: &mut FilterConfig) {
    for (token, slot) in tokens.iter().zip(slots.iter_mut()) {
        if *slot != Slot::Open || !token.is_numeric() {
            continue;
        }
        if let Ok(n) = token.text.parse::<u32>() {
            if (1..=500).contains(&n) {
                filters.quantity = Some(n);
                *slot = Slot::Quantity;
                return;
            }
        }
    }
}

fn has_pair(tokens: &[Token], first: &[&str], second: &[&str]) -> bool {
    tokens
        .windows(2)
        .any(|w| first.contains(&w[0].text.as_str()) && second.contains(&w[1].text.as_str()))
}

/// Requests the resolver must refuse rather than answer with filings.
fn guard_intent(tokens: &[Token]) -> Option<&'static str> {
    let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();

    if has_pair(tokens, &["מחיר", "שער", "מחירי"], &["מניה", "המניה", "מניית", "מניות", "המניות"])
        || has_pair(tokens, &["stock", "share"], &["price", "prices", "quote"])
    {
        return Some("stock price queries are not supported; ask about disclosures instead");
    }

    if has_pair(tokens, &["כדאי", "שווה"], &["לקנות", "למכור", "להשקיע"])
        || (has_pair(tokens, &["should"], &["i", "we"])
            && words.iter().any(|w| matches!(*w, "buy" | "sell" | "invest")))
        || has_pair(tokens, &["investment"], &["advice", "recommendation"])
    {
        return Some("investment advice is not supported");
    }

    const SQL_HEADS: &[&str] = &["select", "insert", "delete", "drop", "update", "truncate"];
    const SQL_TAILS: &[&str] = &["from", "into", "table", "set", "where"];
    let sql_head = words.first().is_some_and(|w| SQL_HEADS.contains(w));
    if (sql_head && words.iter().skip(1).any(|w| SQL_TAILS.contains(w)))
        || has_pair(tokens, &["union"], &["select"])
    {
        return Some("query looks like SQL; use natural language");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasTable;
    use crate::models::{RelativeWindow, TimeUnit};

    const TEVA: &str = "טבע תעשיות פרמצבטיות בע\"מ";
    const LEUMI: &str = "בנק לאומי לישראל בע\"מ";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 15).unwrap()
    }

    fn compiler() -> FilterCompiler {
        let mut companies = AliasTable::default();
        companies.insert(TEVA, &["טבע", "Teva"]);
        companies.insert(LEUMI, &["לאומי", "Leumi"]);
        companies.insert("בנק הפועלים בע\"מ", &["הפועלים", "Hapoalim"]);
        companies.insert("אלביט מערכות בע\"מ", &["אלביט", "Elbit Systems"]);
        companies.insert("אלקטרה בע\"מ", &["אלקטרה"]);
        companies.insert("אלקטרה צריכה בע\"מ", &["אלקטרה צריכה"]);
        let mut reports = AliasTable::default();
        reports.insert("דוח רבעוני", &["רבעוני", "quarterly report"]);
        reports.insert("דוח שנתי", &["שנתי", "annual report"]);
        let index = AliasIndex::build(&companies, &reports, true).unwrap();
        FilterCompiler::new(
            Arc::new(index),
            Arc::new(TemporalResolver::new().unwrap()),
            ScoringConfig::default(),
        )
    }

    fn compile(q: &str) -> Compilation {
        compiler().compile(q, &CompileOptions::new(today()))
    }

    #[test]
    fn test_scenario_quarterly_teva_q3() {
        let c = compile("רבעוני של טבע מהרבעון השלישי 2025");
        assert_eq!(c.filters.company_names, vec![TEVA]);
        assert_eq!(c.filters.announcement_types, vec!["דוח רבעוני"]);
        assert_eq!(c.filters.start_date, NaiveDate::from_ymd_opt(2025, 7, 1));
        assert_eq!(c.filters.end_date, NaiveDate::from_ymd_opt(2025, 9, 30));
        assert!(c.diagnostics.confidence > 0.7);
        assert_eq!(
            c.diagnostics.matched_company_aliases.get("טבע").map(String::as_str),
            Some(TEVA)
        );
    }

    #[test]
    fn test_exact_canonical_only() {
        let c = compile(TEVA);
        assert_eq!(c.filters.company_names, vec![TEVA]);
        assert!(c.diagnostics.confidence >= 0.9);
    }

    #[test]
    fn test_empty_query_has_no_signal() {
        for q in ["", "   ", "\t\n"] {
            let c = compile(q);
            assert!(c.filters.is_empty());
            assert_eq!(c.diagnostics.confidence, 0.0);
            assert_eq!(c.diagnostics.notes, vec!["empty query: no signal"]);
        }
    }

    #[test]
    fn test_unmatched_tokens_scenario() {
        let c = compile("xyzzy nonword");
        assert!(c.filters.is_empty());
        assert_eq!(c.diagnostics.confidence, 0.0);
        let unmatched = c
            .diagnostics
            .notes
            .iter()
            .filter(|n| n.starts_with("unmatched token"))
            .count();
        assert_eq!(unmatched, 2);
    }

    #[test]
    fn test_notes_are_capped() {
        let c = compile("טבע aaaa bbbb cccc dddd eeee");
        assert_eq!(c.diagnostics.notes.len(), 4);
        assert_eq!(c.diagnostics.notes[3], "…and 2 more");
        assert_eq!(c.diagnostics.confidence, 0.0);
    }

    #[test]
    fn test_unmatched_token_lowers_confidence() {
        let c = compile("טבע zzzz");
        assert!((c.diagnostics.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let compiler = compiler();
        let opts = CompileOptions::new(today());
        let a = compiler.compile("דוח שנתי של לאומי ו-Teva 2024", &opts);
        let b = compiler.compile("דוח שנתי של לאומי ו-Teva 2024", &opts);
        assert_eq!(
            serde_json::to_string(&a.filters).unwrap(),
            serde_json::to_string(&b.filters).unwrap()
        );
        assert_eq!(a.diagnostics.confidence, b.diagnostics.confidence);
    }

    #[test]
    fn test_multiple_companies_keep_insertion_order() {
        let c = compile("לאומי וטבע");
        assert_eq!(c.filters.company_names, vec![LEUMI, TEVA]);
    }

    #[test]
    fn test_hebrew_prefix_on_alias() {
        let c = compile("דוחות מלאומי");
        assert_eq!(c.filters.company_names, vec![LEUMI]);
    }

    #[test]
    fn test_relative_kept_unless_forced() {
        let compiler = compiler();
        let mut opts = CompileOptions::new(today());
        opts.force_absolute_timeframe = false;
        let c = compiler.compile("טבע 30 ימים אחרונים", &opts);
        assert_eq!(
            c.filters.relative_timeframe,
            Some(RelativeWindow::new(30, TimeUnit::Day))
        );
        assert!(c.filters.start_date.is_none());

        opts.force_absolute_timeframe = true;
        let c = compiler.compile("טבע 30 ימים אחרונים", &opts);
        assert!(c.filters.relative_timeframe.is_none());
        assert_eq!(c.filters.end_date, Some(today()));
    }

    #[test]
    fn test_ambiguous_quarter_penalized() {
        let c = compile("טבע q3");
        assert!((c.diagnostics.confidence - 0.85).abs() < 1e-9);
        assert!(c.diagnostics.notes.iter().any(|n| n.starts_with("ambiguous date")));
    }

    #[test]
    fn test_derived_aliases_respect_expand_flag() {
        let compiler = compiler();
        let mut opts = CompileOptions::new(today());
        let c = compiler.compile("בנק לאומי לישראל", &opts);
        assert_eq!(c.filters.company_names, vec![LEUMI]);

        opts.auto_expand_aliases = false;
        let c = compiler.compile("בנק לאומי לישראל", &opts);
        assert_eq!(c.filters.company_names, vec![LEUMI]);
        assert!(c.diagnostics.confidence < 1.0);
    }

    #[test]
    fn test_unique_prefix_accepted() {
        let c = compile("פרמצבטיות");
        assert_eq!(c.filters.company_names, vec![TEVA]);
    }

    #[test]
    fn test_ambiguous_prefix_noted() {
        let c = compile("אלקטר");
        assert!(c.filters.company_names.is_empty());
        assert!(c.diagnostics.notes[0].starts_with("ambiguous token 'אלקטר' matches"));
        assert!(!c.diagnostics.notes.iter().any(|n| n.starts_with("unmatched token")));
    }

    #[test]
    fn test_quantity_extraction() {
        let c = compile("5 דוחות אחרונים של טבע");
        assert_eq!(c.filters.quantity, Some(5));
        assert_eq!(c.filters.company_names, vec![TEVA]);
        assert!(c.diagnostics.confidence >= 0.9);
    }

    #[test]
    fn test_stock_price_is_refused() {
        let c = compile("מה מחיר המניה של טבע");
        assert!(c.diagnostics.error.is_some());
        assert_eq!(c.diagnostics.confidence, 0.0);
        assert_eq!(c.filters.company_names, vec![TEVA]);
    }

    #[test]
    fn test_sql_is_refused() {
        let c = compile("SELECT * FROM announcements");
        assert_eq!(
            c.diagnostics.error.as_deref(),
            Some("query looks like SQL; use natural language")
        );
    }

    #[test]
    fn test_heuristics_text_lists_consumed_tokens() {
        let c = compile("רבעוני של טבע 2025");
        assert_eq!(c.diagnostics.heuristics_text.as_deref(), Some("רבעוני טבע 2025"));
    }

    #[test]
    fn test_since_start_of_month_leaves_nothing_unmatched() {
        let c = compile("רבעוני טבע מאז תחילת מרץ");
        assert_eq!(c.filters.start_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(c.filters.end_date, Some(today()));
        assert!(c.diagnostics.notes.is_empty(), "{:?}", c.diagnostics.notes);
        assert_eq!(c.diagnostics.confidence, 1.0);
    }

    #[test]
    fn test_hebrew_alias_makes_slash_date_day_first() {
        let c = compile("טבע 05/03/2025");
        assert_eq!(c.filters.start_date, NaiveDate::from_ymd_opt(2025, 3, 5));
        assert_eq!(c.filters.end_date, NaiveDate::from_ymd_opt(2025, 3, 5));
        assert_eq!(c.diagnostics.confidence, 1.0);
        assert!(!c.diagnostics.notes.iter().any(|n| n.starts_with("ambiguous date")));

        let c = compile("Teva 05/03/2025");
        assert!((c.diagnostics.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzy_match_recovers_typos() {
        let c = compile("Tevva quarterly");
        assert_eq!(c.filters.company_names, vec![TEVA]);
        assert_eq!(c.filters.announcement_types, vec!["דוח רבעוני"]);
        assert!(c.diagnostics.notes.contains(&format!("fuzzy match 'tevva' resolved to '{TEVA}'")));
        assert!(!c.diagnostics.notes.iter().any(|n| n.starts_with("unmatched token")));
        assert_eq!(
            c.diagnostics.matched_company_aliases.get("tevva").map(String::as_str),
            Some(TEVA)
        );

        let c = compile("טבה");
        assert_eq!(c.filters.company_names, vec![TEVA]);
        assert_eq!(c.diagnostics.confidence, 1.0);
    }

    #[test]
    fn test_fuzzy_match_skips_short_and_far_tokens() {
        let c = compile("טבע zzzz");
        assert!(c.diagnostics.notes.iter().all(|n| !n.starts_with("fuzzy match")));
        let c = compile("טב");
        assert!(c.filters.company_names.is_empty());
    }

    #[test]
    fn test_dates_never_reversed() {
        let c = compile("טבע מ-30/09/2025 עד 01/07/2025");
        let (s, e) = (c.filters.start_date.unwrap(), c.filters.end_date.unwrap());
        assert!(s <= e);
    }
}
