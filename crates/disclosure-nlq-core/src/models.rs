//! Core data models.
//!
//! These types are the wire contract of the resolver: [`FilterConfig`] and
//! [`Diagnostics`] are returned by `compileFilters`, and
//! [`AnnouncementRecord`] is what `runQuery` yields. All of them serialize
//! to camelCase JSON.

use std::collections::BTreeMap;

use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// What a canonical value names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    ReportType,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "company",
            EntityType::ReportType => "report_type",
        }
    }
}

/// One surface form mapped to a canonical entity.
///
/// `derived` entries were generated by alias expansion (legal suffix
/// stripping and the like) rather than declared in the alias table; they
/// are skipped when the caller disables alias expansion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasEntry {
    pub surface_form: String,
    pub canonical: String,
    pub entity_type: EntityType,
    pub weight: f64,
    pub derived: bool,
}

/// An inclusive calendar range. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds a range, swapping the bounds if they arrive reversed.
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn day(d: NaiveDate) -> Self {
        Self { start: d, end: d }
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        self.start <= d && d <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Day,
    Week,
    Month,
    Year,
}

/// A window ending today, e.g. "last 3 months".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelativeWindow {
    pub value: u32,
    pub unit: TimeUnit,
}

impl RelativeWindow {
    pub fn new(value: u32, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Anchors the window at `today`.
    ///
    /// Days and weeks subtract directly; months and years move by calendar
    /// month with the day clamped to the end of the target month.
    pub fn resolve(&self, today: NaiveDate) -> DateRange {
        let v = self.value;
        let start = match self.unit {
            TimeUnit::Day => today.checked_sub_signed(Duration::days(i64::from(v))),
            TimeUnit::Week => today.checked_sub_signed(Duration::weeks(i64::from(v))),
            TimeUnit::Month => today.checked_sub_months(Months::new(v)),
            TimeUnit::Year => today.checked_sub_months(Months::new(v.saturating_mul(12))),
        };
        DateRange::new(start.unwrap_or(NaiveDate::MIN), today)
    }
}

/// Structured, store-agnostic representation of query intent.
///
/// `company_names` and `announcement_types` are ordered sets of canonical
/// values (insertion order, no duplicates). An empty config means "no
/// constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub company_names: Vec<String>,
    #[serde(default)]
    pub announcement_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Unresolved relative window; anchored when the plan is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_timeframe: Option<RelativeWindow>,
    /// Explicitly requested number of results ("5 latest reports").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl FilterConfig {
    /// True when no constraint was resolved. `quantity` alone is not a filter.
    pub fn is_empty(&self) -> bool {
        self.company_names.is_empty()
            && self.announcement_types.is_empty()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.relative_timeframe.is_none()
    }

    pub fn has_time_constraint(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some() || self.relative_timeframe.is_some()
    }

    pub fn push_company(&mut self, canonical: &str) -> bool {
        push_unique(&mut self.company_names, canonical)
    }

    pub fn push_announcement_type(&mut self, canonical: &str) -> bool {
        push_unique(&mut self.announcement_types, canonical)
    }

    pub fn set_range(&mut self, range: DateRange) {
        self.start_date = Some(range.start);
        self.end_date = Some(range.end);
        self.relative_timeframe = None;
    }

    /// Swaps reversed bounds so `start_date <= end_date` holds.
    pub fn normalize_dates(&mut self) {
        if let (Some(s), Some(e)) = (self.start_date, self.end_date) {
            if s > e {
                self.start_date = Some(e);
                self.end_date = Some(s);
            }
        }
    }

    /// The absolute range this config constrains to, anchored at `today`.
    ///
    /// A one-sided bound is closed with `NaiveDate::MIN` or `today`.
    pub fn date_range(&self, today: NaiveDate) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(s), Some(e)) => Some(DateRange::new(s, e)),
            (Some(s), None) => Some(DateRange::new(s, today.max(s))),
            (None, Some(e)) => Some(DateRange::new(NaiveDate::MIN, e)),
            (None, None) => self.relative_timeframe.map(|w| w.resolve(today)),
        }
    }
}

fn push_unique(set: &mut Vec<String>, value: &str) -> bool {
    if set.iter().any(|v| v == value) {
        false
    } else {
        set.push(value.to_string());
        true
    }
}

/// Machine-checkable evidence about a single resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub confidence: f64,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matched_company_aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matched_report_aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristics_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Diagnostics {
    /// Keeps the first `max` notes and folds the rest into one summary line.
    pub fn cap_notes(&mut self, max: usize) {
        if self.notes.len() > max {
            let hidden = self.notes.len() - max;
            self.notes.truncate(max);
            self.notes.push(format!("…and {} more", hidden));
        }
    }

    /// Inserts a note ahead of the resolution notes so capping never hides it.
    pub fn prepend_note(&mut self, note: impl Into<String>) {
        self.notes.insert(0, note.into());
    }
}

/// A disclosure as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementRecord {
    pub id: String,
    pub company_name: String,
    pub announcement_type: String,
    pub announcement_date: String,
    pub summary: String,
    pub doc_link: String,
    pub company_info_link: String,
    pub stock_graph_link: String,
    pub pro_summary_link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_date_range_orders_bounds() {
        let r = DateRange::new(d(2025, 9, 30), d(2025, 7, 1));
        assert_eq!(r.start, d(2025, 7, 1));
        assert_eq!(r.end, d(2025, 9, 30));
    }

    #[test]
    fn test_relative_month_clamps_day() {
        let r = RelativeWindow::new(1, TimeUnit::Month).resolve(d(2025, 3, 31));
        assert_eq!(r.start, d(2025, 2, 28));
        assert_eq!(r.end, d(2025, 3, 31));
    }

    #[test]
    fn test_relative_weeks_subtract_directly() {
        let r = RelativeWindow::new(2, TimeUnit::Week).resolve(d(2025, 1, 10));
        assert_eq!(r.start, d(2024, 12, 27));
    }

    #[test]
    fn test_filter_config_dedupes_in_insertion_order() {
        let mut f = FilterConfig::default();
        assert!(f.push_company("B"));
        assert!(f.push_company("A"));
        assert!(!f.push_company("B"));
        assert_eq!(f.company_names, vec!["B", "A"]);
    }

    #[test]
    fn test_empty_filter_config_serializes_without_dates() {
        let json = serde_json::to_value(FilterConfig::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"companyNames": [], "announcementTypes": []})
        );
    }

    #[test]
    fn test_cap_notes_summarizes_overflow() {
        let mut diag = Diagnostics {
            notes: (0..5).map(|i| format!("n{}", i)).collect(),
            ..Default::default()
        };
        diag.cap_notes(3);
        assert_eq!(diag.notes, vec!["n0", "n1", "n2", "…and 2 more"]);
    }
}
