//! Query plan selection.
//!
//! [`select_plan`] maps a [`FilterConfig`] onto one physical access pattern
//! of a partitioned table, most selective first:
//!
//! | Filters present | Plan |
//! |-----------------|------|
//! | company names | [`QueryPlan::ByPrimaryKey`], one partition per company |
//! | report types only | [`QueryPlan::ByCategoryIndex`], one partition per type |
//! | dates only | [`QueryPlan::ByDateIndex`] on the fixed date partition |
//! | nothing | [`QueryPlan::FullScanFiltered`], capped hard |
//!
//! Table, index and attribute names come from [`TableSchema`], which is
//! validated once at startup.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanConfigError;
use crate::models::{DateRange, FilterConfig};
use crate::record::StoreItem;

/// Encoding of the sort-key (date) attribute in stored items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    #[default]
    IsoDate,
    IsoDatetime,
    EpochSeconds,
    EpochMillis,
}

impl DateFormat {
    /// Lower sort-key bound for `d` (start of day, UTC).
    pub fn encode_start(&self, d: NaiveDate) -> Value {
        self.encode(d.and_time(NaiveTime::MIN), false)
    }

    /// Upper sort-key bound for `d` (last second of the day, UTC).
    pub fn encode_end(&self, d: NaiveDate) -> Value {
        let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        self.encode(d.and_time(end), true)
    }

    fn encode(&self, dt: NaiveDateTime, end_of_day: bool) -> Value {
        match self {
            DateFormat::IsoDate => Value::String(dt.date().format("%Y-%m-%d").to_string()),
            DateFormat::IsoDatetime => Value::String(dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            DateFormat::EpochSeconds => Value::from(dt.and_utc().timestamp()),
            DateFormat::EpochMillis => {
                let extra = if end_of_day { 999 } else { 0 };
                Value::from(dt.and_utc().timestamp_millis() + extra)
            }
        }
    }

    /// Reads a stored sort-key value back. Lenient: ISO strings are
    /// accepted in any format, and numbers are read per the epoch unit.
    pub fn decode(&self, value: &Value) -> Option<NaiveDateTime> {
        match value {
            Value::String(s) => parse_iso(s),
            Value::Number(n) => {
                let n = n.as_i64()?;
                let dt = match self {
                    DateFormat::EpochMillis => chrono::DateTime::from_timestamp_millis(n)?,
                    _ => chrono::DateTime::from_timestamp(n, 0)?,
                };
                Some(dt.naive_utc())
            }
            _ => None,
        }
    }
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// How report-type values are stored on items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportTypeMatch {
    /// Inspect the stored value: string equality, list membership, or map key.
    #[default]
    Auto,
    Scalar,
    List,
    MapKeys,
}

/// Physical layout of the announcements table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_partition_key_attr")]
    pub partition_key_attr: String,
    #[serde(default = "default_sort_key_attr")]
    pub sort_key_attr: String,
    #[serde(default = "default_report_type_attr")]
    pub report_type_attr: String,
    #[serde(default)]
    pub report_type_is_list: bool,
    #[serde(default)]
    pub report_type_match: ReportTypeMatch,
    #[serde(default = "default_category_index_name")]
    pub category_index_name: String,
    #[serde(default = "default_report_type_attr")]
    pub category_index_partition_attr: String,
    #[serde(default = "default_sort_key_attr")]
    pub category_index_sort_attr: String,
    #[serde(default = "default_date_index_name")]
    pub date_index_name: String,
    #[serde(default = "default_date_index_partition_attr")]
    pub date_index_partition_attr: String,
    #[serde(default = "default_date_index_partition_value")]
    pub date_index_partition_value: String,
    #[serde(default = "default_true")]
    pub scan_descending: bool,
    #[serde(default)]
    pub date_format: DateFormat,
}

fn default_table_name() -> String {
    "CompanyDisclosuresHebrew".to_string()
}
fn default_partition_key_attr() -> String {
    "issuerName".to_string()
}
fn default_sort_key_attr() -> String {
    "publicationDate".to_string()
}
fn default_report_type_attr() -> String {
    "form_type".to_string()
}
fn default_category_index_name() -> String {
    "form_type-publicationDate-index".to_string()
}
fn default_date_index_name() -> String {
    "Sort-By-Dates-Index".to_string()
}
fn default_date_index_partition_attr() -> String {
    "dummy".to_string()
}
fn default_date_index_partition_value() -> String {
    "True".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            partition_key_attr: default_partition_key_attr(),
            sort_key_attr: default_sort_key_attr(),
            report_type_attr: default_report_type_attr(),
            report_type_is_list: false,
            report_type_match: ReportTypeMatch::Auto,
            category_index_name: default_category_index_name(),
            category_index_partition_attr: default_report_type_attr(),
            category_index_sort_attr: default_sort_key_attr(),
            date_index_name: default_date_index_name(),
            date_index_partition_attr: default_date_index_partition_attr(),
            date_index_partition_value: default_date_index_partition_value(),
            scan_descending: true,
            date_format: DateFormat::IsoDate,
        }
    }
}

impl TableSchema {
    /// Rejects blank names. A plan that cannot name its index must not
    /// silently degrade into a scan.
    pub fn validate(&self) -> Result<(), PlanConfigError> {
        let required: [(&'static str, &str); 10] = [
            ("table_name", &self.table_name),
            ("partition_key_attr", &self.partition_key_attr),
            ("sort_key_attr", &self.sort_key_attr),
            ("report_type_attr", &self.report_type_attr),
            ("category_index_name", &self.category_index_name),
            ("category_index_partition_attr", &self.category_index_partition_attr),
            ("category_index_sort_attr", &self.category_index_sort_attr),
            ("date_index_name", &self.date_index_name),
            ("date_index_partition_attr", &self.date_index_partition_attr),
            ("date_index_partition_value", &self.date_index_partition_value),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PlanConfigError::missing(field));
            }
        }
        if self.report_type_is_list && self.report_type_match == ReportTypeMatch::Scalar {
            return Err(PlanConfigError::InvalidPlanConfiguration {
                field: "report_type_match",
                reason: "cannot be 'scalar' when report_type_is_list is set".to_string(),
            });
        }
        Ok(())
    }

    /// The effective report-type matching mode.
    pub fn report_type_mode(&self) -> ReportTypeMatch {
        match (self.report_type_match, self.report_type_is_list) {
            (ReportTypeMatch::Auto, true) => ReportTypeMatch::List,
            (mode, _) => mode,
        }
    }

    /// Sort-key bounds for `range`, encoded per `date_format`.
    pub fn encode_range(&self, range: &DateRange) -> (Value, Value) {
        (
            self.date_format.encode_start(range.start),
            self.date_format.encode_end(range.end),
        )
    }
}

/// Post-filter applied to items after the key condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordPredicate {
    /// Empty means "any report type".
    pub announcement_types: Vec<String>,
    pub report_type_attr: String,
    pub mode: ReportTypeMatch,
}

impl RecordPredicate {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.announcement_types.is_empty()
    }

    pub fn matches(&self, item: &StoreItem) -> bool {
        if self.is_identity() {
            return true;
        }
        let Some(value) = item.get(&self.report_type_attr) else {
            return false;
        };
        let wanted = |s: &str| self.announcement_types.iter().any(|t| t == s);
        match (self.mode, value) {
            (ReportTypeMatch::Scalar | ReportTypeMatch::Auto, Value::String(s)) => wanted(s),
            (ReportTypeMatch::List | ReportTypeMatch::Auto, Value::Array(items)) => {
                items.iter().filter_map(Value::as_str).any(wanted)
            }
            (ReportTypeMatch::MapKeys | ReportTypeMatch::Auto, Value::Object(map)) => {
                map.keys().any(|k| wanted(k))
            }
            _ => false,
        }
    }
}

/// A concrete access strategy. Every arm carries its result `limit` and
/// sort direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryPlan {
    /// One key query per company partition, merged by date.
    ByPrimaryKey {
        partition_values: Vec<String>,
        sort_range: Option<DateRange>,
        filter: RecordPredicate,
        limit: usize,
        descending: bool,
    },
    /// One index query per report type, merged by date.
    ByCategoryIndex {
        index_name: String,
        partition_values: Vec<String>,
        sort_range: Option<DateRange>,
        limit: usize,
        descending: bool,
    },
    ByDateIndex {
        index_name: String,
        partition_value: String,
        sort_range: DateRange,
        limit: usize,
        descending: bool,
    },
    FullScanFiltered {
        predicate: RecordPredicate,
        limit: usize,
        descending: bool,
    },
}

impl QueryPlan {
    pub fn limit(&self) -> usize {
        match self {
            QueryPlan::ByPrimaryKey { limit, .. }
            | QueryPlan::ByCategoryIndex { limit, .. }
            | QueryPlan::ByDateIndex { limit, .. }
            | QueryPlan::FullScanFiltered { limit, .. } => *limit,
        }
    }

    pub fn descending(&self) -> bool {
        match self {
            QueryPlan::ByPrimaryKey { descending, .. }
            | QueryPlan::ByCategoryIndex { descending, .. }
            | QueryPlan::ByDateIndex { descending, .. }
            | QueryPlan::FullScanFiltered { descending, .. } => *descending,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryPlan::ByPrimaryKey { .. } => "by_primary_key",
            QueryPlan::ByCategoryIndex { .. } => "by_category_index",
            QueryPlan::ByDateIndex { .. } => "by_date_index",
            QueryPlan::FullScanFiltered { .. } => "full_scan_filtered",
        }
    }

    /// PartiQL-style rendering with literal values substituted, one
    /// statement per partition.
    pub fn describe(&self, schema: &TableSchema) -> String {
        let order = |desc: bool| if desc { "DESC" } else { "ASC" };
        let between = |attr: &str, range: &DateRange| {
            let (lo, hi) = schema.encode_range(range);
            format!(
                " AND {} BETWEEN {} AND {}",
                quote_ident(attr),
                literal(&lo),
                literal(&hi)
            )
        };
        match self {
            QueryPlan::ByPrimaryKey {
                partition_values,
                sort_range,
                filter,
                limit,
                descending,
            } => partition_values
                .iter()
                .map(|company| {
                    let mut sql = format!(
                        "SELECT * FROM {} WHERE {} = {}",
                        quote_ident(&schema.table_name),
                        quote_ident(&schema.partition_key_attr),
                        literal(&Value::String(company.clone()))
                    );
                    if let Some(r) = sort_range {
                        sql.push_str(&between(&schema.sort_key_attr, r));
                    }
                    if !filter.is_identity() {
                        sql.push_str(&describe_type_filter(filter));
                    }
                    sql.push_str(&format!(
                        " ORDER BY {} {} LIMIT {}",
                        quote_ident(&schema.sort_key_attr),
                        order(*descending),
                        limit
                    ));
                    sql
                })
                .collect::<Vec<_>>()
                .join(";\n"),
            QueryPlan::ByCategoryIndex {
                index_name,
                partition_values,
                sort_range,
                limit,
                descending,
            } => partition_values
                .iter()
                .map(|t| {
                    let mut sql = format!(
                        "SELECT * FROM {}.{} WHERE {} = {}",
                        quote_ident(&schema.table_name),
                        quote_ident(index_name),
                        quote_ident(&schema.category_index_partition_attr),
                        literal(&Value::String(t.clone()))
                    );
                    if let Some(r) = sort_range {
                        sql.push_str(&between(&schema.category_index_sort_attr, r));
                    }
                    sql.push_str(&format!(
                        " ORDER BY {} {} LIMIT {}",
                        quote_ident(&schema.category_index_sort_attr),
                        order(*descending),
                        limit
                    ));
                    sql
                })
                .collect::<Vec<_>>()
                .join(";\n"),
            QueryPlan::ByDateIndex {
                index_name,
                partition_value,
                sort_range,
                limit,
                descending,
            } => format!(
                "SELECT * FROM {}.{} WHERE {} = {}{} ORDER BY {} {} LIMIT {}",
                quote_ident(&schema.table_name),
                quote_ident(index_name),
                quote_ident(&schema.date_index_partition_attr),
                literal(&Value::String(partition_value.clone())),
                between(&schema.sort_key_attr, sort_range),
                quote_ident(&schema.sort_key_attr),
                order(*descending),
                limit
            ),
            QueryPlan::FullScanFiltered { limit, descending, .. } => format!(
                "SELECT * FROM {} ORDER BY {} {} LIMIT {}",
                quote_ident(&schema.table_name),
                quote_ident(&schema.sort_key_attr),
                order(*descending),
                limit
            ),
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

fn describe_type_filter(filter: &RecordPredicate) -> String {
    let attr = quote_ident(&filter.report_type_attr);
    let parts: Vec<String> = filter
        .announcement_types
        .iter()
        .map(|t| {
            let lit = literal(&Value::String(t.clone()));
            match filter.mode {
                ReportTypeMatch::Scalar | ReportTypeMatch::Auto => format!("{} = {}", attr, lit),
                ReportTypeMatch::List => format!("contains({}, {})", attr, lit),
                ReportTypeMatch::MapKeys => format!("{}.{} IS NOT MISSING", attr, quote_ident(t)),
            }
        })
        .collect();
    format!(" AND ({})", parts.join(" OR "))
}

/// Run-time knobs for plan selection.
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub max_items: usize,
    /// Hard upper bound on `max_items`.
    pub max_items_cap: usize,
    /// Upper bound on a full-table scan's result size.
    pub full_scan_cap: usize,
    pub ascending: bool,
    pub today: NaiveDate,
}

impl PlanOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            max_items: 50,
            max_items_cap: 5000,
            full_scan_cap: 50,
            ascending: false,
            today,
        }
    }
}

/// Chooses the access pattern for `filters`. Deterministic.
pub fn select_plan(filters: &FilterConfig, schema: &TableSchema, opts: &PlanOptions) -> QueryPlan {
    let mut limit = opts.max_items.clamp(1, opts.max_items_cap.max(1));
    if let Some(q) = filters.quantity {
        limit = limit.min(q.max(1) as usize);
    }
    let descending = !opts.ascending && schema.scan_descending;
    let sort_range = filters.date_range(opts.today);

    if !filters.company_names.is_empty() {
        return QueryPlan::ByPrimaryKey {
            partition_values: filters.company_names.clone(),
            sort_range,
            filter: RecordPredicate {
                announcement_types: filters.announcement_types.clone(),
                report_type_attr: schema.report_type_attr.clone(),
                mode: schema.report_type_mode(),
            },
            limit,
            descending,
        };
    }
    if !filters.announcement_types.is_empty() {
        return QueryPlan::ByCategoryIndex {
            index_name: schema.category_index_name.clone(),
            partition_values: filters.announcement_types.clone(),
            sort_range,
            limit,
            descending,
        };
    }
    if let Some(range) = sort_range {
        return QueryPlan::ByDateIndex {
            index_name: schema.date_index_name.clone(),
            partition_value: schema.date_index_partition_value.clone(),
            sort_range: range,
            limit,
            descending,
        };
    }
    QueryPlan::FullScanFiltered {
        predicate: RecordPredicate::identity(),
        limit: limit.min(opts.full_scan_cap.max(1)),
        descending,
    }
}
