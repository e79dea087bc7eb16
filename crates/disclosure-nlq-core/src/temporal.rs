//! Temporal expression grammar.
//!
//! [`TemporalResolver`] turns date and period phrases in mixed Hebrew /
//! English into an inclusive [`DateRange`]. The grammar is compiled once at
//! startup and shared read-only.
//!
//! Forms are tried in three tiers, first hit wins:
//!
//! | Tier | Examples |
//! |------|----------|
//! | explicit absolute | `01/07/2025`, `2025-07-01 עד 2025-09-30`, `מרץ 2025`, `בין מרץ למאי השנה`, `מאז תחילת מרץ`, `H1 2025`, `קיץ 2024` |
//! | named relative | `Q3 2025`, `הרבעון השלישי 2025`, `last quarter`, `יום שני שעבר`, `עד סוף השנה`, `30 ימים אחרונים`, `חודשיים`, `מאז 2023` |
//! | bare tokens | `2025`, `שנת 2024`, `2023-2025`, `Q3`, `מרץ` |
//!
//! A match is `ambiguous` when the text supports two different readings: a
//! slash date whose day and month could be swapped, or a quarter / month
//! with no year (this year's or last year's).
//!
//! Month, half-year and month-range forms also take a soft year in place of
//! digits: `השנה` / `this year` and `שנה שעברה` / `אשתקד` / `last year`.

use std::ops::Range;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use regex::{Captures, Regex};

use crate::models::{DateRange, RelativeWindow, TimeUnit};
use crate::text::{contains_hebrew, normalize};

/// Optional Hebrew prefix letters glued to the following word.
const P: &str = "[בלכוהמש]{0,2}";
const Y: &str = "((?:19|20)[0-9]{2})";
/// Year digits or a year named relative to today. Longest alternatives
/// first, so `השנה שעברה` never stops at `השנה`.
const SOFT_Y: &str =
    r"(?:19|20)[0-9]{2}|[בלכוהמש]{0,2}שנה\s+(?:ש)?עברה|[בלכוהמש]{0,2}שנה\s+(?:ה)?קודמת|אשתקד|השנה|(?:this|last|previous)\s+year";
const ORD: &str = "ראשונה|ראשון|שנייה|שניה|שני|שלישית|שלישי|רביעית|רביעי|[1-4]";

const MONTHS: &[(&str, u32)] = &[
    ("ינואר", 1),
    ("פברואר", 2),
    ("מרץ", 3),
    ("מרס", 3),
    ("אפריל", 4),
    ("מאי", 5),
    ("יוני", 6),
    ("יולי", 7),
    ("אוגוסט", 8),
    ("ספטמבר", 9),
    ("אוקטובר", 10),
    ("נובמבר", 11),
    ("דצמבר", 12),
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sept", 9),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const SINCE_WORDS: &[&str] = &["מאז", "since", "from", "מ", "החל", "מתאריך", "starting", "after"];
const UNTIL_WORDS: &[&str] = &["עד", "until", "through", "till"];
const BEFORE_WORDS: &[&str] = &["לפני", "before"];
const RANGE_WORDS: &[&str] = &["בין", "between", "from", "מ", "מתאריך", "משנת", "בשנים"];

/// A recognized temporal expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalMatch {
    pub range: DateRange,
    pub ambiguous: bool,
    /// Set when the expression is a window ending today ("last 30 days").
    pub relative: Option<RelativeWindow>,
    /// Byte span of the expression in the text that was resolved.
    pub span: Range<usize>,
}

impl TemporalMatch {
    fn absolute(range: DateRange, span: Range<usize>) -> Self {
        Self {
            range,
            ambiguous: false,
            relative: None,
            span,
        }
    }

    fn ambiguous(range: DateRange, span: Range<usize>) -> Self {
        Self {
            range,
            ambiguous: true,
            relative: None,
            span,
        }
    }

    fn window(window: RelativeWindow, today: NaiveDate, span: Range<usize>) -> Self {
        Self {
            range: window.resolve(today),
            ambiguous: false,
            relative: Some(window),
            span,
        }
    }
}

/// Compiled date / period grammar.
pub struct TemporalResolver {
    full_date: Regex,
    month_range: Regex,
    between_months: Regex,
    since_month: Regex,
    until_month: Regex,
    month_year: Regex,
    numeric_month_year: Regex,
    half_year_he: Regex,
    half_year_en: Regex,
    season: Regex,

    last_weekday: Regex,
    end_of_period: Regex,
    quarter_he: Regex,
    quarter_q: Regex,
    quarter_year_q: Regex,
    quarter_en: Regex,
    this_quarter: Regex,
    last_quarter: Regex,
    this_year: Regex,
    last_year: Regex,
    this_month: Regex,
    last_month: Regex,
    rel_n_en: Regex,
    rel_n_he: Regex,
    rel_dual_he: Regex,
    rel_single_he: Regex,
    rel_single_en: Regex,
    today_kw: Regex,
    yesterday_kw: Regex,
    day_before_kw: Regex,
    recently: Regex,
    whats_new: Regex,
    most_recent: Regex,
    since_year: Regex,

    year_range: Regex,
    bare_year: Regex,
    bare_quarter: Regex,
    bare_month: Regex,
}

fn re(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid temporal pattern: {}", pattern))
}

fn month_alternation(full_only: bool) -> String {
    let mut names: Vec<&str> = MONTHS
        .iter()
        .map(|(n, _)| *n)
        .filter(|n| {
            !full_only
                || n.chars().count() > 4
                || !n.is_ascii()
                || matches!(*n, "may" | "june" | "july")
        })
        .collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.chars().count()));
    names.join("|")
}

impl TemporalResolver {
    pub fn new() -> Result<Self> {
        let m = month_alternation(false);
        let full_m = month_alternation(true);
        Ok(Self {
            full_date: re(
                r"\b(?:(?P<iy>[0-9]{4})-(?P<im>[0-9]{1,2})-(?P<id>[0-9]{1,2})|(?P<dd>[0-9]{1,2})(?P<sep>[./-])(?P<dm>[0-9]{1,2})[./-](?P<dy>[0-9]{4}|[0-9]{2}))\b",
            )?,
            month_range: re(&format!(
                r"\b{P}({m})(?:\s+{Y})?\s+(?:(?:עד|to|until|through|and|-)\s+)?{P}({m})\s+(?:של\s+|of\s+)?(?:שנת\s+)?({SOFT_Y})\b"
            ))?,
            between_months: re(&format!(
                r"\b(?:בין|between)\s+{P}({m})\s+(?:(?:and|to|-)\s+)?{P}({m})\b"
            ))?,
            since_month: re(&format!(
                r"\b(?:(?P<since>מאז|since|from|starting|החל)\s+(?:the\s+)?)?(?:(?P<start>מ?תחילת|start\s+of|beginning\s+of)\s+)?{P}(?P<m>{m})(?:\s+(?:של\s+|of\s+)?(?P<y>{SOFT_Y}))?\b"
            ))?,
            until_month: re(&format!(r"\b(עד|until|through|לפני|before)\s+{P}({m})\s+{Y}\b"))?,
            month_year: re(&format!(r"\b{P}({m})\s+(?:של\s+|of\s+)?({SOFT_Y})\b"))?,
            numeric_month_year: re(r"\b(0?[1-9]|1[0-2])[./-]((?:19|20)[0-9]{2})\b")?,
            half_year_he: re(&format!(
                r"\b{P}(?:מחצית|חציון|חצי)\s+(?:ה)?(ראשונה|ראשון|שנייה|שניה|שני|א|ב)(?:\s+(?:של\s+)?(?:שנת\s+)?({SOFT_Y}))?\b"
            ))?,
            half_year_en: re(&format!(
                r"\b(?:h([12])|(first|second|1st|2nd)\s+half(?:\s+of)?)\s+{Y}\b"
            ))?,
            season: re(&format!(
                r"\b{P}(אביב|קיץ|סתיו|חורף|spring|summer|autumn|fall|winter)\s+(?:של\s+|of\s+)?{Y}\b"
            ))?,

            last_weekday: re(&format!(
                r"\b{P}יום\s+(ראשון|שני|שלישי|רביעי|חמישי|שישי|שבת)\s+(?:ה)?(?:שעבר|קודם)\b|\blast\s+(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b"
            ))?,
            end_of_period: re(
                r"\b(?:עד\s+(?:ל)?סוף|מסוף|(?:until|through|till)\s+(?:the\s+)?end\s+of)\s+(?:ה|the\s+|this\s+)?(חודש|רבעון|שנה|month|quarter|year)\b",
            )?,
            quarter_he: re(&format!(
                r"\b{P}רבעון\s+(?:ה)?({ORD})\s+(?:של\s+)?(?:שנת\s+)?{Y}\b"
            ))?,
            quarter_q: re(&format!(r"\bq([1-4])(?:\s+of)?\s*[/-]?\s*{Y}\b"))?,
            quarter_year_q: re(&format!(r"\b{Y}\s*[/-]?\s*q([1-4])\b"))?,
            quarter_en: re(&format!(
                r"\b(first|second|third|fourth|1st|2nd|3rd|4th)\s+quarter(?:\s+of)?\s+{Y}\b"
            ))?,
            this_quarter: re(&format!(
                r"\b(?:this|current)\s+quarter\b|\bמתחילת\s+(?:ה)?רבעון\b|\b{P}רבעון\s+(?:ה)?(?:זה|נוכחי)\b"
            ))?,
            last_quarter: re(&format!(
                r"\b(?:last|previous|prior)\s+quarter\b|\b{P}רבעון\s+(?:ה)?(?:קודם|שעבר)\b"
            ))?,
            this_year: re(&format!(
                r"\b(?:this|current)\s+year\b|\bytd\b|\bמתחילת\s+(?:ה)?שנה\b|\b{P}שנה\s+(?:ה)?(?:זו|זאת|נוכחית)\b"
            ))?,
            last_year: re(&format!(
                r"\b(?:last|previous|prior)\s+year\b|\bאשתקד\b|\b{P}שנה\s+(?:ש)?עברה\b|\b{P}שנה\s+(?:ה)?קודמת\b"
            ))?,
            this_month: re(&format!(
                r"\b(?:this|current)\s+month\b|\bמתחילת\s+(?:ה)?חודש\b|\b{P}חודש\s+(?:ה)?(?:זה|נוכחי)\b"
            ))?,
            last_month: re(&format!(
                r"\b(?:last|previous|prior)\s+month\b|\b{P}חודש\s+(?:ש)?עבר\b|\b{P}חודש\s+(?:ה)?קודם\b"
            ))?,
            rel_n_en: re(
                r"\b(?:last|past|previous)\s+([0-9]{1,3})\s+(hours?|days?|weeks?|months?|years?)\b",
            )?,
            rel_n_he: re(&format!(
                r"\b{P}([0-9]{{1,3}})\s+(שעות|שעה|ימים|יום|שבועות|שבוע|חודשים|חודש|שנים|שנה)(?:\s+(?:ה)?(?:אחרונים|אחרונות|אחרון|אחרונה|קודמים|קודמות))?\b"
            ))?,
            rel_dual_he: re(&format!(
                r"\b{P}(יומיים|שבועיים|חודשיים|שנתיים)(?:\s+(?:ה)?(?:אחרונים|אחרונות))?\b"
            ))?,
            rel_single_he: re(&format!(
                r"\b{P}(יום|שבוע|חודש|רבעון|שנה)\s+(?:(?:ה)?(?:אחרון|אחרונה|קודם)|(?:ש)?עבר)\b"
            ))?,
            rel_single_en: re(
                r"\b(?:past\s+(day|week|fortnight|month|quarter|year)|last\s+(day|week|fortnight))\b",
            )?,
            today_kw: re(&format!(r"\b(?:{P}היום|today)\b"))?,
            yesterday_kw: re(&format!(r"\b(?:{P}אתמול|yesterday)\b"))?,
            day_before_kw: re(&format!(r"\b{P}שלשום\b"))?,
            recently: re(r"\b(?:לאחרונה|recently|lately)\b")?,
            whats_new: re(&format!(
                r"\bמה\s+חדש\b|\bwhats\s+new\b|\b{P}תקופה\s+(?:ה)?אחרונה\b"
            ))?,
            most_recent: re(
                r"\bהכי\s+(?:עדכני|עדכנית|עדכניים|עדכניות|חדש|חדשים)\b|\bmost\s+recent\b",
            )?,
            since_year: re(&format!(
                r"\b(?:מאז|since|starting|החל)\s+(?:מ\s+)?(?:{P}שנת\s+)?{Y}\b"
            ))?,

            year_range: re(&format!(
                r"\b{Y}(?:-|\s+(?:עד|to|until|through|and|ו|ל|-)\s+){Y}\b"
            ))?,
            bare_year: re(&format!(r"\b(?:{P}שנת\s+|year\s+)?{Y}\b"))?,
            bare_quarter: re(&format!(
                r"\b{P}רבעון\s+(?:ה)?({ORD})\b|\bq([1-4])\b|\b(first|second|third|fourth)\s+quarter\b"
            ))?,
            bare_month: re(&format!(r"\b{P}({full_m})\b"))?,
        })
    }

    /// Normalizes `text` and resolves it. The returned span indexes the
    /// normalized text.
    pub fn resolve_date_expression(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        self.resolve_normalized(&normalize(text), today)
    }

    /// Resolves already-normalized text, reading slash dates day-first when
    /// the text contains Hebrew.
    pub fn resolve_normalized(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        self.resolve_in_locale(text, today, contains_hebrew(text))
    }

    /// Resolves already-normalized text with an explicit date-order hint.
    ///
    /// With `day_first`, a slash date such as `05/03/2025` is March 5th and
    /// not ambiguous. Callers resolving a fragment of a larger query derive
    /// the hint from the whole query.
    pub fn resolve_in_locale(
        &self,
        text: &str,
        today: NaiveDate,
        day_first: bool,
    ) -> Option<TemporalMatch> {
        if text.trim().is_empty() {
            return None;
        }
        self.explicit(text, today, day_first)
            .or_else(|| self.named(text, today))
            .or_else(|| self.bare(text, today))
    }

    // ============ Tier (a): explicit absolute ============

    fn explicit(&self, text: &str, today: NaiveDate, day_first: bool) -> Option<TemporalMatch> {
        self.explicit_dates(text, today, day_first)
            .or_else(|| self.month_range_expr(text, today))
            .or_else(|| self.since_month_expr(text, today))
            .or_else(|| self.until_month_expr(text))
            .or_else(|| self.month_year_expr(text, today))
            .or_else(|| self.between_months_expr(text, today))
            .or_else(|| self.numeric_month_year_expr(text))
            .or_else(|| self.half_year_expr(text, today))
            .or_else(|| self.season_expr(text))
    }

    fn explicit_dates(
        &self,
        text: &str,
        today: NaiveDate,
        day_first: bool,
    ) -> Option<TemporalMatch> {
        let dates: Vec<(NaiveDate, bool, Range<usize>)> = self
            .full_date
            .captures_iter(text)
            .filter_map(|c| {
                let span = c.get(0)?.range();
                let (date, swappable) = parse_full_date(&c)?;
                Some((date, swappable && !day_first, span))
            })
            .collect();

        match dates.as_slice() {
            [] => None,
            [(date, ambiguous, span)] => {
                let (range, start) = match preceding_word(text, span.start) {
                    Some((w, pos)) if SINCE_WORDS.contains(&w) => {
                        (DateRange::new(*date, today.max(*date)), pos)
                    }
                    Some((w, pos)) if UNTIL_WORDS.contains(&w) => {
                        (DateRange::new(floor_date(), *date), pos)
                    }
                    Some((w, pos)) if BEFORE_WORDS.contains(&w) => {
                        (DateRange::new(floor_date(), date.pred_opt().unwrap_or(*date)), pos)
                    }
                    _ => (DateRange::day(*date), span.start),
                };
                Some(TemporalMatch {
                    range,
                    ambiguous: *ambiguous,
                    relative: None,
                    span: start..span.end,
                })
            }
            [first, second, ..] => Some(TemporalMatch {
                range: DateRange::new(first.0, second.0),
                ambiguous: first.1 || second.1,
                relative: None,
                span: extend_left(text, first.2.start, RANGE_WORDS)..second.2.end,
            }),
        }
    }

    fn month_range_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.month_range.captures(text)?;
        let m1 = month_number(c.get(1)?.as_str())?;
        let m2 = month_number(c.get(3)?.as_str())?;
        let y2 = year_token(c.get(4)?.as_str(), today)?;
        let y1 = match c.get(2) {
            Some(y) => parse_year(y.as_str())?,
            None if m1 > m2 => y2 - 1,
            None => y2,
        };
        let range = DateRange::new(month_start(y1, m1)?, month_end(y2, m2)?);
        let span = c.get(0)?.range();
        Some(TemporalMatch::absolute(
            range,
            extend_left(text, span.start, RANGE_WORDS)..span.end,
        ))
    }

    /// `מאז מרץ 2025`, `מאז תחילת מרץ [השנה]`, `since the start of march`.
    /// Without a year the month needs a start-of marker and is taken as the
    /// latest one not after today.
    fn since_month_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        self.since_month.captures_iter(text).find_map(|c| {
            let anchored = c.name("start").is_some();
            if c.name("since").is_none() && !anchored {
                return None;
            }
            let month = month_number(c.name("m")?.as_str())?;
            let start = match c.name("y") {
                Some(y) => month_start(year_token(y.as_str(), today)?, month)?,
                None if anchored => {
                    let this_year = month_start(today.year(), month)?;
                    if this_year <= today {
                        this_year
                    } else {
                        month_start(today.year() - 1, month)?
                    }
                }
                None => return None,
            };
            Some(TemporalMatch::absolute(
                DateRange::new(start, today.max(start)),
                c.get(0)?.range(),
            ))
        })
    }

    fn until_month_expr(&self, text: &str) -> Option<TemporalMatch> {
        let c = self.until_month.captures(text)?;
        let month = month_number(c.get(2)?.as_str())?;
        let year = parse_year(c.get(3)?.as_str())?;
        let end = if BEFORE_WORDS.contains(&c.get(1)?.as_str()) {
            month_start(year, month)?.pred_opt()?
        } else {
            month_end(year, month)?
        };
        Some(TemporalMatch::absolute(
            DateRange::new(floor_date(), end),
            c.get(0)?.range(),
        ))
    }

    fn month_year_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.month_year.captures(text)?;
        let year = year_token(c.get(2)?.as_str(), today)?;
        let range = month_range(year, month_number(c.get(1)?.as_str())?)?;
        Some(TemporalMatch::absolute(range, c.get(0)?.range()))
    }

    /// `בין מרץ למאי` with no year: the current year, or the span ending in
    /// the current year when the first month comes later in the calendar.
    fn between_months_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.between_months.captures(text)?;
        let m1 = month_number(c.get(1)?.as_str())?;
        let m2 = month_number(c.get(2)?.as_str())?;
        let y1 = if m1 > m2 { today.year() - 1 } else { today.year() };
        let range = DateRange::new(month_start(y1, m1)?, month_end(today.year(), m2)?);
        Some(TemporalMatch::absolute(range, c.get(0)?.range()))
    }

    fn numeric_month_year_expr(&self, text: &str) -> Option<TemporalMatch> {
        let c = self.numeric_month_year.captures(text)?;
        let month: u32 = c.get(1)?.as_str().parse().ok()?;
        let range = month_range(parse_year(c.get(2)?.as_str())?, month)?;
        Some(TemporalMatch::absolute(range, c.get(0)?.range()))
    }

    fn half_year_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let (half, year, span) = if let Some(c) = self.half_year_he.captures(text) {
            let half = match c.get(1)?.as_str() {
                "ראשונה" | "ראשון" | "א" => 1,
                _ => 2,
            };
            let year = match c.get(2) {
                Some(y) => year_token(y.as_str(), today)?,
                None => today.year(),
            };
            (half, year, c.get(0)?.range())
        } else {
            let c = self.half_year_en.captures(text)?;
            let half = match (c.get(1), c.get(2)) {
                (Some(h), _) => h.as_str().parse().ok()?,
                (None, Some(w)) if matches!(w.as_str(), "first" | "1st") => 1,
                _ => 2,
            };
            (half, parse_year(c.get(3)?.as_str())?, c.get(0)?.range())
        };
        let (m1, m2) = if half == 1 { (1, 6) } else { (7, 12) };
        let range = DateRange::new(month_start(year, m1)?, month_end(year, m2)?);
        Some(TemporalMatch::absolute(range, span))
    }

    fn season_expr(&self, text: &str) -> Option<TemporalMatch> {
        let c = self.season.captures(text)?;
        let year = parse_year(c.get(2)?.as_str())?;
        let range = match c.get(1)?.as_str() {
            "אביב" | "spring" => DateRange::new(month_start(year, 3)?, month_end(year, 5)?),
            "קיץ" | "summer" => DateRange::new(month_start(year, 6)?, month_end(year, 8)?),
            "סתיו" | "autumn" | "fall" => {
                DateRange::new(month_start(year, 9)?, month_end(year, 11)?)
            }
            _ => DateRange::new(month_start(year, 12)?, month_end(year + 1, 2)?),
        };
        Some(TemporalMatch::absolute(range, c.get(0)?.range()))
    }

    // ============ Tier (b): named relative periods ============

    fn named(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        self.end_of_period_expr(text, today)
            .or_else(|| self.last_weekday_expr(text, today))
            .or_else(|| self.quarter_with_year(text))
            .or_else(|| self.calendar_period(text, today))
            .or_else(|| self.relative_window(text, today))
            .or_else(|| self.since_year_expr(text, today))
    }

    /// `עד סוף הרבעון`: today through the end of the current period.
    fn end_of_period_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.end_of_period.captures(text)?;
        let end = match c.get(1)?.as_str() {
            "חודש" | "month" => month_end(today.year(), today.month())?,
            "רבעון" | "quarter" => quarter_range(today.year(), quarter_of(today))?.end,
            _ => month_end(today.year(), 12)?,
        };
        Some(TemporalMatch::absolute(DateRange::new(today, end), c.get(0)?.range()))
    }

    /// `יום שני שעבר`: that weekday in the previous week, one to two weeks back.
    fn last_weekday_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.last_weekday.captures(text)?;
        let target = weekday(c.get(1).or_else(|| c.get(2))?.as_str())?;
        let offset = today.weekday().num_days_from_monday() + 7 - target.num_days_from_monday();
        let back = offset % 7 + 7;
        let day = today - chrono::Duration::days(i64::from(back));
        Some(TemporalMatch::absolute(DateRange::day(day), c.get(0)?.range()))
    }

    fn quarter_with_year(&self, text: &str) -> Option<TemporalMatch> {
        let (q, year, span) = if let Some(c) = self.quarter_he.captures(text) {
            (ordinal(c.get(1)?.as_str())?, c.get(2)?.as_str(), c.get(0)?.range())
        } else if let Some(c) = self.quarter_q.captures(text) {
            (c.get(1)?.as_str().parse().ok()?, c.get(2)?.as_str(), c.get(0)?.range())
        } else if let Some(c) = self.quarter_year_q.captures(text) {
            (c.get(2)?.as_str().parse().ok()?, c.get(1)?.as_str(), c.get(0)?.range())
        } else {
            let c = self.quarter_en.captures(text)?;
            (ordinal(c.get(1)?.as_str())?, c.get(2)?.as_str(), c.get(0)?.range())
        };
        let range = quarter_range(parse_year(year)?, q)?;
        Some(TemporalMatch::absolute(range, span))
    }

    fn calendar_period(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let year = today.year();
        let current_q = quarter_of(today);
        if let Some(m) = self.this_quarter.find(text) {
            let start = quarter_range(year, current_q)?.start;
            return Some(TemporalMatch::absolute(DateRange::new(start, today), m.range()));
        }
        if let Some(m) = self.last_quarter.find(text) {
            let (y, q) = if current_q == 1 { (year - 1, 4) } else { (year, current_q - 1) };
            return Some(TemporalMatch::absolute(quarter_range(y, q)?, m.range()));
        }
        if let Some(m) = self.this_year.find(text) {
            let start = month_start(year, 1)?;
            return Some(TemporalMatch::absolute(DateRange::new(start, today), m.range()));
        }
        if let Some(m) = self.last_year.find(text) {
            let range = DateRange::new(month_start(year - 1, 1)?, month_end(year - 1, 12)?);
            return Some(TemporalMatch::absolute(range, m.range()));
        }
        if let Some(m) = self.this_month.find(text) {
            let start = month_start(year, today.month())?;
            return Some(TemporalMatch::absolute(DateRange::new(start, today), m.range()));
        }
        if let Some(m) = self.last_month.find(text) {
            let (y, mo) = if today.month() == 1 {
                (year - 1, 12)
            } else {
                (year, today.month() - 1)
            };
            return Some(TemporalMatch::absolute(month_range(y, mo)?, m.range()));
        }
        None
    }

    fn relative_window(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let found = if let Some(c) = self.rel_n_en.captures(text) {
            let n: u32 = c.get(1)?.as_str().parse().ok()?;
            Some((counted_window(n, c.get(2)?.as_str())?, c.get(0)?.range()))
        } else if let Some(c) = self.rel_n_he.captures(text) {
            let n: u32 = c.get(1)?.as_str().parse().ok()?;
            Some((counted_window(n, c.get(2)?.as_str())?, c.get(0)?.range()))
        } else if let Some(c) = self.rel_dual_he.captures(text) {
            let unit = match c.get(1)?.as_str() {
                "יומיים" => TimeUnit::Day,
                "שבועיים" => TimeUnit::Week,
                "חודשיים" => TimeUnit::Month,
                _ => TimeUnit::Year,
            };
            Some((RelativeWindow::new(2, unit), c.get(0)?.range()))
        } else if let Some(c) = self.rel_single_he.captures(text) {
            Some((single_window(c.get(1)?.as_str())?, c.get(0)?.range()))
        } else if let Some(c) = self.rel_single_en.captures(text) {
            let unit = c.get(1).or_else(|| c.get(2))?.as_str();
            Some((single_window(unit)?, c.get(0)?.range()))
        } else if let Some(m) = self.today_kw.find(text) {
            Some((RelativeWindow::new(0, TimeUnit::Day), m.range()))
        } else if let Some(m) = self.yesterday_kw.find(text) {
            Some((RelativeWindow::new(1, TimeUnit::Day), m.range()))
        } else if let Some(m) = self.day_before_kw.find(text) {
            Some((RelativeWindow::new(2, TimeUnit::Day), m.range()))
        } else if let Some(m) = self.recently.find(text) {
            Some((RelativeWindow::new(2, TimeUnit::Week), m.range()))
        } else if let Some(m) = self.whats_new.find(text) {
            Some((RelativeWindow::new(3, TimeUnit::Month), m.range()))
        } else {
            self.most_recent
                .find(text)
                .map(|m| (RelativeWindow::new(7, TimeUnit::Day), m.range()))
        };
        let (window, span) = found?;
        Some(TemporalMatch::window(window, today, span))
    }

    fn since_year_expr(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        let c = self.since_year.captures(text)?;
        let start = month_start(parse_year(c.get(1)?.as_str())?, 1)?;
        Some(TemporalMatch::absolute(
            DateRange::new(start, today.max(start)),
            c.get(0)?.range(),
        ))
    }

    // ============ Tier (c): bare tokens ============

    fn bare(&self, text: &str, today: NaiveDate) -> Option<TemporalMatch> {
        if let Some(c) = self.year_range.captures(text) {
            let a = parse_year(c.get(1)?.as_str())?;
            let b = parse_year(c.get(2)?.as_str())?;
            let range = DateRange::new(month_start(a.min(b), 1)?, month_end(a.max(b), 12)?);
            let span = c.get(0)?.range();
            return Some(TemporalMatch::absolute(
                range,
                extend_left(text, span.start, RANGE_WORDS)..span.end,
            ));
        }
        if let Some(c) = self.bare_year.captures(text) {
            let y = parse_year(c.get(1)?.as_str())?;
            let range = DateRange::new(month_start(y, 1)?, month_end(y, 12)?);
            return Some(TemporalMatch::absolute(range, c.get(0)?.range()));
        }
        if let Some(c) = self.bare_quarter.captures(text) {
            let q = match (c.get(1), c.get(2), c.get(3)) {
                (Some(o), _, _) | (_, _, Some(o)) => ordinal(o.as_str())?,
                (None, Some(d), None) => d.as_str().parse().ok()?,
                _ => return None,
            };
            let this_year = quarter_range(today.year(), q)?;
            let range = if this_year.start <= today {
                this_year
            } else {
                quarter_range(today.year() - 1, q)?
            };
            return Some(TemporalMatch::ambiguous(range, c.get(0)?.range()));
        }
        let c = self.bare_month.captures(text)?;
        let month = month_number(c.get(1)?.as_str())?;
        let this_year = month_range(today.year(), month)?;
        let range = if this_year.start <= today {
            this_year
        } else {
            month_range(today.year() - 1, month)?
        };
        Some(TemporalMatch::ambiguous(range, c.get(0)?.range()))
    }
}

// ============ Calendar helpers ============

fn floor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (y, m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(y, m, 1)?.pred_opt()
}

fn month_range(year: i32, month: u32) -> Option<DateRange> {
    Some(DateRange::new(month_start(year, month)?, month_end(year, month)?))
}

fn quarter_range(year: i32, quarter: u32) -> Option<DateRange> {
    if !(1..=4).contains(&quarter) {
        return None;
    }
    Some(DateRange::new(
        month_start(year, quarter * 3 - 2)?,
        month_end(year, quarter * 3)?,
    ))
}

fn quarter_of(d: NaiveDate) -> u32 {
    (d.month() - 1) / 3 + 1
}

fn parse_year(s: &str) -> Option<i32> {
    match s.len() {
        4 => s.parse().ok(),
        2 => s.parse::<i32>().ok().map(|y| 2000 + y),
        _ => None,
    }
}

/// Digits, or a soft year word resolved against `today`.
fn year_token(token: &str, today: NaiveDate) -> Option<i32> {
    if let Some(year) = parse_year(token) {
        return Some(year);
    }
    let previous = token == "אשתקד"
        || token.contains("עברה")
        || token.contains("קודמת")
        || token.starts_with("last")
        || token.starts_with("previous");
    Some(if previous { today.year() - 1 } else { today.year() })
}

fn weekday(word: &str) -> Option<Weekday> {
    let day = match word {
        "ראשון" | "sunday" => Weekday::Sun,
        "שני" | "monday" => Weekday::Mon,
        "שלישי" | "tuesday" => Weekday::Tue,
        "רביעי" | "wednesday" => Weekday::Wed,
        "חמישי" | "thursday" => Weekday::Thu,
        "שישי" | "friday" => Weekday::Fri,
        "שבת" | "saturday" => Weekday::Sat,
        _ => return None,
    };
    Some(day)
}

fn month_number(word: &str) -> Option<u32> {
    MONTHS.iter().find(|(n, _)| *n == word).map(|(_, m)| *m)
}

fn ordinal(word: &str) -> Option<u32> {
    let word = word.strip_prefix('ה').filter(|w| !w.is_empty()).unwrap_or(word);
    match word {
        "ראשון" | "ראשונה" | "1" | "first" | "1st" => Some(1),
        "שני" | "שנייה" | "שניה" | "2" | "second" | "2nd" => Some(2),
        "שלישי" | "שלישית" | "3" | "third" | "3rd" => Some(3),
        "רביעי" | "רביעית" | "4" | "fourth" | "4th" => Some(4),
        _ => None,
    }
}

fn counted_window(n: u32, unit: &str) -> Option<RelativeWindow> {
    let window = match unit {
        "hour" | "hours" | "שעה" | "שעות" => RelativeWindow::new(n.div_ceil(24), TimeUnit::Day),
        "day" | "days" | "יום" | "ימים" => RelativeWindow::new(n, TimeUnit::Day),
        "week" | "weeks" | "שבוע" | "שבועות" => RelativeWindow::new(n, TimeUnit::Week),
        "month" | "months" | "חודש" | "חודשים" => RelativeWindow::new(n, TimeUnit::Month),
        "year" | "years" | "שנה" | "שנים" => RelativeWindow::new(n, TimeUnit::Year),
        _ => return None,
    };
    Some(window)
}

fn single_window(unit: &str) -> Option<RelativeWindow> {
    let window = match unit {
        "יום" | "day" => RelativeWindow::new(1, TimeUnit::Day),
        "שבוע" | "week" => RelativeWindow::new(1, TimeUnit::Week),
        "fortnight" => RelativeWindow::new(2, TimeUnit::Week),
        "חודש" | "month" => RelativeWindow::new(1, TimeUnit::Month),
        "רבעון" | "quarter" => RelativeWindow::new(3, TimeUnit::Month),
        "שנה" | "year" => RelativeWindow::new(1, TimeUnit::Year),
        _ => return None,
    };
    Some(window)
}

/// Day-first numeric dates and ISO dates. The flag is set when a slash date
/// also reads as a different valid month-first date.
fn parse_full_date(c: &Captures) -> Option<(NaiveDate, bool)> {
    if let Some(y) = c.name("iy") {
        let date = NaiveDate::from_ymd_opt(
            y.as_str().parse().ok()?,
            c.name("im")?.as_str().parse().ok()?,
            c.name("id")?.as_str().parse().ok()?,
        )?;
        return Some((date, false));
    }
    let day: u32 = c.name("dd")?.as_str().parse().ok()?;
    let month: u32 = c.name("dm")?.as_str().parse().ok()?;
    let year = parse_year(c.name("dy")?.as_str())?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let slash = c.name("sep").is_some_and(|s| s.as_str() == "/");
    Some((date, slash && day <= 12 && month <= 12 && day != month))
}

/// The whitespace-delimited word ending right before `pos`, with its start.
fn preceding_word(text: &str, pos: usize) -> Option<(&str, usize)> {
    let head = text[..pos].trim_end();
    let start = head.rfind(' ').map(|i| i + 1).unwrap_or(0);
    let word = &head[start..];
    if word.is_empty() {
        None
    } else {
        Some((word, start))
    }
}

fn extend_left(text: &str, start: usize, keywords: &[&str]) -> usize {
    match preceding_word(text, start) {
        Some((w, pos)) if keywords.contains(&w) => pos,
        _ => start,
    }
}
