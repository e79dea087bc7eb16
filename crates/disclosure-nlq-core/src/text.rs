//! Text normalization and tokenization for mixed Hebrew / English queries.
//!
//! Every comparison in the resolver happens on [`normalize`]d text, so alias
//! tables and queries agree regardless of case, niqqud, bidi marks, or the
//! quote character used in abbreviations (`בע"מ`, `בע״מ`, `בעמ`).

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Hebrew one-letter prefixes (in, to, like, and, the, from, that).
pub const HEBREW_PREFIXES: &[char] = &['ב', 'ל', 'כ', 'ו', 'ה', 'מ', 'ש'];

const HEBREW_STOP_WORDS: &[&str] = &[
    "של", "את", "על", "עם", "גם", "או", "אני", "רוצה", "מבקש", "מבקשת", "תן", "תני", "תנו", "לי",
    "הצג", "הציגו", "תראה", "תראי", "הראה", "מה", "כל", "כמה", "יש", "אשר", "זה", "זו", "זאת",
    "אלה", "הם", "היא", "הוא", "עבור", "לגבי", "בנושא", "אודות", "בבקשה", "דוח", "דוחות", "הדוח",
    "הדוחות", "דיווח", "דיווחים", "הדיווחים", "חברה", "חברת", "חברות", "החברה", "בין", "עד",
    "מאז", "מ", "ב", "ל", "ו", "ה", "ש", "אחרונים", "אחרונות", "האחרונים", "האחרונות", "חדשים",
    "ביותר", "שפורסמו", "פורסמו", "מתאריך", "תאריך", "בתאריך", "מספר",
];

const ENGLISH_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "of", "for", "from", "in", "on", "to", "and", "or", "me", "show", "give",
    "get", "find", "list", "all", "any", "about", "by", "with", "please", "report", "reports",
    "filing", "filings", "announcement", "announcements", "disclosure", "disclosures", "company",
    "companies", "what", "which", "is", "are", "latest", "newest", "between", "since", "until",
    "i", "want", "need", "recent",
];

fn is_bidi_control(c: char) -> bool {
    matches!(
        c,
        '\u{200E}' | '\u{200F}' | '\u{061C}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'
            | '\u{200B}'..='\u{200D}' | '\u{FEFF}'
    )
}

/// Niqqud and cantillation, excluding the punctuation that lives in the same block.
fn is_hebrew_point(c: char) -> bool {
    matches!(c, '\u{0591}'..='\u{05C7}')
        && !matches!(c, '\u{05BE}' | '\u{05C0}' | '\u{05C3}' | '\u{05C6}')
}

fn is_quote(c: char) -> bool {
    matches!(
        c,
        '"' | '\'' | '`' | '\u{05F3}' | '\u{05F4}' | '\u{2018}'..='\u{201F}' | '\u{00B4}'
            | '\u{00AB}' | '\u{00BB}'
    )
}

/// Case-, diacritic- and quote-insensitive canonical form of `text`.
///
/// Whitespace runs collapse to a single space and the result is trimmed.
/// Dash variants (including the Hebrew maqaf) become `-`; the tokenizer
/// decides whether a dash is a separator.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.nfkd() {
        if is_combining_mark(c) || is_hebrew_point(c) || is_bidi_control(c) || is_quote(c) {
            continue;
        }
        let c = match c {
            '\u{05BE}' | '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            other => other,
        };
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// A token with its byte span in the normalized string it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_numeric(&self) -> bool {
        !self.text.is_empty() && self.text.chars().all(|c| c.is_ascii_digit())
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Splits normalized text on whitespace and punctuation.
///
/// `/`, `.`, `-` and `:` between two digits stay inside the token so that
/// `01/07/2025` and `2025-07-01` survive as single tokens.
pub fn tokenize(normalized: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = normalized.char_indices().collect();
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, &(pos, c)) in chars.iter().enumerate() {
        let keep = if c.is_alphanumeric() {
            true
        } else if matches!(c, '/' | '.' | '-' | ':') {
            let prev_digit = i > 0 && chars[i - 1].1.is_ascii_digit() && start.is_some();
            let next_digit = chars.get(i + 1).is_some_and(|&(_, n)| n.is_ascii_digit());
            prev_digit && next_digit
        } else {
            false
        };

        match (keep, start) {
            (true, None) => start = Some(pos),
            (false, Some(s)) => {
                tokens.push(Token {
                    text: normalized[s..pos].to_string(),
                    start: s,
                    end: pos,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: normalized[s..].to_string(),
            start: s,
            end: normalized.len(),
        });
    }
    tokens
}

/// Normalizes and joins the tokens of `text` with single spaces.
///
/// This is the key under which alias surface forms are indexed.
pub fn phrase_key(text: &str) -> String {
    let normalized = normalize(text);
    tokenize(&normalized)
        .into_iter()
        .map(|t| t.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when `text` has any Hebrew letter. Hebrew queries write dates
/// day-first.
pub fn contains_hebrew(text: &str) -> bool {
    text.chars().any(|c| ('\u{05D0}'..='\u{05EA}').contains(&c))
}

pub fn is_stop_word(token: &str) -> bool {
    HEBREW_STOP_WORDS.contains(&token) || ENGLISH_STOP_WORDS.contains(&token)
}

/// Tokens that never count against confidence when left unmatched.
pub fn is_trivial(token: &str) -> bool {
    token.chars().count() < 2 || is_stop_word(token) || !token.chars().any(|c| c.is_alphanumeric())
}

/// Forms of `token` with up to two leading Hebrew prefix letters removed.
///
/// `"מהרבעון"` yields `["הרבעון", "רבעון"]`. Remainders shorter than two
/// characters are not offered.
pub fn strip_hebrew_prefixes(token: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = token;
    for _ in 0..2 {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if HEBREW_PREFIXES.contains(&c) => {
                let tail = chars.as_str();
                let tail = tail.strip_prefix('-').unwrap_or(tail);
                if tail.chars().count() < 2 {
                    break;
                }
                out.push(tail);
                rest = tail;
            }
            _ => break,
        }
    }
    out
}
