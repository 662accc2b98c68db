//! Text normalization shared by the catalog and measurement extractors.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[/.\-年]\s*(\d{1,2})\s*[/.\-月]\s*(\d{1,2})\s*日?").unwrap()
});

/// Collapse every whitespace run (newlines and U+3000 included) into one space and trim.
pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Printable ASCII plus the CJK blocks that appear in catalog text.
pub fn is_allowed_char(ch: char) -> bool {
    matches!(ch,
        ' '..='~'
        | '\u{3000}'..='\u{303F}' // CJK symbols and punctuation
        | '\u{3040}'..='\u{309F}' // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{31F0}'..='\u{31FF}' // katakana phonetic extensions
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility ideographs
        | '\u{FF00}'..='\u{FFEF}' // half/full width forms
    )
}

pub fn strip_disallowed(s: &str) -> String {
    s.chars().filter(|&c| is_allowed_char(c)).collect()
}

/// Normalize one table cell: whitespace collapse, allow-list filter, trim.
pub fn clean_cell(s: &str) -> String {
    normalize_ws(&strip_disallowed(&normalize_ws(s)))
}

/// Drop the second token when it repeats the first ("A A" -> "A", "A A B" -> "A B").
pub fn dedup_leading_token(s: &str) -> String {
    let mut tokens = s.split(' ').filter(|t| !t.is_empty());
    let (Some(first), Some(second)) = (tokens.next(), tokens.next()) else {
        return s.to_string();
    };
    if first != second {
        return s.to_string();
    }
    std::iter::once(first)
        .chain(tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map full-width digits (U+FF10..U+FF19) and the full-width period to ASCII.
pub fn ascii_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            '．' => '.',
            _ => c,
        })
        .collect()
}

/// A line made only of ASCII digits (after trimming and digit folding).
pub fn parse_numeric_line(line: &str) -> Option<u32> {
    let t = ascii_digits(line.trim());
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    t.parse().ok()
}

pub fn parse_decimal(s: &str) -> Option<f64> {
    let t = ascii_digits(s.trim());
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_birth_date(s: &str) -> Option<NaiveDate> {
    let folded = ascii_digits(s);
    let caps = DATE_RE.captures(&folded)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
