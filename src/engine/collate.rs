//! Ordering of filter option values.
//!
//! - study date: newest calendar date first
//! - patient age: ascending by the number before the unit suffix
//! - everything else: German dictionary order

use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::study::{AGE_COLUMN, DATE_COLUMN};

/// Sort distinct option values for `column` in place.
pub fn sort_values(column: &str, values: &mut [String]) {
    match column {
        DATE_COLUMN => values.sort_by(|a, b| compare_dates_desc(a, b)),
        AGE_COLUMN => values.sort_by(|a, b| compare_ages(a, b)),
        _ => values.sort_by(|a, b| german_cmp(a, b)),
    }
}

/// Parse the `DD-MM-YYYY` prefix of a study date. Trailing text such as a
/// time of day is ignored.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%d-%m-%Y").ok()
}

/// Leading integer of an age value: `"45Y"` → 45.
pub fn parse_age(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Display text of an age option: `"45Y"` → `"45 Jahre"`.
pub fn age_label(value: &str) -> String {
    value.replacen('Y', " Jahre", 1)
}

/// Newest first. Unparseable dates go last, ordered lexically.
fn compare_dates_desc(a: &str, b: &str) -> Ordering {
    match (parse_date(a), parse_date(b)) {
        (Some(da), Some(db)) => db.cmp(&da).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => german_cmp(a, b),
    }
}

/// Smallest first. Values without a leading number go last.
fn compare_ages(a: &str, b: &str) -> Ordering {
    match (parse_age(a), parse_age(b)) {
        (Some(na), Some(nb)) => na.cmp(&nb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => german_cmp(a, b),
    }
}

/// German dictionary order (DIN 5007-1).
///
/// Primary comparison ignores case and treats umlauts as their base vowel
/// (`ä` = `a`) and `ß` as `ss`. Ties fall back to lowercase before
/// uppercase, base letters before umlauts, then plain code point order.
pub fn german_cmp(a: &str, b: &str) -> Ordering {
    primary_key(a)
        .cmp(&primary_key(b))
        .then_with(|| secondary_key(a).cmp(&secondary_key(b)))
        .then_with(|| tertiary_key(a).cmp(&tertiary_key(b)))
        .then_with(|| a.cmp(b))
}

fn primary_key(s: &str) -> String {
    let mut key = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            'ä' | 'Ä' => key.push('a'),
            'ö' | 'Ö' => key.push('o'),
            'ü' | 'Ü' => key.push('u'),
            'ß' => key.push_str("ss"),
            other => key.extend(other.to_lowercase()),
        }
    }
    key
}

/// Umlaut marks: base letters sort before their umlaut.
fn secondary_key(s: &str) -> Vec<u8> {
    s.chars()
        .map(|ch| u8::from(matches!(ch, 'ä' | 'ö' | 'ü' | 'Ä' | 'Ö' | 'Ü' | 'ß')))
        .collect()
}

/// Case marks: lowercase sorts before uppercase.
fn tertiary_key(s: &str) -> Vec<u8> {
    s.chars().map(|ch| u8::from(ch.is_uppercase())).collect()
}
