//! Date fragment parsing shared by the fraud and insights agents.
//!
//! Statement dates are bank-native strings (`01 DEC`, `01-Sep-2025`,
//! `01/12/2025`); these helpers pull out the day and month without
//! committing to a full calendar date.

use lazy_static::lazy_static;
use regex::Regex;

pub const MONTH_ORDER: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

lazy_static! {
    static ref DAY_PREFIX: Regex = Regex::new(r"^(\d{1,2})[\-/]").unwrap();
    static ref MONTH_PREFIX: Regex = Regex::new(r"^\d{1,2}[\-/]([A-Z]{3})").unwrap();
}

/// Extract the day-of-month from a bank-native date string.
pub fn parse_day(date_str: &str) -> Option<u32> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }
    if let Some(c) = DAY_PREFIX.captures(date_str) {
        return c[1].parse().ok();
    }
    let first = date_str.split_whitespace().next()?;
    first.parse().ok()
}

/// Extract the `MMM` month token from a bank-native date string.
pub fn parse_month(date_str: &str) -> Option<&'static str> {
    let upper = date_str.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    if let Some(c) = MONTH_PREFIX.captures(&upper) {
        let token = c[1].to_string();
        return MONTH_ORDER.iter().find(|m| **m == token).copied();
    }
    for part in upper.split_whitespace() {
        if let Some(m) = MONTH_ORDER.iter().find(|m| **m == part) {
            return Some(m);
        }
    }
    None
}

/// Normalise a date string to a sortable grouping key.
pub fn date_key(date_str: &str) -> String {
    date_str.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_parsing_across_formats() {
        assert_eq!(parse_day("01 DEC"), Some(1));
        assert_eq!(parse_day("15 JAN"), Some(15));
        assert_eq!(parse_day("01-Sep-2025"), Some(1));
        assert_eq!(parse_day("28/02/2025"), Some(28));
        assert_eq!(parse_day(""), None);
        assert_eq!(parse_day("DEC"), None);
    }

    #[test]
    fn month_parsing_across_formats() {
        assert_eq!(parse_month("01 DEC"), Some("DEC"));
        assert_eq!(parse_month("01-Sep-2025"), Some("SEP"));
        assert_eq!(parse_month("31 jan 2026"), Some("JAN"));
        assert_eq!(parse_month("01/12/2025"), None);
        assert_eq!(parse_month(""), None);
    }

    #[test]
    fn date_keys_collapse_whitespace() {
        assert_eq!(date_key(" 01  dec "), "01 DEC");
        assert_eq!(date_key("01 DEC"), date_key("01  DEC"));
    }
}
