//! Column-layout discovery from header rows.
//!
//! Columns are visually aligned via x-coordinates even without grid lines:
//! find the header row by scoring candidate rows (single rows, and merges of
//! 2–3 adjacent rows for multi-line headers like `Balance` / `(SGD)`)
//! against the alias dictionary, then derive column boundaries from
//! adjacent-midpoint midpoints.

use crate::pdf::{PageSnapshot, WordBox};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

/// Canonical column names → header aliases across SG banks.
pub const COLUMN_HEADER_ALIASES: &[(&str, &[&str])] = &[
    (
        "transaction_date",
        &[
            "transaction date", "txn date", "trans date", "date", "date & time",
            "date and time", "transaction", "trans",
        ],
    ),
    ("value_date", &["value date", "posting date", "effective date"]),
    (
        "description",
        &[
            "description", "particulars", "details", "narrative", "remarks",
            "transaction details",
        ],
    ),
    ("counterparty", &["counterparty", "payee", "beneficiary", "sender"]),
    ("cheque", &["cheque", "chq", "check", "cheque no"]),
    ("reference", &["reference", "ref", "ref no", "reference no"]),
    (
        "debit",
        &[
            "withdrawal", "withdrawals", "debit", "debits", "debit amount",
            "withdrawal amount", "payments",
        ],
    ),
    (
        "credit",
        &[
            "deposit", "deposits", "credit", "credits", "credit amount",
            "deposit amount", "receipts",
        ],
    ),
    (
        "balance",
        &[
            "balance", "running balance", "closing balance", "available balance",
            "ledger balance",
        ],
    ),
];

/// Maximum vertical span when merging adjacent rows into one header band.
const HEADER_MERGE_WINDOW: f64 = 16.0;
/// Height of a y-band when grouping words into rows.
pub const ROW_BAND: f64 = 4.0;

lazy_static! {
    static ref CCY_SUFFIX: Regex = Regex::new(r"\s*\([a-z]{3}\)\s*$").unwrap();
    static ref CCY_ANY: Regex = Regex::new(r"\([a-z]{3}\)").unwrap();
}

pub fn strip_non_ascii(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii()).collect::<String>().trim().to_string()
}

/// Group words into 4-point y-bands, returned in reading order.
pub fn group_words_by_band(words: &[WordBox]) -> Vec<(i64, Vec<&WordBox>)> {
    let mut bands: BTreeMap<i64, Vec<&WordBox>> = BTreeMap::new();
    for word in words {
        let key = (word.top / ROW_BAND).round() as i64 * ROW_BAND as i64;
        bands.entry(key).or_default().push(word);
    }
    bands
        .into_iter()
        .map(|(y, mut row)| {
            row.sort_by(|a, b| a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal));
            (y, row)
        })
        .collect()
}

/// Discovered header layout for one column scheme.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    /// Top y of the main header row.
    pub header_y: f64,
    /// Bottom y of the (possibly merged) header band.
    pub header_y_max: f64,
    /// Matched columns with their header extents.
    pub columns: Vec<(String, (f64, f64))>,
    /// Column bounds (left, right), sorted by x.
    pub bounds: Vec<(String, (f64, f64))>,
}

impl ColumnLayout {
    pub fn has(&self, name: &str) -> bool {
        self.bounds.iter().any(|(n, _)| n == name)
    }

    pub fn bound(&self, name: &str) -> Option<(f64, f64)> {
        self.bounds.iter().find(|(n, _)| n == name).map(|(_, b)| *b)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.bounds.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Score one candidate row: how many canonical columns does it hit, and at
/// which x-extents.
fn score_row(row_words: &[&WordBox]) -> (usize, Vec<(String, (f64, f64))>) {
    let row_text = row_words
        .iter()
        .map(|w| strip_non_ascii(&w.text).to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let row_text_no_ccy = CCY_ANY.replace_all(&row_text, "").trim().to_string();

    let mut matches: Vec<(String, (f64, f64))> = Vec::new();
    let mut score = 0usize;

    for (canonical, aliases) in COLUMN_HEADER_ALIASES {
        for alias in *aliases {
            if !row_text.contains(alias) && !row_text_no_ccy.contains(alias) {
                continue;
            }
            let alias_words: Vec<&str> = alias.split_whitespace().collect();
            let mut extent: Option<(f64, f64)> = None;

            for w in row_words {
                let wt = strip_non_ascii(&w.text).to_lowercase();
                let wt_clean = CCY_SUFFIX.replace(&wt, "").trim().to_string();
                let wt_words: Vec<&str> = wt_clean.split_whitespace().collect();

                let word_matches = (!wt_clean.is_empty() && alias_words.contains(&wt_clean.as_str()))
                    || alias_words.contains(&wt.as_str())
                    || wt_clean.contains(alias)
                    || wt.contains(alias)
                    || wt_words.iter().any(|t| alias_words.contains(t));

                if word_matches {
                    extent = Some(match extent {
                        Some((x0, x1)) => (x0.min(w.x0), x1.max(w.x1)),
                        None => (w.x0, w.x1),
                    });
                }
            }

            if let Some(extent) = extent {
                if !matches.iter().any(|(name, _)| name == canonical) {
                    matches.push((canonical.to_string(), extent));
                    score += 1;
                }
            }
            break; // first alias hit decides this column
        }
    }

    (score, matches)
}

fn is_header_candidate(matches: &[(String, (f64, f64))]) -> bool {
    let has_amount = matches.iter().any(|(n, _)| n == "debit" || n == "credit");
    let has_balance = matches.iter().any(|(n, _)| n == "balance");
    has_amount && has_balance
}

fn bounds_from_matches(
    matches: &[(String, (f64, f64))],
    page_width: f64,
) -> Vec<(String, (f64, f64))> {
    let mut sorted: Vec<_> = matches.to_vec();
    sorted.sort_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(std::cmp::Ordering::Equal));

    let mids: Vec<f64> = sorted.iter().map(|(_, (x0, x1))| (x0 + x1) / 2.0).collect();
    sorted
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            let left = if i == 0 { 0.0 } else { (mids[i - 1] + mids[i]) / 2.0 };
            let right = if i == mids.len() - 1 {
                page_width
            } else {
                (mids[i] + mids[i + 1]) / 2.0
            };
            (name.clone(), ((left * 10.0).round() / 10.0, (right * 10.0).round() / 10.0))
        })
        .collect()
}

/// Auto-discover the column layout from a page's header row.
///
/// A row qualifies iff it hits ≥2 canonical columns including `balance` and
/// at least one of `debit`/`credit`; the highest-scoring candidate wins.
pub fn discover_column_layout(page: &PageSnapshot) -> Option<ColumnLayout> {
    if page.words.is_empty() {
        return None;
    }
    let page_width = if page.width > 0.0 { page.width } else { 612.0 };
    let bands = group_words_by_band(&page.words);

    let mut best: Option<(usize, f64, f64, Vec<(String, (f64, f64))>)> = None;
    let mut consider = |score: usize, y: f64, y_max: f64, matches: Vec<(String, (f64, f64))>| {
        if score < 2 || !is_header_candidate(&matches) {
            return;
        }
        if best.as_ref().map_or(true, |(s, ..)| score > *s) {
            best = Some((score, y, y_max, matches));
        }
    };

    for (idx, (y, row)) in bands.iter().enumerate() {
        let (score, matches) = score_row(row);
        consider(score, *y as f64, *y as f64, matches);

        // Merge with the next 1–2 rows for multi-line headers.
        for span in 1..=2usize {
            let Some((next_y, _)) = bands.get(idx + span) else {
                break;
            };
            if (*next_y - *y) as f64 > HEADER_MERGE_WINDOW {
                break;
            }
            let mut merged: Vec<&WordBox> = row.clone();
            for s in 1..=span {
                merged.extend(bands[idx + s].1.iter().copied());
            }
            merged.sort_by(|a, b| a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal));
            let (mscore, mmatches) = score_row(&merged);
            consider(mscore, *y as f64, *next_y as f64, mmatches);
        }
    }

    let (_, header_y, header_y_max, matches) = best?;
    let bounds = bounds_from_matches(&matches, page_width);
    Some(ColumnLayout {
        header_y,
        header_y_max,
        columns: matches,
        bounds,
    })
}

/// Assign a row's words to columns by x-midpoint containment.
///
/// Words beyond the rightmost column (watermarks, page furniture) are
/// dropped.
pub fn assign_words_to_columns(
    row_words: &[&WordBox],
    bounds: &[(String, (f64, f64))],
) -> BTreeMap<String, String> {
    let mut cols: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, _) in bounds {
        cols.insert(name.clone(), Vec::new());
    }
    let max_right = bounds
        .iter()
        .map(|(_, (_, r))| *r)
        .fold(f64::NEG_INFINITY, f64::max);

    for w in row_words {
        let x_mid = (w.x0 + w.x1) / 2.0;
        if x_mid > max_right {
            continue;
        }
        for (name, (left, right)) in bounds {
            if *left <= x_mid && x_mid <= *right {
                cols.get_mut(name).map(|v| v.push(w.text.as_str()));
                break;
            }
        }
    }

    cols.into_iter()
        .map(|(name, parts)| (name, parts.join(" ").trim().to_string()))
        .collect()
}

#[cfg(test)]
pub(crate) fn word(x0: f64, x1: f64, top: f64, text: &str) -> WordBox {
    WordBox {
        x0,
        x1,
        top,
        bottom: top + 10.0,
        text: text.to_string(),
    }
}

/// Shared fixture builders for the extraction tests.
#[cfg(test)]
pub mod tests_support {
    use super::word;
    use crate::pdf::PageSnapshot;

    /// Borderless OCBC-style page: a six-column header plus data rows given
    /// as `(date, value_date, description, withdrawal, deposit, balance)`.
    pub fn ocbc_style_page(
        number: u32,
        rows: &[(&str, &str, &str, &str, &str, &str)],
    ) -> PageSnapshot {
        let mut words = vec![
            word(70.0, 92.0, 150.0, "Date"),
            word(130.0, 180.0, 150.0, "Value Date"),
            word(280.0, 340.0, 150.0, "Description"),
            word(360.0, 420.0, 150.0, "Withdrawal"),
            word(430.0, 475.0, 150.0, "Deposit"),
            word(500.0, 545.0, 150.0, "Balance"),
        ];
        let mut text = String::from("Date Value Date Description Withdrawal Deposit Balance\n");

        for (i, (date, value, desc, wd, dep, bal)) in rows.iter().enumerate() {
            let y = 200.0 + i as f64 * 20.0;
            if !date.is_empty() {
                words.push(word(70.0, 110.0, y, date));
            }
            if !value.is_empty() {
                words.push(word(130.0, 170.0, y, value));
            }
            if !desc.is_empty() {
                words.push(word(280.0, 345.0, y, desc));
            }
            if !wd.is_empty() {
                words.push(word(360.0, 410.0, y, wd));
            }
            if !dep.is_empty() {
                words.push(word(430.0, 475.0, y, dep));
            }
            if !bal.is_empty() {
                words.push(word(500.0, 555.0, y, bal));
            }
            text.push_str(&format!("{date} {value} {desc} {wd} {dep} {bal}\n"));
        }

        PageSnapshot {
            number,
            width: 612.0,
            height: 792.0,
            text,
            words,
            ..Default::default()
        }
    }

    /// A page that injects a standalone currency token row between two data
    /// row groups (multi-currency sectioning).
    pub fn page_with_currency_boundary(
        number: u32,
        before: &[(&str, &str, &str, &str, &str, &str)],
        currency: &str,
        after: &[(&str, &str, &str, &str, &str, &str)],
    ) -> PageSnapshot {
        let mut page = ocbc_style_page(number, before);
        let boundary_y = 200.0 + before.len() as f64 * 20.0;
        page.words.push(word(70.0, 100.0, boundary_y, currency));
        page.text.push_str(&format!("{currency}\n"));

        for (i, (date, value, desc, wd, dep, bal)) in after.iter().enumerate() {
            let y = boundary_y + 20.0 + i as f64 * 20.0;
            if !date.is_empty() {
                page.words.push(word(70.0, 110.0, y, date));
            }
            if !value.is_empty() {
                page.words.push(word(130.0, 170.0, y, value));
            }
            if !desc.is_empty() {
                page.words.push(word(280.0, 345.0, y, desc));
            }
            if !wd.is_empty() {
                page.words.push(word(360.0, 410.0, y, wd));
            }
            if !dep.is_empty() {
                page.words.push(word(430.0, 475.0, y, dep));
            }
            if !bal.is_empty() {
                page.words.push(word(500.0, 555.0, y, bal));
            }
            page.text.push_str(&format!("{date} {value} {desc} {wd} {dep} {bal}\n"));
        }
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_page() -> PageSnapshot {
        PageSnapshot {
            number: 2,
            width: 612.0,
            height: 792.0,
            words: vec![
                word(70.0, 95.0, 180.0, "Date"),
                word(130.0, 180.0, 180.0, "Value Date"),
                word(280.0, 340.0, 180.0, "Description"),
                word(360.0, 420.0, 180.0, "Withdrawal"),
                word(430.0, 475.0, 180.0, "Deposit"),
                word(500.0, 545.0, 180.0, "Balance"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn discovers_standard_header() {
        let layout = discover_column_layout(&header_page()).unwrap();
        assert!(layout.has("transaction_date"));
        assert!(layout.has("debit"));
        assert!(layout.has("credit"));
        assert!(layout.has("balance"));
        assert_eq!(layout.header_y, 180.0);
    }

    #[test]
    fn boundaries_are_adjacent_midpoint_midpoints() {
        let layout = discover_column_layout(&header_page()).unwrap();
        let (left, right) = layout.bound("balance").unwrap();
        // Balance is rightmost: right edge is the page width.
        assert_eq!(right, 612.0);
        assert!(left > 475.0 && left < 500.0);

        let (first_left, _) = layout.bound("transaction_date").unwrap();
        assert_eq!(first_left, 0.0);
    }

    #[test]
    fn merges_multi_line_headers() {
        // Two-line header: the deposit column only appears on the second
        // line, so the merged band outscores the single row.
        let page = PageSnapshot {
            number: 1,
            width: 612.0,
            height: 792.0,
            words: vec![
                word(70.0, 95.0, 100.0, "Date"),
                word(300.0, 360.0, 100.0, "Withdrawal"),
                word(500.0, 545.0, 100.0, "Balance"),
                word(430.0, 475.0, 112.0, "Deposit"),
                word(505.0, 540.0, 112.0, "(SGD)"),
            ],
            ..Default::default()
        };
        let layout = discover_column_layout(&page).unwrap();
        assert!(layout.has("balance"));
        assert!(layout.has("credit"));
        assert_eq!(layout.header_y, 100.0);
        assert_eq!(layout.header_y_max, 112.0);
    }

    #[test]
    fn rejects_rows_without_balance_and_amount() {
        let page = PageSnapshot {
            number: 1,
            width: 612.0,
            height: 792.0,
            words: vec![
                word(70.0, 95.0, 100.0, "Date"),
                word(300.0, 360.0, 100.0, "Description"),
            ],
            ..Default::default()
        };
        assert!(discover_column_layout(&page).is_none());
    }

    #[test]
    fn assigns_words_and_drops_watermarks() {
        let layout = discover_column_layout(&header_page()).unwrap();
        let data = vec![
            word(70.0, 100.0, 200.0, "01 DEC"),
            word(130.0, 160.0, 200.0, "01 DEC"),
            word(280.0, 345.0, 200.0, "FAST PAYMENT OTHR GELMAX"),
            word(360.0, 410.0, 200.0, "1943.69"),
            word(500.0, 550.0, 200.0, "127543.16"),
            word(600.5, 611.9, 200.0, "W"), // margin stamp inside the rightmost bound
        ];
        let refs: Vec<&WordBox> = data.iter().collect();
        let cols = assign_words_to_columns(&refs, &layout.bounds);
        assert_eq!(cols["transaction_date"], "01 DEC");
        assert_eq!(cols["debit"], "1943.69");
        assert_eq!(cols["credit"], "");
        assert!(cols["balance"].starts_with("127543.16"));
        assert_eq!(cols["description"], "FAST PAYMENT OTHR GELMAX");
    }
}
