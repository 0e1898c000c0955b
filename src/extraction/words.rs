//! Tier B: word-position column inference for borderless statements.
//!
//! Works for bordered and borderless PDFs, but the table tier is preferred
//! for bordered ones because it handles multi-line cells more reliably.
//! Handles multi-account / multi-currency statements by tagging each
//! transaction with a currency section; balance chains are validated per
//! section downstream.

use super::account::{extract_account_info_from_text, AccountInfo};
use super::columns::{assign_words_to_columns, discover_column_layout, group_words_by_band, ColumnLayout};
use super::normalize::{detect_channel, extract_counterparty, normalise_date_to_dd_mmm};
use super::{Txn, TxnType};
use crate::pdf::{DocumentSnapshot, PageSnapshot};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

/// ISO-4217 codes that mark a currency-section boundary.
pub const CURRENCY_CODES: &[&str] = &[
    "SGD", "USD", "EUR", "GBP", "CNY", "JPY", "AUD", "HKD", "MYR", "IDR", "THB", "PHP", "INR",
    "KRW", "NZD", "CHF", "CAD", "TWD", "VND",
];

/// Gap between the header band and the first data row.
const DATA_Y_OFFSET: f64 = 8.0;

lazy_static! {
    static ref DATE_RE: Regex = Regex::new(
        r"(?i)\d{1,2}[\s\-/]?(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)"
    )
    .unwrap();
    static ref SUMMARY_RE: Regex = Regex::new(concat!(
        r"(?i)(Total Withdrawal|Total Deposit|Total Interest|Average Balance|Withholding Tax",
        r"|Total Debit|Total Credit|Grand Total|Closing Statement",
        r"|ENDOFSTATEMENT|END\s*OF\s*STATEMENT)",
    ))
    .unwrap();
    static ref FOOTER_RE: Regex = Regex::new(concat!(
        r"(?i)(Deposit\s*Insurance|Singaporedollardeposit|currency\s*deposits.*not\s*insured",
        r"|structureddeposits|Issued\s*by\s*The\s*Hongkong|S\$100,000\s*in\s*aggregate",
        r"|aggregate\s*per\s*depositor)",
    ))
    .unwrap();
    static ref PAGE_SUMMARY_RE: Regex = Regex::new(r"(?i)^(WITHDRAWALS?|DEPOSITS?)\b").unwrap();
    static ref HEADER_REMNANT_RE: Regex = Regex::new(r"^\(?[A-Z]{3}\)?$").unwrap();
    static ref BALANCE_ENTRY_RE: Regex = Regex::new(
        r"(?i)BALANCE\s*[BC]/F|OPENING\s+BALANCE|CLOSING\s+BALANCE|BALANCE\s*BROUGHT|BALANCE\s*CARRIED"
    )
    .unwrap();
    static ref OPENING_RE: Regex =
        Regex::new(r"(?i)BALANCE\s*B/F|BALANCE\s*BROUGHT|OPENING\s+BALANCE").unwrap();
    static ref CLOSING_RE: Regex =
        Regex::new(r"(?i)BALANCE\s*C/F|BALANCE\s*CARRIED|CLOSING\s+BALANCE").unwrap();
    static ref AMOUNT_TOKEN_RE: Regex = Regex::new(r"(?i)([\d,]+\.\d{2})\s*(DR)?").unwrap();
}

/// Does this page likely contain transaction data?
pub fn is_transaction_page(page: &PageSnapshot) -> bool {
    let text = &page.text;
    if text.contains("TRANSACTION CODE DESCRIPTION") {
        return false;
    }
    let text_lower = text.to_lowercase();
    if text_lower.contains("confirmation of validity") && text.trim().len() < 500 {
        return false;
    }
    if text.contains("BALANCE B/F")
        || text.contains("BALANCE C/F")
        || text.contains("Balance Brought Forward")
        || text.contains("Balance Carried Forward")
    {
        return true;
    }
    if DATE_RE.is_match(text) {
        return true;
    }
    discover_column_layout(page).is_some()
}

/// One assembled (pre-canonical) transaction row.
#[derive(Debug, Clone, Default)]
struct RawRow {
    txn_date: String,
    value_date: String,
    description: String,
    cpty_text: String,
    withdrawal: String,
    deposit: String,
    balance: String,
    currency: Option<String>,
    account_section: u32,
    page_number: u32,
}

pub struct WordExtraction {
    pub account_info: AccountInfo,
    pub transactions: Vec<Txn>,
    pub column_names: Vec<String>,
}

/// Extract the first amount token from a column's concatenated text. A
/// trailing `DR` negates the value (HSBC debit-balance convention).
fn extract_amount(text: &str, allow_dr: bool) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ' ').collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    let c = AMOUNT_TOKEN_RE.captures(&cleaned)?;
    let mut value: f64 = c[1].replace(',', "").parse().ok()?;
    if allow_dr && c.get(2).is_some() {
        value = -value;
    }
    Some(value)
}

/// Chain-validity count over the first `limit` credit/debit rows, used to
/// sniff reverse-chronological statements.
fn quick_chain_score(txns: &[Txn], limit: usize) -> usize {
    let subset: Vec<&Txn> = txns
        .iter()
        .filter(|t| t.is_monetary() && t.balance.is_some())
        .take(limit)
        .collect();
    if subset.len() < 2 {
        return 0;
    }
    let mut valid = 0;
    for pair in subset.windows(2) {
        let prev_b = pair[0].balance.unwrap_or(0.0);
        let curr_b = pair[1].balance.unwrap_or(0.0);
        let amt = pair[1].amount().unwrap_or(0.0);
        let expected = match pair[1].txn_type {
            TxnType::Debit => prev_b - amt,
            _ => prev_b + amt,
        };
        let expected = (expected * 100.0).round() / 100.0;
        if (expected - curr_b).abs() <= 0.02 {
            valid += 1;
        }
    }
    valid
}

/// Word-position extraction across the whole document.
pub fn try_extract_words(snapshot: &DocumentSnapshot) -> Option<WordExtraction> {
    // Auto-discover the column layout from the first few pages.
    let mut layout: Option<ColumnLayout> = None;
    for page in snapshot.pages.iter().take(5) {
        layout = discover_column_layout(page);
        if layout.is_some() {
            break;
        }
    }
    let layout = layout?;

    if !layout.has("balance") || (!layout.has("debit") && !layout.has("credit")) {
        return None;
    }

    let data_y_min = layout.header_y_max + DATA_Y_OFFSET;
    let column_names = layout.column_names();
    info!(
        "  📊 Auto-discovered columns: {:?} (header at y={}..{})",
        column_names, layout.header_y, layout.header_y_max
    );

    let account_info = extract_account_info_from_text(&snapshot.pages);

    let date_col = if layout.has("transaction_date") {
        Some("transaction_date")
    } else if layout.has("value_date") {
        Some("value_date")
    } else {
        None
    };
    let desc_col = if layout.has("description") {
        Some("description")
    } else if layout.has("counterparty") {
        Some("counterparty")
    } else if layout.has("cheque") {
        Some("cheque")
    } else {
        None
    };

    let mut all_rows: Vec<RawRow> = Vec::new();
    let mut current_currency: Option<String> = account_info.currency.clone();
    let mut current_section: u32 = 0;

    for page in &snapshot.pages {
        if !is_transaction_page(page) {
            continue;
        }

        // Some layouts move the header between page 1 and the rest.
        let page_data_y_min = match discover_column_layout(page) {
            Some(page_layout) => page_layout.header_y_max + DATA_Y_OFFSET,
            None => data_y_min,
        };

        // Currency section headers above the data area.
        for w in &page.words {
            let token = w.text.trim();
            if CURRENCY_CODES.contains(&token) && w.top < page_data_y_min {
                if current_currency.as_deref() != Some(token) {
                    current_currency = Some(token.to_string());
                    current_section += 1;
                    info!(
                        "  💱 Page {}: new currency section '{}' (section #{})",
                        page.number, token, current_section
                    );
                }
            }
        }

        let bands = group_words_by_band(&page.words);
        let mut current: Option<RawRow> = None;
        let mut past_closing = false;
        let mut in_summary = false;

        for (y, row_words) in &bands {
            if (*y as f64) < page_data_y_min {
                continue;
            }

            let row_full = row_words
                .iter()
                .map(|w| w.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();

            // Mid-page currency boundary: a data row whose sole content is a
            // currency code starts a new section.
            if CURRENCY_CODES.contains(&row_full.as_str()) {
                if let Some(row) = current.take() {
                    all_rows.push(row);
                }
                if current_currency.as_deref() != Some(row_full.as_str()) {
                    current_currency = Some(row_full.clone());
                    current_section += 1;
                    info!(
                        "  💱 Page {}: mid-page currency section '{}' (section #{})",
                        page.number, row_full, current_section
                    );
                }
                continue;
            }

            // Header remnant rows, e.g. a trailing "(SGD)" sub-label.
            if HEADER_REMNANT_RE.is_match(&row_full) {
                continue;
            }

            let cols = assign_words_to_columns(row_words, &layout.bounds);
            let get = |name: &str| cols.get(name).map(String::as_str).unwrap_or("").to_string();

            let date_text = date_col.map(|c| get(c)).unwrap_or_default();
            let mut desc_text = desc_col.map(|c| get(c)).unwrap_or_default().trim().to_string();
            let mut w_text = get("debit");
            let mut d_text = get("credit");
            let b_text = get("balance");

            let cpty_text = if layout.has("counterparty") && desc_col != Some("counterparty") {
                get("counterparty").trim().to_string()
            } else {
                String::new()
            };

            // Build a description from any non-amount column when the
            // designated one is empty.
            if desc_text.is_empty() {
                for (name, _) in &layout.bounds {
                    if matches!(
                        name.as_str(),
                        "debit" | "credit" | "balance" | "transaction_date" | "value_date"
                    ) {
                        continue;
                    }
                    let v = get(name).trim().to_string();
                    if !v.is_empty() {
                        desc_text = v;
                        break;
                    }
                }
            }

            let has_txn_date = !date_text.trim().is_empty() && DATE_RE.is_match(date_text.trim());

            // Page summary / total rows, unless they carry a real date.
            if SUMMARY_RE.is_match(&desc_text) && !has_txn_date {
                continue;
            }
            if SUMMARY_RE.is_match(&row_full) {
                continue;
            }
            if FOOTER_RE.is_match(&row_full) {
                continue;
            }

            // HSBC-style two-row page summaries enter a skip zone until a
            // dated transaction row appears.
            if !date_text.trim().is_empty() && PAGE_SUMMARY_RE.is_match(date_text.trim()) {
                in_summary = true;
                continue;
            }
            if in_summary {
                let row_upper = row_full.to_uppercase().replace(' ', "");
                if row_upper.contains("ASAT") || row_upper.contains("BALANCECARRIED") {
                    continue;
                } else if row_upper.contains("BALANCEBROUGHT") {
                    in_summary = false;
                } else if !has_txn_date {
                    continue;
                } else {
                    in_summary = false;
                }
            }

            let is_balance_entry = BALANCE_ENTRY_RE.is_match(&desc_text);
            let is_opening = OPENING_RE.is_match(&desc_text);
            let is_closing = CLOSING_RE.is_match(&desc_text);

            // Footer zone between BALANCE C/F and the next BALANCE B/F.
            if is_opening {
                past_closing = false;
            } else if past_closing && !is_balance_entry {
                continue;
            }

            if w_text.trim() == "-" {
                w_text = String::new();
            }
            if d_text.trim() == "-" {
                d_text = String::new();
            }

            let has_amount = !w_text.is_empty() || !d_text.is_empty() || !b_text.is_empty();
            let has_desc = !desc_text.is_empty();

            if has_txn_date || is_balance_entry {
                if let Some(row) = current.take() {
                    all_rows.push(row);
                }
                if is_closing {
                    past_closing = true;
                }
                let value_date = {
                    let v = get("value_date").trim().to_string();
                    if v.is_empty() { date_text.trim().to_string() } else { v }
                };
                current = Some(RawRow {
                    txn_date: date_text.trim().to_string(),
                    value_date,
                    description: desc_text,
                    cpty_text,
                    withdrawal: w_text,
                    deposit: d_text,
                    balance: b_text,
                    currency: current_currency.clone(),
                    account_section: current_section,
                    page_number: page.number,
                });
            } else if current.is_some() && has_amount {
                let row_has_balance =
                    current.as_ref().map_or(false, |row| !row.balance.is_empty());
                let new_has_balance = !b_text.is_empty();
                if row_has_balance && new_has_balance {
                    // Sub-transaction: a fresh balance while the current row
                    // already holds one; inherits the previous date.
                    if let Some(prev) = current.take() {
                        let inherited = RawRow {
                            txn_date: prev.txn_date.clone(),
                            value_date: prev.value_date.clone(),
                            description: desc_text,
                            cpty_text,
                            withdrawal: w_text,
                            deposit: d_text,
                            balance: b_text,
                            currency: current_currency.clone(),
                            account_section: current_section,
                            page_number: page.number,
                        };
                        all_rows.push(prev);
                        current = Some(inherited);
                    }
                } else if let Some(row) = current.as_mut() {
                    if has_desc {
                        row.description.push(' ');
                        row.description.push_str(&desc_text);
                        if !cpty_text.is_empty() {
                            row.cpty_text.push(' ');
                            row.cpty_text.push_str(&cpty_text);
                        }
                    }
                    if row.withdrawal.is_empty() && !w_text.is_empty() {
                        row.withdrawal = w_text;
                    }
                    if row.deposit.is_empty() && !d_text.is_empty() {
                        row.deposit = d_text;
                    }
                    if row.balance.is_empty() && !b_text.is_empty() {
                        row.balance = b_text;
                    }
                }
            } else if let Some(row) = current.as_mut() {
                if has_desc {
                    // Description continuation.
                    row.description.push(' ');
                    row.description.push_str(&desc_text);
                    if !cpty_text.is_empty() {
                        row.cpty_text.push(' ');
                        row.cpty_text.push_str(&cpty_text);
                    }
                }
            }
        }

        if let Some(row) = current.take() {
            all_rows.push(row);
        }
    }

    if all_rows.is_empty() {
        return None;
    }

    let mut transactions: Vec<Txn> = all_rows.iter().filter_map(finalise_row).collect();
    if transactions.is_empty() {
        return None;
    }

    // Some banks present newest-first: pick the order with more valid
    // balance transitions.
    let fwd = quick_chain_score(&transactions, 20);
    let reversed: Vec<Txn> = transactions.iter().rev().cloned().collect();
    let rev = quick_chain_score(&reversed, 20);
    if rev > fwd {
        transactions = reversed;
        info!(
            "  🔄 Detected reverse-chronological order (fwd={fwd}, rev={rev}) \
             — reversed to forward order"
        );
    }

    let sections: std::collections::BTreeSet<u32> =
        transactions.iter().map(|t| t.account_section).collect();
    if sections.len() > 1 {
        info!("  📊 Multi-account PDF: {} sections detected", sections.len());
    }

    info!(
        "  📊 Word-position extraction successful: {} transactions from {} pages \
         (zero model calls for transactions!)",
        transactions.len(),
        snapshot.page_count
    );

    Some(WordExtraction {
        account_info,
        transactions,
        column_names,
    })
}

fn finalise_row(raw: &RawRow) -> Option<Txn> {
    let desc = raw.description.trim().to_string();
    let desc_upper = desc.to_uppercase();

    let mut withdrawal = extract_amount(&raw.withdrawal, false);
    let mut deposit = extract_amount(&raw.deposit, false);
    let balance = extract_amount(&raw.balance, true);

    const OPENING_KEYS: [&str; 4] =
        ["BALANCE B/F", "BALANCE BROUGHT", "BALANCEBROUGHT", "OPENING BALANCE"];
    const CLOSING_KEYS: [&str; 4] =
        ["BALANCE C/F", "BALANCE CARRIED", "BALANCECARRIED", "CLOSING BALANCE"];

    let txn_type = if OPENING_KEYS.iter().any(|k| desc_upper.contains(k)) {
        TxnType::OpeningBalance
    } else if CLOSING_KEYS.iter().any(|k| desc_upper.contains(k)) {
        // The amounts beside C/F are period totals, not a transaction.
        withdrawal = None;
        deposit = None;
        TxnType::ClosingBalance
    } else {
        match (withdrawal, deposit) {
            (Some(_), None) => TxnType::Debit,
            (None, Some(_)) => TxnType::Credit,
            (Some(w), Some(d)) => {
                if w >= d {
                    TxnType::Debit
                } else {
                    TxnType::Credit
                }
            }
            (None, None) => return None,
        }
    };

    let full_desc = if raw.cpty_text.trim().is_empty() {
        desc
    } else {
        format!("{} | {}", desc, raw.cpty_text.trim())
    };

    let counterparty = if raw.cpty_text.trim().is_empty() {
        extract_counterparty(&full_desc)
    } else {
        Some(raw.cpty_text.trim().to_string())
    };

    Some(Txn {
        transaction_date: normalise_date_to_dd_mmm(&raw.txn_date),
        value_date: normalise_date_to_dd_mmm(if raw.value_date.is_empty() {
            &raw.txn_date
        } else {
            &raw.value_date
        }),
        channel: detect_channel(&full_desc),
        description: full_desc,
        withdrawal,
        deposit,
        balance,
        txn_type,
        counterparty,
        reference: None,
        currency: raw.currency.clone(),
        account_section: raw.account_section,
        page_number: Some(raw.page_number),
    })
}
