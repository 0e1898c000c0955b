//! Tier A: table reconstruction for grid-ruled statements.

use super::account::{parse_account_info_table, AccountInfo};
use super::normalize::{
    detect_channel, extract_counterparty, normalise_date_to_dd_mmm, parse_amount,
};
use super::{Txn, TxnType};
use crate::pdf::{DocumentSnapshot, Table};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

lazy_static! {
    static ref NON_ASCII: Regex = Regex::new(r"[^\x00-\x7f]").unwrap();
    static ref CCY_SUFFIX: Regex = Regex::new(r"\s*\([A-Za-z]{3}\)\s*$").unwrap();
}

/// Map a raw column header to a canonical field name.
pub fn normalise_header(raw: &str) -> Option<&'static str> {
    let cleaned = NON_ASCII.replace_all(raw.trim(), "").to_lowercase();
    let cleaned = cleaned.replace('\n', " ").trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    if let Some(name) = header_alias(&cleaned) {
        return Some(name);
    }
    let no_ccy = CCY_SUFFIX.replace(&cleaned, "").trim().to_string();
    if let Some(name) = header_alias(&no_ccy) {
        return Some(name);
    }
    if cleaned == "#" || cleaned == "no" || cleaned == "no." {
        return Some("sequence");
    }
    None
}

fn header_alias(cleaned: &str) -> Option<&'static str> {
    Some(match cleaned {
        "date" | "txn date" | "transaction date" | "date & time" | "date and time" => {
            "transaction_date"
        }
        "value date" | "val date" => "value_date",
        "transaction details" | "details" | "description" | "particulars" => "description",
        "counterparty" => "counterparty",
        "debit" | "withdrawal" | "withdrawals" | "dr" => "debit",
        "credit" | "deposit" | "deposits" | "cr" => "credit",
        "running balance" | "balance" | "bal" | "closing balance" => "balance",
        "cheque" | "chq" => "cheque",
        "reference" | "ref" => "reference",
        _ => return None,
    })
}

pub struct TableExtraction {
    pub account_info: AccountInfo,
    pub transactions: Vec<Txn>,
    pub column_headers: Vec<Option<&'static str>>,
}

/// Try grid-table extraction across the whole document.
///
/// Returns `None` when the PDF is not table-structured (no tables on the
/// first pages, or headers with borderless data rows) so the word-position
/// tier can take over.
pub fn try_extract_tables(snapshot: &DocumentSnapshot) -> Option<TableExtraction> {
    let mut all_transactions: Vec<Txn> = Vec::new();
    let mut account_info_table: Option<&Table> = None;
    let mut column_headers: Vec<Option<&'static str>> = Vec::new();
    let mut header_only_count = 0usize;

    for (page_idx, page) in snapshot.pages.iter().enumerate() {
        if page.tables.is_empty() {
            if page_idx < 2 && all_transactions.is_empty() {
                info!("  📊 No tables detected on first pages — PDF is not table-structured");
                return None;
            }
            continue;
        }

        for table in &page.tables {
            let Some(header_row) = table.first() else {
                continue;
            };

            let mapped: Vec<Option<&'static str>> =
                header_row.iter().map(|h| normalise_header(h)).collect();

            if page_idx == 0 && account_info_table.is_none() {
                let all_cells = table
                    .iter()
                    .flat_map(|row| row.iter())
                    .map(|c| c.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(" ");
                if all_cells.contains("opening balance") || all_cells.contains("account number") {
                    account_info_table = Some(table);
                    continue;
                }
            }

            let has = |name: &str| mapped.iter().any(|m| *m == Some(name));
            if !has("transaction_date") || !has("balance") || (!has("debit") && !has("credit")) {
                continue;
            }

            if table.len() < 2 {
                // Header with no data rows: borderless data, the word tier
                // handles it better.
                header_only_count += 1;
                if header_only_count >= 2 {
                    info!(
                        "  📊 Tables have headers but no data rows (borderless data) \
                         — deferring to word-position extraction"
                    );
                    return None;
                }
                continue;
            }

            column_headers = mapped.clone();
            debug!(
                "  Page {}: found transaction table with {} rows",
                page_idx + 1,
                table.len() - 1
            );

            for row in table.iter().skip(1) {
                if let Some(txn) = parse_data_row(row, &mapped, page_idx as u32 + 1) {
                    all_transactions.push(txn);
                }
            }
        }
    }

    if all_transactions.is_empty() {
        return None;
    }

    let account_info = match account_info_table {
        Some(table) => parse_account_info_table(table),
        None => AccountInfo::default(),
    };

    info!(
        "  📊 Table extraction successful: {} transactions from {} pages \
         (zero model calls for transactions!)",
        all_transactions.len(),
        snapshot.page_count
    );

    Some(TableExtraction {
        account_info,
        transactions: all_transactions,
        column_headers,
    })
}

fn cell<'a>(row: &'a [String], mapped: &[Option<&'static str>], name: &str) -> &'a str {
    mapped
        .iter()
        .position(|m| *m == Some(name))
        .and_then(|i| row.get(i))
        .map(String::as_str)
        .unwrap_or("")
}

fn parse_data_row(row: &[String], mapped: &[Option<&'static str>], page: u32) -> Option<Txn> {
    let date_val = cell(row, mapped, "transaction_date").trim().to_string();
    // Continuation and summary rows have no leading date digit.
    if date_val.is_empty() || !date_val.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let debit_amt = parse_amount(cell(row, mapped, "debit"));
    let credit_amt = parse_amount(cell(row, mapped, "credit"));
    let balance = parse_amount(cell(row, mapped, "balance"));
    let raw_description = cell(row, mapped, "description").to_string();
    let description = raw_description.replace('\n', " ").trim().to_string();
    let desc_upper = description.to_uppercase();

    let txn_type = match (debit_amt, credit_amt) {
        (Some(_), None) => TxnType::Debit,
        (None, Some(_)) => TxnType::Credit,
        (Some(d), Some(c)) => {
            if d >= c {
                TxnType::Debit
            } else {
                TxnType::Credit
            }
        }
        (None, None) => {
            if desc_upper.contains("BALANCE B/F")
                || desc_upper.contains("OPENING")
                || desc_upper.contains("BALANCE BROUGHT")
            {
                TxnType::OpeningBalance
            } else if desc_upper.contains("BALANCE C/F")
                || desc_upper.contains("CLOSING")
                || desc_upper.contains("BALANCE CARRIED")
            {
                TxnType::ClosingBalance
            } else {
                return None;
            }
        }
    };

    let value_raw = cell(row, mapped, "value_date").trim().to_string();
    let value_date = if value_raw.is_empty() { date_val.clone() } else { value_raw };
    let reference = {
        let r = cell(row, mapped, "reference").trim().to_string();
        (!r.is_empty()).then_some(r)
    };

    Some(Txn {
        transaction_date: normalise_date_to_dd_mmm(&date_val),
        value_date: normalise_date_to_dd_mmm(&value_date),
        counterparty: extract_counterparty(&raw_description),
        channel: detect_channel(&description),
        description,
        withdrawal: debit_amt,
        deposit: credit_amt,
        balance,
        txn_type,
        reference,
        currency: None,
        account_section: 0,
        page_number: Some(page),
    })
}

/// Inject synthetic opening/closing records when the account-info table
/// carries balances that no transaction row did.
pub fn inject_boundary_balances(transactions: &mut Vec<Txn>, info: &AccountInfo) {
    if let Some(opening) = info.opening_balance {
        let has_opening = transactions.iter().any(|t| t.txn_type == TxnType::OpeningBalance);
        if !has_opening {
            let date = normalise_date_to_dd_mmm(info.opening_date.as_deref().unwrap_or(""));
            transactions.insert(
                0,
                Txn {
                    transaction_date: date.clone(),
                    value_date: date,
                    description: "OPENING BALANCE".to_string(),
                    balance: Some(opening),
                    txn_type: TxnType::OpeningBalance,
                    ..Txn::default()
                },
            );
        }
    }
    if let Some(closing) = info.closing_balance {
        let has_closing = transactions.iter().any(|t| t.txn_type == TxnType::ClosingBalance);
        if !has_closing {
            let date = normalise_date_to_dd_mmm(info.closing_date.as_deref().unwrap_or(""));
            transactions.push(Txn {
                transaction_date: date.clone(),
                value_date: date,
                description: "CLOSING BALANCE".to_string(),
                balance: Some(closing),
                txn_type: TxnType::ClosingBalance,
                ..Txn::default()
            });
        }
    }
    if transactions.is_empty() {
        // Nothing to anchor the balances to.
        warn!("  📊 Account-info balances present but no transactions extracted");
    }
}
