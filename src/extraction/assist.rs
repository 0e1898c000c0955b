//! Tier C: model-assisted parsing for statements the structural tiers
//! cannot read (unstructured text or scanned pages).

use super::normalize::{detect_channel, extract_counterparty, normalise_date_to_dd_mmm};
use super::{Txn, TxnType};
use crate::llm::{parse_model_json, ModelClient};
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Pages dominated by these patterns carry no transactions.
pub const SKIP_PATTERNS: &[&str] = &[
    // OCBC
    "TRANSACTION CODE DESCRIPTION",
    "CHECK YOUR STATEMENT",
    "UPDATING YOUR PERSONAL PARTICULARS",
    // DBS
    "IMPORTANT NOTES",
    "Important Information",
    "Transaction codes",
    // UOB
    "TRANSACTION CODES USED",
    "Deposit Insurance Scheme Singapore",
    // Standard Chartered
    "Terms and Conditions",
    // Generic footer-only pages
    "This page is intentionally left blank",
];

lazy_static! {
    static ref MONETARY_RE: Regex = Regex::new(r"\d{1,3}(?:,\d{3})*\.\d{2}").unwrap();
    static ref DATE_WORDS_RE: Regex = Regex::new(
        r"(?i)\d{1,2}\s+(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)"
    )
    .unwrap();
    static ref DATE_DASH_RE: Regex = Regex::new(
        r"(?i)\d{1,2}[\-/](Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[\-/]?\d{0,4}"
    )
    .unwrap();
    static ref DATE_SLASH_RE: Regex = Regex::new(r"\d{1,2}/\d{1,2}(/\d{2,4})?").unwrap();
    static ref DATE_ISO_RE: Regex = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
    static ref BALANCE_HEADER_RE: Regex =
        Regex::new(r"(?i)balance|bal\.?|running\s*balance").unwrap();
    static ref DATE_FULL_RE: Regex = Regex::new(r"\d{1,2}[\-/][A-Za-z]{3}[\-/]\d{4}").unwrap();
}

const TRANSACTION_EXTRACTION_PROMPT: &str = r#"You are an expert bank statement transaction parser for Singapore banks.
Parse ALL transactions from the following bank statement page(s).

CRITICAL RULES:
- Each transaction has: transaction_date, value_date, description, withdrawal (if debit), deposit (if credit), balance
- Normalise ALL dates to "DD MMM" format (e.g. "30 NOV", "01 DEC"):
  - "01 DEC" → "01 DEC" (already correct — OCBC/UOB format)
  - "01-Sep-2025" → "01 SEP" (DBS format)
  - "01/12/2025" → "01 DEC"
- Amounts: return as plain numbers (no commas). E.g. 1943.69 not "1,943.69"
- Multi-line descriptions: concatenate into ONE description string separated by spaces.
  Many banks (especially DBS) have multi-line transaction details — combine ALL lines for one transaction.
- For DBS statements: the columns are "Date | Value Date | Transaction Details | Debit | Credit | Running Balance".
  Each transaction starts with a date row, followed by description continuation lines.
- "BALANCE B/F" or "BALANCE BROUGHT FORWARD" → transaction_type = "opening_balance"
- "BALANCE C/F" or "BALANCE CARRIED FORWARD" → transaction_type = "closing_balance"
- Withdrawals / Debits → transaction_type = "debit"
- Deposits / Credits → transaction_type = "credit"
- If the statement has a summary section like "Total Debit Count : 21 Total Debit Amount : 32,785.05", do NOT create transactions from the summary — only from individual transaction lines.
- channel: FAST, GIRO, ATM, DEBIT PURCHASE, PAYMENT/TRANSFER, CHEQUE, IBG, NETS, PayNow, INTERBANK GIRO, etc.
- counterparty: who the transaction is with (extracted from description). Look for company/person names.
- Do NOT skip any transactions. Extract EVERY single one.
- Do NOT invent transactions that aren't in the text.
- If a page has "BALANCE B/F" that was already in the previous batch, still include it (dedup happens later).

Return ONLY a valid JSON array (no markdown fences):
[
  {
    "transaction_date": "30 NOV",
    "value_date": "01 DEC",
    "description": "FAST PAYMENT OTHR GELMAX SG3P251128972769",
    "withdrawal": 1943.69,
    "deposit": null,
    "balance": 127543.16,
    "transaction_type": "debit",
    "channel": "FAST",
    "counterparty": "GELMAX",
    "reference": "SG3P251128972769"
  }
]

Bank statement page text:
"#;

const OCR_PROMPT: &str = "You are an OCR engine. Extract ALL text from this bank statement page \
exactly as it appears, preserving the layout as much as possible.\n\n\
Rules:\n\
- Reproduce every line of text you see, in reading order (top to bottom, left to right)\n\
- Preserve column alignment using spaces or tabs where possible\n\
- Include all numbers, dates, amounts, and descriptions exactly as printed\n\
- For table rows, separate columns with ' | ' (pipe with spaces)\n\
- Include headers, footers, and any bank logos/text you can read\n\
- If text is blurry or unclear, provide your best reading with [?] for uncertain parts\n\
- Do NOT add any commentary — output ONLY the extracted text";

/// Should this page be skipped entirely? (legend, T&C, blank)
pub fn is_skip_page(text: &str) -> bool {
    let stripped = text.trim();
    if stripped.len() < 80 {
        return true;
    }

    // Money + dates means transaction-like data regardless of boilerplate.
    let has_monetary = MONETARY_RE.is_match(stripped);
    let has_dates = DATE_WORDS_RE.is_match(stripped) || DATE_FULL_RE.is_match(stripped);
    if has_monetary && has_dates {
        return false;
    }

    let lower = stripped.to_lowercase();
    for pattern in SKIP_PATTERNS {
        if let Some(idx) = lower.find(&pattern.to_lowercase()) {
            // Skip only when the pattern dominates the page.
            if stripped.len() - idx > stripped.len() * 2 / 5 {
                return true;
            }
        }
    }
    false
}

/// Does this page contain transaction data?
pub fn has_transactions(text: &str) -> bool {
    let has_balance_header = BALANCE_HEADER_RE.is_match(text);
    let has_date_pattern = DATE_WORDS_RE.is_match(text)
        || DATE_DASH_RE.is_match(text)
        || DATE_SLASH_RE.is_match(text)
        || DATE_ISO_RE.is_match(text);
    let has_amounts = MONETARY_RE.is_match(text);
    has_balance_header && has_date_pattern && has_amounts
}

#[derive(Debug, Clone)]
pub struct PageBatch {
    pub text: String,
    pub page_numbers: Vec<u32>,
}

/// Build batches of cleaned transaction pages.
///
/// Adaptive batch sizing: text-dense pages (DBS-style verbose multi-line
/// descriptions) get smaller batches so the model misses fewer rows.
pub fn batch_pages(pages: &[(u32, String)], batch_size: usize, overlap: usize) -> Vec<PageBatch> {
    let txn_pages: Vec<&(u32, String)> = pages
        .iter()
        .filter(|(number, text)| {
            if is_skip_page(text) {
                debug!("  Skipping page {number} (skip pattern)");
                return false;
            }
            if !has_transactions(text) {
                debug!("  Skipping page {number} (no transactions detected)");
                return false;
            }
            true
        })
        .collect();

    if txn_pages.is_empty() {
        warn!("  ⚠️ No transaction pages found after filtering!");
        return Vec::new();
    }

    let avg_chars =
        txn_pages.iter().map(|(_, t)| t.len()).sum::<usize>() as f64 / txn_pages.len() as f64;
    let mut batch_size = batch_size;
    if avg_chars > 1500.0 {
        batch_size = batch_size.min(2);
        info!("  📐 Dense text ({avg_chars:.0} chars/page avg) → batch_size={batch_size}");
    } else if avg_chars > 1000.0 {
        batch_size = batch_size.min(3);
    }

    info!("  📄 {} transaction pages found, batch_size={batch_size}", txn_pages.len());

    let mut batches = Vec::new();
    let step = batch_size.saturating_sub(overlap).max(1);
    let mut i = 0;
    while i < txn_pages.len() {
        let end = (i + batch_size).min(txn_pages.len());
        let items = &txn_pages[i..end];
        let text = items
            .iter()
            .map(|(number, text)| format!("--- Page {number} ---\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        batches.push(PageBatch {
            text,
            page_numbers: items.iter().map(|(number, _)| *number).collect(),
        });
        i += step;
    }
    batches
}

#[derive(Debug, Deserialize)]
struct ModelTxn {
    #[serde(default)]
    transaction_date: Option<String>,
    #[serde(default)]
    value_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    withdrawal: Option<f64>,
    #[serde(default)]
    deposit: Option<f64>,
    #[serde(default)]
    balance: Option<f64>,
    #[serde(default)]
    transaction_type: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    counterparty: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

fn model_txn_to_canonical(m: ModelTxn, page: Option<u32>) -> Option<Txn> {
    let description = m.description.unwrap_or_default();
    let txn_type = match m.transaction_type.as_deref() {
        Some("debit") => TxnType::Debit,
        Some("credit") => TxnType::Credit,
        Some("opening_balance") => TxnType::OpeningBalance,
        Some("closing_balance") => TxnType::ClosingBalance,
        _ => match (m.withdrawal, m.deposit) {
            (Some(_), None) => TxnType::Debit,
            (None, Some(_)) => TxnType::Credit,
            (Some(w), Some(d)) if w >= d => TxnType::Debit,
            (Some(_), Some(_)) => TxnType::Credit,
            (None, None) => return None,
        },
    };

    let date = m.transaction_date.unwrap_or_default();
    let value = m.value_date.unwrap_or_else(|| date.clone());
    let channel = m
        .channel
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| detect_channel(&description));
    let counterparty = m
        .counterparty
        .filter(|c| !c.trim().is_empty())
        .or_else(|| extract_counterparty(&description));

    Some(Txn {
        transaction_date: normalise_date_to_dd_mmm(&date),
        value_date: normalise_date_to_dd_mmm(&value),
        description,
        withdrawal: m.withdrawal,
        deposit: m.deposit,
        balance: m.balance,
        txn_type,
        channel,
        counterparty,
        reference: m.reference,
        currency: None,
        account_section: 0,
        page_number: page,
    })
}

/// One model call for one batch of pages.
pub async fn extract_transactions_batch(model: &ModelClient, batch: &PageBatch) -> Result<Vec<Txn>> {
    let messages = [
        (
            "system",
            "You are an expert bank statement transaction parser for Singapore banks. \
             Return only valid JSON arrays. Do not wrap in markdown."
                .to_string(),
        ),
        ("user", format!("{TRANSACTION_EXTRACTION_PROMPT}{}", batch.text)),
    ];
    let response = model.chat_completion(&messages, 0.0, 16000, false).await?;
    let value = parse_model_json(&response)?;
    let items: Vec<ModelTxn> =
        serde_json::from_value(value).map_err(|e| anyhow!("expected transaction array: {e}"))?;

    let first_page = batch.page_numbers.first().copied();
    Ok(items
        .into_iter()
        .filter_map(|m| model_txn_to_canonical(m, first_page))
        .collect())
}

/// Run all batches; a failed batch is skipped, the rest continue.
pub async fn extract_transactions_via_model(
    model: &ModelClient,
    batches: &[PageBatch],
) -> Vec<Txn> {
    let mut all = Vec::new();
    for (i, batch) in batches.iter().enumerate() {
        info!("    Batch {}/{} (pages {:?})...", i + 1, batches.len(), batch.page_numbers);
        match extract_transactions_batch(model, batch).await {
            Ok(txns) => {
                info!("    → Extracted {} transactions", txns.len());
                all.extend(txns);
            }
            Err(e) => error!("    ❌ Batch {} failed: {e:#}", i + 1),
        }
    }
    all
}

/// OCR every page of a scanned statement through the vision model.
pub async fn ocr_pages(model: &ModelClient, page_images_b64: &[String]) -> Vec<(u32, String)> {
    let mut pages = Vec::new();
    for (i, image) in page_images_b64.iter().enumerate() {
        info!("  🔍 OCR page {}/{}...", i + 1, page_images_b64.len());
        match model.chat_completion_with_image(OCR_PROMPT, image, 0.2, 4096).await {
            Ok(text) => pages.push((i as u32 + 1, text)),
            Err(e) => {
                error!("  ❌ OCR failed on page {}: {e:#}", i + 1);
                pages.push((i as u32 + 1, String::new()));
            }
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_page_rules() {
        assert!(is_skip_page("short"));

        let legend = format!(
            "header line\nTRANSACTION CODE DESCRIPTION\n{}",
            "CODE MEANING\n".repeat(30)
        );
        assert!(is_skip_page(&legend));

        // Money + dates rescue a page even with boilerplate present.
        let data_page = format!(
            "01 DEC FAST PAYMENT 1,943.69 127,543.16\n{}",
            "Deposit Insurance Scheme Singapore text ".repeat(10)
        );
        assert!(!is_skip_page(&data_page));
    }

    #[test]
    fn transaction_page_detection() {
        let page = "Date Description Balance\n01 DEC FAST PAYMENT 1,943.69 127,543.16";
        assert!(has_transactions(page));
        assert!(!has_transactions("Terms and conditions apply."));
        // Amounts without a balance header are not enough.
        assert!(!has_transactions("pay 1,234.56 on 01 DEC"));
    }

    #[test]
    fn batches_respect_density() {
        let dense: Vec<(u32, String)> = (1..=4)
            .map(|n| {
                (
                    n,
                    format!(
                        "Balance b/f 01 DEC {}\n{}",
                        "1,000.00",
                        "x".repeat(2000)
                    ),
                )
            })
            .collect();
        let batches = batch_pages(&dense, 3, 0);
        // Dense pages force batch_size=2 → 2 batches of 2.
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].page_numbers, vec![1, 2]);

        let sparse: Vec<(u32, String)> = (1..=4)
            .map(|n| (
                n,
                "Balance 01 DEC 1,000.00 deposit of salary into the account with further \
                 descriptive detail lines"
                    .to_string(),
            ))
            .collect();
        let batches = batch_pages(&sparse, 3, 0);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].page_numbers, vec![1, 2, 3]);
    }

    #[test]
    fn overlapping_batches_advance_by_step() {
        let pages: Vec<(u32, String)> = (1..=5)
            .map(|n| (
                n,
                "Balance 01 DEC 1,000.00 deposit of salary into the account with further \
                 descriptive detail lines"
                    .to_string(),
            ))
            .collect();
        let batches = batch_pages(&pages, 3, 1);
        assert_eq!(batches[0].page_numbers, vec![1, 2, 3]);
        assert_eq!(batches[1].page_numbers, vec![3, 4, 5]);
    }

    #[test]
    fn model_txn_conversion_defaults() {
        let m = ModelTxn {
            transaction_date: Some("01-Sep-2025".into()),
            value_date: None,
            description: Some("FAST PAYMENT OTHR GELMAX".into()),
            withdrawal: Some(394.71),
            deposit: None,
            balance: Some(84255.32),
            transaction_type: None,
            channel: None,
            counterparty: None,
            reference: None,
        };
        let t = model_txn_to_canonical(m, Some(2)).unwrap();
        assert_eq!(t.transaction_date, "01 SEP");
        assert_eq!(t.value_date, "01 SEP");
        assert_eq!(t.txn_type, TxnType::Debit);
        assert_eq!(t.channel, "FAST");
        assert_eq!(t.page_number, Some(2));
    }

    #[test]
    fn rows_with_no_amounts_and_no_type_are_dropped() {
        let m = ModelTxn {
            transaction_date: Some("01 DEC".into()),
            value_date: None,
            description: Some("noise".into()),
            withdrawal: None,
            deposit: None,
            balance: None,
            transaction_type: None,
            channel: None,
            counterparty: None,
            reference: None,
        };
        assert!(model_txn_to_canonical(m, None).is_none());
    }
}
