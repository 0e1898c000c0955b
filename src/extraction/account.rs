//! Account-info extraction: table parse → regex sweep → model fill.

use crate::llm::{parse_model_json, ModelClient};
use crate::pdf::{PageSnapshot, Table};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::banks::BANK_IDENTIFIERS;
use super::normalize::parse_amount;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub account_holder: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub statement_period: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(skip_deserializing)]
    pub opening_balance: Option<f64>,
    #[serde(skip_deserializing)]
    pub opening_date: Option<String>,
    #[serde(skip_deserializing)]
    pub closing_balance: Option<f64>,
    #[serde(skip_deserializing)]
    pub closing_date: Option<String>,
    #[serde(skip_deserializing)]
    pub available_balance: Option<f64>,
}

impl AccountInfo {
    /// Overlay `other`'s structured fields on top of self. Table- and
    /// word-derived values are more reliable than the model's.
    pub fn override_with(&mut self, other: &AccountInfo) {
        if other.account_number.is_some() {
            self.account_number = other.account_number.clone();
        }
        if other.account_holder.is_some() {
            self.account_holder = other.account_holder.clone();
        }
        if other.currency.is_some() {
            self.currency = other.currency.clone();
        }
        if other.account_type.is_some() {
            self.account_type = other.account_type.clone();
        }
        if other.statement_period.is_some() {
            self.statement_period = other.statement_period.clone();
        }
        if other.opening_balance.is_some() {
            self.opening_balance = other.opening_balance;
            self.opening_date = other.opening_date.clone();
        }
        if other.closing_balance.is_some() {
            self.closing_balance = other.closing_balance;
            self.closing_date = other.closing_date.clone();
        }
        if other.available_balance.is_some() {
            self.available_balance = other.available_balance;
        }
    }
}

lazy_static! {
    static ref ACCT_NO_VALUE: Regex = Regex::new(r"^([\d\-]+)\s*(?:-\s*(\w+))?").unwrap();
    static ref NAME_SUFFIX: Regex = Regex::new(r"\s*-\s*\d[\d\-]+.*$").unwrap();
    static ref BALANCE_VALUE: Regex = Regex::new(r"^([\d,]+\.\d{2})\s*(.*)").unwrap();
    static ref ACCT_NO_TEXT: Regex =
        Regex::new(r"(?i)Account\s*(?:No\.?|Number)\s*:?\s*(\d[\d\s\-]+\d)").unwrap();
    static ref ACCT_NO_AC: Regex = Regex::new(r"(?i)A/C\s*No\.?\s*[:\s]*(\d[\d\-]+\d)").unwrap();
    static ref PERIOD_TEXT: Regex = Regex::new(
        r"(\d{1,2}[\s\-][A-Za-z]{3}[\s\-]\d{4})\s+(?:TO|to|-)\s+(\d{1,2}[\s\-][A-Za-z]{3}[\s\-]\d{4})"
    )
    .unwrap();
    static ref PERIOD_LABEL: Regex = Regex::new(r"(?i)Statement\s+Period\s*[:\s]*(.+)").unwrap();
    static ref CURRENCY_TEXT: Regex =
        Regex::new(r"\b(SGD|USD|MYR|IDR|EUR|GBP|AUD|HKD)\b").unwrap();
    static ref HOLDER_LINE: Regex = Regex::new(r"^[A-Z\s.&,\-()]+$").unwrap();
}

const ACCOUNT_INFO_PROMPT: &str = "You are an expert bank statement parser for Singapore banks.\n\
You must handle statements from any Singapore bank: OCBC, DBS, POSB, UOB, Standard Chartered,\n\
HSBC, Citibank, Maybank, CIMB, GXS Bank, Trust Bank, MariBank, Revolut, Wise, Aspire, Airwallex.\n\n\
Extract the following from this bank statement's first page(s).\n\n\
Return ONLY valid JSON (no markdown fences):\n\
{\n\
  \"account_holder\": \"company or person name\",\n\
  \"bank\": \"full bank name\",\n\
  \"account_number\": \"account number\",\n\
  \"currency\": \"SGD or other\",\n\
  \"statement_period\": \"DD MMM YYYY to DD MMM YYYY\",\n\
  \"account_type\": \"type of account (e.g. Business, Savings, Current)\"\n\
}\n\n\
If a field is not found, use null.\n\n\
Bank statement text:\n";

/// Parse the page-1 account-info table (DBS-style label/value rows).
pub fn parse_account_info_table(table: &Table) -> AccountInfo {
    let mut info = AccountInfo::default();

    for row in table {
        let cells: Vec<String> = row.iter().map(|c| c.trim().to_string()).collect();
        for (i, cell) in cells.iter().enumerate() {
            let cell_lower = cell.to_lowercase();
            let next_cell = cells.get(i + 1).map(String::as_str).unwrap_or("");
            if next_cell.is_empty() {
                continue;
            }

            if cell_lower.contains("account number") {
                if let Some(c) = ACCT_NO_VALUE.captures(next_cell) {
                    info.account_number = Some(c[1].trim().to_string());
                    if let Some(ccy) = c.get(2) {
                        info.currency = Some(ccy.as_str().trim().to_string());
                    }
                }
            } else if cell_lower.contains("account name") {
                let name = NAME_SUFFIX.replace(next_cell, "").trim().to_string();
                if !name.is_empty() {
                    info.account_holder = Some(name);
                }
            } else if cell_lower.contains("product type") {
                info.account_type = Some(next_cell.to_string());
            } else if cell_lower.contains("opening balance") {
                if let Some(c) = BALANCE_VALUE.captures(next_cell) {
                    info.opening_balance = parse_amount(&c[1]);
                    let date = c[2].trim();
                    if !date.is_empty() {
                        info.opening_date = Some(date.to_string());
                    }
                }
            } else if cell_lower.contains("ledger balance") {
                if let Some(c) = BALANCE_VALUE.captures(next_cell) {
                    info.closing_balance = parse_amount(&c[1]);
                    let date = c[2].trim();
                    if !date.is_empty() {
                        info.closing_date = Some(date.to_string());
                    }
                }
            } else if cell_lower.contains("available balance") {
                if let Some(c) = BALANCE_VALUE.captures(next_cell) {
                    info.available_balance = parse_amount(&c[1]);
                }
            }
        }
    }

    if let (Some(open), Some(close)) = (&info.opening_date, &info.closing_date) {
        info.statement_period = Some(format!("{open} to {close}"));
    }

    info
}

/// Generic regex sweep over the first three pages.
pub fn extract_account_info_from_text(pages: &[PageSnapshot]) -> AccountInfo {
    let mut info = AccountInfo::default();

    for page in pages.iter().take(3) {
        let lines: Vec<&str> = page.text.lines().collect();

        for line in &lines {
            let s = line.trim();

            if info.account_number.is_none() {
                if let Some(c) = ACCT_NO_TEXT.captures(s) {
                    let digits: String =
                        c[1].chars().filter(|ch| !ch.is_whitespace() && *ch != '-').collect();
                    info.account_number = Some(digits);
                }
            }
            if info.statement_period.is_none() {
                if let Some(c) = PERIOD_TEXT.captures(s) {
                    info.statement_period = Some(format!("{} to {}", &c[1], &c[2]));
                }
            }
            if info.currency.is_none() {
                if let Some(c) = CURRENCY_TEXT.captures(s) {
                    info.currency = Some(c[1].to_string());
                }
            }
        }

        // Account holder: first prominent all-caps line in the address block.
        if info.account_holder.is_none() {
            let mut found_marker = false;
            for line in &lines {
                let s = line.trim();
                if s.to_uppercase().contains("STATEMENT OF ACCOUNT") || s.contains("Singapore") {
                    found_marker = true;
                    continue;
                }
                if found_marker && s.len() > 5 && s == s.to_uppercase() {
                    const SKIP: [&str; 9] = [
                        "ACCOUNT", "OCBC", "DBS", "UOB", "STATEMENT", "TRANSACTION", "BALANCE",
                        "BUSINESS", "PAGE",
                    ];
                    if SKIP.iter().any(|k| s.contains(k)) || s.contains("DATE") {
                        continue;
                    }
                    if HOLDER_LINE.is_match(s) {
                        info.account_holder = Some(s.to_string());
                        break;
                    }
                }
            }
        }
    }

    info
}

/// Regex fallback used when the model call fails.
pub fn fallback_account_info(text: &str) -> AccountInfo {
    let mut info = AccountInfo {
        currency: Some("SGD".to_string()),
        ..AccountInfo::default()
    };

    let text_lower = text.to_lowercase();
    'outer: for (bank, identifiers) in BANK_IDENTIFIERS {
        for ident in *identifiers {
            if text_lower.contains(&ident.to_lowercase()) {
                info.bank = Some(bank.to_string());
                break 'outer;
            }
        }
    }

    if let Some(c) = ACCT_NO_TEXT.captures(text).or_else(|| ACCT_NO_AC.captures(text)) {
        info.account_number = Some(c[1].trim().to_string());
    }

    if let Some(c) = PERIOD_TEXT.captures(text) {
        info.statement_period = Some(format!("{} to {}", &c[1], &c[2]));
    } else if let Some(c) = PERIOD_LABEL.captures(text) {
        info.statement_period = Some(c[1].trim().to_string());
    }

    info
}

/// Model-assisted account info with regex fallback.
pub async fn extract_account_info(model: &ModelClient, first_pages_text: &str) -> AccountInfo {
    let prompt_text: String = first_pages_text.chars().take(4000).collect();
    let messages = [
        (
            "system",
            "You are an expert bank statement parser for Singapore banks. Return only valid JSON."
                .to_string(),
        ),
        ("user", format!("{ACCOUNT_INFO_PROMPT}{prompt_text}")),
    ];

    match model.chat_completion(&messages, 0.0, 500, false).await {
        Ok(response) => match parse_model_json(&response)
            .and_then(|v| serde_json::from_value::<AccountInfo>(v).map_err(Into::into))
        {
            Ok(info) => info,
            Err(e) => {
                error!("Account info extraction failed: {e:#}");
                fallback_account_info(first_pages_text)
            }
        },
        Err(e) => {
            error!("Account info extraction failed: {e:#}");
            fallback_account_info(first_pages_text)
        }
    }
}
