//! Bank identification and per-bank page noise.

use crate::llm::ModelClient;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

/// Canonical bank names and the text identifiers that betray them.
pub const BANK_IDENTIFIERS: &[(&str, &[&str])] = &[
    ("OCBC", &["OCBC Bank", "Oversea-Chinese Banking", "OCBC"]),
    ("DBS", &["DBS Bank", "Development Bank of Singapore", "DBS/POSB", "DBS"]),
    ("POSB", &["POSB"]),
    ("UOB", &["United Overseas Bank", "UOB"]),
    ("Standard Chartered", &["Standard Chartered"]),
    ("HSBC", &["HSBC"]),
    ("Citibank", &["Citibank"]),
    ("Maybank", &["Maybank"]),
    ("CIMB", &["CIMB"]),
    ("Bank of China", &["Bank of China"]),
    ("ICBC", &["ICBC"]),
    ("GXS Bank", &["GXS Bank", "GXS"]),
    ("Trust Bank", &["Trust Bank", "Trust"]),
    ("MariBank", &["MariBank"]),
    ("Revolut", &["Revolut"]),
    ("Wise", &["Wise", "TransferWise"]),
    ("Aspire", &["Aspire"]),
    ("Airwallex", &["Airwallex"]),
];

/// Product names that uniquely identify a bank (for PDFs whose text never
/// names the bank).
pub const BANK_PRODUCT_IDENTIFIERS: &[(&str, &[&str])] = &[
    (
        "DBS",
        &[
            "AUTOSAVE ACCOUNT",
            "MULTIPLIER ACCOUNT",
            "MY ACCOUNT",
            "DBS TREASURES",
            "POSB SAYE",
            "POSB EVERYDAY",
        ],
    ),
    ("OCBC", &["360 ACCOUNT", "FRANK ACCOUNT", "OCBC VOYAGE"]),
    ("UOB", &["UNIPLUS", "ONE ACCOUNT", "STASH ACCOUNT"]),
    ("Standard Chartered", &["BONUSSAVER", "JUMPSTART"]),
    ("HSBC", &["EVERYDAY GLOBAL ACCOUNT", "CURRENT ACCOUNT"]),
];

lazy_static! {
    static ref NOISE_OCBC: Vec<Regex> = compile(&[
        r"Deposit Insurance Scheme.*",
        r"Please turn over.*",
        r"RNB\w+\\?\d+",
    ]);
    static ref NOISE_DBS: Vec<Regex> = compile(&[
        r"Page \d+\s*/\s*\d+",
        r"Page \d+ of \d+",
        r"DBS Bank Ltd.*",
        r"Printed By\s*:.*",
        r"Printed On\s*:.*",
        r"Deposit Insurance Scheme.*?\.",
        r"Transactions performed on a non-working day.*",
        r"If date requested is a non business day.*",
    ]);
    static ref NOISE_UOB: Vec<Regex> =
        compile(&[r"Page \d+ of \d+", r"United Overseas Bank Limited.*"]);
    static ref NOISE_SCB: Vec<Regex> = compile(&[r"Page \d+ of \d+"]);
    static ref NOISE_HSBC: Vec<Regex> = compile(&[
        r"Page\s*\d+\s*of\s*\d+",
        r"Deposit Insurance Scheme.*",
        r"Issued by The Hongkong.*",
        r"ENDOFSTATEMENT",
    ]);
    static ref NOISE_DEFAULT: Vec<Regex> = compile(&[r"Page \d+\s*/\s*\d+", r"Page \d+ of \d+"]);
    static ref DBS_DATE_STYLE: Regex = Regex::new(r"\d{2}-[A-Z][a-z]{2}-\d{4}").unwrap();
    static ref DBS_ACCOUNT_DETAILS: Regex =
        Regex::new(r"(?is)Account Details.*Account Number").unwrap();
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

fn noise_for(bank: &str) -> &'static [Regex] {
    match bank {
        "OCBC" => &NOISE_OCBC,
        "DBS" => &NOISE_DBS,
        "UOB" => &NOISE_UOB,
        "Standard Chartered" => &NOISE_SCB,
        "HSBC" => &NOISE_HSBC,
        _ => &[],
    }
}

/// Strip repeated bank-specific headers/footers plus generic page markers.
pub fn clean_page_text(text: &str, bank: &str) -> String {
    let mut cleaned = text.to_string();
    for re in noise_for(bank).iter().chain(NOISE_DEFAULT.iter()) {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned.trim().to_string()
}

/// Text-based bank detection over the first pages' text.
///
/// Product names first (no false positives), then explicit identifiers with
/// word-boundary matching for short names, then a format heuristic.
pub fn detect_bank_from_text(sample: &str) -> String {
    let sample_lower = sample.to_lowercase();

    for (bank, products) in BANK_PRODUCT_IDENTIFIERS {
        for product in *products {
            if sample_lower.contains(&product.to_lowercase()) {
                info!("  🏦 Text fallback: product name '{}' → {}", product, bank);
                return bank.to_string();
            }
        }
    }

    for (bank, identifiers) in BANK_IDENTIFIERS {
        for ident in *identifiers {
            if ident.len() <= 4 {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(ident))).unwrap();
                if re.is_match(sample) {
                    return bank.to_string();
                }
            } else if sample_lower.contains(&ident.to_lowercase()) {
                return bank.to_string();
            }
        }
    }

    if DBS_ACCOUNT_DETAILS.is_match(sample) && DBS_DATE_STYLE.is_match(sample) {
        info!("  🏦 Text fallback: DBS-style format patterns");
        return "DBS".to_string();
    }

    "unknown".to_string()
}

/// Vision-based bank detection from the page-1 header crop.
///
/// The model must answer with one of the canonical names; a fuzzy
/// contains-match is accepted because many models decorate the answer.
pub async fn detect_bank_from_logo(model: &ModelClient, header_png_b64: &str) -> Option<String> {
    let known: Vec<&str> = BANK_IDENTIFIERS.iter().map(|(name, _)| *name).collect();
    let prompt = format!(
        "Look at this bank statement header image and identify the Singapore bank \
         from its logo or branding.\n\
         Return ONLY the bank name — one of: {}.\n\
         If you cannot identify it, return: unknown",
        known.join(", ")
    );

    match model
        .chat_completion_with_image(&prompt, header_png_b64, 0.0, 30)
        .await
    {
        Ok(answer) => {
            let bank = answer.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            for name in &known {
                if name.eq_ignore_ascii_case(&bank) {
                    return Some(name.to_string());
                }
            }
            for name in &known {
                if bank.to_lowercase().contains(&name.to_lowercase()) {
                    return Some(name.to_string());
                }
            }
            warn!("  🏦 Vision returned unrecognised bank: '{}'", bank);
            None
        }
        Err(e) => {
            warn!("  🏦 Vision bank detection failed: {e:#}");
            None
        }
    }
}

/// Combined detection: vision logo first, then text fallback.
pub async fn detect_bank(
    model: &ModelClient,
    header_png_b64: Option<&str>,
    first_pages_text: &str,
) -> String {
    if let Some(header) = header_png_b64 {
        if let Some(bank) = detect_bank_from_logo(model, header).await {
            info!("  🏦 Bank detected via logo (vision): {bank}");
            return bank;
        }
    }
    let bank = detect_bank_from_text(first_pages_text);
    if bank != "unknown" {
        info!("  🏦 Bank detected via text: {bank}");
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_names_win_over_identifiers() {
        let text = "STATEMENT OF ACCOUNT\nMULTIPLIER ACCOUNT\nsomething";
        assert_eq!(detect_bank_from_text(text), "DBS");
    }

    #[test]
    fn short_identifiers_need_word_boundaries() {
        // "SCUOBA" must not match UOB.
        assert_eq!(detect_bank_from_text("SCUOBA DIVING PTE LTD"), "unknown");
        assert_eq!(detect_bank_from_text("UOB ONE STATEMENT"), "UOB");
    }

    #[test]
    fn long_identifiers_match_case_insensitively() {
        assert_eq!(detect_bank_from_text("oversea-chinese banking corporation"), "OCBC");
        assert_eq!(detect_bank_from_text("Standard Chartered Bank (Singapore)"), "Standard Chartered");
    }

    #[test]
    fn dbs_format_heuristic() {
        let text = "Account Details\nsome rows\nAccount Number : 123\n01-Sep-2025";
        assert_eq!(detect_bank_from_text(text), "DBS");
    }

    #[test]
    fn cleans_bank_noise() {
        let text = "01 DEC FAST PAYMENT 100.00\nPage 1 of 9\nDeposit Insurance Scheme blah blah";
        let cleaned = clean_page_text(text, "OCBC");
        assert!(cleaned.contains("FAST PAYMENT"));
        assert!(!cleaned.contains("Page 1 of 9"));
        assert!(!cleaned.contains("Deposit Insurance"));
    }
}
