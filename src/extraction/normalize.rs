//! Canonicalisation helpers: amounts, dates, channels, counterparties,
//! categories.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DATE_DDMMMYYYY: Regex = Regex::new(r"(\d{2})([A-Za-z]{3})(\d{4})").unwrap();
    static ref DATE_DD_DASH_MMM: Regex = Regex::new(r"(\d{1,2})-([A-Za-z]{3})-\d{4}").unwrap();
    static ref DATE_DD_MMM: Regex = Regex::new(r"(\d{1,2})\s+([A-Za-z]{3})(?:\s+\d{4})?").unwrap();
    static ref DATE_DD_SLASH_MM: Regex = Regex::new(r"(\d{1,2})/(\d{1,2})(?:/\d{2,4})?").unwrap();
    static ref REF_HEX: Regex = Regex::new(r"^[0-9a-fA-F]{16,}$").unwrap();
    static ref REF_PREFIX: Regex = Regex::new(r"^(EBGPP|X1AF|ADV |RTF |SGD |\d{14,})").unwrap();
    static ref REF_USER: Regex = Regex::new(r"^\d+\s+U:").unwrap();
    static ref REF_SGD_AMOUNT: Regex = Regex::new(r"(?i)^SGD\s+[\d,.]+$").unwrap();
    static ref REF_CATEGORY_ROLE: Regex =
        Regex::new(r"(?i)^(OTHER|SALARY PAYMENT|SUPPLIER PAYMENT|CLEARING LOANS)$").unwrap();
}

pub const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Parse a monetary string like `6,540.00` → 6540.0.
///
/// Parenthesised values are negative; empty and `-` mean no amount.
pub fn parse_amount(val: &str) -> Option<f64> {
    let cleaned: String = val.chars().filter(|c| *c != ',' && *c != ' ').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    let cleaned = if cleaned.starts_with('(') && cleaned.ends_with(')') {
        format!("-{}", &cleaned[1..cleaned.len() - 1])
    } else {
        cleaned.to_string()
    };
    cleaned.parse::<f64>().ok()
}

/// Format an amount the way statements print it: `1,234.56`.
pub fn format_amount(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let body = format!("{grouped}.{frac:02}");
    if negative {
        format!("({body})")
    } else {
        body
    }
}

/// Normalise bank-native date formats to `DD MMM`.
///
/// `01-Sep-2025` → `01 SEP`, `30SEP2025` → `30 SEP`, `01/12/2025` → `01 DEC`,
/// `1 31 Dec 2025` → `31 DEC` (sequence-number prefixes resolve to the last
/// match). Unrecognised input passes through unchanged.
pub fn normalise_date_to_dd_mmm(date_str: &str) -> String {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return String::new();
    }

    if let Some(c) = DATE_DDMMMYYYY.captures(date_str) {
        return format!("{} {}", &c[1], c[2].to_uppercase());
    }
    if let Some(c) = DATE_DD_DASH_MMM.captures(date_str) {
        return format!("{:0>2} {}", &c[1], c[2].to_uppercase());
    }
    if let Some(c) = DATE_DD_MMM.captures_iter(date_str).last() {
        return format!("{:0>2} {}", &c[1], c[2].to_uppercase());
    }
    if let Some(c) = DATE_DD_SLASH_MM.captures(date_str) {
        if let Ok(month) = c[2].parse::<usize>() {
            if (1..=12).contains(&month) {
                return format!("{:0>2} {}", &c[1], MONTHS[month - 1]);
            }
        }
    }
    date_str.to_string()
}

/// Detect the payment channel from a transaction description.
pub fn detect_channel(description: &str) -> String {
    let desc = description.to_uppercase();
    let channel = if desc.contains("FAST PAYMENT") || desc.contains("FAST") {
        "FAST"
    } else if desc.contains("INTERBANK GIRO") || desc.contains("IBG") {
        "INTERBANK GIRO"
    } else if desc.contains("GIRO") {
        "GIRO"
    } else if desc.contains("ADVICE") || desc.contains("ADV ") {
        "ADVICE"
    } else if desc.contains("REMITTANCE") || desc.contains("RTF ") {
        "REMITTANCE"
    } else if desc.contains("ATM") {
        "ATM"
    } else if desc.contains("DEBIT PURCHASE") || desc.contains("DEBIT PURC") {
        "DEBIT PURCHASE"
    } else if desc.contains("CHEQUE") || desc.contains("CHQ") {
        "CHEQUE"
    } else if desc.contains("NETS") {
        "NETS"
    } else if desc.contains("PAYNOW") {
        "PayNow"
    } else {
        "OTHER"
    };
    channel.to_string()
}

/// Tokens that open a channel phrase in a one-line description.
const CHANNEL_LEAD_TOKENS: [&str; 13] = [
    "FAST", "GIRO", "IBG", "PAYNOW", "NETS", "ATM", "REMITTANCE", "ADV", "RTF", "TRANSFER",
    "CHEQUE", "CHQ", "DEBIT",
];

/// Channel qualifiers that sit between the channel and the name.
const CHANNEL_QUALIFIER_TOKENS: [&str; 8] =
    ["PAYMENT", "PURCHASE", "OTHR", "SALA", "SUPP", "COLL", "TO", "FROM"];

/// Extract the counterparty name from a transaction description.
///
/// Multi-line descriptions: the first line is the channel;
/// reference-looking lines (hex strings, long digit runs, `SGD 1,234.00`,
/// category-role tokens) are skipped; the first remaining alphabetic line
/// longer than 2 characters wins. One-line descriptions that open with a
/// channel phrase (`FAST PAYMENT OTHR GELMAX`) yield the tokens left after
/// the channel words and references.
pub fn extract_counterparty(description: &str) -> Option<String> {
    if description.is_empty() {
        return None;
    }
    let joined = description.replace('\n', " | ");
    let lines: Vec<&str> = joined.split(" | ").collect();

    for line in lines.iter().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if REF_HEX.is_match(line)
            || REF_PREFIX.is_match(line)
            || REF_USER.is_match(line)
            || REF_SGD_AMOUNT.is_match(line)
            || REF_CATEGORY_ROLE.is_match(line)
        {
            continue;
        }
        if line.len() > 2 && line.chars().any(|c| c.is_alphabetic()) {
            return Some(line.to_string());
        }
    }

    if lines.len() == 1 {
        return extract_counterparty_inline(lines[0].trim());
    }
    None
}

/// One-line fallback: drop the channel phrase and reference tokens, keep
/// what names the other party.
fn extract_counterparty_inline(line: &str) -> Option<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first = tokens.first()?.to_uppercase();
    if !CHANNEL_LEAD_TOKENS.contains(&first.as_str()) {
        return None;
    }

    let name_tokens: Vec<&str> = tokens
        .iter()
        .skip(1)
        .filter(|t| {
            let upper = t.to_uppercase();
            if CHANNEL_LEAD_TOKENS.contains(&upper.as_str())
                || CHANNEL_QUALIFIER_TOKENS.contains(&upper.as_str())
            {
                return false;
            }
            // Mixed alphanumeric runs are references, not names.
            t.len() > 2 && t.chars().all(|c| c.is_alphabetic() || c == '.' || c == '&' || c == '-')
        })
        .copied()
        .collect();

    if name_tokens.is_empty() {
        None
    } else {
        Some(name_tokens.join(" "))
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Keyword-based category classification.
pub fn categorize_transaction(description: &str) -> String {
    let desc = description.to_uppercase();

    let category = if contains_any(&desc, &["SALARY", "PAYROLL", "WAGES", "CPF", "CPF CONTRIBUTION"]) {
        "salary_payroll"
    } else if contains_any(&desc, &["RENT", "LEASE", "TENANCY", "PROPERTY"]) {
        "rent"
    } else if contains_any(
        &desc,
        &[
            "SP SERVICES", "SINGTEL", "STARHUB", "M1", "UTILITIES", "POWER SUPPLY",
            "TOWN COUNCIL", "PUB ", "WATER", "ELECTRICITY", "SIMBA TELECOM",
        ],
    ) {
        "utilities"
    } else if contains_any(
        &desc,
        &[
            "FOOD", "RESTAURANT", "CAFE", "COFFEE", "MCDONALD", "DELIVEROO", "GRAB FOOD",
            "FOODPANDA", "KFC", "SUBWAY", "STARBUCKS", "TOAST BOX", "YA KUN", "BAKERY",
            "ESPRESSO", "KOPITIAM", "HAWKER",
        ],
    ) {
        "food_beverage"
    } else if contains_any(
        &desc,
        &[
            "TAXI", "GRAB ", "GOJEK", "COMFORTDELGRO", "CDG ENGIE", "CDG EGIE", "TRANSIT",
            "EZ-LINK", "LTA", "PARKING", "SBS TRANSIT", "SMRT",
        ],
    ) {
        "transport"
    } else if contains_any(&desc, &["CARDUP", "SUPPLIER", "INVOICE", "VENDOR", "PURCHASE ORDER"]) {
        "supplier_payment"
    } else if contains_any(
        &desc,
        &[
            "ADYEN", "STRIPE", "PAYNOW", "COLLECTION", "REVENUE", "SALES", "PAYMENT RECEIVED",
            "CUSTOMER PAYMENT",
        ],
    ) {
        "revenue"
    } else if contains_any(&desc, &["LOAN", "MORTGAGE", "FINANCING", "EMI", "INSTALMENT"]) {
        "loan"
    } else if contains_any(&desc, &["IRAS", "GST", "TAX", "ACRA", "GOVERNMENT", "CUSTOMS"]) {
        "tax_government"
    } else if contains_any(&desc, &["INSURANCE", "AIA", "PRUDENTIAL", "GREAT EASTERN", "NTUC INCOME"]) {
        "insurance"
    } else if contains_any(
        &desc,
        &[
            "BANK CHARGE", "SERVICE CHARGE", "FEE", "INTEREST", "LATE CHARGE", "ANNUAL FEE",
            "COMM ON",
        ],
    ) {
        "fees_charges"
    } else if contains_any(&desc, &["TRANSFER", "TRF", "IBG", "REMITTANCE", "TELEGRAPHIC"]) {
        "transfer"
    } else if contains_any(&desc, &["DEBIT PURCHASE", "DEBIT PURC", "VISA"]) {
        "purchase"
    } else {
        "other"
    };
    category.to_string()
}

pub fn is_cash_transaction(description: &str) -> bool {
    let desc = description.to_uppercase();
    contains_any(
        &desc,
        &[
            "CASH DEPOSIT", "CASH WITHDRAWAL", "ATM WITHDRAWAL", "ATM DEPOSIT", "CDM",
            "CASH DEP", "ATM",
        ],
    )
}

pub fn is_cheque_transaction(description: &str) -> bool {
    let desc = description.to_uppercase();
    contains_any(&desc, &["CHEQUE", "CHQ", "CHEQUE DEPOSIT", "CHEQUE WITHDRAWAL"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_amounts() {
        assert_eq!(parse_amount("6,540.00"), Some(6540.0));
        assert_eq!(parse_amount(" 1,943.69 "), Some(1943.69));
        assert_eq!(parse_amount("(1,000.00)"), Some(-1000.0));
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn amount_format_round_trips() {
        for x in [0.0, 1.5, 999.99, 1000.0, 1943.69, 84255.32, 1234567.89] {
            assert_eq!(parse_amount(&format_amount(x)), Some(x));
        }
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(parse_amount(&format_amount(-12.34)), Some(-12.34));
    }

    #[test]
    fn normalises_dates() {
        assert_eq!(normalise_date_to_dd_mmm("01-Sep-2025"), "01 SEP");
        assert_eq!(normalise_date_to_dd_mmm("30 NOV"), "30 NOV");
        assert_eq!(normalise_date_to_dd_mmm("01/12/2025"), "01 DEC");
        assert_eq!(normalise_date_to_dd_mmm("30SEP2025"), "30 SEP");
        assert_eq!(normalise_date_to_dd_mmm("1 31 Dec 2025"), "31 DEC");
        assert_eq!(normalise_date_to_dd_mmm("5 Jan"), "05 JAN");
    }

    #[test]
    fn date_normalisation_is_idempotent() {
        for raw in ["01-Sep-2025", "30 NOV", "01/12/2025", "30SEP2025", "5 Jan 2024"] {
            let once = normalise_date_to_dd_mmm(raw);
            assert_eq!(normalise_date_to_dd_mmm(&once), once, "input {raw}");
        }
    }

    #[test]
    fn detects_channels() {
        assert_eq!(detect_channel("FAST PAYMENT OTHR GELMAX"), "FAST");
        assert_eq!(detect_channel("INTERBANK GIRO COLLECTION"), "INTERBANK GIRO");
        assert_eq!(detect_channel("giro payment"), "GIRO");
        assert_eq!(detect_channel("CHQ 001234"), "CHEQUE");
        assert_eq!(detect_channel("PAYNOW TRANSFER"), "PayNow");
        assert_eq!(detect_channel("random thing"), "OTHER");
    }

    #[test]
    fn extracts_counterparty_skipping_references() {
        let desc = "FAST PAYMENT | EBGPP50901371025 | GELMAX PTE LTD | SGD 394.71";
        assert_eq!(extract_counterparty(desc).as_deref(), Some("GELMAX PTE LTD"));

        let desc = "FAST PAYMENT\nABCDEF0123456789AB\nACME TRADING";
        assert_eq!(extract_counterparty(desc).as_deref(), Some("ACME TRADING"));

        assert_eq!(extract_counterparty("SINGLE LINE"), None);
        assert_eq!(extract_counterparty(""), None);
    }

    #[test]
    fn extracts_counterparty_from_one_line_channel_phrases() {
        assert_eq!(
            extract_counterparty("FAST PAYMENT OTHR GELMAX").as_deref(),
            Some("GELMAX")
        );
        // Reference tokens with digits are not names.
        assert_eq!(
            extract_counterparty("FAST PAYMENT OTHR GELMAX SG3P251128972769").as_deref(),
            Some("GELMAX")
        );
        // No channel phrase: the line stays unattributed.
        assert_eq!(extract_counterparty("MISC ADJUSTMENT"), None);
    }

    #[test]
    fn categorizes_transactions() {
        assert_eq!(categorize_transaction("SALARY PAYMENT NOV"), "salary_payroll");
        assert_eq!(categorize_transaction("OFFICE RENT DEC"), "rent");
        assert_eq!(categorize_transaction("SP SERVICES BILL"), "utilities");
        assert_eq!(categorize_transaction("SERVICE CHARGE"), "fees_charges");
        assert_eq!(categorize_transaction("IRAS GST PAYMENT"), "tax_government");
        assert_eq!(categorize_transaction("mystery"), "other");
    }

    #[test]
    fn cash_and_cheque_flags() {
        assert!(is_cash_transaction("ATM WITHDRAWAL ORCHARD"));
        assert!(is_cash_transaction("CDM DEPOSIT"));
        assert!(!is_cash_transaction("FAST PAYMENT"));
        assert!(is_cheque_transaction("CHEQUE DEPOSIT 1234"));
        assert!(!is_cheque_transaction("GIRO"));
    }
}
