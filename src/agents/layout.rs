//! Layout agent: derives the layout descriptor that guides extraction.
//!
//! Runs before extraction: bank detection, table structure, column mapping,
//! date/amount formats, special markers. Purely informational, always low
//! risk.

use super::AgentOutcome;
use crate::pdf::DocumentSnapshot;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::info;

struct BankSignature {
    name: &'static str,
    keywords: &'static [&'static str],
    products: &'static [&'static str],
    header_patterns: &'static [&'static str],
}

const BANK_SIGNATURES: &[BankSignature] = &[
    BankSignature {
        name: "DBS",
        keywords: &["DBS BANK", "DEVELOPMENT BANK OF SINGAPORE", "DBS/POSB"],
        products: &["AUTOSAVE ACCOUNT", "MULTIPLIER ACCOUNT", "MY ACCOUNT", "DBS TREASURES"],
        header_patterns: &[r"DBS\s+BANK", r"DBS/POSB"],
    },
    BankSignature {
        name: "POSB",
        keywords: &["POSB", "POST OFFICE SAVINGS BANK"],
        products: &["POSB SAYE", "POSB EVERYDAY"],
        header_patterns: &[r"POSB"],
    },
    BankSignature {
        name: "OCBC",
        keywords: &["OCBC BANK", "OVERSEA-CHINESE BANKING", "OCBC"],
        products: &["360 ACCOUNT", "FRANK ACCOUNT", "OCBC VOYAGE"],
        header_patterns: &[r"OCBC\s+BANK"],
    },
    BankSignature {
        name: "UOB",
        keywords: &["UNITED OVERSEAS BANK", "UOB"],
        products: &["UNIPLUS", "ONE ACCOUNT", "STASH ACCOUNT"],
        header_patterns: &[r"UNITED\s+OVERSEAS\s+BANK", r"UOB"],
    },
    BankSignature {
        name: "Standard Chartered",
        keywords: &["STANDARD CHARTERED"],
        products: &["BONUSSAVER", "JUMPSTART"],
        header_patterns: &[r"STANDARD\s+CHARTERED"],
    },
    BankSignature {
        name: "HSBC",
        keywords: &["HSBC", "THE HONGKONG AND SHANGHAI BANKING"],
        products: &["EVERYDAY GLOBAL ACCOUNT", "CURRENT ACCOUNT"],
        header_patterns: &[r"HSBC"],
    },
    BankSignature {
        name: "Citibank",
        keywords: &["CITIBANK"],
        products: &["CITIGOLD", "MAXIGAIN"],
        header_patterns: &[r"CITIBANK"],
    },
    BankSignature {
        name: "GXS Bank",
        keywords: &["GXS BANK", "GXS"],
        products: &[],
        header_patterns: &[r"GXS\s+BANK"],
    },
    BankSignature {
        name: "Trust Bank",
        keywords: &["TRUST BANK"],
        products: &[],
        header_patterns: &[r"TRUST\s+BANK"],
    },
    BankSignature {
        name: "Aspire",
        keywords: &["ASPIRE"],
        products: &["ASPIRE BUSINESS ACCOUNT"],
        header_patterns: &[r"ASPIRE"],
    },
    BankSignature {
        name: "Airwallex",
        keywords: &["AIRWALLEX"],
        products: &[],
        header_patterns: &[r"AIRWALLEX"],
    },
];

const COLUMN_ALIASES: &[(&str, &[&str])] = &[
    ("transaction_date", &["date", "txn date", "transaction date", "date & time", "posting date"]),
    ("value_date", &["value date", "val date", "effective date"]),
    (
        "description",
        &["description", "transaction details", "details", "particulars", "narrative"],
    ),
    ("debit", &["debit", "withdrawal", "withdrawals", "dr", "payments"]),
    ("credit", &["credit", "deposit", "deposits", "cr", "receipts"]),
    ("balance", &["balance", "running balance", "bal", "closing balance"]),
    ("reference", &["reference", "ref", "ref no", "transaction ref"]),
    ("cheque", &["cheque", "chq", "cheque no"]),
    ("counterparty", &["counterparty", "payee", "beneficiary"]),
];

const DATE_PATTERNS: &[(&str, &str)] = &[
    (r"\d{2}-[A-Za-z]{3}-\d{4}", "DD-MMM-YYYY"),
    (r"\d{2}\s+[A-Za-z]{3}\s+\d{4}", "DD MMM YYYY"),
    (r"\d{2}\s+[A-Za-z]{3}", "DD MMM"),
    (r"\d{2}/\d{2}/\d{4}", "DD/MM/YYYY"),
    (r"\d{2}/\d{2}/\d{2}", "DD/MM/YY"),
    (r"\d{2}[A-Za-z]{3}\d{4}", "DDMMMYYYY"),
];

lazy_static! {
    static ref NON_ASCII: Regex = Regex::new(r"[^\x00-\x7f]").unwrap();
    static ref CCY_MARKER: Regex = Regex::new(r"\s*\([A-Z]{3}\)\s*").unwrap();
    static ref DECIMAL_COMMA: Regex = Regex::new(r"\d{1,3},\d{3}\.\d{2}").unwrap();
    static ref EUROPEAN: Regex = Regex::new(r"\d{1,3}\.\d{3},\d{2}").unwrap();
    static ref DATE_CELL: Regex = Regex::new(r"^\d{1,2}[\-/\s]").unwrap();
}

fn sanitize_float(value: f64) -> f64 {
    if value.is_nan() || value.is_infinite() {
        0.0
    } else {
        value
    }
}

/// Bank identification scoring: +3 per keyword, +2 per product, +2 per
/// header regex; highest score wins. Score ties go to the bank with the
/// longest matched keyword (a full bank name is a stronger signal than a
/// short acronym), not to signature-table order.
fn detect_bank(text_upper: &str) -> (String, f64) {
    let mut best: Option<(&str, u32, usize)> = None;

    for signature in BANK_SIGNATURES {
        let mut score = 0u32;
        let mut longest_keyword = 0usize;

        for keyword in signature.keywords {
            if text_upper.contains(keyword) {
                score += 3;
                longest_keyword = longest_keyword.max(keyword.len());
            }
        }
        for product in signature.products {
            if text_upper.contains(product) {
                score += 2;
            }
        }
        for pattern in signature.header_patterns {
            if Regex::new(pattern).map(|re| re.is_match(text_upper)).unwrap_or(false) {
                score += 2;
            }
        }

        if score == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, s, l)) => score > s || (score == s && longest_keyword > l),
        };
        if better {
            best = Some((signature.name, score, longest_keyword));
        }
    }

    match best {
        Some((name, score, _)) => {
            let confidence = (score as f64 / 10.0).min(1.0);
            (name.to_string(), sanitize_float(confidence))
        }
        None => ("Unknown".to_string(), 0.0),
    }
}

fn map_columns(headers: &[String]) -> Map<String, Value> {
    let mut mapping = Map::new();
    for (idx, header) in headers.iter().enumerate() {
        let lowered = header.trim().to_lowercase();
        let cleaned = NON_ASCII.replace_all(&lowered, "");
        let cleaned = CCY_MARKER.replace_all(&cleaned, "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        for (canonical, aliases) in COLUMN_ALIASES {
            if mapping.contains_key(*canonical) {
                continue;
            }
            if aliases.iter().any(|a| cleaned.contains(a) || a.contains(cleaned)) {
                mapping.insert(canonical.to_string(), json!(idx));
                break;
            }
        }
    }
    mapping
}

fn analyze_tables(snapshot: &DocumentSnapshot) -> (bool, Option<Value>, Map<String, Value>) {
    let mut has_tables = false;

    for (page_idx, page) in snapshot.pages.iter().take(3).enumerate() {
        if page.tables.is_empty() {
            continue;
        }
        has_tables = true;

        for table in &page.tables {
            if table.len() < 2 {
                continue;
            }
            let Some(headers) = table.first() else { continue };
            let mapping = map_columns(headers);
            if mapping.is_empty() {
                continue;
            }
            let sample_rows: Vec<&Vec<String>> =
                table.iter().skip(1).take(3).collect();
            let structure = json!({
                "page": page_idx,
                "columns": headers.len(),
                "header_row": headers,
                "sample_rows": sample_rows,
            });
            return (has_tables, Some(structure), mapping);
        }
    }

    (has_tables, None, Map::new())
}

fn detect_formats(text: &str) -> (&'static str, &'static str) {
    let mut date_format = "DD MMM";
    for (pattern, name) in DATE_PATTERNS {
        if Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false) {
            date_format = name;
            break;
        }
    }

    let decimal_count = DECIMAL_COMMA.find_iter(text).count();
    let european_count = EUROPEAN.find_iter(text).count();
    let amount_format = if decimal_count >= european_count { "decimal_comma" } else { "european" };

    (date_format, amount_format)
}

fn detect_special_markers(text_upper: &str) -> Map<String, Value> {
    let mut markers = Map::new();

    const OPENING: [&str; 5] = [
        "BALANCE B/F", "BALANCE BROUGHT FORWARD", "OPENING BALANCE", "BROUGHT FORWARD", "B/F",
    ];
    for marker in OPENING {
        if text_upper.contains(marker) {
            markers.insert("opening_balance".to_string(), json!(marker));
            break;
        }
    }

    const CLOSING: [&str; 5] = [
        "BALANCE C/F", "BALANCE CARRIED FORWARD", "CLOSING BALANCE", "CARRIED FORWARD", "C/F",
    ];
    for marker in CLOSING {
        if text_upper.contains(marker) {
            markers.insert("closing_balance".to_string(), json!(marker));
            break;
        }
    }

    markers
}

/// Multi-line descriptions: among the first table's data rows, fewer than
/// 60% start with a date-like first cell.
fn detect_multiline_descriptions(snapshot: &DocumentSnapshot, has_tables: bool) -> bool {
    if !has_tables {
        return false;
    }
    for page in snapshot.pages.iter().take(2) {
        for table in &page.tables {
            if table.len() < 5 {
                continue;
            }
            let total_rows = table.len() - 1;
            let date_rows = table
                .iter()
                .skip(1)
                .filter(|row| {
                    row.first().map(|c| DATE_CELL.is_match(c.trim())).unwrap_or(false)
                })
                .count();
            if date_rows > 0 && (date_rows as f64 / total_rows as f64) < 0.6 {
                return true;
            }
        }
    }
    false
}

/// Analyse the document layout and build the extraction context.
pub fn analyse(snapshot: &DocumentSnapshot) -> AgentOutcome {
    let first_two_text: String = snapshot
        .pages
        .iter()
        .take(2)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let text_upper = first_two_text.to_uppercase();
    let all_text_upper: String = snapshot
        .pages
        .iter()
        .take(3)
        .map(|p| p.text.to_uppercase())
        .collect::<Vec<_>>()
        .join("\n");

    let (bank, confidence) = detect_bank(&text_upper);
    let (has_tables, table_structure, column_mapping) = analyze_tables(snapshot);
    let (date_format, amount_format) = detect_formats(&first_two_text);
    let special_markers = detect_special_markers(&all_text_upper);
    let multi_line = detect_multiline_descriptions(snapshot, has_tables);
    let is_scanned = snapshot.is_scanned();

    info!("  ✅ Layout analysis complete: {bank} (confidence: {confidence:.2})");

    let mut summary_parts = vec![
        format!("Detected bank: {bank} (confidence: {:.0}%)", confidence * 100.0),
        format!("Document has {} page(s)", snapshot.page_count),
    ];
    if has_tables {
        summary_parts.push(format!(
            "Found structured tables with {} identified columns",
            column_mapping.len()
        ));
    } else {
        summary_parts
            .push("No structured tables detected (unstructured extraction required)".to_string());
    }
    summary_parts.push(format!("Date format: {date_format}"));
    if multi_line {
        summary_parts.push("Multi-line transaction descriptions detected".to_string());
    }

    let results = json!({
        "bank_detected": bank,
        "confidence": confidence,
        "is_scanned": is_scanned,
        "table_structure": table_structure,
        "has_tables": has_tables,
        "column_mapping": Value::Object(column_mapping),
        "date_format": date_format,
        "amount_format": amount_format,
        "multi_line_descriptions": multi_line,
        "special_markers": Value::Object(special_markers),
        "page_count": snapshot.page_count,
    });

    AgentOutcome::low(results, format!("{}.", summary_parts.join(". ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{PageSnapshot, Table};

    fn snapshot_with_text(text: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            page_count: 1,
            pages: vec![PageSnapshot {
                number: 1,
                text: text.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn bank_scoring_rewards_keywords_products_and_patterns() {
        // Keyword (+3 for "DBS BANK", +3 for "DBS/POSB") + product (+2) +
        // two header patterns (+4).
        let (bank, confidence) =
            detect_bank("DBS BANK LTD DBS/POSB AUTOSAVE ACCOUNT STATEMENT");
        assert_eq!(bank, "DBS");
        assert_eq!(confidence, 1.0);

        let (bank, confidence) = detect_bank("UOB ONE STATEMENT");
        assert_eq!(bank, "UOB");
        assert!(confidence > 0.0 && confidence < 1.0);

        let (bank, confidence) = detect_bank("NOTHING RECOGNISABLE");
        assert_eq!(bank, "Unknown");
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn ties_go_to_the_longest_matched_keyword() {
        // Aspire and Airwallex both score 5 here (one keyword + one header
        // pattern); the longer keyword wins regardless of table order.
        let (bank, _) = detect_bank("ASPIRE AIRWALLEX STATEMENT");
        assert_eq!(bank, "Airwallex");
    }

    #[test]
    fn column_mapping_uses_aliases() {
        let headers: Vec<String> = ["Date", "Transaction Details", "Debit", "Credit", "Balance (SGD)"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mapping = map_columns(&headers);
        assert_eq!(mapping["transaction_date"], 0);
        assert_eq!(mapping["description"], 1);
        assert_eq!(mapping["debit"], 2);
        assert_eq!(mapping["credit"], 3);
        assert_eq!(mapping["balance"], 4);
    }

    #[test]
    fn date_format_first_match_wins() {
        let (fmt, _) = detect_formats("statement 01-Sep-2025 to 30-Sep-2025");
        assert_eq!(fmt, "DD-MMM-YYYY");

        let (fmt, _) = detect_formats("01 DEC some text");
        assert_eq!(fmt, "DD MMM");

        let (fmt, _) = detect_formats("no dates anywhere");
        assert_eq!(fmt, "DD MMM");
    }

    #[test]
    fn amount_format_majority_vote() {
        let (_, fmt) = detect_formats("1,234.56 and 9,876.54 and 1.234,56");
        assert_eq!(fmt, "decimal_comma");
        let (_, fmt) = detect_formats("1.234,56 2.345,67");
        assert_eq!(fmt, "european");
    }

    #[test]
    fn special_markers_pick_the_present_phrase() {
        let markers = detect_special_markers("... BALANCE B/F ... BALANCE CARRIED FORWARD ...");
        assert_eq!(markers["opening_balance"], "BALANCE B/F");
        assert_eq!(markers["closing_balance"], "BALANCE CARRIED FORWARD");
    }

    #[test]
    fn multiline_detection_ratio() {
        let mut table: Table = vec![vec!["Date".into(), "Details".into(), "Debit".into()]];
        // 2 dated rows, 6 continuation rows → 25% dated → multi-line.
        for i in 0..2 {
            table.push(vec![format!("0{} Dec", i + 1), "row".into(), "1.00".into()]);
            for _ in 0..3 {
                table.push(vec!["".into(), "continuation".into(), "".into()]);
            }
        }
        let snapshot = DocumentSnapshot {
            page_count: 1,
            pages: vec![PageSnapshot {
                number: 1,
                tables: vec![table],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(detect_multiline_descriptions(&snapshot, true));
    }

    #[test]
    fn outcome_shape() {
        let out = analyse(&snapshot_with_text(
            "OCBC BANK STATEMENT OF ACCOUNT\n01 DEC 1,234.56 BALANCE B/F",
        ));
        assert_eq!(out.risk_level, "low");
        assert_eq!(out.results["bank_detected"], "OCBC");
        assert_eq!(out.results["date_format"], "DD MMM");
        assert_eq!(out.results["special_markers"]["opening_balance"], "BALANCE B/F");
        assert!(out.summary.contains("Detected bank: OCBC"));
    }
}
