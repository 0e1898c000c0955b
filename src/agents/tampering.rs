//! Tampering agent: structural checks plus a vision pass.
//!
//! Eight independent checks per document; group mode adds cross-document
//! consistency checks over creator/producer metadata and page sharpness.

use super::{checks_to_results, compute_risk, AgentOutcome, CheckResult, CheckStatus};
use crate::llm::ModelClient;
use crate::models::{AgentType, Config, DocumentRecord};
use crate::pdf::{engine, parse_pdf_date, DocumentSnapshot, PageSnapshot, PdfMetadata};
use crate::store::AnalysisStore;
use anyhow::Result;
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::info;

/// Known editing / tampering tool fingerprints.
const SUSPICIOUS_TOOLS: &[&str] = &[
    "canva", "ilovepdf", "smallpdf", "sejda", "pdf-xchange", "foxit phantompdf", "nitro",
    "pdfill", "pdfescape", "libreoffice", "openoffice", "google docs", "microsoft word",
    "print to pdf", "safari", "chrome",
];

const SUSPICIOUS_FONT_KEYWORDS: &[&str] = &["helvetica-oblique", "canva", "edit"];

lazy_static! {
    static ref HEX_TRACKING: Regex = Regex::new(r"(?i)[0-9a-f]{16,}").unwrap();
    static ref FENCE: Regex = Regex::new(r"^```json\s*|```\s*$").unwrap();
}

fn fmt_date(dt: Option<NaiveDateTime>) -> String {
    match dt {
        Some(dt) => dt.format("%d %b %Y, %I:%M:%S %p").to_string(),
        None => "Not found".to_string(),
    }
}

/// Check 1: creation vs modification dates.
pub fn check_metadata_dates(meta: &PdfMetadata) -> CheckResult {
    let name = "Metadata Date Check";
    let creation = parse_pdf_date(&meta.creation_date);
    let modified = parse_pdf_date(&meta.mod_date);
    let dates = format!("Created: {}, Modified: {}", fmt_date(creation), fmt_date(modified));

    match (creation, modified) {
        (None, None) => CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("{dates} — Both dates missing (metadata may have been stripped)."),
        ),
        (None, Some(_)) | (Some(_), None) => CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("{dates} — One date is missing or malformed."),
        ),
        (Some(c), Some(m)) => {
            if m < c {
                return CheckResult::new(
                    name,
                    CheckStatus::Fail,
                    format!("{dates} — Modification date is BEFORE creation date (invalid)."),
                );
            }
            let delta = (m - c).num_seconds();
            if delta == 0 {
                CheckResult::new(name, CheckStatus::Pass, format!("{dates} — No modification detected."))
            } else if delta <= 5 {
                CheckResult::new(
                    name,
                    CheckStatus::Pass,
                    format!("{dates} — Modification within 5 seconds (normal generation)."),
                )
            } else if delta <= 60 {
                CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("{dates} — Modified {delta}s after creation."),
                )
            } else {
                CheckResult::new(
                    name,
                    CheckStatus::Fail,
                    format!("{dates} — Modified {delta}s after creation — potential tampering."),
                )
            }
        }
    }
}

/// Check 2: creator/producer editing-tool fingerprints.
pub fn check_creator_producer(meta: &PdfMetadata) -> CheckResult {
    let name = "Metadata Creator/Producer Check";
    let creator = meta.creator.trim();
    let producer = meta.producer.trim();

    if creator.is_empty() && producer.is_empty() {
        return CheckResult::new(
            name,
            CheckStatus::Warning,
            "No creator or producer metadata found (may have been stripped).",
        );
    }

    let combined = format!("{creator} {producer}").to_lowercase();
    for tool in SUSPICIOUS_TOOLS {
        if combined.contains(tool) {
            return CheckResult::new(
                name,
                CheckStatus::Fail,
                format!(
                    "Creator: '{creator}', Producer: '{producer}' — detected editing tool '{tool}'."
                ),
            );
        }
    }

    CheckResult::new(
        name,
        CheckStatus::Pass,
        format!("Creator: '{creator}', Producer: '{producer}' — no suspicious tools detected."),
    )
}

/// Check 3: suspicious keywords metadata.
pub fn check_keywords(meta: &PdfMetadata) -> CheckResult {
    let name = "Metadata Keywords Check";
    let keywords = meta.keywords.trim();
    if keywords.is_empty() {
        return CheckResult::new(name, CheckStatus::Pass, "No keywords found — nothing suspicious.");
    }
    let snippet: String = keywords.chars().take(120).collect();
    if HEX_TRACKING.is_match(keywords) {
        return CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("Keywords contain long hex/tracking string: '{snippet}'"),
        );
    }
    CheckResult::new(name, CheckStatus::Pass, format!("Keywords: '{snippet}' — no issues."))
}

/// Check 4: font consistency across pages.
pub fn check_font_consistency(pages: &[PageSnapshot]) -> CheckResult {
    let name = "Font Consistency Check";

    let all_fonts: std::collections::BTreeSet<&String> =
        pages.iter().flat_map(|p| p.fonts.iter()).collect();
    if all_fonts.is_empty() {
        return CheckResult::new(
            name,
            CheckStatus::Warning,
            "No fonts found — document may be image-based.",
        );
    }

    for font in &all_fonts {
        let lower = font.to_lowercase();
        for keyword in SUSPICIOUS_FONT_KEYWORDS {
            if lower.contains(keyword) {
                return CheckResult::new(
                    name,
                    CheckStatus::Fail,
                    format!("Suspicious font detected: '{font}'. All fonts: {all_fonts:?}"),
                );
            }
        }
    }

    if pages.len() > 1 {
        let first = &pages[0].fonts;
        for (i, page) in pages.iter().enumerate().skip(1) {
            let diff: Vec<&String> = page
                .fonts
                .symmetric_difference(first)
                .collect();
            if diff.len() > 3 {
                return CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!(
                        "Page {} fonts differ from page 1 by {} fonts. Diff: {diff:?}. \
                         All fonts: {all_fonts:?}",
                        i + 1,
                        diff.len()
                    ),
                );
            }
        }
    }

    CheckResult::new(
        name,
        CheckStatus::Pass,
        format!("Consistent fonts across {} pages. Fonts: {all_fonts:?}", pages.len()),
    )
}

/// Check 5: page dimensions at the configured DPI.
pub fn check_page_dimensions(dimensions_px: &[(u32, u32)], config: &Config) -> CheckResult {
    let name = "Page Dimension Check";
    let min_h = config.dimension_min_height;
    let min_w = config.dimension_min_width;
    let dpi = config.check_dpi.document_dimension;

    let mut failures = Vec::new();
    for (i, (w, h)) in dimensions_px.iter().enumerate() {
        let mut reasons = Vec::new();
        if *h < min_h {
            reasons.push(format!("height {h}px < min {min_h}px"));
        }
        if *w < min_w {
            reasons.push(format!("width {w}px < min {min_w}px"));
        }
        if !reasons.is_empty() {
            failures.push(format!("Page {}: {}", i + 1, reasons.join(", ")));
        }
    }

    if !failures.is_empty() {
        return CheckResult::new(name, CheckStatus::Fail, failures.join(" | "));
    }
    CheckResult::new(
        name,
        CheckStatus::Pass,
        format!(
            "All {} pages meet minimum dimensions ({min_w}×{min_h} at {dpi} DPI).",
            dimensions_px.len()
        ),
    )
}

/// Check 6: per-page Laplacian sharpness.
pub fn check_page_clarity(sharpness: &[f64], config: &Config) -> CheckResult {
    let name = "Page Clarity Check";
    let threshold = config.sharpness_threshold;

    let failures: Vec<String> = sharpness
        .iter()
        .enumerate()
        .filter(|(_, v)| **v < threshold)
        .map(|(i, v)| format!("Page {}: sharpness {v:.1} < threshold {threshold}", i + 1))
        .collect();

    if !failures.is_empty() {
        return CheckResult::new(name, CheckStatus::Fail, failures.join(" | "));
    }
    let per_page = sharpness
        .iter()
        .enumerate()
        .map(|(i, v)| format!("P{}:{v:.1}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    CheckResult::new(
        name,
        CheckStatus::Pass,
        format!("All {} pages passed clarity. Sharpness: [{per_page}]", sharpness.len()),
    )
}

/// Check 7: cross-page sharpness spread.
pub fn check_sharpness_spread(sharpness: &[f64], config: &Config) -> CheckResult {
    let name = "Sharpness Spread Check";
    if sharpness.len() < 2 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            "Only 1 page — spread check not applicable.",
        );
    }

    let max_v = sharpness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_v = sharpness.iter().copied().fold(f64::INFINITY, f64::min);
    let std_v = sharpness.iter().copied().std_dev();
    let detail = format!(
        "Variances: {:?}, Max: {max_v:.2}, Min: {min_v:.2}, StdDev: {std_v:.2}",
        sharpness.iter().map(|v| (v * 100.0).round() / 100.0).collect::<Vec<_>>()
    );

    if min_v < config.sharpness_spread_ratio * max_v || std_v > config.sharpness_max_std_dev {
        return CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("{detail} — Significant variation across pages."),
        );
    }
    CheckResult::new(name, CheckStatus::Pass, format!("{detail} — Consistent across pages."))
}

/// Check 8: vision pass over the first page.
pub async fn check_visual_tampering(model: &ModelClient, first_page_png: Option<&str>) -> CheckResult {
    let name = "Visual Tampering Check";
    let Some(image) = first_page_png else {
        return CheckResult::new(
            name,
            CheckStatus::Warning,
            "Could not run visual check: no rendered page available",
        );
    };

    let prompt = "You are a document fraud detection AI. Analyze the visual layout \
        and appearance of this bank statement page. Check for signs of \
        tampering such as:\n\
        - Inconsistent font styles or sizes within the same section\n\
        - Alignment issues or misaligned columns\n\
        - Pasted or overlaid content (visible edges or colour mismatches)\n\
        - Irregular spacing between rows or columns\n\
        - Blurriness or visual artifacts in specific areas (while rest is sharp)\n\
        - Signs of image editing (gradient inconsistencies, jpeg artefacts)\n\
        - Missing or broken bank logos/headers\n\n\
        Respond ONLY with valid JSON (no markdown fences):\n\
        {\"status\": \"pass\" or \"fail\", \
        \"details\": \"brief explanation of findings, pointing out specific \
        areas if suspicious\"}";

    match model.chat_completion_with_image(prompt, image, 0.2, 400).await {
        Ok(raw) => {
            let cleaned = FENCE.replace_all(raw.trim(), "").trim().to_string();
            match serde_json::from_str::<Value>(&cleaned) {
                Ok(parsed) => {
                    let status = parsed
                        .get("status")
                        .and_then(|s| s.as_str())
                        .map(CheckStatus::from_str)
                        .unwrap_or(CheckStatus::Warning);
                    let details = parsed
                        .get("details")
                        .and_then(|d| d.as_str())
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| raw.chars().take(300).collect());
                    CheckResult::new(name, status, details)
                }
                Err(e) => CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("Could not run visual check: {e}"),
                ),
            }
        }
        Err(e) => {
            CheckResult::new(name, CheckStatus::Warning, format!("Could not run visual check: {e:#}"))
        }
    }
}

/// Run all eight checks on one document.
pub async fn analyse(
    snapshot: &DocumentSnapshot,
    config: &Config,
    model: &ModelClient,
) -> AgentOutcome {
    info!("🔍 Tampering agent starting");

    let mut checks: Vec<CheckResult> = Vec::new();

    info!("  📋 Running metadata & font checks...");
    checks.push(check_metadata_dates(&snapshot.metadata));
    checks.push(check_creator_producer(&snapshot.metadata));
    checks.push(check_keywords(&snapshot.metadata));
    checks.push(check_font_consistency(&snapshot.pages));

    info!("  📐 Running page dimension check...");
    checks.push(check_page_dimensions(&snapshot.render.page_dimensions_px, config));

    info!("  🔎 Running sharpness / clarity checks...");
    checks.push(check_page_clarity(&snapshot.render.page_sharpness, config));
    checks.push(check_sharpness_spread(&snapshot.render.spread_sharpness, config));

    info!("  👁️  Running visual tampering check (vision model)...");
    checks.push(check_visual_tampering(model, snapshot.render.first_page_png.as_deref()).await);

    let (risk_level, score, summary) = compute_risk(&checks);
    info!("  🔍 Tampering result: {risk_level} (score={score}) — {summary}");

    AgentOutcome {
        results: checks_to_results(&checks, score),
        summary,
        risk_level,
    }
}

// ── group mode ───────────────────────────────────────────────────────────────

/// Creator/producer consistency over `(filename, creator, producer)` rows.
pub fn cross_creator_check(entries: &[(String, String, String)]) -> CheckResult {
    let name = "Cross-Document Creator Consistency";
    let mut creators: BTreeMap<&str, &str> = BTreeMap::new();
    let mut producers: BTreeMap<&str, &str> = BTreeMap::new();
    for (file, creator, producer) in entries {
        creators.insert(file, creator);
        producers.insert(file, producer);
    }

    let unique = |m: &BTreeMap<&str, &str>| -> Vec<String> {
        let mut v: Vec<String> = m
            .values()
            .filter(|c| **c != "Unknown" && **c != "Error")
            .map(|c| c.to_string())
            .collect();
        v.sort();
        v.dedup();
        v
    };
    let unique_creators = unique(&creators);
    let unique_producers = unique(&producers);

    if unique_creators.len() <= 1 && unique_producers.len() <= 1 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "All {} documents have consistent creator/producer metadata. \
                 Creator: {unique_creators:?}, Producer: {unique_producers:?}",
                entries.len()
            ),
        );
    }

    let status = if unique_creators.len() <= 2 { CheckStatus::Warning } else { CheckStatus::Fail };
    CheckResult::new(
        name,
        status,
        format!(
            "Inconsistent PDF tools detected across documents. \
             Creators: {creators:?}, Producers: {producers:?}"
        ),
    )
}

/// Page-1 sharpness consistency across documents: min/max < 0.3 fails.
pub fn cross_sharpness_check(values: &[(String, f64)]) -> CheckResult {
    let name = "Cross-Document Sharpness Consistency";
    if values.len() < 2 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            "Only one document — consistency check not applicable.",
        );
    }

    let max_v = values.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let min_v = values.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let ratio = if max_v > 0.0 { min_v / max_v } else { 1.0 };

    if ratio >= 0.3 {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "Sharpness is consistent across {} documents. Values: {values:?}",
                values.len()
            ),
        );
    }
    CheckResult::new(
        name,
        CheckStatus::Fail,
        format!(
            "Significant sharpness variation across documents (ratio: {ratio:.2}). \
             Values: {values:?} — some documents may be scanned copies."
        ),
    )
}

/// Aggregate the per-document tampering verdicts.
pub fn per_document_rollup(summaries: &[Value]) -> CheckResult {
    let name = "Per-Document Tampering Summary";
    let total_fails: i64 = summaries
        .iter()
        .map(|s| s.get("fail_count").and_then(Value::as_i64).unwrap_or(0))
        .sum();
    let total_warns: i64 = summaries
        .iter()
        .map(|s| s.get("warning_count").and_then(Value::as_i64).unwrap_or(0))
        .sum();

    if total_fails == 0 && total_warns <= summaries.len() as i64 {
        CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "All {} documents have clean tampering checks ({total_warns} minor warnings).",
                summaries.len()
            ),
        )
    } else if total_fails > 0 {
        let failed: Vec<&str> = summaries
            .iter()
            .filter(|s| s.get("fail_count").and_then(Value::as_i64).unwrap_or(0) > 0)
            .filter_map(|s| s.get("filename").and_then(Value::as_str))
            .collect();
        CheckResult::new(
            name,
            CheckStatus::Fail,
            format!(
                "{total_fails} tampering check failure(s) across documents: {}.",
                failed.join(", ")
            ),
        )
    } else {
        CheckResult::new(
            name,
            CheckStatus::Warning,
            format!("{total_warns} warning(s) across {} documents.", summaries.len()),
        )
    }
}

/// Cross-document tampering analysis for an upload group.
pub async fn analyse_group(docs: &[DocumentRecord], store: &AnalysisStore) -> Result<AgentOutcome> {
    info!("🔍 Group tampering agent starting over {} documents", docs.len());

    // Per-document results persisted by the wave-1 runs.
    let mut per_doc_summaries: Vec<Value> = Vec::new();
    for doc in docs {
        let result = store.agent_result(&doc.id, AgentType::Tampering).await?;
        let (status, risk, results) = match &result {
            Some(r) => (
                r.status.as_str().to_string(),
                r.risk_level.clone().unwrap_or_else(|| "unknown".to_string()),
                r.results.clone(),
            ),
            None => ("not_run".to_string(), "unknown".to_string(), None),
        };
        let get_count = |key: &str| {
            results
                .as_ref()
                .and_then(|r| r.get(key))
                .and_then(Value::as_i64)
                .unwrap_or(0)
        };
        per_doc_summaries.push(json!({
            "document_id": doc.id,
            "filename": doc.original_filename,
            "status": status,
            "risk_level": risk,
            "pass_count": get_count("pass_count"),
            "fail_count": get_count("fail_count"),
            "warning_count": get_count("warning_count"),
        }));
    }

    // Fresh metadata + page-1 sharpness per document.
    let mut creator_entries: Vec<(String, String, String)> = Vec::new();
    let mut sharpness_values: Vec<(String, f64)> = Vec::new();
    for doc in docs {
        match engine::load_fingerprint(doc.file_path.clone()).await {
            Ok((meta, sharpness)) => {
                let label = |s: &str| {
                    let t = s.trim();
                    if t.is_empty() { "Unknown".to_string() } else { t.to_string() }
                };
                creator_entries.push((
                    doc.original_filename.clone(),
                    label(&meta.creator),
                    label(&meta.producer),
                ));
                sharpness_values
                    .push((doc.original_filename.clone(), (sharpness * 100.0).round() / 100.0));
            }
            Err(_) => {
                creator_entries.push((
                    doc.original_filename.clone(),
                    "Error".to_string(),
                    "Error".to_string(),
                ));
                sharpness_values.push((doc.original_filename.clone(), 0.0));
            }
        }
    }

    let checks = vec![
        cross_creator_check(&creator_entries),
        cross_sharpness_check(&sharpness_values),
        per_document_rollup(&per_doc_summaries),
    ];

    let (risk_level, score, summary) = compute_risk(&checks);
    info!("  🔍 Group tampering result: {risk_level} (score={score}) — {summary}");

    let mut results = checks_to_results(&checks, score);
    if let Some(map) = results.as_object_mut() {
        map.insert("per_document_summary".to_string(), Value::Array(per_doc_summaries));
        map.insert("documents_analyzed".to_string(), json!(docs.len()));
    }

    Ok(AgentOutcome {
        results,
        summary: format!("[{} documents] {summary}", docs.len()),
        risk_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::pdf::RenderProfile;

    fn test_config() -> Config {
        // Defaults mirror production thresholds.
        Config {
            database_path: String::new(),
            upload_dir: String::new(),
            max_file_size_mb: 50,
            port: 0,
            model_endpoint: None,
            model_api_key: None,
            model_api_version: String::new(),
            model_deployment: String::new(),
            vision_deployment: String::new(),
            pdf_to_image_dpi: 200,
            check_dpi: Default::default(),
            dimension_min_height: 800,
            dimension_min_width: 1000,
            sharpness_threshold: 500.0,
            sharpness_spread_ratio: 0.5,
            sharpness_max_std_dev: 100.0,
            allowed_origins: vec![],
            jwt_secret: "test".to_string(),
            jwt_expiry_hours: 1,
        }
    }

    fn meta(creation: &str, modified: &str) -> PdfMetadata {
        PdfMetadata {
            creation_date: creation.to_string(),
            mod_date: modified.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn metadata_date_thresholds() {
        let c = check_metadata_dates(&meta("", ""));
        assert_eq!(c.status, CheckStatus::Warning);

        let c = check_metadata_dates(&meta("D:20250101120000", "D:20250101120000"));
        assert_eq!(c.status, CheckStatus::Pass);

        let c = check_metadata_dates(&meta("D:20250101120000", "D:20250101120004"));
        assert_eq!(c.status, CheckStatus::Pass);

        let c = check_metadata_dates(&meta("D:20250101120000", "D:20250101120030"));
        assert_eq!(c.status, CheckStatus::Warning);

        let c = check_metadata_dates(&meta("D:20250101120000", "D:20250101130000"));
        assert_eq!(c.status, CheckStatus::Fail);

        // Modified before created is invalid regardless of delta.
        let c = check_metadata_dates(&meta("D:20250101120000", "D:20250101110000"));
        assert_eq!(c.status, CheckStatus::Fail);
    }

    #[test]
    fn creator_fingerprints() {
        let canva = PdfMetadata {
            creator: "Canva".to_string(),
            producer: "Canva".to_string(),
            ..Default::default()
        };
        assert_eq!(check_creator_producer(&canva).status, CheckStatus::Fail);

        let clean = PdfMetadata {
            creator: "Bank Statement Generator v2".to_string(),
            producer: "iText 7".to_string(),
            ..Default::default()
        };
        assert_eq!(check_creator_producer(&clean).status, CheckStatus::Pass);

        assert_eq!(check_creator_producer(&PdfMetadata::default()).status, CheckStatus::Warning);
    }

    #[test]
    fn keyword_hex_strings_fail() {
        let suspicious = PdfMetadata {
            keywords: "doc 4f3a9b2c8d1e5f607182934a".to_string(),
            ..Default::default()
        };
        assert_eq!(check_keywords(&suspicious).status, CheckStatus::Fail);

        let fine = PdfMetadata {
            keywords: "statement, banking".to_string(),
            ..Default::default()
        };
        assert_eq!(check_keywords(&fine).status, CheckStatus::Pass);
        assert_eq!(check_keywords(&PdfMetadata::default()).status, CheckStatus::Pass);
    }

    fn page_with_fonts(fonts: &[&str]) -> PageSnapshot {
        PageSnapshot {
            fonts: fonts.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn font_consistency_cases() {
        // Image-only document.
        let c = check_font_consistency(&[page_with_fonts(&[])]);
        assert_eq!(c.status, CheckStatus::Warning);

        // Suspicious font name.
        let c = check_font_consistency(&[page_with_fonts(&["Helvetica-Oblique"])]);
        assert_eq!(c.status, CheckStatus::Fail);

        // Divergent page font sets.
        let c = check_font_consistency(&[
            page_with_fonts(&["ArialMT", "Arial-Bold"]),
            page_with_fonts(&["Courier", "Times", "Symbol", "Wingdings"]),
        ]);
        assert_eq!(c.status, CheckStatus::Warning);

        // Consistent.
        let c = check_font_consistency(&[
            page_with_fonts(&["ArialMT"]),
            page_with_fonts(&["ArialMT"]),
        ]);
        assert_eq!(c.status, CheckStatus::Pass);
    }

    #[test]
    fn dimension_and_clarity_thresholds() {
        let config = test_config();

        let c = check_page_dimensions(&[(2550, 3300)], &config);
        assert_eq!(c.status, CheckStatus::Pass);
        let c = check_page_dimensions(&[(2550, 3300), (900, 700)], &config);
        assert_eq!(c.status, CheckStatus::Fail);
        assert!(c.details.contains("Page 2"));

        let c = check_page_clarity(&[1200.0, 1500.0], &config);
        assert_eq!(c.status, CheckStatus::Pass);
        let c = check_page_clarity(&[1200.0, 120.0], &config);
        assert_eq!(c.status, CheckStatus::Fail);
    }

    #[test]
    fn sharpness_spread_rules() {
        let config = test_config();

        // Single page always passes with explanatory detail.
        let c = check_sharpness_spread(&[900.0], &config);
        assert_eq!(c.status, CheckStatus::Pass);
        assert!(c.details.contains("not applicable"));

        let c = check_sharpness_spread(&[1000.0, 980.0, 1010.0], &config);
        assert_eq!(c.status, CheckStatus::Pass);

        // Min below half of max.
        let c = check_sharpness_spread(&[1000.0, 400.0], &config);
        assert_eq!(c.status, CheckStatus::Fail);
    }

    #[test]
    fn cross_document_checks() {
        let consistent = vec![
            ("a.pdf".to_string(), "iText".to_string(), "iText 7".to_string()),
            ("b.pdf".to_string(), "iText".to_string(), "iText 7".to_string()),
        ];
        assert_eq!(cross_creator_check(&consistent).status, CheckStatus::Pass);

        let mixed = vec![
            ("a.pdf".to_string(), "iText".to_string(), "iText 7".to_string()),
            ("b.pdf".to_string(), "Canva".to_string(), "Canva".to_string()),
        ];
        assert_eq!(cross_creator_check(&mixed).status, CheckStatus::Warning);

        let sharp = vec![("a.pdf".to_string(), 1000.0), ("b.pdf".to_string(), 900.0)];
        assert_eq!(cross_sharpness_check(&sharp).status, CheckStatus::Pass);

        let uneven = vec![("a.pdf".to_string(), 1000.0), ("b.pdf".to_string(), 200.0)];
        assert_eq!(cross_sharpness_check(&uneven).status, CheckStatus::Fail);
    }

    #[test]
    fn rollup_aggregates_per_document_results() {
        let clean = vec![
            json!({"filename": "a.pdf", "fail_count": 0, "warning_count": 1}),
            json!({"filename": "b.pdf", "fail_count": 0, "warning_count": 0}),
        ];
        assert_eq!(per_document_rollup(&clean).status, CheckStatus::Pass);

        let failing = vec![
            json!({"filename": "a.pdf", "fail_count": 2, "warning_count": 0}),
            json!({"filename": "b.pdf", "fail_count": 0, "warning_count": 0}),
        ];
        let c = per_document_rollup(&failing);
        assert_eq!(c.status, CheckStatus::Fail);
        assert!(c.details.contains("a.pdf"));
    }

    #[tokio::test]
    async fn single_fail_rolls_up_to_medium_risk() {
        // A Canva creator fails the tool-fingerprint check; everything else passes or
        // warns below the medium threshold.
        let snapshot = DocumentSnapshot {
            page_count: 1,
            pages: vec![page_with_fonts(&["ArialMT"])],
            metadata: PdfMetadata {
                creator: "Canva".to_string(),
                producer: "Canva".to_string(),
                creation_date: "D:20250101120000".to_string(),
                mod_date: "D:20250101120000".to_string(),
                keywords: String::new(),
            },
            render: RenderProfile {
                page_dimensions_px: vec![(2550, 3300)],
                page_sharpness: vec![1500.0],
                spread_sharpness: vec![1500.0],
                first_page_png: None,
                first_page_header_png: None,
                first_page_sharpness_150: Some(1500.0),
            },
        };
        let model = ModelClient::disabled(reqwest::Client::new());
        let out = analyse(&snapshot, &test_config(), &model).await;
        assert_eq!(out.risk_level, "medium");
        assert_eq!(out.results["fail_count"], 1);
    }
}
