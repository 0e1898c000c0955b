//! PDF primitive layer.
//!
//! All pdfium work happens synchronously inside `spawn_blocking` (pdfium
//! handles are not `Send`); the rest of the pipeline consumes an immutable
//! [`DocumentSnapshot`] built once per document.

pub mod engine;
pub mod sharpness;

use chrono::NaiveDateTime;
use std::collections::BTreeSet;

/// A positioned token on a page, in PDF points with a top-down y axis.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub x0: f64,
    pub x1: f64,
    pub top: f64,
    pub bottom: f64,
    pub text: String,
}

/// A reconstructed table: rows of cell strings.
pub type Table = Vec<Vec<String>>;

/// Everything the pipeline needs from one page.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    /// 1-based page number.
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub words: Vec<WordBox>,
    pub tables: Vec<Table>,
    pub fonts: BTreeSet<String>,
}

/// Document information dictionary, raw strings as stored in the PDF.
#[derive(Debug, Clone, Default)]
pub struct PdfMetadata {
    pub creator: String,
    pub producer: String,
    pub creation_date: String,
    pub mod_date: String,
    pub keywords: String,
}

/// Raster-derived measurements at the configured per-check DPIs.
#[derive(Debug, Clone, Default)]
pub struct RenderProfile {
    /// (width, height) in pixels per page at the dimension-check DPI.
    pub page_dimensions_px: Vec<(u32, u32)>,
    /// Laplacian variance per page at the clarity DPI.
    pub page_sharpness: Vec<f64>,
    /// Laplacian variance per page at the spread DPI.
    pub spread_sharpness: Vec<f64>,
    /// Page 1 as base64 PNG at the visual-tampering DPI.
    pub first_page_png: Option<String>,
    /// Top 20% of page 1 as base64 PNG at 150 DPI (logo area).
    pub first_page_header_png: Option<String>,
    /// Page-1 sharpness at 150 DPI, used by the group consistency check.
    pub first_page_sharpness_150: Option<f64>,
}

/// Immutable per-document snapshot shared read-only across agents.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    pub page_count: usize,
    pub pages: Vec<PageSnapshot>,
    pub metadata: PdfMetadata,
    pub render: RenderProfile,
}

impl DocumentSnapshot {
    /// True iff the first three pages each yield fewer than 20
    /// non-whitespace text characters.
    pub fn is_scanned(&self) -> bool {
        let sample = self.pages.iter().take(3);
        let mut checked = 0;
        for page in sample {
            checked += 1;
            let chars = page.text.chars().filter(|c| !c.is_whitespace()).count();
            if chars >= 20 {
                return false;
            }
        }
        checked > 0
    }

    /// Reading-order text of the first `n` pages joined with blank lines.
    pub fn first_pages_text(&self, n: usize) -> String {
        self.pages
            .iter()
            .take(n)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Parse a PDF date string like `D:20200101120000+08'00'`.
pub fn parse_pdf_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let digits = raw.strip_prefix("D:").unwrap_or(raw);
    if digits.len() < 14 || !digits.as_bytes()[..14].iter().all(u8::is_ascii_digit) {
        return None;
    }
    NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_text(text: &str) -> PageSnapshot {
        PageSnapshot {
            number: 1,
            width: 612.0,
            height: 792.0,
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_pdf_dates_with_and_without_offset() {
        let dt = parse_pdf_date("D:20250101120000+08'00'").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-01 12:00:00");

        let dt = parse_pdf_date("D:20241231235959").unwrap();
        assert_eq!(dt.format("%H:%M:%S").to_string(), "23:59:59");

        assert!(parse_pdf_date("").is_none());
        assert!(parse_pdf_date("D:2024").is_none());
        assert!(parse_pdf_date("not a date").is_none());
    }

    #[test]
    fn scanned_detection_uses_first_three_pages() {
        let mut snap = DocumentSnapshot {
            page_count: 3,
            pages: vec![page_with_text("  \n "), page_with_text("ab"), page_with_text("x")],
            ..Default::default()
        };
        assert!(snap.is_scanned());

        snap.pages[1] = page_with_text("BALANCE B/F 12,345.00 some real statement text");
        assert!(!snap.is_scanned());
    }

    #[test]
    fn empty_document_is_not_scanned() {
        let snap = DocumentSnapshot::default();
        assert!(!snap.is_scanned());
    }
}
