//! pdfium-backed snapshot builder.
//!
//! The only module that talks to pdfium. Everything here is synchronous;
//! the async wrappers at the bottom move the work onto the blocking pool.

use super::sharpness::laplacian_variance;
use super::{DocumentSnapshot, PageSnapshot, PdfMetadata, RenderProfile, Table, WordBox};
use crate::models::CheckDpiConfig;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::BTreeSet;
use std::io::Cursor;

/// Character-gap tolerance when grouping characters into words (points).
const WORD_X_TOLERANCE: f64 = 3.0;
/// Row tolerance when grouping characters into words (points).
const WORD_Y_TOLERANCE: f64 = 3.0;
/// Minimum length for a path segment to count as a table rule (points).
const MIN_RULE_LENGTH: f64 = 8.0;
/// Cluster tolerance for rule coordinates (points).
const RULE_CLUSTER_TOLERANCE: f64 = 2.0;

/// Options controlling how much raster work the snapshot performs.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// When set, build the [`RenderProfile`] at these DPIs.
    pub render: Option<CheckDpiConfig>,
}

fn bind_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .context("bind pdfium library")?;
    Ok(Pdfium::new(bindings))
}

/// Number of pages in the PDF at `path`.
pub fn page_count(path: &str) -> Result<usize> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("open pdf {path}"))?;
    Ok(document.pages().len() as usize)
}

/// Build the full document snapshot.
pub fn snapshot(path: &str, options: &SnapshotOptions) -> Result<DocumentSnapshot> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("open pdf {path}"))?;

    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        pages.push(read_page(&page, index as u32 + 1)?);
    }

    let metadata = read_metadata(&document);
    let render = match &options.render {
        Some(dpi) => build_render_profile(&document, dpi)?,
        None => RenderProfile::default(),
    };

    Ok(DocumentSnapshot {
        page_count: pages.len(),
        pages,
        metadata,
        render,
    })
}

/// Render every page to a base64 PNG at the given DPI (OCR input).
pub fn render_pages_png_b64(path: &str, dpi: u32) -> Result<Vec<String>> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("open pdf {path}"))?;

    let mut out = Vec::new();
    for page in document.pages().iter() {
        let image = render_page(&page, dpi)?;
        out.push(png_b64(&image)?);
    }
    Ok(out)
}

// ── page decomposition ───────────────────────────────────────────────────────

fn read_page(page: &PdfPage, number: u32) -> Result<PageSnapshot> {
    let width = page.width().value as f64;
    let height = page.height().value as f64;

    let text_page = page.text().context("page text")?;
    let text = text_page.all();

    let words = collect_words(&text_page, height);
    let rules = collect_rules(page, height);
    let tables = build_tables(&rules, &words);
    let fonts = collect_fonts(page);

    Ok(PageSnapshot {
        number,
        width,
        height,
        text,
        words,
        tables,
        fonts,
    })
}

/// Group pdfium characters into word boxes.
///
/// Blank characters within a row are kept, so visually contiguous phrases
/// ("FAST PAYMENT OTHR GELMAX") stay one token; a split happens only on a
/// horizontal gap larger than the tolerance or a change of row.
fn collect_words(text_page: &PdfPageText, page_height: f64) -> Vec<WordBox> {
    struct Pending {
        x0: f64,
        x1: f64,
        top: f64,
        bottom: f64,
        text: String,
    }

    let mut words: Vec<WordBox> = Vec::new();
    let mut current: Option<Pending> = None;

    let mut flush = |current: &mut Option<Pending>, words: &mut Vec<WordBox>| {
        if let Some(p) = current.take() {
            let trimmed = p.text.trim();
            if !trimmed.is_empty() {
                words.push(WordBox {
                    x0: p.x0,
                    x1: p.x1,
                    top: p.top,
                    bottom: p.bottom,
                    text: trimmed.to_string(),
                });
            }
        }
    };

    for ch in text_page.chars().iter() {
        let Some(unicode) = ch.unicode_char() else {
            continue;
        };
        if unicode == '\n' || unicode == '\r' {
            flush(&mut current, &mut words);
            continue;
        }
        let Ok(bounds) = ch.loose_bounds() else {
            continue;
        };
        // pdfium's y axis is bottom-up; the pipeline uses top-down.
        let left = bounds.left.value as f64;
        let right = bounds.right.value as f64;
        let top = page_height - bounds.top.value as f64;
        let bottom = page_height - bounds.bottom.value as f64;

        let mut appended = false;
        if let Some(p) = current.as_mut() {
            if (top - p.top).abs() <= WORD_Y_TOLERANCE && left - p.x1 <= WORD_X_TOLERANCE {
                p.x1 = p.x1.max(right);
                p.top = p.top.min(top);
                p.bottom = p.bottom.max(bottom);
                p.text.push(unicode);
                appended = true;
            }
        }
        if !appended {
            flush(&mut current, &mut words);
            current = Some(Pending {
                x0: left,
                x1: right,
                top,
                bottom,
                text: unicode.to_string(),
            });
        }
    }
    flush(&mut current, &mut words);

    words.sort_by(|a, b| {
        a.top
            .partial_cmp(&b.top)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal))
    });
    words
}

fn collect_fonts(page: &PdfPage) -> BTreeSet<String> {
    let mut fonts = BTreeSet::new();
    for object in page.objects().iter() {
        if let Some(text_object) = object.as_text_object() {
            let name = text_object.font().family();
            if name.is_empty() {
                continue;
            }
            // Strip subset prefix (ABCDEF+ArialMT → ArialMT).
            let base = match name.split_once('+') {
                Some((prefix, rest)) if prefix.len() == 6 => rest.to_string(),
                _ => name.clone(),
            };
            fonts.insert(base);
        }
    }
    fonts
}

// ── ruled-line table reconstruction ──────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Horizontal rule at y, spanning x0..x1 (top-down y).
    Horizontal { y: f64, x0: f64, x1: f64 },
    /// Vertical rule at x, spanning top..bottom (top-down y).
    Vertical { x: f64, top: f64, bottom: f64 },
}

fn collect_rules(page: &PdfPage, page_height: f64) -> Vec<Rule> {
    let mut rules = Vec::new();

    for object in page.objects().iter() {
        let Some(path) = object.as_path_object() else {
            continue;
        };
        let mut cursor: Option<(f64, f64)> = None;
        for segment in path.segments().iter() {
            let x = segment.x().value as f64;
            let y = page_height - segment.y().value as f64;
            match segment.segment_type() {
                PdfPathSegmentType::MoveTo => cursor = Some((x, y)),
                PdfPathSegmentType::LineTo => {
                    if let Some((px, py)) = cursor {
                        let dx = (x - px).abs();
                        let dy = (y - py).abs();
                        if dy < 1.0 && dx >= MIN_RULE_LENGTH {
                            rules.push(Rule::Horizontal {
                                y: (y + py) / 2.0,
                                x0: px.min(x),
                                x1: px.max(x),
                            });
                        } else if dx < 1.0 && dy >= MIN_RULE_LENGTH {
                            rules.push(Rule::Vertical {
                                x: (x + px) / 2.0,
                                top: py.min(y),
                                bottom: py.max(y),
                            });
                        }
                    }
                    cursor = Some((x, y));
                }
                _ => cursor = Some((x, y)),
            }
        }
    }

    rules
}

fn cluster(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut out: Vec<f64> = Vec::new();
    for v in values {
        match out.last() {
            Some(last) if (v - last).abs() <= RULE_CLUSTER_TOLERANCE => {}
            _ => out.push(v),
        }
    }
    out
}

/// Reconstruct grid tables from ruled lines, assigning words to cells by
/// midpoint containment. Borderless statements produce no rules and
/// therefore no tables; the word-position tier handles those.
fn build_tables(rules: &[Rule], words: &[WordBox]) -> Vec<Table> {
    let row_bounds = cluster(
        rules
            .iter()
            .filter_map(|r| match r {
                Rule::Horizontal { y, .. } => Some(*y),
                _ => None,
            })
            .collect(),
    );
    let col_bounds = cluster(
        rules
            .iter()
            .filter_map(|r| match r {
                Rule::Vertical { x, .. } => Some(*x),
                _ => None,
            })
            .collect(),
    );

    if row_bounds.len() < 3 || col_bounds.len() < 3 {
        return Vec::new();
    }

    let n_rows = row_bounds.len() - 1;
    let n_cols = col_bounds.len() - 1;
    let mut grid: Vec<Vec<Vec<&WordBox>>> = vec![vec![Vec::new(); n_cols]; n_rows];
    let mut hits = 0usize;

    for word in words {
        let xm = (word.x0 + word.x1) / 2.0;
        let ym = (word.top + word.bottom) / 2.0;
        let Some(col) = col_bounds.windows(2).position(|w| w[0] <= xm && xm <= w[1]) else {
            continue;
        };
        let Some(row) = row_bounds.windows(2).position(|w| w[0] <= ym && ym <= w[1]) else {
            continue;
        };
        grid[row][col].push(word);
        hits += 1;
    }

    if hits == 0 {
        return Vec::new();
    }

    let table: Table = grid
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|mut cell| {
                    cell.sort_by(|a, b| {
                        a.top
                            .partial_cmp(&b.top)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal))
                    });
                    cell.iter()
                        .map(|w| w.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect()
        })
        .collect();

    vec![table]
}

// ── metadata + rasters ───────────────────────────────────────────────────────

fn read_metadata(document: &PdfDocument) -> PdfMetadata {
    let get = |tag: PdfDocumentMetadataTagType| -> String {
        document
            .metadata()
            .get(tag)
            .map(|t| t.value().to_string())
            .unwrap_or_default()
    };

    PdfMetadata {
        creator: get(PdfDocumentMetadataTagType::Creator),
        producer: get(PdfDocumentMetadataTagType::Producer),
        creation_date: get(PdfDocumentMetadataTagType::CreationDate),
        mod_date: get(PdfDocumentMetadataTagType::ModificationDate),
        keywords: get(PdfDocumentMetadataTagType::Keywords),
    }
}

fn render_page(page: &PdfPage, dpi: u32) -> Result<DynamicImage> {
    let width_px = (page.width().value as f64 * dpi as f64 / 72.0).round() as i32;
    let bitmap = page
        .render_with_config(&PdfRenderConfig::new().set_target_width(width_px))
        .context("render page")?;
    Ok(bitmap.as_image())
}

fn png_b64(image: &DynamicImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .context("encode png")?;
    Ok(B64.encode(buf.into_inner()))
}

fn build_render_profile(document: &PdfDocument, dpi: &CheckDpiConfig) -> Result<RenderProfile> {
    let mut profile = RenderProfile::default();

    for (index, page) in document.pages().iter().enumerate() {
        // Pixel dimensions follow directly from the page box and DPI.
        let w = (page.width().value as f64 * dpi.document_dimension as f64 / 72.0).round() as u32;
        let h = (page.height().value as f64 * dpi.document_dimension as f64 / 72.0).round() as u32;
        profile.page_dimensions_px.push((w, h));

        let clarity_image = render_page(&page, dpi.page_clarity)?;
        let clarity = laplacian_variance(&clarity_image);
        profile.page_sharpness.push(clarity);

        if dpi.sharpness_spread == dpi.page_clarity {
            profile.spread_sharpness.push(clarity);
        } else {
            let spread_image = render_page(&page, dpi.sharpness_spread)?;
            profile.spread_sharpness.push(laplacian_variance(&spread_image));
        }

        if index == 0 {
            let visual = render_page(&page, dpi.visual_tampering)?;
            profile.first_page_png = Some(png_b64(&visual)?);

            let logo_dpi = 150;
            let logo_page = if dpi.visual_tampering == logo_dpi {
                visual
            } else {
                render_page(&page, logo_dpi)?
            };
            profile.first_page_sharpness_150 = Some(laplacian_variance(&logo_page));
            let header_height = (logo_page.height() as f64 * 0.20) as u32;
            if header_height > 0 {
                let header = logo_page.crop_imm(0, 0, logo_page.width(), header_height);
                profile.first_page_header_png = Some(png_b64(&header)?);
            }
        }
    }

    Ok(profile)
}

/// Metadata plus page-1 sharpness at 150 DPI, for cross-document checks.
pub fn fingerprint(path: &str) -> Result<(PdfMetadata, f64)> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("open pdf {path}"))?;
    let metadata = read_metadata(&document);
    let page = document.pages().get(0).context("first page")?;
    let image = render_page(&page, 150)?;
    Ok((metadata, laplacian_variance(&image)))
}

// ── async wrappers ───────────────────────────────────────────────────────────

/// Load the document snapshot on the blocking pool.
pub async fn load_snapshot(path: String, options: SnapshotOptions) -> Result<DocumentSnapshot> {
    tokio::task::spawn_blocking(move || snapshot(&path, &options))
        .await
        .context("snapshot task join")?
}

/// Count pages on the blocking pool.
pub async fn load_page_count(path: String) -> Result<usize> {
    tokio::task::spawn_blocking(move || page_count(&path))
        .await
        .context("page-count task join")?
}

/// Render all pages to base64 PNGs on the blocking pool.
pub async fn load_page_images(path: String, dpi: u32) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || render_pages_png_b64(&path, dpi))
        .await
        .context("render task join")?
}

/// Load the cross-document fingerprint on the blocking pool.
pub async fn load_fingerprint(path: String) -> Result<(PdfMetadata, f64)> {
    tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .context("fingerprint task join")?
}
