//! Text-layer rendering: OCR tree in, single- or multi-page PDF out.
//!
//! # Coordinate systems
//!
//! hOCR uses a top-left origin with Y down, in pixels; PDF a bottom-left
//! origin with Y up, in points. Each page's content stream opens with a
//! single `cm` that scales pixels to points; all subsequent coordinates are
//! hOCR pixel units with the Y axis flipped at emission time
//! (`y_pdf = page_height - y_hocr`).
//!
//! # Line layout
//!
//! Words are positioned along the line's baseline in a dedicated baseline
//! coordinate system, then horizontally scaled (`Tz`) so each word's glyphs
//! span exactly its OCR bounding box. The whole line is emitted as one
//! BT..ET block: a widely-deployed PDF text extractor does not carry `Tz`
//! across BT/ET boundaries, so inter-word spaces are rendered inside the
//! block, stretched to span the gap to the next word.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lopdf::{Dictionary, Document, Object, Stream};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::font::{FontManager, MultiFontManager, ShapedGlyph};
use crate::geometry::{BoundingBox, Matrix, Resolution};
use crate::hocr::{OcrClass, OcrElement, TextDirection};
use crate::render::debug::{
    BLUE, CYAN, DARK_GREEN, DebugRenderOptions, GREEN, MAGENTA, RED, fill_rect, stroke_line,
    stroke_rect,
};
use crate::render::embed::FontEmbedder;

/// Rendering knobs. Text is invisible (render mode 3) unless debugging.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub invisible_text: bool,
    pub debug: DebugRenderOptions,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            invisible_text: true,
            debug: DebugRenderOptions::default(),
        }
    }
}

/// One page of rendered content, pending document assembly.
struct ComposedPage {
    content: String,
    width_pt: f64,
    height_pt: f64,
}

/// Per-word data gathered before emission.
struct WordRender {
    text: String,
    x_baseline: f64,
    font: Arc<FontManager>,
    word_tz: f64,
}

/// Renders [`OcrElement`] page trees into PDF text layers.
pub struct TextLayerRenderer<'a> {
    fonts: &'a MultiFontManager,
    options: RenderOptions,
    logged_aspect_suppression: AtomicBool,
}

impl<'a> TextLayerRenderer<'a> {
    pub fn new(fonts: &'a MultiFontManager, options: RenderOptions) -> Self {
        Self {
            fonts,
            options,
            logged_aspect_suppression: AtomicBool::new(false),
        }
    }

    /// Whether text will actually be invisible (debug draws force it on).
    fn invisible_text(&self) -> bool {
        self.options.invisible_text && !self.options.debug.any_enabled()
    }

    /// Render one page to a PDF file.
    pub fn render_page(&self, page: &OcrElement, dpi: f64, output: &Path) -> Result<()> {
        let bytes = self.render_page_to_bytes(page, dpi)?;
        std::fs::write(output, bytes).map_err(|e| Error::IoPath {
            path: output.to_path_buf(),
            source: e,
        })
    }

    /// Render one page to PDF bytes.
    pub fn render_page_to_bytes(&self, page: &OcrElement, dpi: f64) -> Result<Vec<u8>> {
        let mut embedder = FontEmbedder::new();
        let composed = self.compose_page(page, dpi, &mut embedder)?;
        build_document(vec![composed], &embedder)
    }

    /// Render several pages into one PDF, sharing font resources.
    ///
    /// `pages` is `(pageno, tree, dpi)`; pages are emitted in the given
    /// order and carry no cross-page state besides font registrations.
    pub fn render_pages(&self, pages: &[(usize, &OcrElement, f64)], output: &Path) -> Result<()> {
        let bytes = self.render_pages_to_bytes(pages)?;
        std::fs::write(output, bytes).map_err(|e| Error::IoPath {
            path: output.to_path_buf(),
            source: e,
        })
    }

    pub fn render_pages_to_bytes(&self, pages: &[(usize, &OcrElement, f64)]) -> Result<Vec<u8>> {
        if pages.is_empty() {
            return Err(Error::Render("no pages to render".into()));
        }
        let mut embedder = FontEmbedder::new();
        let mut composed = Vec::with_capacity(pages.len());
        for (pageno, page, dpi) in pages {
            debug!(page = pageno + 1, "rendering text layer");
            composed.push(self.compose_page(page, *dpi, &mut embedder)?);
        }
        build_document(composed, &embedder)
    }

    // ======================================================================
    // Page composition
    // ======================================================================

    fn compose_page(
        &self,
        page: &OcrElement,
        dpi: f64,
        embedder: &mut FontEmbedder,
    ) -> Result<ComposedPage> {
        if page.ocr_class != OcrClass::Page {
            return Err(Error::Render("root element must be an ocr_page".into()));
        }
        let page_bbox = page
            .bbox
            .ok_or_else(|| Error::Render("page must have a bounding box".into()))?;
        let res = Resolution::square(dpi)?;

        let page_h = page_bbox.height();
        let scale = 72.0 / dpi;
        let mut ops = String::new();
        let _ = writeln!(ops, "q\n{scale:.6} 0 0 {scale:.6} 0 0 cm");

        let mut rendered_paragraphs = false;
        for para in page.paragraphs() {
            rendered_paragraphs = true;
            if self.options.debug.render_paragraph_bbox
                && let Some(bbox) = para.bbox
            {
                stroke_rect(
                    &mut ops,
                    CYAN,
                    0.5,
                    bbox.left,
                    page_h - bbox.bottom,
                    bbox.width(),
                    bbox.height(),
                );
            }
            for line in para.lines() {
                self.render_line(&mut ops, line, page_h, dpi, embedder);
            }
        }

        if !rendered_paragraphs {
            for line in page.lines() {
                rendered_paragraphs = true;
                self.render_line(&mut ops, line, page_h, dpi, embedder);
            }
        }

        // Engines sometimes report words with no line structure at all; give
        // them a synthetic line spanning their union.
        if !rendered_paragraphs {
            let words: Vec<OcrElement> = page.words().cloned().collect();
            if let Some(bbox) = words
                .iter()
                .filter_map(|w| w.bbox)
                .reduce(|acc, b| acc.union(&b))
            {
                let mut line = OcrElement::new(OcrClass::Line);
                line.bbox = Some(bbox);
                line.language = page.language.clone();
                line.children = words;
                self.render_line(&mut ops, &line, page_h, dpi, embedder);
            }
        }

        ops.push_str("Q\n");
        Ok(ComposedPage {
            content: ops,
            width_pt: res.pt_from_px_x(page_bbox.width()),
            height_pt: res.pt_from_px_y(page_h),
        })
    }

    // ======================================================================
    // Line rendering
    // ======================================================================

    fn render_line(
        &self,
        ops: &mut String,
        line: &OcrElement,
        page_h: f64,
        dpi: f64,
        embedder: &mut FontEmbedder,
    ) {
        let Some(line_bbox) = line.bbox else { return };
        if line_bbox.height() <= 0.0 {
            error!("line box is invalid so we cannot render it: {line_bbox:?}");
            return;
        }

        if self.options.debug.render_line_bbox {
            stroke_rect(
                ops,
                BLUE,
                0.5,
                line_bbox.left,
                page_h - line_bbox.bottom,
                line_bbox.width(),
                line_bbox.height(),
            );
        }

        let mut textangle = line.textangle.unwrap_or(0.0);
        let mut slope = 0.0;
        let mut intercept = 0.0;
        let mut has_meaningful_baseline = false;
        if let Some(baseline) = line.baseline {
            slope = baseline.effective_slope();
            intercept = baseline.intercept;
            has_meaningful_baseline = true;
        }

        // Engines that miss rotation on a rotated line encode it as a very
        // steep baseline slope instead. |slope| > 1.0 is past 45 degrees:
        // treat it as rotation and recompute the intercept from font metrics.
        if textangle == 0.0 && slope.abs() > 1.0 {
            textangle = slope.atan().to_degrees();
            slope = 0.0;
            has_meaningful_baseline = false;
        }

        // The hOCR bbox is the axis-aligned bounding box of the (possibly
        // rotated) text. This matrix maps un-rotated line-local coordinates
        // to page coordinates: rotate about the local origin, then move to
        // the bbox corner. Its inverse recovers the line's own size.
        let line_size_aabb_matrix = Matrix::identity()
            .rotated(-textangle)
            .translated(line_bbox.left, line_bbox.top);
        let Ok(inv_line_matrix) = line_size_aabb_matrix.inverse() else {
            return;
        };
        let unrotated = inv_line_matrix.apply_to_bbox(&line_bbox);
        let (line_w, line_h) = (unrotated.width(), unrotated.height());

        if !has_meaningful_baseline {
            let metrics = self.fonts.default_metrics_font().get_font_metrics();
            let ascent_norm = metrics.ascent / metrics.units_per_em;
            let descent_norm = metrics.descent / metrics.units_per_em;
            intercept = -descent_norm.abs() * line_h / (ascent_norm + descent_norm.abs());
        }

        let slope_angle_deg = if slope == 0.0 {
            0.0
        } else {
            slope.atan().to_degrees()
        };

        // Baseline coordinates: x runs along the (sloped) baseline, origin at
        // its start. Apply the slope rotation first, drop to the baseline
        // height within the line, then map through the line matrix.
        let baseline_matrix = Matrix::identity()
            .rotated(slope_angle_deg)
            .translated(0.0, line_h + intercept)
            .then(&line_size_aabb_matrix);

        // Font size fills the span from baseline to the top of the line.
        let mut font_size = line_h + intercept;
        let one_pt_in_px = dpi / 72.0;
        if font_size < one_pt_in_px {
            font_size = 0.8 * line_h;
        }

        let total_rotation_deg = -textangle + slope_angle_deg;

        if self.options.debug.render_baseline {
            let (x1, y1) = baseline_matrix.apply(0.0, 0.0);
            let (x2, y2) = baseline_matrix.apply(line_w, 0.0);
            stroke_line(ops, MAGENTA, 0.75, x1, page_h - y1, x2, page_h - y2);
        }

        let words: Vec<&OcrElement> = line
            .children
            .iter()
            .filter(|w| {
                w.ocr_class == OcrClass::Word && w.text.as_deref().is_some_and(|t| !t.is_empty())
            })
            .collect();
        if words.is_empty() {
            return;
        }

        if !self.aspect_ratio_plausible(
            &words,
            font_size,
            slope_angle_deg,
            line_w,
            line_h,
            line.language.as_deref(),
        ) {
            return;
        }

        let Ok(inv_baseline_matrix) = baseline_matrix.inverse() else {
            return;
        };

        let mut word_render_data: Vec<WordRender> = Vec::with_capacity(words.len());
        for word in &words {
            let (Some(text), Some(word_bbox)) = (word.text.as_deref(), word.bbox) else {
                continue;
            };
            let word_width = word_bbox.width();

            if self.options.debug.render_word_bbox {
                stroke_rect(
                    ops,
                    GREEN,
                    0.3,
                    word_bbox.left,
                    page_h - word_bbox.bottom,
                    word_bbox.width(),
                    word_bbox.height(),
                );
            }
            if self.options.debug.render_triangle {
                // Conveys word height and drawing direction: across the
                // bottom, up the left edge, and the closing diagonal.
                let (l, t, r, b) = (
                    word_bbox.left,
                    page_h - word_bbox.top,
                    word_bbox.right,
                    page_h - word_bbox.bottom,
                );
                stroke_line(ops, RED, 0.1, l, b, r, b);
                stroke_line(ops, RED, 0.1, l, b, l, t);
                stroke_line(ops, RED, 0.1, r, b, l, t);
            }

            let box_in_baseline = inv_baseline_matrix.apply_to_bbox(&word_bbox);

            let font = self
                .fonts
                .select_font_for_word(text, line.language.as_deref());
            let natural_width = font.text_width(text, font_size);
            if natural_width <= 0.0 || word_width <= 0.0 {
                // A zero-width word cannot be stretched into its box.
                continue;
            }
            word_render_data.push(WordRender {
                text: text.to_owned(),
                x_baseline: box_in_baseline.left,
                font,
                word_tz: (word_width / natural_width) * 100.0,
            });
        }

        if word_render_data.is_empty() {
            return;
        }

        if self.options.debug.render_space_bbox {
            for pair in word_render_data.windows(2) {
                let x1 = pair[0].x_baseline + pair[0].font.text_width(&pair[0].text, font_size);
                let x2 = pair[1].x_baseline;
                if x2 > x1 {
                    let space = baseline_matrix.apply_to_bbox(&BoundingBox::new(
                        x1,
                        -font_size,
                        x2,
                        0.0,
                    ));
                    fill_rect(
                        ops,
                        DARK_GREEN,
                        space.left,
                        page_h - space.bottom,
                        space.width(),
                        space.height(),
                    );
                }
            }
        }

        self.emit_line_bt_block(
            ops,
            &word_render_data,
            &baseline_matrix,
            font_size,
            total_rotation_deg,
            page_h,
            line.direction,
            embedder,
        );
    }

    /// Suppress lines whose bounding box shape cannot possibly contain their
    /// text. This catches engines that misread rotated text without
    /// reporting the rotation at all (slope 0, no textangle): the result is
    /// gibberish in a tall, narrow box.
    fn aspect_ratio_plausible(
        &self,
        words: &[&OcrElement],
        font_size: f64,
        slope_angle_deg: f64,
        line_w: f64,
        line_h: f64,
        language: Option<&str>,
    ) -> bool {
        if line_w <= 0.0 || line_h <= 0.0 || font_size <= 0.0 {
            return true;
        }
        // Wider-than-tall is the normal shape for horizontal text; only
        // tall-narrow boxes need the font measurement check.
        if line_w >= line_h {
            return true;
        }

        let line_text = words
            .iter()
            .filter_map(|w| w.text.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        if line_text.is_empty() {
            return true;
        }

        let font = self.fonts.select_font_for_word(&line_text, language);
        let natural_width = font.text_width(&line_text, font_size);
        if natural_width <= 0.0 {
            return true;
        }

        // AABB the text would occupy at its baseline slope.
        let theta = slope_angle_deg.abs().to_radians();
        let expected_w = natural_width * theta.cos() + font_size * theta.sin();
        let expected_h = natural_width * theta.sin() + font_size * theta.cos();
        if expected_h <= 0.0 {
            return true;
        }

        let actual_aspect = line_w / line_h;
        let expected_aspect = expected_w / expected_h;
        let ratio = actual_aspect / expected_aspect;
        if ratio >= 0.1 {
            return true;
        }

        let preview: String = line_text.chars().take(80).collect();
        debug!(
            actual = actual_aspect,
            expected = expected_aspect,
            ratio,
            text = preview,
            "suppressing text with improbable aspect ratio"
        );
        if !self.logged_aspect_suppression.swap(true, Ordering::Relaxed) {
            info!("Suppressing OCR output text with improbable aspect ratio");
        }
        false
    }

    // ======================================================================
    // BT block emission
    // ======================================================================

    #[allow(clippy::too_many_arguments)]
    fn emit_line_bt_block(
        &self,
        ops: &mut String,
        words: &[WordRender],
        baseline_matrix: &Matrix,
        font_size: f64,
        total_rotation_deg: f64,
        page_h: f64,
        direction: Option<TextDirection>,
        embedder: &mut FontEmbedder,
    ) {
        let has_rotation = total_rotation_deg.abs() > 0.01;
        let (bx0, by0_down) = baseline_matrix.apply(0.0, 0.0);
        let by0 = page_h - by0_down;

        if has_rotation {
            // Direction of the baseline in PDF (y-up) coordinates; the cm
            // maps a baseline-aligned local frame onto the page.
            let (bx1, by1_down) = baseline_matrix.apply(100.0, 0.0);
            let by1 = page_h - by1_down;
            let (dx, dy) = (bx1 - bx0, by1 - by0);
            let length = dx.hypot(dy);
            let (cos_a, sin_a) = if length > 0.0 {
                (dx / length, dy / length)
            } else {
                (1.0, 0.0)
            };
            let _ = writeln!(
                ops,
                "q\n{cos_a:.6} {sin_a:.6} {:.6} {cos_a:.6} {bx0:.2} {by0:.2} cm",
                -sin_a
            );
        }

        ops.push_str("BT\n");
        let _ = writeln!(ops, "{} Tr", if self.invisible_text() { 3 } else { 0 });

        let first_x = words[0].x_baseline;
        if has_rotation {
            let _ = writeln!(ops, "{first_x:.2} 0 Td");
        } else {
            let (px, py_down) = baseline_matrix.apply(first_x, 0.0);
            let _ = writeln!(ops, "{px:.2} {:.2} Td", page_h - py_down);
        }

        let mut prev_font_name: Option<String> = None;
        let mut prev_x = first_x;

        for (i, word) in words.iter().enumerate() {
            let is_last = i == words.len() - 1;

            if prev_font_name.as_deref() != Some(word.font.name()) {
                let resource = embedder.resource_name(&word.font);
                let _ = writeln!(ops, "/{resource} {font_size:.2} Tf");
                prev_font_name = Some(word.font.name().to_owned());
            }

            if i > 0 {
                if has_rotation {
                    let _ = writeln!(ops, "{:.2} 0 Td", word.x_baseline - prev_x);
                } else {
                    let (px_prev, py_prev) = baseline_matrix.apply(prev_x, 0.0);
                    let (px_curr, py_curr) = baseline_matrix.apply(word.x_baseline, 0.0);
                    // Y delta flips sign going from hOCR to PDF coordinates.
                    let dx = px_curr - px_prev;
                    let dy = nonneg_zero(-(py_curr - py_prev));
                    let _ = writeln!(ops, "{dx:.2} {dy:.2} Td");
                }
            }

            // A trailing space is stretched so that "word " spans exactly to
            // the next word's start, keeping word boundaries intact for text
            // extractors that reset Tz at BT. CJK text carries no spaces.
            let (shaped, render_tz) = if is_last {
                (word.font.shape(&word.text, direction), word.word_tz)
            } else {
                let next = &words[i + 1];
                let advance = next.x_baseline - word.x_baseline;
                if advance > 0.0 && !(is_cjk_only(&word.text) && is_cjk_only(&next.text)) {
                    let with_space = format!("{} ", word.text);
                    let shaped = word.font.shape(&with_space, direction);
                    let units: f64 = shaped.iter().map(|g| g.advance).sum();
                    let natural =
                        units * font_size / word.font.get_font_metrics().units_per_em;
                    if natural > 0.0 {
                        (shaped, (advance / natural) * 100.0)
                    } else {
                        (word.font.shape(&word.text, direction), word.word_tz)
                    }
                } else {
                    (word.font.shape(&word.text, direction), word.word_tz)
                }
            };

            embedder.record_usage(&word.font, &shaped);
            let _ = writeln!(ops, "{render_tz:.2} Tz");
            let _ = writeln!(ops, "<{}> Tj", glyph_hex(&shaped));

            prev_x = word.x_baseline;
        }

        ops.push_str("ET\n");
        if has_rotation {
            ops.push_str("Q\n");
        }
    }
}

/// Normalize negative zero so it never reaches the content stream.
fn nonneg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// Hex-encoded CID string for a `Tj` operand.
fn glyph_hex(glyphs: &[ShapedGlyph]) -> String {
    let mut hex = String::with_capacity(glyphs.len() * 4);
    for glyph in glyphs {
        let _ = write!(hex, "{:04X}", glyph.glyph_id);
    }
    hex
}

/// True when the text consists only of CJK codepoints. CJK scripts do not
/// separate words with spaces, so none are injected between such words.
pub fn is_cjk_only(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(|c| {
            matches!(u32::from(c),
                0x4E00..=0x9FFF        // CJK Unified Ideographs
                | 0x3400..=0x4DBF      // CJK Extension A
                | 0x20000..=0x2A6DF    // CJK Extension B
                | 0x2A700..=0x2B73F    // CJK Extension C
                | 0x2B740..=0x2B81F    // CJK Extension D
                | 0x2B820..=0x2CEAF    // CJK Extension E
                | 0x2CEB0..=0x2EBEF    // CJK Extension F
                | 0x30000..=0x3134F    // CJK Extension G
                | 0x3040..=0x309F      // Hiragana
                | 0x30A0..=0x30FF      // Katakana
                | 0x31F0..=0x31FF      // Katakana Phonetic Extensions
                | 0xAC00..=0xD7AF      // Hangul Syllables
                | 0x1100..=0x11FF      // Hangul Jamo
                | 0x3130..=0x318F      // Hangul Compatibility Jamo
                | 0xA960..=0xA97F      // Hangul Jamo Extended-A
                | 0xD7B0..=0xD7FF      // Hangul Jamo Extended-B
                | 0x3000..=0x303F      // CJK Symbols and Punctuation
                | 0xFF00..=0xFFEF      // Halfwidth and Fullwidth Forms
            )
        })
}

// ==========================================================================
// Document assembly
// ==========================================================================

fn build_document(pages: Vec<ComposedPage>, embedder: &FontEmbedder) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let font_dict = embedder.write_fonts(&mut doc);
    let resources_id = doc.add_object(Dictionary::from_iter([(
        "Font",
        Object::Dictionary(font_dict),
    )]));

    let mut kids = Vec::with_capacity(pages.len());
    for page in &pages {
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            page.content.as_bytes().to_vec(),
        ));
        let page_dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page.width_pt as f32),
                    Object::Real(page.height_pt as f32),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
        ]);
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(page_count)),
        ])),
    );

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| Error::Render(format!("failed to save text layer: {e}")))?;
    Ok(bytes)
}
