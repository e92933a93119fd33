//! Parser for hOCR format files.
//!
//! hOCR is HTML with class-driven structure (`ocr_page`, `ocr_par`,
//! `ocr_line`, `ocrx_word`, ...) and a `title` attribute carrying a
//! semicolon-separated property bag (`bbox`, `baseline`, `x_wconf`, ...).
//! The parser converts such a document into an [`OcrElement`] tree.
//!
//! For details of the format, see <http://kba.github.io/hocr-spec/1.2/>.

use std::path::Path;

use roxmltree::{Document, Node};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::geometry::{Baseline, BoundingBox};
use crate::hocr::element::{FontInfo, OcrClass, OcrElement, TextDirection};

/// Parser for one hOCR document.
///
/// Elements without a usable bbox are skipped; empty lines and paragraphs are
/// pruned. A hard error is raised only when the document itself cannot be
/// parsed or contains no `ocr_page` with a bbox.
pub struct HocrParser<'a> {
    doc: Document<'a>,
}

impl<'a> HocrParser<'a> {
    /// Parse an hOCR document from its XHTML source.
    pub fn new(source: &'a str) -> Result<Self> {
        let doc = Document::parse(source)
            .map_err(|e| Error::HocrParse(format!("not a well-formed document: {e}")))?;
        Ok(Self { doc })
    }

    /// Parse the first `ocr_page` into an [`OcrElement`] tree.
    pub fn parse(&self) -> Result<OcrElement> {
        let page_node = self
            .doc
            .descendants()
            .find(|n| n.has_tag_name_local("div") && n.has_ocr_class("ocr_page"))
            .ok_or_else(|| Error::HocrParse("no ocr_page element found".into()))?;
        self.parse_page(page_node)
    }

    fn parse_page(&self, node: Node<'_, '_>) -> Result<OcrElement> {
        let title = node.attribute("title").unwrap_or("");
        let bbox = parse_bbox(title)
            .ok_or_else(|| Error::HocrParse("ocr_page missing bbox".into()))?;

        let mut page = OcrElement::new(OcrClass::Page);
        page.bbox = Some(bbox);
        page.page_number = parse_uint(title, "ppageno").map(|n| n as usize);
        page.dpi = parse_scan_res(title);

        for par_node in node
            .descendants()
            .filter(|n| n.has_tag_name_local("p") && n.has_ocr_class("ocr_par"))
        {
            if let Some(paragraph) = self.parse_paragraph(par_node) {
                page.children.push(paragraph);
            }
        }

        // Some engines emit words directly under the page with no paragraph
        // or line structure. Accept them as a fallback.
        if page.children.is_empty() {
            for word_node in node
                .descendants()
                .filter(|n| n.has_tag_name_local("span") && n.has_ocr_class("ocrx_word"))
            {
                if let Some(word) = parse_word(word_node) {
                    page.children.push(word);
                }
            }
            if !page.children.is_empty() {
                debug!(
                    words = page.children.len(),
                    "hOCR page has words without line structure"
                );
            }
        }

        Ok(page)
    }

    fn parse_paragraph(&self, node: Node<'_, '_>) -> Option<OcrElement> {
        let title = node.attribute("title").unwrap_or("");

        let mut paragraph = OcrElement::new(OcrClass::Paragraph);
        paragraph.bbox = parse_bbox(title);
        paragraph.direction = parse_direction(node);
        paragraph.language = node.attribute("lang").map(str::to_owned);

        for span in node.descendant_elements("span") {
            let Some(class) = span.attribute("class") else {
                continue;
            };
            let Some(ocr_class) = line_class(class) else {
                continue;
            };
            if let Some(line) = parse_line(span, ocr_class, &paragraph) {
                paragraph.children.push(line);
            }
        }

        if paragraph.children.is_empty() {
            return None;
        }
        Some(paragraph)
    }
}

fn parse_line(node: Node<'_, '_>, ocr_class: OcrClass, parent: &OcrElement) -> Option<OcrElement> {
    let title = node.attribute("title").unwrap_or("");
    let bbox = parse_bbox(title)?;

    let mut line = OcrElement::new(ocr_class);
    line.bbox = Some(bbox);
    line.baseline = parse_baseline(title);
    line.textangle = parse_float(title, "textangle");
    line.direction = parse_direction(node).or(parent.direction);
    line.language = node
        .attribute("lang")
        .map(str::to_owned)
        .or_else(|| parent.language.clone());

    for word_node in node
        .descendants()
        .filter(|n| n.has_tag_name_local("span") && n.has_ocr_class("ocrx_word"))
    {
        if let Some(word) = parse_word(word_node) {
            line.children.push(word);
        }
    }

    if line.children.is_empty() {
        return None;
    }
    Some(line)
}

fn parse_word(node: Node<'_, '_>) -> Option<OcrElement> {
    let title = node.attribute("title").unwrap_or("");
    let text = normalize_text(&element_text(node));
    if text.is_empty() {
        return None;
    }

    let mut word = OcrElement::new(OcrClass::Word);
    word.bbox = parse_bbox(title);
    word.text = Some(text);
    word.confidence = parse_float(title, "x_wconf").map(|c| c / 100.0);
    word.font = parse_font_info(title);
    Some(word)
}

/// Map an hOCR line class name to its [`OcrClass`]. `ocr_footer` is accepted
/// and treated as an ordinary line.
fn line_class(class: &str) -> Option<OcrClass> {
    match class {
        "ocr_line" | "ocr_footer" => Some(OcrClass::Line),
        "ocr_header" => Some(OcrClass::Header),
        "ocr_caption" => Some(OcrClass::Caption),
        "ocr_textfloat" => Some(OcrClass::TextFloat),
        _ => None,
    }
}

fn parse_direction(node: Node<'_, '_>) -> Option<TextDirection> {
    match node.attribute("dir") {
        Some("ltr") => Some(TextDirection::Ltr),
        Some("rtl") => Some(TextDirection::Rtl),
        _ => None,
    }
}

/// Full text content of an element and its descendants, including tail text.
fn element_text(node: Node<'_, '_>) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if descendant.is_text()
            && let Some(t) = descendant.text()
        {
            out.push_str(t);
        }
    }
    out
}

/// NFKC normalization splits ligatures and composes diacritics, so that
/// extracted text compares equal regardless of how the engine encoded it.
fn normalize_text(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_owned()
}

// ==========================================================================
// Title property bag
// ==========================================================================

/// Find the values following `key` in a title attribute. hOCR properties are
/// separated by semicolons; within a property, tokens by whitespace.
fn property_values<'t>(title: &'t str, key: &str) -> Option<Vec<&'t str>> {
    for prop in title.split(';') {
        let mut tokens = prop.split_whitespace();
        if tokens.next() == Some(key) {
            return Some(tokens.collect());
        }
    }
    None
}

fn parse_bbox(title: &str) -> Option<BoundingBox> {
    let values = property_values(title, "bbox")?;
    if values.len() != 4 {
        return None;
    }
    let mut coords = [0.0f64; 4];
    for (slot, value) in coords.iter_mut().zip(&values) {
        *slot = value.parse::<u32>().ok()?.into();
    }
    let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3]);
    bbox.is_valid().then_some(bbox)
}

fn parse_baseline(title: &str) -> Option<Baseline> {
    let values = property_values(title, "baseline")?;
    if values.len() != 2 {
        return None;
    }
    let slope: f64 = values[0].parse().ok()?;
    let intercept: f64 = values[1].parse().ok()?;
    Some(Baseline::new(slope, intercept))
}

fn parse_float(title: &str, key: &str) -> Option<f64> {
    property_values(title, key)?.first()?.parse().ok()
}

fn parse_uint(title: &str, key: &str) -> Option<u32> {
    property_values(title, key)?.first()?.parse().ok()
}

/// `scan_res X Y` carries the raster DPI; the X value is used.
fn parse_scan_res(title: &str) -> Option<f64> {
    let values = property_values(title, "scan_res")?;
    values.first()?.parse().ok()
}

fn parse_font_info(title: &str) -> Option<FontInfo> {
    let name = property_values(title, "x_font").and_then(|v| v.first().map(|s| (*s).to_owned()));
    let size = parse_float(title, "x_fsize");
    if name.is_none() && size.is_none() {
        return None;
    }
    Some(FontInfo { name, size })
}

// ==========================================================================
// roxmltree helpers
// ==========================================================================

trait NodeExt<'a, 'input: 'a> {
    fn has_tag_name_local(&self, local: &str) -> bool;
    fn has_ocr_class(&self, class: &str) -> bool;
    fn descendant_elements<'b>(&self, local: &'b str) -> impl Iterator<Item = Node<'a, 'input>> + 'b
    where
        'a: 'b,
        'input: 'b;
}

impl<'a, 'input> NodeExt<'a, 'input> for Node<'a, 'input> {
    /// Tag match ignoring the XML namespace, which hOCR files may omit.
    fn has_tag_name_local(&self, local: &str) -> bool {
        self.is_element() && self.tag_name().name() == local
    }

    fn has_ocr_class(&self, class: &str) -> bool {
        self.attribute("class") == Some(class)
    }

    fn descendant_elements<'b>(&self, local: &'b str) -> impl Iterator<Item = Node<'a, 'input>> + 'b
    where
        'a: 'b,
        'input: 'b,
    {
        self.descendants()
            .filter(move |n| n.is_element() && n.tag_name().name() == local)
    }
}

/// Parse an hOCR file on disk into an [`OcrElement`] tree.
pub fn parse_hocr_file(path: &Path) -> Result<OcrElement> {
    let source = std::fs::read_to_string(path).map_err(|e| Error::IoPath {
        path: path.to_path_buf(),
        source: e,
    })?;
    HocrParser::new(&source)?.parse()
}
