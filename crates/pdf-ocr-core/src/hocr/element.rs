//! Engine-agnostic OCR result tree.
//!
//! OCR engines describe a page as nested layout elements:
//! page -> paragraph -> line -> word. `OcrElement` models that tree
//! independently of any engine's native output format; the hOCR parser
//! produces it and engines with a direct API may build it themselves.

use serde::{Deserialize, Serialize};

use crate::geometry::{Baseline, BoundingBox};

/// Layout class of an [`OcrElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrClass {
    Page,
    Paragraph,
    Line,
    Header,
    Caption,
    TextFloat,
    Word,
}

impl OcrClass {
    /// Line-like classes: anything that groups words on a shared baseline.
    pub const LINE_TYPES: [Self; 4] = [Self::Line, Self::Header, Self::Caption, Self::TextFloat];

    pub fn is_line_type(self) -> bool {
        Self::LINE_TYPES.contains(&self)
    }
}

/// Reading direction of a paragraph or line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

/// Font name/size reported by the OCR engine for a word. Rarely present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FontInfo {
    pub name: Option<String>,
    pub size: Option<f64>,
}

/// One node of the OCR layout tree.
///
/// Attribute presence depends on the class: `bbox` is required on pages,
/// lines and words; `baseline`/`textangle` appear on line types; `text` and
/// `confidence` on words; `dpi`/`page_number` on pages. `direction` and
/// `language` are inherited from the parent when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrElement {
    pub ocr_class: OcrClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OcrElement>,
    /// NFKC-normalized, trimmed text. Words only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Baseline>,
    /// Line rotation in degrees, counter-clockwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textangle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TextDirection>,
    /// Tesseract-style language code, e.g. `eng`, `ara`, `chi_sim`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Word confidence in 0.0..=1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<FontInfo>,
}

impl OcrElement {
    /// A bare element of the given class; attributes filled in by the caller.
    pub fn new(ocr_class: OcrClass) -> Self {
        Self {
            ocr_class,
            bbox: None,
            children: Vec::new(),
            text: None,
            baseline: None,
            textangle: None,
            direction: None,
            language: None,
            confidence: None,
            dpi: None,
            page_number: None,
            font: None,
        }
    }

    /// An empty page sized to the given raster dimensions, as produced by
    /// engines that found no text.
    pub fn empty_page(width: f64, height: f64, dpi: f64, page_number: usize) -> Self {
        let mut page = Self::new(OcrClass::Page);
        page.bbox = Some(BoundingBox::new(0.0, 0.0, width, height));
        page.dpi = Some(dpi);
        page.page_number = Some(page_number);
        page
    }

    /// Child paragraphs, in document order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &OcrElement> {
        self.children
            .iter()
            .filter(|c| c.ocr_class == OcrClass::Paragraph)
    }

    /// Child line-type elements, in document order.
    pub fn lines(&self) -> impl Iterator<Item = &OcrElement> {
        self.children.iter().filter(|c| c.ocr_class.is_line_type())
    }

    /// Child words, in document order.
    pub fn words(&self) -> impl Iterator<Item = &OcrElement> {
        self.children
            .iter()
            .filter(|c| c.ocr_class == OcrClass::Word)
    }

    /// Concatenated word text of this subtree, space separated.
    pub fn all_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(text) = self.text.as_deref()
            && !text.is_empty()
        {
            out.push(text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// True when no word in the subtree carries any text.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty)
            && self.children.iter().all(OcrElement::is_empty)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Build a word node, used by tests throughout the crate.
    pub(crate) fn word(text: &str, bbox: BoundingBox) -> OcrElement {
        let mut w = OcrElement::new(OcrClass::Word);
        w.text = Some(text.to_string());
        w.bbox = Some(bbox);
        w.confidence = Some(0.95);
        w
    }

    /// Build a line node containing the given words.
    pub(crate) fn line(bbox: BoundingBox, words: Vec<OcrElement>) -> OcrElement {
        let mut l = OcrElement::new(OcrClass::Line);
        l.bbox = Some(bbox);
        l.children = words;
        l
    }

    /// Build a single-line page: page -> paragraph -> line -> words.
    pub(crate) fn single_line_page(
        page_w: f64,
        page_h: f64,
        line_bbox: BoundingBox,
        words: Vec<OcrElement>,
    ) -> OcrElement {
        let mut para = OcrElement::new(OcrClass::Paragraph);
        para.bbox = Some(line_bbox);
        para.children = vec![line(line_bbox, words)];

        let mut page = OcrElement::new(OcrClass::Page);
        page.bbox = Some(BoundingBox::new(0.0, 0.0, page_w, page_h));
        page.children = vec![para];
        page
    }

    #[test]
    fn test_line_types() {
        assert!(OcrClass::Line.is_line_type());
        assert!(OcrClass::Header.is_line_type());
        assert!(OcrClass::Caption.is_line_type());
        assert!(OcrClass::TextFloat.is_line_type());
        assert!(!OcrClass::Word.is_line_type());
        assert!(!OcrClass::Page.is_line_type());
    }

    #[test]
    fn test_all_text_in_document_order() {
        let page = single_line_page(
            1000.0,
            500.0,
            BoundingBox::new(100.0, 100.0, 900.0, 150.0),
            vec![
                word("Hello", BoundingBox::new(100.0, 100.0, 200.0, 150.0)),
                word("World", BoundingBox::new(250.0, 100.0, 350.0, 150.0)),
            ],
        );
        assert_eq!(page.all_text(), "Hello World");
    }

    #[test]
    fn test_empty_page() {
        let page = OcrElement::empty_page(800.0, 600.0, 150.0, 3);
        assert!(page.is_empty());
        assert_eq!(page.page_number, Some(3));
        assert_eq!(page.bbox.unwrap().width(), 800.0);
    }

    #[test]
    fn test_wire_format_round_trip() {
        let page = single_line_page(
            100.0,
            100.0,
            BoundingBox::new(0.0, 0.0, 100.0, 20.0),
            vec![word("hi", BoundingBox::new(0.0, 0.0, 20.0, 20.0))],
        );
        let json = serde_json::to_string(&page).unwrap();
        let back: OcrElement = serde_json::from_str(&json).unwrap();
        assert_eq!(page, back);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        let json = serde_json::to_string(&TextDirection::Rtl).unwrap();
        assert_eq!(json, "\"rtl\"");
    }
}
