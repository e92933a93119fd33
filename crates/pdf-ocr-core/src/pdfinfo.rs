//! Examination of the origin PDF: per-page rotation, media box, existing
//! text, and raster content. The pipeline consults this to decide which
//! pages need OCR; the grafter consults it for rotation bookkeeping.

use std::path::Path;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A raster image found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// What we know about one page of the origin PDF.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub pageno: usize,
    /// Normalized `/Rotate` value: 0, 90, 180 or 270.
    pub rotation: i32,
    /// `[llx, lly, urx, ury]` in points.
    pub media_box: [f64; 4],
    /// The page draws text (any text-showing operator in its content).
    pub has_text: bool,
    pub images: Vec<ImageInfo>,
}

impl PageInfo {
    pub fn width_pt(&self) -> f64 {
        self.media_box[2] - self.media_box[0]
    }

    pub fn height_pt(&self) -> f64 {
        self.media_box[3] - self.media_box[1]
    }

    /// Pixel extent of the largest image on the page, `(0, 0)` if none.
    pub fn max_image_pixels(&self) -> (u32, u32) {
        self.images
            .iter()
            .max_by_key(|i| u64::from(i.width) * u64::from(i.height))
            .map_or((0, 0), |i| (i.width, i.height))
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Per-page facts about the origin PDF, computed once up front.
#[derive(Debug, Clone)]
pub struct PdfInfo {
    pages: Vec<PageInfo>,
    /// The document declares fillable form fields.
    pub has_acroform: bool,
    /// The document declares itself a tagged PDF.
    pub is_tagged: bool,
}

impl PdfInfo {
    pub fn from_path(path: &Path) -> Result<Self> {
        let doc = Document::load(path)
            .map_err(|e| Error::InputFile(format!("{}: {e}", path.display())))?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let page_map = doc.get_pages();
        if page_map.is_empty() {
            return Err(Error::InputFile("PDF has no pages".into()));
        }

        let mut pages = Vec::with_capacity(page_map.len());
        for (page_num, page_id) in &page_map {
            let pageno = *page_num as usize - 1;
            pages.push(examine_page(doc, *page_id, pageno));
        }

        let catalog = doc.catalog()?;
        let has_acroform = catalog.get(b"AcroForm").is_ok();
        let is_tagged = catalog
            .get(b"MarkInfo")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
            .and_then(|d| d.get(b"Marked").ok().cloned())
            .is_some_and(|marked| matches!(marked, Object::Boolean(true)));

        Ok(Self {
            pages,
            has_acroform,
            is_tagged,
        })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, pageno: usize) -> Option<&PageInfo> {
        self.pages.get(pageno)
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }
}

fn examine_page(doc: &Document, page_id: ObjectId, pageno: usize) -> PageInfo {
    let rotation = inherited_attr(doc, page_id, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .map_or(0, |r| (r % 360 + 360) % 360) as i32;

    let media_box = inherited_attr(doc, page_id, b"MediaBox")
        .and_then(|o| parse_rect(doc, &o))
        .unwrap_or_else(|| {
            warn!(page = pageno + 1, "page has no MediaBox, assuming Letter");
            [0.0, 0.0, 612.0, 792.0]
        });

    let has_text = page_has_text(doc, page_id).unwrap_or_else(|e| {
        debug!(page = pageno + 1, "could not parse content stream: {e}");
        false
    });

    let images = page_images(doc, page_id);

    PageInfo {
        pageno,
        rotation,
        media_box,
        has_text,
        images,
    }
}

/// Look up a page attribute, walking up the page tree for inheritable ones.
pub(crate) fn inherited_attr(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..16 {
        if let Ok(value) = current.get(key) {
            let value = value.clone();
            return match value {
                Object::Reference(id) => doc.get_object(id).ok().cloned(),
                other => Some(other),
            };
        }
        let parent_id = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent_id).ok()?;
    }
    None
}

pub(crate) fn parse_rect(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let arr = match obj {
        Object::Array(arr) => arr.clone(),
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?.clone(),
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut rect = [0.0f64; 4];
    for (slot, value) in rect.iter_mut().zip(&arr) {
        *slot = value.as_float().ok()?.into();
    }
    Some(rect)
}

/// Detect any text-showing operator in the page content.
fn page_has_text(doc: &Document, page_id: ObjectId) -> Result<bool> {
    let content_bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_bytes)?;
    Ok(content
        .operations
        .iter()
        .any(|op| matches!(op.operator.as_str(), "Tj" | "TJ" | "'" | "\"")))
}

/// Collect image XObjects referenced by the page resources.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<ImageInfo> {
    let mut images = Vec::new();
    let Some(resources) = page_resources(doc, page_id) else {
        return images;
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
    else {
        return images;
    };

    for (_, value) in xobjects.iter() {
        let stream_dict = match value {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Stream(s)) => s.dict.clone(),
                _ => continue,
            },
            Object::Stream(s) => s.dict.clone(),
            _ => continue,
        };
        if stream_dict.get(b"Subtype").ok().and_then(|o| o.as_name().ok()) != Some(b"Image") {
            continue;
        }
        let width = stream_dict
            .get(b"Width")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        let height = stream_dict
            .get(b"Height")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        if width > 0 && height > 0 {
            images.push(ImageInfo {
                width: width as u32,
                height: height as u32,
            });
        }
    }
    images
}

fn page_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    inherited_attr(doc, page_id, b"Resources").and_then(|o| resolve_dict(doc, &o))
}

pub(crate) fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Dictionary(d) => Some(d.clone()),
            _ => None,
        },
        _ => None,
    }
}
