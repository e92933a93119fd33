//! Grafting: inserting rendered text layers into the origin PDF.
//!
//! The text layer for a page is wrapped as a Form XObject and referenced from
//! the front of the page's content, so the original content (raster, vectors,
//! fonts) is untouched. The XObject is positioned with a transform that
//! absorbs rotation differences between the (always upright) text layer and
//! the possibly auto-rotated page content, plus sub-0.2% size differences
//! from DPI rounding.
//!
//! To bound memory on very long documents the working PDF is saved and
//! reopened every [`MAX_REPLACE_PAGES`] content replacements.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use crate::error::{Error, Result};
use crate::font::MultiFontManager;
use crate::geometry::Matrix;
use crate::hocr::OcrElement;
use crate::pdfinfo::{PdfInfo, inherited_attr, parse_rect, resolve_dict};
use crate::render::{RenderOptions, TextLayerRenderer};
use crate::util::page_file_name;

/// Content replacements between save/reload cycles.
pub const MAX_REPLACE_PAGES: usize = 100;

/// Font resource keys a text layer is expected to use, tried in order.
const KNOWN_FONT_KEYS: &[&[u8]] = &[b"f-0-0", b"F1"];

/// Everything the grafter needs to process one page.
#[derive(Debug, Clone, Default)]
pub struct GraftJob {
    pub pageno: usize,
    /// Replacement page content (a one-page PDF of the re-rasterized image),
    /// when preprocessing changed the visible raster.
    pub image_as_pdf: Option<PathBuf>,
    /// The rendered text layer for this page, a one-page PDF.
    pub text_layer_pdf: Option<PathBuf>,
    /// OCR tree to render on the fly when the engine produced no text PDF.
    pub ocr_tree: Option<OcrElement>,
    /// Detected deviation from upright: 0, 90, 180 or 270 degrees.
    pub autorotate_correction: i32,
}

/// Policy knobs for a grafting session.
#[derive(Debug, Clone)]
pub struct GrafterOptions {
    pub output_file: PathBuf,
    pub working_dir: PathBuf,
    /// Remove invisible text already present on pages being updated.
    pub strip_old_text: bool,
    pub keep_temporary_files: bool,
    /// Use a content-hashed `/ID` instead of whatever the input carried.
    pub deterministic_output: bool,
    /// Recorded as `/Creator` in the output's document information.
    pub creator: Option<String>,
}

/// Accumulates text layers into a writable clone of the origin PDF.
///
/// Single-owner by design: only the pipeline driver thread holds one.
pub struct OcrGrafter<'a> {
    base: Document,
    origin: PathBuf,
    pdfinfo: &'a PdfInfo,
    fonts: &'a MultiFontManager,
    options: GrafterOptions,
    /// Copied text-layer font: resource key and its object in `base`.
    font: Option<(Vec<u8>, ObjectId)>,
    emplacements: usize,
    interim_count: usize,
}

impl<'a> OcrGrafter<'a> {
    pub fn new(
        origin: &Path,
        pdfinfo: &'a PdfInfo,
        fonts: &'a MultiFontManager,
        options: GrafterOptions,
    ) -> Result<Self> {
        let base = Document::load(origin)
            .map_err(|e| Error::InputFile(format!("{}: {e}", origin.display())))?;
        Ok(Self {
            base,
            origin: origin.to_path_buf(),
            pdfinfo,
            fonts,
            options,
            font: None,
            emplacements: 1,
            interim_count: 0,
        })
    }

    /// Apply one page's results to the base PDF.
    pub fn graft_page(&mut self, job: &GraftJob) -> Result<()> {
        let pageno = job.pageno;

        // Direct-tree path: the OCR engine handed back a tree instead of a
        // rendered PDF; render it here with the shared font manager.
        let text_layer_pdf = match (&job.text_layer_pdf, &job.ocr_tree) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(tree)) if !tree.is_empty() => {
                let dpi = tree.dpi.unwrap_or(300.0);
                let rendered = self
                    .options
                    .working_dir
                    .join(page_file_name(pageno, "rendered.pdf"));
                let renderer = TextLayerRenderer::new(self.fonts, RenderOptions::default());
                renderer.render_page(tree, dpi, &rendered)?;
                Some(rendered)
            }
            _ => None,
        };

        if let Some(textpdf) = &text_layer_pdf
            && self.font.is_none()
        {
            self.font = self.find_font(textpdf);
        }

        let mut content_rotation = self
            .pdfinfo
            .page(pageno)
            .map_or(0, |info| info.rotation);

        let mut emplaced_page = false;
        if let Some(image) = &job.image_as_pdf
            && image.as_path() != self.origin.as_path()
        {
            debug!(page = pageno + 1, "emplacement update");
            self.emplace_page(pageno, image)?;
            self.emplacements += 1;
            emplaced_page = true;
        }

        // A replacement page is always upright, so its content rotation is
        // exactly the autorotate correction.
        if emplaced_page {
            content_rotation = job.autorotate_correction;
        }
        let text_rotation = job.autorotate_correction;
        let text_misaligned = (text_rotation - content_rotation).rem_euclid(360);
        debug!(
            page = pageno + 1,
            text_rotation, content_rotation, text_misaligned, "text alignment"
        );

        if let Some(textpdf) = &text_layer_pdf
            && self.font.is_some()
        {
            self.graft_text_layer(pageno, textpdf, text_misaligned)?;
        }

        // With text and content aligned, one final /Rotate makes both upright.
        let page_rotation = (content_rotation - job.autorotate_correction).rem_euclid(360);
        let page_id = self.page_id(pageno)?;
        let page_dict = self.base.get_dictionary_mut(page_id)?;
        page_dict.set("Rotate", Object::Integer(i64::from(page_rotation)));

        if self.emplacements % MAX_REPLACE_PAGES == 0 {
            self.save_and_reload()?;
        }
        Ok(())
    }

    /// Write the finished PDF to the output path and return it.
    pub fn finalize(mut self) -> Result<PathBuf> {
        if let Some(creator) = self.options.creator.clone() {
            self.set_document_info(&creator);
        }

        let mut bytes = Vec::new();
        self.base
            .save_to(&mut bytes)
            .map_err(|e| Error::Pdf(format!("failed to save output: {e}")))?;

        if self.options.deterministic_output {
            bytes = self.rewrite_with_content_id(&bytes)?;
        }

        std::fs::write(&self.options.output_file, bytes).map_err(|e| Error::IoPath {
            path: self.options.output_file.clone(),
            source: e,
        })?;

        if !self.options.keep_temporary_files {
            for k in 0..=self.interim_count {
                let _ = std::fs::remove_file(self.working_path(k));
            }
        }
        Ok(self.options.output_file)
    }

    /// Record the creator in the document information dictionary, preserving
    /// any other entries the input carried. No dates are written, so output
    /// stays reproducible.
    fn set_document_info(&mut self, creator: &str) {
        let mut info = self
            .base
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|o| resolve_dict(&self.base, o))
            .unwrap_or_default();
        info.set(
            "Creator",
            Object::String(creator.as_bytes().to_vec(), StringFormat::Literal),
        );
        let info_id = self.base.add_object(Object::Dictionary(info));
        self.base.trailer.set("Info", Object::Reference(info_id));
    }

    /// Replace the trailer `/ID` with an md5 of the document content so two
    /// identical runs produce byte-identical files.
    fn rewrite_with_content_id(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let digest = md5::compute(bytes);
        let id = Object::String(digest.0.to_vec(), StringFormat::Hexadecimal);
        self.base
            .trailer
            .set("ID", Object::Array(vec![id.clone(), id]));
        let mut rewritten = Vec::new();
        self.base
            .save_to(&mut rewritten)
            .map_err(|e| Error::Pdf(format!("failed to save output: {e}")))?;
        Ok(rewritten)
    }

    /// Save the working PDF, close it, and reopen from disk.
    ///
    /// Caps peak memory on very long documents. The text-layer font is
    /// attached to page 0's resources first so it survives the round-trip;
    /// it is re-acquired from the next text layer afterwards.
    fn save_and_reload(&mut self) -> Result<()> {
        if let Some((font_key, font_id)) = self.font.clone() {
            let page_id = self.page_id(0)?;
            self.add_font_to_page_resources(page_id, &font_key, font_id)?;
        }

        let next_file = self.working_path(self.interim_count + 1);
        self.base
            .save(&next_file)
            .map_err(|e| Error::Pdf(format!("failed to save working file: {e}")))?;
        self.base = Document::load(&next_file)
            .map_err(|e| Error::Pdf(format!("failed to reload working file: {e}")))?;
        self.font = None; // must be re-acquired from the reloaded document

        if !self.options.keep_temporary_files && self.interim_count > 0 {
            let _ = std::fs::remove_file(self.working_path(self.interim_count - 1));
        }
        self.interim_count += 1;
        debug!(interim = self.interim_count, "saved and reloaded working PDF");
        Ok(())
    }

    fn working_path(&self, k: usize) -> PathBuf {
        self.options
            .working_dir
            .join(format!("graft_layers.working{k}.pdf"))
    }

    fn page_id(&self, pageno: usize) -> Result<ObjectId> {
        self.base
            .get_pages()
            .get(&(pageno as u32 + 1))
            .copied()
            .ok_or_else(|| Error::Pdf(format!("page {} not found", pageno + 1)))
    }

    // ======================================================================
    // Emplacement
    // ======================================================================

    /// Replace the page's content with page 0 of another PDF, keeping the
    /// base page's object id so references into it stay valid.
    fn emplace_page(&mut self, pageno: usize, image_pdf: &Path) -> Result<()> {
        let mut image_doc = Document::load(image_pdf)
            .map_err(|e| Error::Pdf(format!("{}: {e}", image_pdf.display())))?;
        image_doc.renumber_objects_with(self.base.max_id + 1);
        self.base.max_id = image_doc.max_id;

        let image_pages = image_doc.get_pages();
        let image_page_id = *image_pages.values().next().ok_or_else(|| {
            Error::Pdf(format!("{} has no pages", image_pdf.display()))
        })?;
        let image_page_dict = image_doc.get_dictionary(image_page_id)?.clone();

        // Bring the replacement page's object graph across, leaving behind
        // document-level structure we do not want duplicated.
        for (object_id, object) in &image_doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    self.base.objects.insert(*object_id, object.clone());
                }
            }
        }

        let base_page_id = self.page_id(pageno)?;
        let base_page = self.base.get_dictionary_mut(base_page_id)?;
        // Swap content-defining entries in place; identity and Parent stay.
        for key in [
            b"Contents".as_slice(),
            b"Resources".as_slice(),
            b"MediaBox".as_slice(),
            b"CropBox".as_slice(),
        ] {
            match image_page_dict.get(key) {
                Ok(value) => base_page.set(key, value.clone()),
                Err(_) => {
                    base_page.remove(key);
                }
            }
        }
        // The replacement is upright by construction.
        base_page.remove(b"Rotate");
        Ok(())
    }

    // ======================================================================
    // Text layer grafting
    // ======================================================================

    /// Find a usable font in a text layer PDF and copy it into the base.
    fn find_font(&mut self, textpdf: &Path) -> Option<(Vec<u8>, ObjectId)> {
        let text_doc = Document::load(textpdf).ok()?;
        let text_pages = text_doc.get_pages();
        let page_id = *text_pages.values().next()?;
        let resources = inherited_attr(&text_doc, page_id, b"Resources")
            .and_then(|o| resolve_dict(&text_doc, &o))?;
        let fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|o| resolve_dict(&text_doc, o))?;

        let mut font_entry: Option<(Vec<u8>, &Object)> = None;
        for key in KNOWN_FONT_KEYS {
            if let Ok(value) = fonts.get(key) {
                font_entry = Some((key.to_vec(), value));
                break;
            }
        }
        if font_entry.is_none() {
            font_entry = fonts
                .iter()
                .next()
                .map(|(key, value)| (key.clone(), value));
        }
        let (font_key, font_obj) = font_entry?;

        let mut id_map = HashMap::new();
        let copied = copy_foreign(&mut self.base, &text_doc, font_obj, &mut id_map);
        match copied {
            Object::Reference(id) => Some((font_key, id)),
            other => Some((font_key, self.base.add_object(other))),
        }
    }

    /// Insert the text layer from `textpdf` page 0 onto the given base page.
    fn graft_text_layer(&mut self, pageno: usize, textpdf: &Path, text_misaligned: i32) -> Result<()> {
        let metadata = std::fs::metadata(textpdf).map_err(|e| Error::IoPath {
            path: textpdf.to_path_buf(),
            source: e,
        })?;
        // A zero-length file means OCR timed out on this page; nothing to do.
        if metadata.len() == 0 {
            return Ok(());
        }

        let text_doc = Document::load(textpdf).map_err(|e| Error::PdfMergeFailed {
            page: pageno + 1,
            reason: format!("cannot open text layer: {e}"),
        })?;
        let text_pages = text_doc.get_pages();
        let text_page_id = *text_pages.values().next().ok_or_else(|| Error::PdfMergeFailed {
            page: pageno + 1,
            reason: "text layer has no pages".into(),
        })?;

        let text_contents = text_doc
            .get_page_content(text_page_id)
            .map_err(|e| Error::PdfMergeFailed {
                page: pageno + 1,
                reason: format!("malformed content stream in text layer: {e}"),
            })?;

        let text_mediabox = inherited_attr(&text_doc, text_page_id, b"MediaBox")
            .and_then(|o| parse_rect(&text_doc, &o))
            .ok_or_else(|| Error::PdfMergeFailed {
                page: pageno + 1,
                reason: "text layer has no MediaBox".into(),
            })?;

        let base_page_id = self.page_id(pageno)?;
        let base_mediabox = inherited_attr(&self.base, base_page_id, b"MediaBox")
            .and_then(|o| parse_rect(&self.base, &o))
            .unwrap_or([0.0, 0.0, 612.0, 792.0]);

        let (mut wt, mut ht) = (
            text_mediabox[2] - text_mediabox[0],
            text_mediabox[3] - text_mediabox[1],
        );
        let (wp, hp) = (
            base_mediabox[2] - base_mediabox[0],
            base_mediabox[3] - base_mediabox[1],
        );

        // The misalignment is a clockwise angle; the matrix convention is CCW.
        let rotation_ccw = (-text_misaligned).rem_euclid(360);
        if rotation_ccw == 90 || rotation_ccw == 270 {
            std::mem::swap(&mut wt, &mut ht);
        }
        // DPI rounding can leave the text layer a fraction of a percent off
        // the page size; scale absorbs it (normally within 0.998..1.002).
        let scale_x = wp / wt;
        let scale_y = hp / ht;

        // Center the text layer at the origin, rotate it there, fix the size
        // difference, then move it onto the page's media box.
        let ctm = Matrix::identity()
            .translated(-wt / 2.0, -ht / 2.0)
            .rotated(f64::from(rotation_ccw))
            .scaled(scale_x, scale_y)
            .translated(wp / 2.0, hp / 2.0)
            .translated(base_mediabox[0], base_mediabox[1]);

        let (font_key, font_id) = self
            .font
            .clone()
            .ok_or_else(|| Error::PdfMergeFailed {
                page: pageno + 1,
                reason: "no font available for text layer".into(),
            })?;

        // Wrap the text layer content as a Form XObject.
        let mut xobj_resources = Dictionary::new();
        xobj_resources.set(
            "Font",
            Object::Dictionary(Dictionary::from_iter([(
                font_key.clone(),
                Object::Reference(font_id),
            )])),
        );
        xobj_resources.set(
            "ProcSet",
            Object::Array(vec![
                Object::Name(b"PDF".to_vec()),
                Object::Name(b"Text".to_vec()),
            ]),
        );
        let xobj_dict = Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Form".to_vec())),
            ("FormType", Object::Integer(1)),
            (
                "BBox",
                Object::Array(
                    text_mediabox
                        .iter()
                        .map(|v| Object::Real(*v as f32))
                        .collect(),
                ),
            ),
            ("Resources", Object::Dictionary(xobj_resources)),
        ]);
        let xobj_id = self
            .base
            .add_object(Object::Stream(Stream::new(xobj_dict, text_contents)));

        // Unique resource name so we never collide with existing XObjects.
        // Deterministic runs derive the name from the page instead of
        // drawing randomness.
        let xobj_name = if self.options.deterministic_output {
            format!("OCR{:06}", pageno + 1)
        } else {
            format!("{}", uuid::Uuid::new_v4().simple())
        };

        if self.options.strip_old_text {
            strip_invisible_text(&mut self.base, base_page_id).map_err(|e| {
                Error::PdfMergeFailed {
                    page: pageno + 1,
                    reason: format!("cannot strip existing text: {e}"),
                }
            })?;
        }

        // Draw the XObject before the original content.
        let [a, b, c, d, e, f] = ctm.shorthand();
        let draw_ops = format!("q {a:.6} {b:.6} {c:.6} {d:.6} {e:.6} {f:.6} cm\n/{xobj_name} Do\nQ\n");
        let draw_id = self
            .base
            .add_object(Object::Stream(Stream::new(
                Dictionary::new(),
                draw_ops.into_bytes(),
            )));
        prepend_content(&mut self.base, base_page_id, draw_id)?;

        self.add_xobject_to_page_resources(base_page_id, &xobj_name, xobj_id)?;
        self.add_font_to_page_resources(base_page_id, &font_key, font_id)?;
        Ok(())
    }

    // ======================================================================
    // Resource dictionary updates
    // ======================================================================

    /// Resolve the page's Resources to an owned dictionary, apply `update`,
    /// and set it back inline. Shared (referenced) resource dictionaries are
    /// copied so edits never leak into other pages.
    fn update_page_resources(
        &mut self,
        page_id: ObjectId,
        update: impl FnOnce(&mut Dictionary),
    ) -> Result<()> {
        let mut resources = inherited_attr(&self.base, page_id, b"Resources")
            .and_then(|o| resolve_dict(&self.base, &o))
            .unwrap_or_default();
        update(&mut resources);
        let page = self.base.get_dictionary_mut(page_id)?;
        page.set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    fn add_xobject_to_page_resources(
        &mut self,
        page_id: ObjectId,
        name: &str,
        xobj_id: ObjectId,
    ) -> Result<()> {
        let base = &self.base;
        let existing = inherited_attr(base, page_id, b"Resources")
            .and_then(|o| resolve_dict(base, &o))
            .and_then(|r| r.get(b"XObject").ok().and_then(|o| resolve_dict(base, o)))
            .unwrap_or_default();
        self.update_page_resources(page_id, |resources| {
            let mut xobjects = existing;
            xobjects.set(name.as_bytes(), Object::Reference(xobj_id));
            resources.set("XObject", Object::Dictionary(xobjects));
        })
    }

    fn add_font_to_page_resources(
        &mut self,
        page_id: ObjectId,
        font_key: &[u8],
        font_id: ObjectId,
    ) -> Result<()> {
        let base = &self.base;
        let existing = inherited_attr(base, page_id, b"Resources")
            .and_then(|o| resolve_dict(base, &o))
            .and_then(|r| r.get(b"Font").ok().and_then(|o| resolve_dict(base, o)))
            .unwrap_or_default();
        let key = font_key.to_vec();
        self.update_page_resources(page_id, move |resources| {
            let mut fonts = existing;
            if fonts.get(&key).is_err() {
                fonts.set(key, Object::Reference(font_id));
            }
            resources.set("Font", Object::Dictionary(fonts));
        })
    }
}

/// Deep-copy an object graph from `src` into `dst`, remapping references.
fn copy_foreign(
    dst: &mut Document,
    src: &Document,
    obj: &Object,
    id_map: &mut HashMap<ObjectId, ObjectId>,
) -> Object {
    match obj {
        Object::Reference(src_id) => {
            if let Some(dst_id) = id_map.get(src_id) {
                return Object::Reference(*dst_id);
            }
            let dst_id = dst.new_object_id();
            // Map before descending so reference cycles terminate.
            id_map.insert(*src_id, dst_id);
            let copied = match src.get_object(*src_id) {
                Ok(inner) => copy_foreign(dst, src, inner, id_map),
                Err(_) => Object::Null,
            };
            dst.objects.insert(dst_id, copied);
            Object::Reference(dst_id)
        }
        Object::Dictionary(dict) => {
            let mut copied = Dictionary::new();
            for (key, value) in dict.iter() {
                copied.set(key.clone(), copy_foreign(dst, src, value, id_map));
            }
            Object::Dictionary(copied)
        }
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| copy_foreign(dst, src, item, id_map))
                .collect(),
        ),
        Object::Stream(stream) => {
            let dict = match copy_foreign(dst, src, &Object::Dictionary(stream.dict.clone()), id_map)
            {
                Object::Dictionary(d) => d,
                _ => Dictionary::new(),
            };
            let mut copied = Stream::new(Dictionary::new(), stream.content.clone());
            copied.dict = dict;
            Object::Stream(copied)
        }
        other => other.clone(),
    }
}

/// Prepend a content stream to a page's `/Contents`.
fn prepend_content(doc: &mut Document, page_id: ObjectId, content_id: ObjectId) -> Result<()> {
    let page = doc.get_dictionary_mut(page_id)?;
    let existing = page.get(b"Contents").ok().cloned();
    let new_contents = match existing {
        Some(Object::Reference(existing_id)) => Object::Array(vec![
            Object::Reference(content_id),
            Object::Reference(existing_id),
        ]),
        Some(Object::Array(mut arr)) => {
            arr.insert(0, Object::Reference(content_id));
            Object::Array(arr)
        }
        _ => Object::Reference(content_id),
    };
    page.set("Contents", new_contents);
    Ok(())
}

/// Remove invisible-text objects (render mode 3) from a page's content.
///
/// Used by `redo_ocr` so stale OCR text does not pile up underneath the new
/// layer. Visible text is preserved; only whole BT..ET objects whose last
/// `Tr` was mode 3 are dropped.
pub fn strip_invisible_text(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    use lopdf::content::{Content, Operation};

    let content_bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_bytes)?;

    let mut stream: Vec<Operation> = Vec::with_capacity(content.operations.len());
    let mut text_object: Vec<Operation> = Vec::new();
    let mut in_text_obj = false;
    let mut render_mode = 0i64;

    for op in content.operations {
        if !in_text_obj {
            if op.operator == "BT" {
                in_text_obj = true;
                render_mode = 0;
                text_object.push(op);
            } else {
                stream.push(op);
            }
        } else {
            if op.operator == "Tr"
                && let Some(mode) = op.operands.first().and_then(|o| o.as_i64().ok())
            {
                render_mode = mode;
            }
            let is_et = op.operator == "ET";
            text_object.push(op);
            if is_et {
                in_text_obj = false;
                if render_mode != 3 {
                    stream.append(&mut text_object);
                } else {
                    text_object.clear();
                }
            }
        }
    }

    let encoded = Content { operations: stream }
        .encode()
        .map_err(|e| Error::Pdf(format!("cannot re-encode content: {e}")))?;
    let new_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), encoded)));
    let page = doc.get_dictionary_mut(page_id)?;
    page.set("Contents", Object::Reference(new_id));
    Ok(())
}
