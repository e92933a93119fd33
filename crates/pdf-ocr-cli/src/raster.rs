//! Built-in fallback rasterizer.
//!
//! Scanned PDFs are overwhelmingly "one big image per page"; this rasterizer
//! serves that case without external tools by extracting the page's largest
//! embedded image, decoding it, and scaling it to the requested resolution.
//! Anything it cannot decode (vector content, exotic filters) is reported as
//! a missing dependency so the user knows a real rasterizer is needed.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use image::imageops::FilterType;
use lopdf::{Document, Object};
use pdf_ocr_core::rasterize::{RasterizeOptions, Rasterizer};
use pdf_ocr_core::{Error, Result};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct EmbeddedImageRasterizer;

impl Rasterizer for EmbeddedImageRasterizer {
    fn rasterize_page(
        &self,
        input: &Path,
        output: &Path,
        options: &RasterizeOptions,
    ) -> Result<PathBuf> {
        let doc = Document::load(input)
            .map_err(|e| Error::InputFile(format!("{}: {e}", input.display())))?;
        let pages = doc.get_pages();
        let page_id = pages
            .get(&(options.pageno as u32 + 1))
            .copied()
            .ok_or_else(|| Error::Pdf(format!("page {} not found", options.pageno + 1)))?;

        let image = largest_page_image(&doc, page_id).ok_or_else(|| {
            Error::MissingDependency(format!(
                "page {} has content the built-in rasterizer cannot draw; \
                 install a Ghostscript- or pdfium-based rasterizer",
                options.pageno + 1
            ))
        })?;
        let decoded = decode_image(&doc, &image).ok_or_else(|| {
            Error::MissingDependency(format!(
                "page {} uses an image encoding the built-in rasterizer cannot \
                 decode; install a Ghostscript- or pdfium-based rasterizer",
                options.pageno + 1
            ))
        })?;

        if options.deskew_angle.abs() > 0.05 {
            warn!(
                "built-in rasterizer cannot deskew (angle {:.2}); skipping",
                options.deskew_angle
            );
        }

        // Match the page's MediaBox at the requested resolution, so output
        // dimensions are independent of the embedded image's own size.
        let media_box = media_box(&doc, page_id);
        let target_w = ((media_box[2] - media_box[0]) * options.raster_dpi / 72.0).round() as u32;
        let target_h = ((media_box[3] - media_box[1]) * options.raster_dpi / 72.0).round() as u32;
        let scaled = decoded.resize_exact(target_w.max(1), target_h.max(1), FilterType::Triangle);

        let rotated = match options.rotation.rem_euclid(360) {
            90 => scaled.rotate90(),
            180 => scaled.rotate180(),
            270 => scaled.rotate270(),
            _ => scaled,
        };
        debug!(
            page = options.pageno + 1,
            width = rotated.width(),
            height = rotated.height(),
            "rasterized from embedded image"
        );
        rotated
            .save(output)
            .map_err(|e| Error::SubprocessOutput(format!("cannot write raster: {e}")))?;
        Ok(output.to_path_buf())
    }
}

struct PageImage {
    stream: lopdf::Stream,
}

/// The largest image XObject referenced by the page, by pixel count.
fn largest_page_image(doc: &Document, page_id: lopdf::ObjectId) -> Option<PageImage> {
    let resources = resolve_dict(doc, &inherited(doc, page_id, b"Resources")?)?;
    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok()?)?;

    let mut best: Option<(u64, lopdf::Stream)> = None;
    for (_, value) in xobjects.iter() {
        let stream = match value {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Stream(s)) => s.clone(),
                _ => continue,
            },
            Object::Stream(s) => s.clone(),
            _ => continue,
        };
        if stream.dict.get(b"Subtype").ok().and_then(|o| o.as_name().ok()) != Some(b"Image") {
            continue;
        }
        let w = stream.dict.get(b"Width").ok()?.as_i64().unwrap_or(0) as u64;
        let h = stream.dict.get(b"Height").ok()?.as_i64().unwrap_or(0) as u64;
        let pixels = w * h;
        if best.as_ref().is_none_or(|(p, _)| pixels > *p) {
            best = Some((pixels, stream));
        }
    }
    best.map(|(_, stream)| PageImage { stream })
}

/// Page attribute lookup, following `/Parent` for inheritable attributes.
fn inherited(doc: &Document, page_id: lopdf::ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..16 {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<lopdf::Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Dictionary(d) => Some(d.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn media_box(doc: &Document, page_id: lopdf::ObjectId) -> [f64; 4] {
    let mut current = page_id;
    for _ in 0..16 {
        let Ok(dict) = doc.get_dictionary(current) else {
            break;
        };
        if let Ok(mb) = dict.get(b"MediaBox") {
            let arr = match mb {
                Object::Array(a) => a.clone(),
                Object::Reference(id) => doc
                    .get_object(*id)
                    .ok()
                    .and_then(|o| o.as_array().ok().cloned())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            if arr.len() == 4 {
                let mut rect = [0.0f64; 4];
                for (slot, value) in rect.iter_mut().zip(&arr) {
                    *slot = value.as_float().map(f64::from).unwrap_or(0.0);
                }
                return rect;
            }
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    [0.0, 0.0, 612.0, 792.0]
}

/// Decode an image stream. Handles DCTDecode (JPEG) and plain/Flate 8-bit
/// gray or RGB rasters, which covers the vast majority of scanned PDFs.
fn decode_image(_doc: &Document, image: &PageImage) -> Option<DynamicImage> {
    let dict = &image.stream.dict;
    let filter = dict
        .get(b"Filter")
        .ok()
        .and_then(|f| match f {
            Object::Name(name) => Some(vec![name.clone()]),
            Object::Array(arr) => Some(
                arr.iter()
                    .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    if filter.iter().any(|f| f == b"DCTDecode") {
        return image::load_from_memory(&image.stream.content).ok();
    }

    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let data = image
        .stream
        .decompressed_content()
        .unwrap_or_else(|_| image.stream.content.clone());

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| o.as_name().ok())
        .unwrap_or(b"DeviceRGB");
    match color_space {
        b"DeviceGray" => image::GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8),
        b"DeviceRGB" => image::RgbImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgb8),
        _ => None,
    }
}
