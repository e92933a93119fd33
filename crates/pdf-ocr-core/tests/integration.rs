//! End-to-end tests exercising the public API: hOCR in, searchable PDF out.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::Document;
use pdf_ocr_core::font::{BuiltinFontProvider, MultiFontManager};
use pdf_ocr_core::pipeline::NullProgressBar;
use pdf_ocr_core::rasterize::{RasterizeOptions, Rasterizer};
use pdf_ocr_core::{
    CancellationToken, HocrParser, OcrElement, OcrEngine, OcrOptions, OcrOutputMode, RenderOptions,
    Result, TextLayerRenderer, run_pipeline,
};

const HELLO_WORLD_HOCR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
<head><title></title></head>
<body>
<div class='ocr_page' title='bbox 0 0 1000 500; ppageno 0; scan_res 72 72'>
  <p class='ocr_par' lang='eng'>
    <span class='ocr_line' title='bbox 100 100 900 150; baseline 0 0'>
      <span class='ocrx_word' title='bbox 100 100 200 150; x_wconf 96'>Hello</span>
      <span class='ocrx_word' title='bbox 250 100 350 150; x_wconf 95'>World</span>
    </span>
  </p>
</div>
</body>
</html>"#;

fn fonts() -> MultiFontManager {
    // No real fonts installed: everything renders with the glyphless
    // fallback, whose CIDs are UTF-16 code units.
    MultiFontManager::new(Arc::new(BuiltinFontProvider::new(None)))
}

fn utf16_hex(text: &str) -> String {
    text.encode_utf16().map(|u| format!("{u:04X}")).collect()
}

#[test]
fn hocr_to_text_pdf_preserves_words() {
    let page = HocrParser::new(HELLO_WORLD_HOCR).unwrap().parse().unwrap();
    assert_eq!(page.all_text(), "Hello World");

    let manager = fonts();
    let renderer = TextLayerRenderer::new(&manager, RenderOptions::default());
    let bytes = renderer.render_page_to_bytes(&page, 72.0).unwrap();

    let doc = Document::load_mem(&bytes).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    let content = String::from_utf8(doc.get_page_content(pages[&1]).unwrap()).unwrap();

    // One text object for the line; invisible text; the words' code units
    // present, space-joined for extractors.
    assert_eq!(content.matches("BT").count(), 1);
    assert!(content.contains("3 Tr"));
    assert!(content.contains(&format!("<{}> Tj", utf16_hex("Hello "))));
    assert!(content.contains(&format!("<{}> Tj", utf16_hex("World"))));
}

#[test]
fn glyphless_font_carries_identity_tounicode() {
    let page = HocrParser::new(HELLO_WORLD_HOCR).unwrap().parse().unwrap();
    let manager = fonts();
    let renderer = TextLayerRenderer::new(&manager, RenderOptions::default());
    let bytes = renderer.render_page_to_bytes(&page, 72.0).unwrap();

    let doc = Document::load_mem(&bytes).unwrap();
    // Find the Type0 font and check its ToUnicode stream is the BMP identity.
    let mut found = false;
    for (_, object) in &doc.objects {
        let Ok(dict) = object.as_dict() else { continue };
        if dict.get(b"Subtype").ok().and_then(|o| o.as_name().ok()) != Some(b"Type0") {
            continue;
        }
        let to_unicode_id = dict.get(b"ToUnicode").unwrap().as_reference().unwrap();
        let stream = doc.get_object(to_unicode_id).unwrap().as_stream().unwrap();
        let cmap = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let cmap = String::from_utf8_lossy(&cmap);
        assert!(cmap.contains("<0000> <FFFF> <0000>"));
        found = true;
    }
    assert!(found, "no Type0 font in rendered text layer");
}

// ==========================================================================
// Pipeline end-to-end
// ==========================================================================

/// Rasterizer writing fixed-size blank pages, enough for engines that do not
/// look at pixels.
struct BlankRasterizer;

impl Rasterizer for BlankRasterizer {
    fn rasterize_page(
        &self,
        _input: &Path,
        output: &Path,
        options: &RasterizeOptions,
    ) -> Result<PathBuf> {
        let (w, h) = if options.rotation == 90 || options.rotation == 270 {
            (1650, 1275)
        } else {
            (1275, 1650)
        };
        let img = image::GrayImage::from_pixel(w, h, image::Luma([255u8]));
        img.save(output)
            .map_err(|e| pdf_ocr_core::Error::SubprocessOutput(e.to_string()))?;
        Ok(output.to_path_buf())
    }
}

/// Engine that emits one word per page through the hOCR path.
struct HocrWordEngine;

impl OcrEngine for HocrWordEngine {
    fn version(&self) -> String {
        "hocr-word 1.0".into()
    }

    fn creator_tag(&self, _options: &OcrOptions) -> String {
        "hocr-word".into()
    }

    fn languages(&self, _options: &OcrOptions) -> HashSet<String> {
        HashSet::from(["eng".to_owned()])
    }

    fn output_modes(&self) -> &[OcrOutputMode] {
        &[OcrOutputMode::Hocr]
    }

    fn generate_hocr(
        &self,
        image: &Path,
        output_hocr: &Path,
        output_text: &Path,
        _options: &OcrOptions,
    ) -> Result<()> {
        let (w, h) = image::image_dimensions(image)
            .map_err(|e| pdf_ocr_core::Error::InputFile(e.to_string()))?;
        let hocr = format!(
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<div class='ocr_page' title='bbox 0 0 {w} {h}'>
  <p class='ocr_par'>
    <span class='ocr_line' title='bbox 100 100 600 160; baseline 0 -8'>
      <span class='ocrx_word' title='bbox 100 100 600 160; x_wconf 90'>recognized</span>
    </span>
  </p>
</div>
</body></html>"#
        );
        std::fs::write(output_hocr, hocr)?;
        std::fs::write(output_text, "recognized\n")?;
        Ok(())
    }
}

fn scanned_origin(dir: &Path) -> PathBuf {
    use lopdf::{Dictionary, Object, Stream};

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for _ in 0..3 {
        let image = Stream::new(
            Dictionary::from_iter([
                ("Type", Object::Name(b"XObject".to_vec())),
                ("Subtype", Object::Name(b"Image".to_vec())),
                ("Width", Object::Integer(1275)),
                ("Height", Object::Integer(1650)),
                ("ColorSpace", Object::Name(b"DeviceGray".to_vec())),
                ("BitsPerComponent", Object::Integer(8)),
            ]),
            vec![0u8; 16],
        );
        let image_id = doc.add_object(Object::Stream(image));
        let resources_id = doc.add_object(Dictionary::from_iter([(
            "XObject",
            Object::Dictionary(Dictionary::from_iter([(
                "Im0",
                Object::Reference(image_id),
            )])),
        )]));
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            b"q 612 0 0 792 0 0 cm /Im0 Do Q".to_vec(),
        ));
        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let path = dir.join("scanned.pdf");
    doc.save(&path).unwrap();
    path
}

#[test]
fn pipeline_grafts_hocr_text_onto_every_page() {
    let dir = tempfile::tempdir().unwrap();
    let input = scanned_origin(dir.path());
    let output = dir.path().join("out.pdf");

    let options = OcrOptions {
        jobs: 3,
        ..Default::default()
    };
    run_pipeline(
        &input,
        &output,
        &options,
        Arc::new(HocrWordEngine),
        Arc::new(BlankRasterizer),
        &NullProgressBar,
        &CancellationToken::new(),
    )
    .unwrap();

    let doc = Document::load(&output).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 3);
    for page_id in pages.values() {
        let content = String::from_utf8(doc.get_page_content(*page_id).unwrap()).unwrap();
        // Every page gained a text-layer XObject drawn before the image.
        let do_pos = content.find(" Do").unwrap();
        let im_pos = content.find("/Im0").unwrap();
        assert!(do_pos < im_pos);
    }
}

#[test]
fn pipeline_output_is_deterministic_across_worker_counts() {
    let dir = tempfile::tempdir().unwrap();
    let input = scanned_origin(dir.path());

    let mut outputs = Vec::new();
    for jobs in [1, 4] {
        let output = dir.path().join(format!("out-{jobs}.pdf"));
        let options = OcrOptions {
            jobs,
            deterministic_output: true,
            ..Default::default()
        };
        run_pipeline(
            &input,
            &output,
            &options,
            Arc::new(HocrWordEngine),
            Arc::new(BlankRasterizer),
            &NullProgressBar,
            &CancellationToken::new(),
        )
        .unwrap();
        outputs.push(std::fs::read(output).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn sidecar_collects_pages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = scanned_origin(dir.path());
    let output = dir.path().join("out.pdf");
    let sidecar = dir.path().join("out.txt");

    let options = OcrOptions {
        jobs: 2,
        sidecar: Some(sidecar.clone()),
        ..Default::default()
    };
    run_pipeline(
        &input,
        &output,
        &options,
        Arc::new(HocrWordEngine),
        Arc::new(BlankRasterizer),
        &NullProgressBar,
        &CancellationToken::new(),
    )
    .unwrap();

    let text = std::fs::read_to_string(&sidecar).unwrap();
    let pages: Vec<&str> = text.split('\u{c}').collect();
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|p| p.contains("recognized")));
}

#[test]
fn empty_ocr_tree_renders_nothing_but_page_survives() {
    let dir = tempfile::tempdir().unwrap();
    let input = scanned_origin(dir.path());
    let output = dir.path().join("out.pdf");

    run_pipeline(
        &input,
        &output,
        &OcrOptions::default(),
        Arc::new(pdf_ocr_core::NullOcrEngine),
        Arc::new(BlankRasterizer),
        &NullProgressBar,
        &CancellationToken::new(),
    )
    .unwrap();

    let doc = Document::load(&output).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[test]
fn render_rejects_non_page_root() {
    let manager = fonts();
    let renderer = TextLayerRenderer::new(&manager, RenderOptions::default());
    let not_a_page = OcrElement::new(pdf_ocr_core::OcrClass::Word);
    assert!(renderer.render_page_to_bytes(&not_a_page, 72.0).is_err());
}
