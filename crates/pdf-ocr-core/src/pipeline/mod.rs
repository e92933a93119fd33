//! The page-parallel OCR pipeline.
//!
//! Per page: decide whether OCR is needed, rasterize, detect orientation,
//! run the OCR engine, render the text layer, and hand a [`GraftJob`] to the
//! driver. Workers run in parallel; the driver owns the grafter and applies
//! results in ascending page order, so output is deterministic regardless of
//! completion order.

pub mod context;
pub mod executor;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::{Dictionary, Document, Object, Stream};
use tracing::{debug, info, warn};

pub use context::{PAGE_RESULT_VERSION, PageContext, PageResult, merge_sidecars};
pub use executor::{CancellationToken, execute_pages};
pub use progress::{NullProgressBar, ProgressReporter};

use crate::config::{ExistingTextAction, OcrOptions};
use crate::error::{Error, Result};
use crate::font::{ChainedFontProvider, MultiFontManager};
use crate::graft::{GrafterOptions, OcrGrafter};
use crate::hocr::parse_hocr_file;
use crate::ocr_engine::{OcrEngine, OcrOutputMode};
use crate::pdfinfo::PdfInfo;
use crate::rasterize::{Rasterizer, RasterizeOptions};
use crate::render::{RenderOptions, TextLayerRenderer};

/// Decide whether a page needs OCR, per the configured policy.
///
/// Pages without images are passed through: rasterizing vector content
/// rarely yields meaningful text. Pages with existing text follow
/// [`ExistingTextAction`]. `skip_big_mpixels` short-circuits giant pages.
pub fn is_ocr_required(ctx: &PageContext) -> Result<bool> {
    let page = ctx.pageno + 1;
    let mut ocr_required = true;

    if !ctx.pageinfo.has_images() {
        info!(page, "page has no images - skipping OCR");
        ocr_required = false;
    } else if ctx.pageinfo.has_text {
        match ctx.options.existing_text {
            ExistingTextAction::Fail => {
                return Err(Error::PriorOcrFound { page });
            }
            ExistingTextAction::ForceOcr => {
                info!(page, "page already has text! - rasterizing text and running OCR anyway");
            }
            ExistingTextAction::RedoOcr => {
                info!(page, "page already has text! - redoing OCR");
            }
            ExistingTextAction::SkipText => {
                info!(page, "page already has text! - skipping all processing on this page");
                ocr_required = false;
            }
        }
    }

    if ocr_required && ctx.options.skip_big_mpixels > 0.0 {
        let (w, h) = ctx.pageinfo.max_image_pixels();
        let megapixels = f64::from(w) * f64::from(h) / 1.0e6;
        if megapixels > ctx.options.skip_big_mpixels {
            warn!(
                page,
                "page too big, skipping OCR ({megapixels:.1} MPixels > {:.1} MPixels --skip-big)",
                ctx.options.skip_big_mpixels
            );
            ocr_required = false;
        }
    }
    Ok(ocr_required)
}

/// Rasterized artifacts for one page.
struct ProcessedPage {
    /// The raster handed to the OCR engine.
    ocr_image: PathBuf,
    /// Replacement page content, when the visible raster changed.
    image_as_pdf: Option<PathBuf>,
    orientation_correction: i32,
}

/// Rasterize and preprocess one page: orientation preview, full raster,
/// optional deskew, optional vector filtering, optional content replacement.
fn process_page(ctx: &PageContext) -> Result<ProcessedPage> {
    let options = &ctx.options;

    // Decompression bomb guard, before anything decodes the page images.
    let (w, h) = ctx.pageinfo.max_image_pixels();
    let megapixels = f64::from(w) * f64::from(h) / 1.0e6;
    if options.max_image_mpixels > 0.0 && megapixels > options.max_image_mpixels {
        return Err(Error::DecompressionBomb {
            megapixels,
            limit_megapixels: options.max_image_mpixels,
        });
    }

    // Orientation detection on a cheap low-DPI preview.
    let mut orientation_correction = 0;
    if options.rotate_pages {
        let preview = ctx.page_path("preview.png");
        ctx.rasterizer.rasterize_page(
            &ctx.origin,
            &preview,
            &RasterizeOptions {
                raster_dpi: (options.ocr_image_dpi / 4.0).max(72.0),
                pageno: ctx.pageno,
                stop_on_soft_error: false,
                ..Default::default()
            },
        )?;
        let detected = ctx.engine.get_orientation(&preview, options)?;
        if detected.confidence >= options.rotate_pages_threshold {
            orientation_correction = detected.angle.rem_euclid(360);
            if orientation_correction != 0 {
                info!(
                    page = ctx.pageno + 1,
                    angle = orientation_correction,
                    confidence = detected.confidence,
                    "correcting page rotation"
                );
            }
        } else {
            debug!(
                page = ctx.pageno + 1,
                confidence = detected.confidence,
                "orientation confidence below threshold, not rotating"
            );
        }
    }

    let stop_on_soft_error = !options.continue_on_soft_render_error;
    let page_png = ctx.page_path("page.png");
    ctx.rasterizer.rasterize_page(
        &ctx.origin,
        &page_png,
        &RasterizeOptions {
            raster_dpi: options.ocr_image_dpi,
            pageno: ctx.pageno,
            rotation: orientation_correction,
            stop_on_soft_error,
            ..Default::default()
        },
    )?;

    // Deskew: the engine measures the angle, the rasterizer applies it.
    let mut visible_raster = page_png;
    let mut deskewed = false;
    if options.deskew {
        let angle = ctx.engine.get_deskew(&visible_raster, options)?;
        if angle.abs() > 0.05 {
            debug!(page = ctx.pageno + 1, angle, "deskewing page");
            let deskew_png = ctx.page_path("pp-deskew.png");
            ctx.rasterizer.rasterize_page(
                &ctx.origin,
                &deskew_png,
                &RasterizeOptions {
                    raster_dpi: options.ocr_image_dpi,
                    pageno: ctx.pageno,
                    rotation: orientation_correction,
                    deskew_angle: angle,
                    stop_on_soft_error,
                    ..Default::default()
                },
            )?;
            visible_raster = deskew_png;
            deskewed = true;
        }
    }

    // The engine may need a raster without vector content while the visible
    // raster keeps it.
    let ocr_image = if options.remove_vectors {
        let ocr_png = ctx.page_path("ocr.png");
        ctx.rasterizer.rasterize_page(
            &ctx.origin,
            &ocr_png,
            &RasterizeOptions {
                raster_dpi: options.ocr_image_dpi,
                pageno: ctx.pageno,
                rotation: orientation_correction,
                filter_vector: true,
                stop_on_soft_error,
                ..Default::default()
            },
        )?;
        ocr_png
    } else {
        visible_raster.clone()
    };

    // When the page content itself is replaced (forced rasterization or a
    // preprocessed image), wrap the raster as a one-page PDF for emplacement.
    let force_ocr = ctx.options.existing_text == ExistingTextAction::ForceOcr
        && ctx.pageinfo.has_text;
    let image_as_pdf = if force_ocr || deskewed {
        let layer = ctx.page_path("image-layer.pdf");
        wrap_image_as_pdf(&visible_raster, options.ocr_image_dpi, &layer)?;
        Some(layer)
    } else {
        None
    };

    Ok(ProcessedPage {
        ocr_image,
        image_as_pdf,
        orientation_correction,
    })
}

/// Execute the pipeline for a single page, start to finish, synchronously.
/// This is the worker entry point.
pub fn exec_page_sync(ctx: &PageContext) -> Result<PageResult> {
    let span = tracing::info_span!("page", page = ctx.pageno + 1);
    let _entered = span.enter();

    if !is_ocr_required(ctx)? {
        return Ok(PageResult::passthrough(ctx.pageno));
    }

    let processed = match process_page(ctx) {
        Ok(processed) => processed,
        Err(Error::SoftRender { page, reason }) if ctx.options.continue_on_soft_render_error => {
            warn!(page, "recoverable render problem, continuing without OCR: {reason}");
            return Ok(PageResult::passthrough(ctx.pageno));
        }
        Err(e) => return Err(e),
    };

    let mut result = PageResult {
        version: PAGE_RESULT_VERSION,
        pageno: ctx.pageno,
        pdf_page_from_image: processed.image_as_pdf,
        orientation_correction: processed.orientation_correction,
        ..Default::default()
    };

    let sidecar = ctx.page_path("txt");
    let modes = ctx.engine.output_modes();
    if modes.contains(&OcrOutputMode::Tree) {
        let (tree, text) = ctx
            .engine
            .generate_ocr(&processed.ocr_image, &ctx.options, ctx.pageno)?;
        std::fs::write(&sidecar, text)?;
        result.ocr_tree = Some(tree);
        result.sidecar_text = Some(sidecar);
    } else if modes.contains(&OcrOutputMode::Hocr) {
        let hocr = ctx.page_path("hocr");
        ctx.engine
            .generate_hocr(&processed.ocr_image, &hocr, &sidecar, &ctx.options)?;
        let tree = parse_hocr_file(&hocr)?;
        if !tree.is_empty() {
            let dpi = tree.dpi.unwrap_or(ctx.options.ocr_image_dpi);
            let textpdf = ctx.page_path("hocr.pdf");
            let renderer = TextLayerRenderer::new(
                &ctx.fonts,
                RenderOptions {
                    invisible_text: !ctx.options.visible_text,
                    ..Default::default()
                },
            );
            renderer.render_page(&tree, dpi, &textpdf)?;
            result.text_layer_pdf = Some(textpdf);
        }
        result.sidecar_text = Some(sidecar);
    } else if modes.contains(&OcrOutputMode::TextOnlyPdf) {
        let textpdf = ctx.page_path("ocr.pdf");
        ctx.engine
            .generate_pdf(&processed.ocr_image, &textpdf, &sidecar, &ctx.options)?;
        result.text_layer_pdf = Some(textpdf);
        result.sidecar_text = Some(sidecar);
    } else {
        return Err(Error::MissingDependency(
            "OCR engine reports no output modes".into(),
        ));
    }

    Ok(result)
}

/// Wrap a raster image as a one-page PDF sized so the image fills the page
/// at the given DPI. Used for content replacement (emplacement).
fn wrap_image_as_pdf(image_path: &Path, dpi: f64, output: &Path) -> Result<()> {
    let decoded = image::open(image_path)
        .map_err(|e| Error::InputFile(format!("{}: {e}", image_path.display())))?;

    let (color_space, bits, data): (&[u8], i64, Vec<u8>) = match decoded {
        image::DynamicImage::ImageLuma8(img) => (b"DeviceGray", 8, img.into_raw()),
        other => (b"DeviceRGB", 8, other.to_rgb8().into_raw()),
    };
    let (width, height) = image::image_dimensions(image_path)
        .map_err(|e| Error::InputFile(format!("{}: {e}", image_path.display())))?;

    let width_pt = f64::from(width) * 72.0 / dpi;
    let height_pt = f64::from(height) * 72.0 / dpi;

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let image_stream = Stream::new(
        Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(i64::from(width))),
            ("Height", Object::Integer(i64::from(height))),
            ("ColorSpace", Object::Name(color_space.to_vec())),
            ("BitsPerComponent", Object::Integer(bits)),
        ]),
        data,
    );
    let image_id = doc.add_object(Object::Stream(image_stream));

    let resources_id = doc.add_object(Dictionary::from_iter([(
        "XObject",
        Object::Dictionary(Dictionary::from_iter([(
            "Im0",
            Object::Reference(image_id),
        )])),
    )]));

    let content = format!("q\n{width_pt:.4} 0 0 {height_pt:.4} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    let page_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width_pt as f32),
                Object::Real(height_pt as f32),
            ]),
        ),
        ("Contents", Object::Reference(content_id)),
        ("Resources", Object::Reference(resources_id)),
    ]));

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(vec![Object::Reference(page_id)])),
            ("Count", Object::Integer(1)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.save(output)
        .map_err(|e| Error::Pdf(format!("cannot save image layer: {e}")))?;
    Ok(())
}

/// Cross-check the input against the requested options.
fn validate_pdfinfo_options(pdfinfo: &PdfInfo, options: &OcrOptions) -> Result<()> {
    if options.existing_text == ExistingTextAction::RedoOcr && pdfinfo.has_acroform {
        return Err(Error::InputFile(
            "--redo-ocr is not currently possible on PDFs with fillable forms; \
             use --force-ocr instead"
                .into(),
        ));
    }
    if pdfinfo.is_tagged {
        warn!(
            "this PDF is marked as a Tagged PDF; it may already contain \
             machine-readable text"
        );
    }
    Ok(())
}

/// The working directory for one run: temporary by default, kept on request.
enum WorkDir {
    Temp(tempfile::TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn create(keep: bool) -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("pdf-ocr.").tempdir()?;
        if keep {
            let path = temp.keep();
            info!("keeping temporary files in {}", path.display());
            Ok(Self::Kept(path))
        } else {
            Ok(Self::Temp(temp))
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Temp(temp) => temp.path(),
            Self::Kept(path) => path,
        }
    }
}

/// Run the whole pipeline: origin PDF in, searchable PDF out.
pub fn run_pipeline(
    input: &Path,
    output: &Path,
    options: &OcrOptions,
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn Rasterizer>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    options.validate()?;
    let pdfinfo = PdfInfo::from_path(input)?;
    validate_pdfinfo_options(&pdfinfo, options)?;

    let work_dir = WorkDir::create(options.keep_temporary_files)?;
    let fonts = Arc::new(MultiFontManager::new(Arc::new(
        ChainedFontProvider::standard(options.font_dir.clone()),
    )));

    let page_count = pdfinfo.len();
    info!(
        pages = page_count,
        engine = engine.version(),
        "processing {}",
        input.display()
    );
    let options_arc = Arc::new(options.clone());
    let contexts: Vec<PageContext> = pdfinfo
        .pages()
        .iter()
        .map(|pageinfo| PageContext {
            pageno: pageinfo.pageno,
            origin: input.to_path_buf(),
            work_dir: work_dir.path().to_path_buf(),
            options: Arc::clone(&options_arc),
            pageinfo: pageinfo.clone(),
            engine: Arc::clone(&engine),
            rasterizer: Arc::clone(&rasterizer),
            fonts: Arc::clone(&fonts),
        })
        .collect();

    let grafter_options = GrafterOptions {
        output_file: output.to_path_buf(),
        working_dir: work_dir.path().to_path_buf(),
        strip_old_text: options.existing_text == ExistingTextAction::RedoOcr,
        keep_temporary_files: options.keep_temporary_files,
        deterministic_output: options.deterministic_output,
        creator: Some(engine.creator_tag(options)),
    };
    let mut grafter = OcrGrafter::new(input, &pdfinfo, &fonts, grafter_options)?;

    progress.set_total(2 * page_count as u64);
    let mut sidecars: Vec<Option<PathBuf>> = vec![None; page_count];

    execute_pages(
        options.effective_jobs(),
        contexts,
        cancel,
        exec_page_sync,
        |result: PageResult| {
            progress.set_message(&format!("page {}", result.pageno + 1));
            sidecars[result.pageno] = result.sidecar_text.clone();
            progress.update(1);
            grafter.graft_page(&result.into_graft_job())?;
            progress.update(1);
            Ok(())
        },
    )?;

    if let Some(sidecar_path) = &options.sidecar {
        merge_sidecars(&sidecars, sidecar_path)?;
    }

    let finished = grafter.finalize()?;
    progress.finish();
    info!("output written to {}", finished.display());
    Ok(finished)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ExitCode;
    use crate::geometry::BoundingBox;
    use crate::hocr::OcrElement;
    use crate::hocr::element::tests::{single_line_page, word};
    use crate::ocr_engine::NullOcrEngine;
    use crate::pdfinfo::tests::build_test_pdf;
    use crate::pipeline::progress::tests::CountingProgress;
    use crate::rasterize::tests::StubRasterizer;
    use std::collections::HashSet;

    /// Engine that always reports the same line of words, sized to the page.
    struct FixedTextEngine {
        orientation: i32,
        confidence: f64,
    }

    impl FixedTextEngine {
        fn new() -> Self {
            Self {
                orientation: 0,
                confidence: 0.0,
            }
        }
    }

    impl OcrEngine for FixedTextEngine {
        fn version(&self) -> String {
            "fixed 1.0".into()
        }

        fn creator_tag(&self, _options: &OcrOptions) -> String {
            "fixed".into()
        }

        fn languages(&self, _options: &OcrOptions) -> HashSet<String> {
            HashSet::from(["eng".to_owned()])
        }

        fn output_modes(&self) -> &[OcrOutputMode] {
            &[OcrOutputMode::Tree]
        }

        fn get_orientation(
            &self,
            _image: &Path,
            _options: &OcrOptions,
        ) -> crate::error::Result<crate::ocr_engine::OrientationConfidence> {
            Ok(crate::ocr_engine::OrientationConfidence {
                angle: self.orientation,
                confidence: self.confidence,
            })
        }

        fn generate_ocr(
            &self,
            image: &Path,
            options: &OcrOptions,
            page_number: usize,
        ) -> crate::error::Result<(OcrElement, String)> {
            let (w, h) = image::image_dimensions(image)
                .map_err(|e| Error::InputFile(e.to_string()))?;
            let mut tree = single_line_page(
                f64::from(w),
                f64::from(h),
                BoundingBox::new(10.0, 10.0, 200.0, 40.0),
                vec![
                    word("fixed", BoundingBox::new(10.0, 10.0, 100.0, 40.0)),
                    word("text", BoundingBox::new(120.0, 10.0, 200.0, 40.0)),
                ],
            );
            tree.dpi = Some(options.ocr_image_dpi);
            tree.page_number = Some(page_number);
            Ok((tree, "fixed text\n".to_owned()))
        }
    }

    fn write_origin(dir: &Path) -> PathBuf {
        let path = dir.join("input.pdf");
        let mut doc = build_test_pdf("q 612 0 0 792 0 0 cm /Im0 Do Q", None, Some((1275, 1650)));
        doc.save(&path).unwrap();
        path
    }

    fn write_text_origin(dir: &Path) -> PathBuf {
        let path = dir.join("texty.pdf");
        let mut doc = build_test_pdf(
            "BT /F1 12 Tf 3 Tr 72 700 Td (existing) Tj ET q 612 0 0 792 0 0 cm /Im0 Do Q",
            None,
            Some((1275, 1650)),
        );
        doc.save(&path).unwrap();
        path
    }

    fn run(
        input: &Path,
        output: &Path,
        options: &OcrOptions,
        engine: Arc<dyn OcrEngine>,
    ) -> Result<PathBuf> {
        run_pipeline(
            input,
            output,
            options,
            engine,
            Arc::new(StubRasterizer::new(1275, 1650)),
            &NullProgressBar,
            &CancellationToken::new(),
        )
    }

    #[test]
    fn test_end_to_end_with_fixed_engine() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let options = OcrOptions {
            jobs: 2,
            ..Default::default()
        };
        let finished = run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap();
        assert_eq!(finished, output);

        let doc = Document::load(&output).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        // The page gained a Form XObject (the text layer) next to its image.
        let content = String::from_utf8(doc.get_page_content(pages[&1]).unwrap()).unwrap();
        assert!(content.contains(" Do"));
        assert!(content.contains("/Im0"));

        // The engine's creator tag lands in the document info.
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = doc.get_dictionary(info_id).unwrap();
        assert_eq!(
            info.get(b"Creator").unwrap().as_str().unwrap(),
            b"fixed"
        );
    }

    #[test]
    fn test_null_engine_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let finished = run(
            &input,
            &output,
            &OcrOptions::default(),
            Arc::new(NullOcrEngine),
        )
        .unwrap();
        let doc = Document::load(&finished).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_prior_text_fails_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_text_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let err = run(
            &input,
            &output,
            &OcrOptions::default(),
            Arc::new(FixedTextEngine::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PriorOcrFound { page: 1 }));
        assert_eq!(err.exit_code(), ExitCode::AlreadyDoneOcr);
    }

    #[test]
    fn test_prior_text_skip_text_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_text_origin(dir.path());
        let output = dir.path().join("out.pdf");
        let original_content = {
            let doc = Document::load(&input).unwrap();
            doc.get_page_content(doc.get_pages()[&1]).unwrap()
        };

        let options = OcrOptions {
            existing_text: ExistingTextAction::SkipText,
            ..Default::default()
        };
        run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap();

        // Page content (including its old invisible text) is untouched.
        let doc = Document::load(&output).unwrap();
        let content = doc.get_page_content(doc.get_pages()[&1]).unwrap();
        assert_eq!(content, original_content);
    }

    #[test]
    fn test_redo_ocr_strips_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_text_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let options = OcrOptions {
            existing_text: ExistingTextAction::RedoOcr,
            ..Default::default()
        };
        run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap();

        let doc = Document::load(&output).unwrap();
        let content = String::from_utf8(doc.get_page_content(doc.get_pages()[&1]).unwrap()).unwrap();
        assert!(!content.contains("existing"));
        assert!(content.contains("/Im0"));
    }

    #[test]
    fn test_skip_big_pages() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path()); // 1275x1650 ≈ 2.1 MPixels
        let output = dir.path().join("out.pdf");

        let options = OcrOptions {
            skip_big_mpixels: 1.0,
            ..Default::default()
        };
        run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap();

        // Page was skipped: no text layer XObject added.
        let doc = Document::load(&output).unwrap();
        let content = String::from_utf8(doc.get_page_content(doc.get_pages()[&1]).unwrap()).unwrap();
        assert!(!content.contains("Do\nQ\nq"));
        assert_eq!(content.matches("Do").count(), 1); // only /Im0
    }

    #[test]
    fn test_decompression_bomb_guard() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let options = OcrOptions {
            max_image_mpixels: 1.0,
            ..Default::default()
        };
        let err = run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap_err();
        assert!(matches!(err, Error::DecompressionBomb { .. }));
    }

    #[test]
    fn test_soft_render_error_passes_page_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let mut rasterizer = StubRasterizer::new(1275, 1650);
        rasterizer.soft_error_pages = vec![0];
        let result = run_pipeline(
            &input,
            &output,
            &OcrOptions::default(),
            Arc::new(FixedTextEngine::new()),
            Arc::new(rasterizer),
            &NullProgressBar,
            &CancellationToken::new(),
        );
        // Soft error recovered: the run succeeds, page has no text layer.
        result.unwrap();
        let doc = Document::load(&output).unwrap();
        let content = String::from_utf8(doc.get_page_content(doc.get_pages()[&1]).unwrap()).unwrap();
        assert_eq!(content.matches("Do").count(), 1);
    }

    #[test]
    fn test_soft_render_error_fails_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let mut rasterizer = StubRasterizer::new(1275, 1650);
        rasterizer.soft_error_pages = vec![0];
        let options = OcrOptions {
            continue_on_soft_render_error: false,
            ..Default::default()
        };
        let err = run_pipeline(
            &input,
            &output,
            &options,
            Arc::new(FixedTextEngine::new()),
            Arc::new(rasterizer),
            &NullProgressBar,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SoftRender { .. }));
    }

    #[test]
    fn test_sidecar_written() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");
        let sidecar = dir.path().join("out.txt");

        let options = OcrOptions {
            sidecar: Some(sidecar.clone()),
            ..Default::default()
        };
        run(&input, &output, &options, Arc::new(FixedTextEngine::new())).unwrap();
        let text = std::fs::read_to_string(&sidecar).unwrap();
        assert!(text.contains("fixed text"));
    }

    #[test]
    fn test_orientation_correction_applied() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let engine = FixedTextEngine {
            orientation: 90,
            confidence: 10.0,
        };
        let options = OcrOptions {
            rotate_pages: true,
            ..Default::default()
        };
        run(&input, &output, &options, Arc::new(engine)).unwrap();

        // content_rotation 0, auto 90 -> /Rotate (0 - 90) mod 360 = 270.
        let doc = Document::load(&output).unwrap();
        let page = doc.get_dictionary(doc.get_pages()[&1]).unwrap();
        assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 270);
    }

    #[test]
    fn test_progress_ticks_twice_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let progress = CountingProgress::default();
        run_pipeline(
            &input,
            &output,
            &OcrOptions::default(),
            Arc::new(FixedTextEngine::new()),
            Arc::new(StubRasterizer::new(1275, 1650)),
            &progress,
            &CancellationToken::new(),
        )
        .unwrap();
        use std::sync::atomic::Ordering;
        assert_eq!(progress.total.load(Ordering::Relaxed), 2);
        assert_eq!(progress.ticks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_cancelled_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());
        let output = dir.path().join("out.pdf");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_pipeline(
            &input,
            &output,
            &OcrOptions::default(),
            Arc::new(FixedTextEngine::new()),
            Arc::new(StubRasterizer::new(1275, 1650)),
            &NullProgressBar,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(err.exit_code(), ExitCode::CtrlC);
    }

    #[test]
    fn test_deterministic_output_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());

        let options = OcrOptions {
            deterministic_output: true,
            ..Default::default()
        };
        let out1 = dir.path().join("out1.pdf");
        let out2 = dir.path().join("out2.pdf");
        run(&input, &out1, &options, Arc::new(FixedTextEngine::new())).unwrap();
        run(&input, &out2, &options, Arc::new(FixedTextEngine::new())).unwrap();
        assert_eq!(std::fs::read(out1).unwrap(), std::fs::read(out2).unwrap());
    }

    #[test]
    fn test_parallel_matches_serial() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_origin(dir.path());

        let serial_out = dir.path().join("serial.pdf");
        let parallel_out = dir.path().join("parallel.pdf");
        let base = OcrOptions {
            deterministic_output: true,
            ..Default::default()
        };
        let serial = OcrOptions { jobs: 1, ..base.clone() };
        let parallel = OcrOptions { jobs: 4, ..base };
        run(&input, &serial_out, &serial, Arc::new(FixedTextEngine::new())).unwrap();
        run(&input, &parallel_out, &parallel, Arc::new(FixedTextEngine::new())).unwrap();
        assert_eq!(
            std::fs::read(serial_out).unwrap(),
            std::fs::read(parallel_out).unwrap()
        );
    }

    #[test]
    fn test_redo_ocr_with_acroform_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.pdf");
        let mut doc = build_test_pdf("q 612 0 0 792 0 0 cm /Im0 Do Q", None, Some((100, 100)));
        // Attach an AcroForm to the catalog.
        let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        let form_id = doc.add_object(Dictionary::from_iter([(
            "Fields",
            Object::Array(vec![]),
        )]));
        let catalog = doc.get_dictionary_mut(catalog_id).unwrap();
        catalog.set("AcroForm", Object::Reference(form_id));
        doc.save(&path).unwrap();

        let options = OcrOptions {
            existing_text: ExistingTextAction::RedoOcr,
            ..Default::default()
        };
        let err = run(
            &path,
            &dir.path().join("out.pdf"),
            &options,
            Arc::new(FixedTextEngine::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InputFile(_)));
    }
}
