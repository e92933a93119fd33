//! The OCR engine capability.
//!
//! Engines are external collaborators (Tesseract and friends run as
//! subprocesses elsewhere); the pipeline depends only on this trait. An
//! engine produces its results in one of three forms, declared up front by
//! [`OcrEngine::output_modes`] rather than discovered by call-time failures:
//! an hOCR file, a text-only PDF, or an [`OcrElement`] tree directly.

use std::collections::HashSet;
use std::path::Path;

use crate::config::OcrOptions;
use crate::error::{Error, Result};
use crate::hocr::OcrElement;

/// How an engine can deliver its recognition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrOutputMode {
    /// `generate_hocr` writes an hOCR file plus a plain-text sidecar.
    Hocr,
    /// `generate_pdf` writes a text-only PDF directly.
    TextOnlyPdf,
    /// `generate_ocr` returns an `OcrElement` tree in memory.
    Tree,
}

/// Orientation detection result: the angle the page image is rotated away
/// from upright, and the engine's confidence in that call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationConfidence {
    /// One of 0, 90, 180, 270.
    pub angle: i32,
    pub confidence: f64,
}

impl OrientationConfidence {
    pub const fn none() -> Self {
        Self {
            angle: 0,
            confidence: 0.0,
        }
    }
}

/// An OCR engine implementation.
pub trait OcrEngine: Send + Sync {
    /// Engine version string, for logs and metadata.
    fn version(&self) -> String;

    /// Tag identifying the engine in output metadata.
    fn creator_tag(&self, options: &OcrOptions) -> String;

    /// Languages this engine can recognize with its installed data.
    fn languages(&self, options: &OcrOptions) -> HashSet<String>;

    /// Result forms this engine supports, in preference order.
    fn output_modes(&self) -> &[OcrOutputMode];

    /// Detect the orientation of a page image.
    fn get_orientation(&self, image: &Path, options: &OcrOptions) -> Result<OrientationConfidence> {
        let _ = (image, options);
        Ok(OrientationConfidence::none())
    }

    /// Measure the skew angle of a page image, in degrees.
    fn get_deskew(&self, image: &Path, options: &OcrOptions) -> Result<f64> {
        let _ = (image, options);
        Ok(0.0)
    }

    /// Recognize `image`, writing hOCR to `output_hocr` and plain text to
    /// `output_text`. Must be implemented when `output_modes` contains
    /// [`OcrOutputMode::Hocr`].
    fn generate_hocr(
        &self,
        image: &Path,
        output_hocr: &Path,
        output_text: &Path,
        options: &OcrOptions,
    ) -> Result<()> {
        let _ = (image, output_hocr, output_text, options);
        Err(Error::OcrEngineConfig(format!(
            "{} does not support hOCR output",
            self.version()
        )))
    }

    /// Recognize `image`, writing a text-only PDF to `output_pdf` and plain
    /// text to `output_text`. Must be implemented when `output_modes`
    /// contains [`OcrOutputMode::TextOnlyPdf`].
    fn generate_pdf(
        &self,
        image: &Path,
        output_pdf: &Path,
        output_text: &Path,
        options: &OcrOptions,
    ) -> Result<()> {
        let _ = (image, output_pdf, output_text, options);
        Err(Error::OcrEngineConfig(format!(
            "{} does not support direct PDF output",
            self.version()
        )))
    }

    /// Recognize `image` and return the tree plus recognized plain text.
    /// Must be implemented when `output_modes` contains
    /// [`OcrOutputMode::Tree`].
    fn generate_ocr(
        &self,
        image: &Path,
        options: &OcrOptions,
        page_number: usize,
    ) -> Result<(OcrElement, String)> {
        let _ = (image, options, page_number);
        Err(Error::OcrEngineConfig(format!(
            "{} does not support direct tree output",
            self.version()
        )))
    }
}

/// The built-in no-op engine: produces empty results sized to the input
/// image. Used for "convert without OCR" runs and as a test double.
#[derive(Debug, Default)]
pub struct NullOcrEngine;

impl NullOcrEngine {
    const MODES: &'static [OcrOutputMode] = &[OcrOutputMode::Tree, OcrOutputMode::Hocr];

    fn image_size(image: &Path) -> Result<(u32, u32)> {
        image::image_dimensions(image)
            .map_err(|e| Error::InputFile(format!("{}: {e}", image.display())))
    }
}

impl OcrEngine for NullOcrEngine {
    fn version(&self) -> String {
        "none".to_owned()
    }

    fn creator_tag(&self, _options: &OcrOptions) -> String {
        "pdf-ocr (no OCR)".to_owned()
    }

    fn languages(&self, _options: &OcrOptions) -> HashSet<String> {
        HashSet::new()
    }

    fn output_modes(&self) -> &[OcrOutputMode] {
        Self::MODES
    }

    fn generate_hocr(
        &self,
        image: &Path,
        output_hocr: &Path,
        output_text: &Path,
        _options: &OcrOptions,
    ) -> Result<()> {
        let (width, height) = Self::image_size(image)?;
        let hocr = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
<head>
  <title>pdf-ocr - No OCR</title>
  <meta name="ocr-system" content="pdf-ocr null engine"/>
</head>
<body>
  <div class="ocr_page" title="bbox 0 0 {width} {height}">
  </div>
</body>
</html>
"#
        );
        std::fs::write(output_hocr, hocr)?;
        std::fs::write(output_text, "")?;
        Ok(())
    }

    fn generate_ocr(
        &self,
        image: &Path,
        options: &OcrOptions,
        page_number: usize,
    ) -> Result<(OcrElement, String)> {
        let (width, height) = Self::image_size(image)?;
        let page = OcrElement::empty_page(
            f64::from(width),
            f64::from(height),
            options.ocr_image_dpi,
            page_number,
        );
        Ok((page, String::new()))
    }
}
