//! Per-run and per-page context passed to pipeline workers, and the wire
//! format carrying results back to the driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OcrOptions;
use crate::error::{Error, Result};
use crate::font::MultiFontManager;
use crate::graft::GraftJob;
use crate::hocr::OcrElement;
use crate::ocr_engine::OcrEngine;
use crate::pdfinfo::PageInfo;
use crate::pipeline::executor::PageTask;
use crate::rasterize::Rasterizer;
use crate::util::page_file_name;

/// Everything a worker needs to process one page. Self-contained and `Send`:
/// collaborators are shared through `Arc`, the rest is owned.
#[derive(Clone)]
pub struct PageContext {
    pub pageno: usize,
    pub origin: PathBuf,
    pub work_dir: PathBuf,
    pub options: Arc<OcrOptions>,
    pub pageinfo: PageInfo,
    pub engine: Arc<dyn OcrEngine>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub fonts: Arc<MultiFontManager>,
}

impl PageContext {
    /// Scratch path for this page: `NNNNNN.<suffix>` in the work directory.
    pub fn page_path(&self, suffix: &str) -> PathBuf {
        self.work_dir.join(page_file_name(self.pageno, suffix))
    }
}

impl PageTask for PageContext {
    fn pageno(&self) -> usize {
        self.pageno
    }
}

/// Version tag of the worker-to-driver result format. Bump when fields
/// change incompatibly.
pub const PAGE_RESULT_VERSION: u32 = 1;

fn default_version() -> u32 {
    PAGE_RESULT_VERSION
}

/// Result of processing one page, sent from a worker to the driver.
///
/// This is a stable, explicitly-named wire format: thread workers hand the
/// struct over directly, and executors that cross a process boundary
/// serialize it as JSON via [`PageResult::to_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageResult {
    #[serde(default = "default_version")]
    pub version: u32,
    pub pageno: usize,
    /// Replacement visible content, when preprocessing changed the raster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_page_from_image: Option<PathBuf>,
    /// Rendered text layer PDF for this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_layer_pdf: Option<PathBuf>,
    /// Plain-text sidecar for this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_text: Option<PathBuf>,
    /// OCR tree, when the engine produced one directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_tree: Option<OcrElement>,
    /// Detected deviation from upright: 0, 90, 180 or 270.
    #[serde(default)]
    pub orientation_correction: i32,
}

impl PageResult {
    /// A page passed through with no OCR.
    pub fn passthrough(pageno: usize) -> Self {
        Self {
            version: PAGE_RESULT_VERSION,
            pageno,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Pdf(format!("cannot serialize result: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Pdf(format!("cannot deserialize result: {e}")))
    }

    pub fn into_graft_job(self) -> GraftJob {
        GraftJob {
            pageno: self.pageno,
            image_as_pdf: self.pdf_page_from_image,
            text_layer_pdf: self.text_layer_pdf,
            ocr_tree: self.ocr_tree,
            autorotate_correction: self.orientation_correction,
        }
    }
}

/// Merge per-page sidecar files into one text document, pages separated by
/// form feeds, in page order.
pub fn merge_sidecars(sidecars: &[Option<PathBuf>], output: &Path) -> Result<()> {
    let mut merged = String::new();
    for (i, sidecar) in sidecars.iter().enumerate() {
        if i > 0 {
            merged.push('\u{c}');
        }
        if let Some(path) = sidecar
            && let Ok(text) = std::fs::read_to_string(path)
        {
            merged.push_str(&text);
        }
    }
    std::fs::write(output, merged).map_err(|e| Error::IoPath {
        path: output.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_round_trip() {
        let result = PageResult {
            version: PAGE_RESULT_VERSION,
            pageno: 4,
            text_layer_pdf: Some(PathBuf::from("/tmp/000005.hocr.pdf")),
            orientation_correction: 90,
            ..Default::default()
        };
        let json = result.to_json().unwrap();
        assert!(json.contains("\"pageno\":4"));
        assert!(json.contains("\"version\":1"));
        let back = PageResult::from_json(&json).unwrap();
        assert_eq!(result, back);
    }

    #[test]
    fn test_passthrough_has_no_layers() {
        let result = PageResult::passthrough(7);
        assert_eq!(result.pageno, 7);
        assert!(result.text_layer_pdf.is_none());
        assert!(result.ocr_tree.is_none());
        let job = result.into_graft_job();
        assert_eq!(job.pageno, 7);
        assert!(job.text_layer_pdf.is_none());
    }

    #[test]
    fn test_merge_sidecars_in_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("000001.txt");
        let three = dir.path().join("000003.txt");
        std::fs::write(&one, "first page").unwrap();
        std::fs::write(&three, "third page").unwrap();

        let output = dir.path().join("sidecar.txt");
        merge_sidecars(&[Some(one), None, Some(three)], &output).unwrap();
        let merged = std::fs::read_to_string(&output).unwrap();
        assert_eq!(merged, "first page\u{c}\u{c}third page");
    }
}
