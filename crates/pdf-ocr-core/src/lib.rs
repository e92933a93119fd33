//! PDF OCR Core Library
//!
//! This library adds a searchable text layer to image-only PDFs without
//! disturbing their visual appearance:
//! - hOCR parsing into an engine-agnostic OCR tree
//! - text-layer rendering with baseline alignment, per-word horizontal
//!   scaling, multi-font selection by Unicode coverage, and a glyphless
//!   fallback font
//! - grafting text layers into the origin PDF as Form XObjects
//! - a page-parallel pipeline orchestrating rasterization, OCR, rendering
//!   and grafting
//!
//! OCR engines and rasterizers are external collaborators behind the
//! [`OcrEngine`] and [`Rasterizer`] traits; a [`NullOcrEngine`] ships for
//! no-OCR conversion runs.

pub mod config;
pub mod error;
pub mod font;
pub mod geometry;
pub mod graft;
pub mod hocr;
pub mod ocr_engine;
pub mod pdfinfo;
pub mod pipeline;
pub mod rasterize;
pub mod render;
pub mod util;

pub use config::{AppConfig, ExistingTextAction, OcrOptions};
pub use error::{Error, ExitCode, Result};
pub use font::{FontManager, FontProvider, MultiFontManager};
pub use geometry::{Baseline, BoundingBox, Matrix, Resolution};
pub use graft::{GraftJob, GrafterOptions, MAX_REPLACE_PAGES, OcrGrafter};
pub use hocr::{HocrParser, OcrClass, OcrElement, TextDirection, parse_hocr_file};
pub use ocr_engine::{NullOcrEngine, OcrEngine, OcrOutputMode, OrientationConfidence};
pub use pdfinfo::{PageInfo, PdfInfo};
pub use pipeline::{
    CancellationToken, NullProgressBar, PageResult, ProgressReporter, run_pipeline,
};
pub use rasterize::{RasterizeOptions, Rasterizer};
pub use render::{DebugRenderOptions, RenderOptions, TextLayerRenderer};
