//! The rasterizer capability.
//!
//! Turning a PDF page into a raster image is delegated to an external
//! collaborator (Ghostscript or pdfium, invoked elsewhere). The pipeline
//! depends only on this trait. Implementations MUST produce the same output
//! dimensions for the same MediaBox when `use_cropbox` is false, regardless
//! of rotation (dimensions swap for 90/270).

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Raster output formats the pipeline asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterDevice {
    #[default]
    Png,
    PngGray,
    Jpeg,
}

/// One rasterization request.
#[derive(Debug, Clone)]
pub struct RasterizeOptions {
    /// Resolution to render at.
    pub raster_dpi: f64,
    /// Zero-based page to render.
    pub pageno: usize,
    /// Pre-rotation applied to the output, degrees clockwise.
    pub rotation: i32,
    /// Small skew correction applied during rendering, degrees.
    pub deskew_angle: f64,
    /// Drop vector content so the OCR engine sees only rasters.
    pub filter_vector: bool,
    /// Fail instead of continuing past recoverable renderer complaints.
    pub stop_on_soft_error: bool,
    /// Render the CropBox instead of the MediaBox.
    pub use_cropbox: bool,
    pub device: RasterDevice,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            raster_dpi: 300.0,
            pageno: 0,
            rotation: 0,
            deskew_angle: 0.0,
            filter_vector: false,
            stop_on_soft_error: false,
            use_cropbox: false,
            device: RasterDevice::default(),
        }
    }
}

/// A PDF page rasterizer.
pub trait Rasterizer: Send + Sync {
    /// Render one page of `input` to `output`, returning the output path.
    ///
    /// Recoverable renderer complaints surface as
    /// [`Error::SoftRender`](crate::error::Error::SoftRender) when
    /// `stop_on_soft_error` is set, otherwise they are logged and rendering
    /// continues.
    fn rasterize_page(
        &self,
        input: &Path,
        output: &Path,
        options: &RasterizeOptions,
    ) -> Result<PathBuf>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Test rasterizer: writes a blank PNG of fixed size and records calls.
    pub(crate) struct StubRasterizer {
        pub width: u32,
        pub height: u32,
        pub calls: Mutex<Vec<RasterizeOptions>>,
        /// Page numbers that report a soft error instead of rendering.
        pub soft_error_pages: Vec<usize>,
    }

    impl StubRasterizer {
        pub(crate) fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                calls: Mutex::new(Vec::new()),
                soft_error_pages: Vec::new(),
            }
        }
    }

    impl Rasterizer for StubRasterizer {
        fn rasterize_page(
            &self,
            _input: &Path,
            output: &Path,
            options: &RasterizeOptions,
        ) -> Result<PathBuf> {
            #[allow(clippy::unwrap_used)]
            self.calls.lock().unwrap().push(options.clone());
            if self.soft_error_pages.contains(&options.pageno) {
                return Err(Error::SoftRender {
                    page: options.pageno + 1,
                    reason: "stub soft error".into(),
                });
            }
            let (w, h) = if options.rotation == 90 || options.rotation == 270 {
                (self.height, self.width)
            } else {
                (self.width, self.height)
            };
            let img = image::GrayImage::from_pixel(w, h, image::Luma([255u8]));
            img.save(output)
                .map_err(|e| Error::SubprocessOutput(e.to_string()))?;
            Ok(output.to_path_buf())
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_stub_swaps_dimensions_on_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubRasterizer::new(200, 100);
        let out = dir.path().join("p.png");

        let options = RasterizeOptions {
            rotation: 90,
            ..Default::default()
        };
        stub.rasterize_page(Path::new("in.pdf"), &out, &options).unwrap();
        assert_eq!(image::image_dimensions(&out).unwrap(), (100, 200));

        let options = RasterizeOptions::default();
        stub.rasterize_page(Path::new("in.pdf"), &out, &options).unwrap();
        assert_eq!(image::image_dimensions(&out).unwrap(), (200, 100));
    }
}
