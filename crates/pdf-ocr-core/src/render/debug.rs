//! Debug visualization of OCR structure in rendered text layers.

use std::fmt::Write as _;

/// Which OCR structures to sketch into the output. All off by default; any
/// enabled flag forces visible text so the sketches mean something.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugRenderOptions {
    /// Cyan rectangles around paragraphs
    pub render_paragraph_bbox: bool,
    /// Magenta lines along baselines
    pub render_baseline: bool,
    /// Red triangles conveying word height and direction
    pub render_triangle: bool,
    /// Blue rectangles around lines
    pub render_line_bbox: bool,
    /// Green rectangles around words
    pub render_word_bbox: bool,
    /// Dark green boxes over inter-word spaces
    pub render_space_bbox: bool,
}

impl DebugRenderOptions {
    pub fn any_enabled(&self) -> bool {
        *self != Self::default()
    }
}

pub(crate) const CYAN: (f64, f64, f64) = (0.0, 1.0, 1.0);
pub(crate) const BLUE: (f64, f64, f64) = (0.0, 0.0, 1.0);
pub(crate) const GREEN: (f64, f64, f64) = (0.0, 1.0, 0.0);
pub(crate) const RED: (f64, f64, f64) = (1.0, 0.0, 0.0);
pub(crate) const MAGENTA: (f64, f64, f64) = (1.0, 0.0, 1.0);
pub(crate) const DARK_GREEN: (f64, f64, f64) = (0.0, 0.5, 0.0);

/// Stroke a rectangle. Coordinates are already in content-stream space.
pub(crate) fn stroke_rect(
    ops: &mut String,
    color: (f64, f64, f64),
    width: f64,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
) {
    let _ = writeln!(
        ops,
        "q {} {} {} RG {width:.2} w {x:.2} {y:.2} {w:.2} {h:.2} re S Q",
        color.0, color.1, color.2
    );
}

/// Fill a rectangle.
pub(crate) fn fill_rect(
    ops: &mut String,
    color: (f64, f64, f64),
    x: f64,
    y: f64,
    w: f64,
    h: f64,
) {
    let _ = writeln!(
        ops,
        "q {} {} {} rg {x:.2} {y:.2} {w:.2} {h:.2} re f Q",
        color.0, color.1, color.2
    );
}

/// Stroke a line segment.
pub(crate) fn stroke_line(
    ops: &mut String,
    color: (f64, f64, f64),
    width: f64,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
) {
    let _ = writeln!(
        ops,
        "q {} {} {} RG {width:.2} w {x1:.2} {y1:.2} m {x2:.2} {y2:.2} l S Q",
        color.0, color.1, color.2
    );
}
