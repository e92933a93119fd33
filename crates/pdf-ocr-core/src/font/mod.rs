//! Font catalog: loading, selection and coverage analysis.

pub mod manager;
pub mod multi;
pub mod provider;

pub use manager::{CHAR_ASPECT, FontManager, FontMetrics, GLYPHLESS_FONT_NAME, ShapedGlyph};
pub use multi::{FALLBACK_FONTS, LANGUAGE_FONT_MAP, MultiFontManager};
pub use provider::{BuiltinFontProvider, ChainedFontProvider, FontProvider, SystemFontProvider};
