//! Text-layer rendering: turns OCR trees into PDF pages of invisible,
//! position-accurate text.

pub mod debug;
pub mod embed;
pub mod renderer;

pub use debug::DebugRenderOptions;
pub use embed::FontEmbedder;
pub use renderer::{RenderOptions, TextLayerRenderer, is_cjk_only};
