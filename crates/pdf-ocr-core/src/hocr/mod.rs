//! OCR result model and hOCR parsing.

pub mod element;
pub mod parser;

pub use element::{FontInfo, OcrClass, OcrElement, TextDirection};
pub use parser::{HocrParser, parse_hocr_file};
