//! Font loading, metrics, glyph coverage and text shaping.
//!
//! A [`FontManager`] wraps either a real TrueType/OpenType font file (parsed
//! with ttf-parser, shaped with rustybuzz) or the synthesized glyphless
//! fallback. The glyphless fallback covers every codepoint but draws nothing;
//! it exists so text remains selectable and searchable when no installed font
//! has the needed glyphs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustybuzz::{Direction, UnicodeBuffer};
use ttf_parser::Face;

use crate::error::{Error, Result};
use crate::hocr::TextDirection;

/// Width-to-height ratio of a glyphless "character cell". A CID advances
/// `units_per_em / CHAR_ASPECT`, so `DW = 1000 / CHAR_ASPECT` in the PDF.
pub const CHAR_ASPECT: f64 = 2.0;

/// Logical name of the glyphless fallback font.
pub const GLYPHLESS_FONT_NAME: &str = "GlyphlessFallback";

/// Vertical metrics in font design units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub ascent: f64,
    pub descent: f64,
    pub units_per_em: f64,
}

/// One positioned glyph produced by shaping.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedGlyph {
    /// Glyph id in the font (for the glyphless font: a UTF-16 code unit).
    pub glyph_id: u16,
    /// Horizontal advance in font design units.
    pub advance: f64,
    /// The source text of this glyph's cluster. Empty for glyphs that extend
    /// a cluster already covered by a preceding glyph.
    pub text: String,
}

enum FontKind {
    /// A real font file. Bytes are retained for PDF embedding; faces are
    /// re-parsed per operation (parsing is zero-copy and cheap).
    TrueType {
        data: Arc<Vec<u8>>,
        path: Option<PathBuf>,
    },
    /// The synthesized glyphless fallback.
    Glyphless,
}

pub struct FontManager {
    name: String,
    kind: FontKind,
    metrics: FontMetrics,
}

impl std::fmt::Debug for FontManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontManager")
            .field("name", &self.name)
            .field("glyphless", &self.is_glyphless())
            .finish()
    }
}

impl FontManager {
    /// Load a font from a file on disk.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::IoPath {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_data(name, data, Some(path.to_path_buf()))
    }

    /// Load a font from bytes already in memory.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        Self::from_data(name, data, None)
    }

    fn from_data(name: impl Into<String>, data: Vec<u8>, path: Option<PathBuf>) -> Result<Self> {
        let name = name.into();
        let face = Face::parse(&data, 0)
            .map_err(|e| Error::Render(format!("cannot parse font {name}: {e}")))?;
        let metrics = FontMetrics {
            ascent: f64::from(face.ascender()),
            descent: f64::from(face.descender()),
            units_per_em: f64::from(face.units_per_em()),
        };
        Ok(Self {
            name,
            kind: FontKind::TrueType {
                data: Arc::new(data),
                path,
            },
            metrics,
        })
    }

    /// The glyphless fallback. Construction cannot fail, so the fallback is
    /// always available.
    pub fn glyphless() -> Self {
        Self {
            name: GLYPHLESS_FONT_NAME.to_owned(),
            kind: FontKind::Glyphless,
            metrics: FontMetrics {
                ascent: 800.0,
                descent: -200.0,
                units_per_em: 1000.0,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_glyphless(&self) -> bool {
        matches!(self.kind, FontKind::Glyphless)
    }

    /// The file this font was loaded from, when it came from disk.
    pub fn font_path(&self) -> Option<&Path> {
        match &self.kind {
            FontKind::TrueType { path, .. } => path.as_deref(),
            FontKind::Glyphless => None,
        }
    }

    /// Raw font program bytes for embedding, `None` for the glyphless font
    /// (which is emitted as a font dictionary with no font program).
    pub fn font_data(&self) -> Option<&[u8]> {
        match &self.kind {
            FontKind::TrueType { data, .. } => Some(data),
            FontKind::Glyphless => None,
        }
    }

    pub fn get_font_metrics(&self) -> FontMetrics {
        self.metrics
    }

    fn with_face<R>(&self, f: impl FnOnce(&Face<'_>) -> R) -> Option<R> {
        match &self.kind {
            FontKind::TrueType { data, .. } => Face::parse(data, 0).ok().map(|face| f(&face)),
            FontKind::Glyphless => None,
        }
    }

    /// Glyph id for a codepoint; 0 means `.notdef`. The glyphless font maps
    /// every BMP codepoint to its own value.
    pub fn glyph_id(&self, c: char) -> u16 {
        match &self.kind {
            FontKind::TrueType { .. } => self
                .with_face(|face| face.glyph_index(c).map_or(0, |g| g.0))
                .unwrap_or(0),
            FontKind::Glyphless => {
                let mut units = [0u16; 2];
                c.encode_utf16(&mut units);
                units[0]
            }
        }
    }

    /// True when the font has a real glyph (not `.notdef`) for the codepoint.
    pub fn has_glyph(&self, c: char) -> bool {
        match &self.kind {
            FontKind::TrueType { .. } => self.glyph_id(c) != 0,
            FontKind::Glyphless => true,
        }
    }

    /// True when every codepoint of `text` is covered. The empty string is
    /// trivially covered.
    pub fn covers(&self, text: &str) -> bool {
        text.chars().all(|c| self.has_glyph(c))
    }

    /// Number of glyphs in the font.
    pub fn glyph_count(&self) -> u16 {
        match &self.kind {
            FontKind::TrueType { .. } => self
                .with_face(|face| face.number_of_glyphs())
                .unwrap_or(0),
            FontKind::Glyphless => u16::MAX,
        }
    }

    /// Horizontal advance of a glyph in font design units.
    pub fn glyph_advance(&self, glyph_id: u16) -> f64 {
        match &self.kind {
            FontKind::TrueType { .. } => self
                .with_face(|face| {
                    face.glyph_hor_advance(ttf_parser::GlyphId(glyph_id))
                        .unwrap_or(0)
                })
                .map_or(0.0, f64::from),
            FontKind::Glyphless => self.metrics.units_per_em / CHAR_ASPECT,
        }
    }

    /// Shape text into positioned glyphs.
    ///
    /// Real fonts go through rustybuzz, which handles Arabic joining forms,
    /// Devanagari conjuncts and RTL reordering. When shaping yields nothing
    /// usable the caller can fall back to [`Self::map_codepoints`]. The
    /// glyphless font maps text to UTF-16 code units with a fixed advance.
    pub fn shape(&self, text: &str, direction: Option<TextDirection>) -> Vec<ShapedGlyph> {
        match &self.kind {
            FontKind::Glyphless => self.map_codepoints(text),
            FontKind::TrueType { data, .. } => {
                let Some(face) = rustybuzz::Face::from_slice(data, 0) else {
                    return self.map_codepoints(text);
                };
                let mut buffer = UnicodeBuffer::new();
                buffer.push_str(text);
                match direction {
                    Some(TextDirection::Rtl) => buffer.set_direction(Direction::RightToLeft),
                    Some(TextDirection::Ltr) => buffer.set_direction(Direction::LeftToRight),
                    None => buffer.guess_segment_properties(),
                }
                let output = rustybuzz::shape(&face, &[], buffer);
                let infos = output.glyph_infos();
                let positions = output.glyph_positions();

                // Byte offsets of each cluster's source text. A cluster may
                // produce several glyphs (or several chars may merge into one
                // glyph); attach the cluster text to its first glyph so the
                // ToUnicode map can reproduce the original characters.
                let mut glyphs = Vec::with_capacity(infos.len());
                let mut seen_clusters: Vec<u32> = Vec::new();
                for (info, pos) in infos.iter().zip(positions) {
                    let cluster_text = if seen_clusters.contains(&info.cluster) {
                        String::new()
                    } else {
                        seen_clusters.push(info.cluster);
                        cluster_source_text(text, infos, info.cluster)
                    };
                    glyphs.push(ShapedGlyph {
                        glyph_id: info.glyph_id as u16,
                        advance: f64::from(pos.x_advance),
                        text: cluster_text,
                    });
                }
                glyphs
            }
        }
    }

    /// Codepoint-by-codepoint glyph mapping, the fallback when shaping is
    /// unavailable. For the glyphless font this is the primary path: each
    /// UTF-16 code unit becomes one CID.
    pub fn map_codepoints(&self, text: &str) -> Vec<ShapedGlyph> {
        match &self.kind {
            FontKind::Glyphless => {
                let advance = self.metrics.units_per_em / CHAR_ASPECT;
                let mut glyphs = Vec::new();
                for c in text.chars() {
                    let mut units = [0u16; 2];
                    let encoded = c.encode_utf16(&mut units);
                    for (i, unit) in encoded.iter().enumerate() {
                        glyphs.push(ShapedGlyph {
                            glyph_id: *unit,
                            advance,
                            text: if i == 0 { c.to_string() } else { String::new() },
                        });
                    }
                }
                glyphs
            }
            FontKind::TrueType { .. } => text
                .chars()
                .map(|c| {
                    let gid = self.glyph_id(c);
                    ShapedGlyph {
                        glyph_id: gid,
                        advance: self.glyph_advance(gid),
                        text: c.to_string(),
                    }
                })
                .collect(),
        }
    }

    /// Natural width of `text` in the same unit as `size`.
    pub fn text_width(&self, text: &str, size: f64) -> f64 {
        let units: f64 = self.shape(text, None).iter().map(|g| g.advance).sum();
        units * size / self.metrics.units_per_em
    }
}

/// The source text belonging to one shaping cluster: the bytes from this
/// cluster's offset up to the next distinct cluster offset.
fn cluster_source_text(text: &str, infos: &[rustybuzz::GlyphInfo], cluster: u32) -> String {
    let start = cluster as usize;
    let mut end = text.len();
    for info in infos {
        let ofs = info.cluster as usize;
        if ofs > start && ofs < end {
            end = ofs;
        }
    }
    text.get(start..end).unwrap_or("").to_owned()
}
