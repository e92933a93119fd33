//! Font embedding for text-layer PDFs.
//!
//! # PDF Font Structure
//!
//! Text layers use composite fonts so any Unicode content can be encoded:
//! - **Type0 font**: top-level dictionary with `/Encoding /Identity-H`,
//!   referencing:
//!   - **CIDFontType2**: glyph metrics, referencing:
//!     - **FontDescriptor**: font metadata (flags, bbox, metrics)
//!     - **FontFile2**: the embedded TrueType program (real fonts only)
//!   - **ToUnicode CMap**: maps the codes actually used back to Unicode so
//!     extraction and copy/paste recover the OCR text
//!
//! Real fonts write glyph ids as CIDs (`/CIDToGIDMap /Identity`) with a
//! ToUnicode CMap built from the glyphs used. The glyphless fallback has no
//! font program at all: CIDs are UTF-16 code units, `/CIDToGIDMap` is the
//! explicit identity stream and ToUnicode is the identity map over the whole
//! BMP, so viewers draw nothing but extractors read the original text.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::font::{CHAR_ASPECT, FontManager, ShapedGlyph};

/// Per-font state accumulated while rendering.
struct FontSlot {
    font: Arc<FontManager>,
    /// Resource name, `F1`, `F2`, ...
    resource_name: String,
    /// CID -> source text, for ToUnicode and width arrays.
    used: BTreeMap<u16, String>,
}

/// Collects the fonts used by one or more rendered pages and writes them into
/// a document once, so the same font shares a resource name across pages.
#[derive(Default)]
pub struct FontEmbedder {
    slots: Vec<FontSlot>,
}

impl FontEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource name for a font, registering it on first use.
    pub fn resource_name(&mut self, font: &Arc<FontManager>) -> String {
        if let Some(slot) = self.slots.iter().find(|s| s.font.name() == font.name()) {
            return slot.resource_name.clone();
        }
        let resource_name = format!("F{}", self.slots.len() + 1);
        self.slots.push(FontSlot {
            font: Arc::clone(font),
            resource_name: resource_name.clone(),
            used: BTreeMap::new(),
        });
        #[allow(clippy::unwrap_used)] // just pushed
        self.slots.last().unwrap().resource_name.clone()
    }

    /// Record glyphs drawn with a font so ToUnicode and widths cover them.
    pub fn record_usage(&mut self, font: &Arc<FontManager>, glyphs: &[ShapedGlyph]) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.font.name() == font.name())
        {
            for glyph in glyphs {
                let entry = slot.used.entry(glyph.glyph_id).or_default();
                if entry.is_empty() && !glyph.text.is_empty() {
                    glyph.text.clone_into(entry);
                }
            }
        }
    }

    /// Write all registered fonts into `doc` and return the `/Font` resource
    /// dictionary mapping resource names to font references.
    pub fn write_fonts(&self, doc: &mut Document) -> Dictionary {
        let mut font_dict = Dictionary::new();
        for slot in &self.slots {
            let font_id = if slot.font.is_glyphless() {
                embed_glyphless_font(doc)
            } else {
                embed_truetype_font(doc, &slot.font, &slot.used)
            };
            font_dict.set(slot.resource_name.as_bytes(), Object::Reference(font_id));
        }
        font_dict
    }
}

// ==========================================================================
// TrueType embedding
// ==========================================================================

fn embed_truetype_font(
    doc: &mut Document,
    font: &FontManager,
    used: &BTreeMap<u16, String>,
) -> ObjectId {
    let font_file_id = create_font_file(doc, font);
    let descriptor_id = create_font_descriptor(doc, font, font_file_id);
    let cid_font_id = create_cid_font(doc, font, descriptor_id, used);
    let to_unicode_id = create_to_unicode_cmap(doc, used);

    let dict = Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type0".to_vec())),
        ("BaseFont", Object::Name(font.name().as_bytes().to_vec())),
        ("Encoding", Object::Name(b"Identity-H".to_vec())),
        (
            "DescendantFonts",
            Object::Array(vec![Object::Reference(cid_font_id)]),
        ),
        ("ToUnicode", Object::Reference(to_unicode_id)),
    ]);
    doc.add_object(Object::Dictionary(dict))
}

/// The FontFile2 stream with the raw TrueType data.
fn create_font_file(doc: &mut Document, font: &FontManager) -> ObjectId {
    let data = font.font_data().unwrap_or_default().to_vec();
    let mut dict = Dictionary::new();
    dict.set("Length1", Object::Integer(data.len() as i64));
    let stream = Stream::new(dict, data).with_compression(true);
    doc.add_object(Object::Stream(stream))
}

fn create_font_descriptor(doc: &mut Document, font: &FontManager, font_file_id: ObjectId) -> ObjectId {
    let metrics = font.get_font_metrics();
    let scale = 1000.0 / metrics.units_per_em;
    let ascent = (metrics.ascent * scale).round() as i64;
    let descent = (metrics.descent * scale).round() as i64;

    let dict = Dictionary::from_iter([
        ("Type", Object::Name(b"FontDescriptor".to_vec())),
        ("FontName", Object::Name(font.name().as_bytes().to_vec())),
        ("Flags", Object::Integer(32)), // Nonsymbolic
        (
            "FontBBox",
            Object::Array(vec![
                Object::Integer(-200),
                Object::Integer(descent),
                Object::Integer(1200),
                Object::Integer(ascent),
            ]),
        ),
        ("ItalicAngle", Object::Integer(0)),
        ("Ascent", Object::Integer(ascent)),
        ("Descent", Object::Integer(descent)),
        ("CapHeight", Object::Integer(ascent)),
        ("StemV", Object::Integer(80)),
        ("FontFile2", Object::Reference(font_file_id)),
    ]);
    doc.add_object(Object::Dictionary(dict))
}

fn create_cid_font(
    doc: &mut Document,
    font: &FontManager,
    descriptor_id: ObjectId,
    used: &BTreeMap<u16, String>,
) -> ObjectId {
    let metrics = font.get_font_metrics();
    let scale = 1000.0 / metrics.units_per_em;
    let widths = build_widths_array(font, used, scale);
    let default_width = (font.glyph_advance(font.glyph_id(' ')) * scale).round() as i64;

    let dict = Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
        ("BaseFont", Object::Name(font.name().as_bytes().to_vec())),
        (
            "CIDSystemInfo",
            Object::Dictionary(Dictionary::from_iter([
                (
                    "Registry",
                    Object::String(b"Adobe".to_vec(), StringFormat::Literal),
                ),
                (
                    "Ordering",
                    Object::String(b"Identity".to_vec(), StringFormat::Literal),
                ),
                ("Supplement", Object::Integer(0)),
            ])),
        ),
        ("FontDescriptor", Object::Reference(descriptor_id)),
        ("DW", Object::Integer(default_width.max(1))),
        ("W", Object::Array(widths)),
        ("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
    ]);
    doc.add_object(Object::Dictionary(dict))
}

/// W array in `[gid [w1 w2 ...]]` form, grouping consecutive gid runs.
fn build_widths_array(
    font: &FontManager,
    used: &BTreeMap<u16, String>,
    scale: f64,
) -> Vec<Object> {
    let mut result = Vec::new();
    let mut iter = used.keys().peekable();
    while let Some(&first_gid) = iter.next() {
        let mut widths = vec![Object::Integer(
            (font.glyph_advance(first_gid) * scale).round() as i64,
        )];
        let mut expected_next = first_gid.wrapping_add(1);
        while let Some(&&gid) = iter.peek() {
            if gid == expected_next && expected_next != 0 {
                widths.push(Object::Integer(
                    (font.glyph_advance(gid) * scale).round() as i64,
                ));
                expected_next = gid.wrapping_add(1);
                iter.next();
            } else {
                break;
            }
        }
        result.push(Object::Integer(i64::from(first_gid)));
        result.push(Object::Array(widths));
    }
    result
}

/// ToUnicode CMap mapping each used CID to the source text it stood for.
fn create_to_unicode_cmap(doc: &mut Document, used: &BTreeMap<u16, String>) -> ObjectId {
    let mut entries = String::new();
    let mapped: Vec<(&u16, &String)> = used.iter().filter(|(_, text)| !text.is_empty()).collect();
    for chunk in mapped.chunks(100) {
        let _ = writeln!(entries, "{} beginbfchar", chunk.len());
        for (cid, text) in chunk {
            let _ = write!(entries, "<{cid:04X}> <");
            for unit in text.encode_utf16() {
                let _ = write!(entries, "{unit:04X}");
            }
            let _ = writeln!(entries, ">");
        }
        let _ = writeln!(entries, "endbfchar");
    }

    let cmap = format!(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo <<\n  /Registry (Adobe)\n  /Ordering (UCS)\n  /Supplement 0\n>> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
         {entries}endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\nend"
    );
    let stream = Stream::new(Dictionary::new(), cmap.into_bytes()).with_compression(true);
    doc.add_object(Object::Stream(stream))
}

// ==========================================================================
// Glyphless fallback embedding
// ==========================================================================

/// Embed the glyphless fallback font dictionary.
///
/// CIDs are UTF-16 code units. There is no font program: viewers fall back to
/// drawing nothing, which is the desired behavior. `DW = 1000 / CHAR_ASPECT`
/// gives every cell a half-width advance so selection rectangles roughly
/// track the scaled text.
pub fn embed_glyphless_font(doc: &mut Document) -> ObjectId {
    let descriptor = Dictionary::from_iter([
        ("Type", Object::Name(b"FontDescriptor".to_vec())),
        ("FontName", Object::Name(b"GlyphlessFont".to_vec())),
        // FixedPitch | Symbolic
        ("Flags", Object::Integer(5)),
        (
            "FontBBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(-200),
                Object::Integer(500),
                Object::Integer(800),
            ]),
        ),
        ("ItalicAngle", Object::Integer(0)),
        ("Ascent", Object::Integer(800)),
        ("Descent", Object::Integer(-200)),
        ("CapHeight", Object::Integer(800)),
        ("StemV", Object::Integer(80)),
    ]);
    let descriptor_id = doc.add_object(Object::Dictionary(descriptor));

    let cid_to_gid_id = doc.add_object(Object::Stream(
        Stream::new(Dictionary::new(), identity_cid_to_gid_map()).with_compression(true),
    ));

    let dw = (1000.0 / CHAR_ASPECT) as i64;
    let cid_font = Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
        ("BaseFont", Object::Name(b"GlyphlessFont".to_vec())),
        (
            "CIDSystemInfo",
            Object::Dictionary(Dictionary::from_iter([
                (
                    "Registry",
                    Object::String(b"Adobe".to_vec(), StringFormat::Literal),
                ),
                (
                    "Ordering",
                    Object::String(b"Identity".to_vec(), StringFormat::Literal),
                ),
                ("Supplement", Object::Integer(0)),
            ])),
        ),
        ("FontDescriptor", Object::Reference(descriptor_id)),
        ("DW", Object::Integer(dw)),
        ("CIDToGIDMap", Object::Reference(cid_to_gid_id)),
    ]);
    let cid_font_id = doc.add_object(Object::Dictionary(cid_font));

    let to_unicode_id = doc.add_object(Object::Stream(
        Stream::new(Dictionary::new(), identity_to_unicode_cmap()).with_compression(true),
    ));

    let type0 = Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type0".to_vec())),
        ("BaseFont", Object::Name(b"GlyphlessFont".to_vec())),
        ("Encoding", Object::Name(b"Identity-H".to_vec())),
        (
            "DescendantFonts",
            Object::Array(vec![Object::Reference(cid_font_id)]),
        ),
        ("ToUnicode", Object::Reference(to_unicode_id)),
    ]);
    doc.add_object(Object::Dictionary(type0))
}

/// The identity `\x00\x00\x00\x01...` stream mapping all 65536 CIDs to
/// themselves.
fn identity_cid_to_gid_map() -> Vec<u8> {
    let mut map = Vec::with_capacity(0x10000 * 2);
    for cid in 0u16..=0xFFFF {
        map.extend_from_slice(&cid.to_be_bytes());
    }
    map
}

/// Identity ToUnicode CMap: `<0000>..<FFFF>` maps to the same 16-bit value.
fn identity_to_unicode_cmap() -> Vec<u8> {
    b"/CIDInit /ProcSet findresource begin\n\
      12 dict begin\n\
      begincmap\n\
      /CIDSystemInfo <<\n  /Registry (Adobe)\n  /Ordering (UCS)\n  /Supplement 0\n>> def\n\
      /CMapName /Adobe-Identity-UCS def\n\
      /CMapType 2 def\n\
      1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
      1 beginbfrange\n<0000> <FFFF> <0000>\nendbfrange\n\
      endcmap\n\
      CMapName currentdict /CMap defineresource pop\n\
      end\nend"
        .to_vec()
}
