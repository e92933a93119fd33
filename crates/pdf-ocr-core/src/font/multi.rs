//! Word-level font selection for multilingual documents.
//!
//! Selection combines the language hint from hOCR with glyph coverage
//! analysis:
//!
//! 1. language-preferred font, if the hint maps to one and it covers the word
//! 2. ordered fallback fonts, first full-coverage hit wins
//! 3. the glyphless fallback, which covers everything

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::font::manager::FontManager;
use crate::font::provider::FontProvider;

/// Language code (ISO 639-2/3 or Tesseract) to preferred font name.
pub const LANGUAGE_FONT_MAP: &[(&str, &str)] = &[
    // Arabic script
    ("ara", "NotoSansArabic-Regular"),
    ("per", "NotoSansArabic-Regular"),
    ("fas", "NotoSansArabic-Regular"),
    ("urd", "NotoSansArabic-Regular"),
    ("pus", "NotoSansArabic-Regular"),
    ("kur", "NotoSansArabic-Regular"),
    // Devanagari script
    ("hin", "NotoSansDevanagari-Regular"),
    ("san", "NotoSansDevanagari-Regular"),
    ("mar", "NotoSansDevanagari-Regular"),
    ("nep", "NotoSansDevanagari-Regular"),
    ("kok", "NotoSansDevanagari-Regular"),
    ("bho", "NotoSansDevanagari-Regular"),
    ("mai", "NotoSansDevanagari-Regular"),
    // CJK
    ("chi", "NotoSansCJK-Regular"),
    ("zho", "NotoSansCJK-Regular"),
    ("chi_sim", "NotoSansCJK-Regular"),
    ("chi_tra", "NotoSansCJK-Regular"),
    ("jpn", "NotoSansCJK-Regular"),
    ("kor", "NotoSansCJK-Regular"),
    // Thai
    ("tha", "NotoSansThai-Regular"),
    // Hebrew
    ("heb", "NotoSansHebrew-Regular"),
    ("yid", "NotoSansHebrew-Regular"),
    // Bengali script
    ("ben", "NotoSansBengali-Regular"),
    ("asm", "NotoSansBengali-Regular"),
    // Tamil
    ("tam", "NotoSansTamil-Regular"),
    // Gujarati
    ("guj", "NotoSansGujarati-Regular"),
    // Telugu
    ("tel", "NotoSansTelugu-Regular"),
    // Kannada
    ("kan", "NotoSansKannada-Regular"),
    // Malayalam
    ("mal", "NotoSansMalayalam-Regular"),
    // Myanmar (Burmese)
    ("mya", "NotoSansMyanmar-Regular"),
    // Khmer
    ("khm", "NotoSansKhmer-Regular"),
    // Lao
    ("lao", "NotoSansLao-Regular"),
    // Georgian
    ("kat", "NotoSansGeorgian-Regular"),
    ("geo", "NotoSansGeorgian-Regular"),
    // Armenian
    ("hye", "NotoSansArmenian-Regular"),
    ("arm", "NotoSansArmenian-Regular"),
    // Ethiopic
    ("amh", "NotoSansEthiopic-Regular"),
    ("tir", "NotoSansEthiopic-Regular"),
    // Sinhala
    ("sin", "NotoSansSinhala-Regular"),
    // Gurmukhi (Punjabi)
    ("pan", "NotoSansGurmukhi-Regular"),
    ("pnb", "NotoSansGurmukhi-Regular"),
    // Oriya
    ("ori", "NotoSansOriya-Regular"),
    ("ory", "NotoSansOriya-Regular"),
    // Tibetan
    ("bod", "NotoSansTibetan-Regular"),
    ("tib", "NotoSansTibetan-Regular"),
];

/// Fallback chain, tried after the language-preferred font. Most common
/// scripts come first so matching terminates quickly.
pub const FALLBACK_FONTS: &[&str] = &[
    "NotoSans-Regular", // Latin, Greek, Cyrillic
    "NotoSansArabic-Regular",
    "NotoSansDevanagari-Regular",
    "NotoSansCJK-Regular",
    "NotoSansThai-Regular",
    "NotoSansHebrew-Regular",
    "NotoSansBengali-Regular",
    "NotoSansTamil-Regular",
    "NotoSansGujarati-Regular",
    "NotoSansTelugu-Regular",
    "NotoSansKannada-Regular",
    "NotoSansMalayalam-Regular",
    "NotoSansMyanmar-Regular",
    "NotoSansKhmer-Regular",
    "NotoSansLao-Regular",
    "NotoSansGeorgian-Regular",
    "NotoSansArmenian-Regular",
    "NotoSansEthiopic-Regular",
    "NotoSansSinhala-Regular",
    "NotoSansGurmukhi-Regular",
    "NotoSansOriya-Regular",
    "NotoSansTibetan-Regular",
];

fn preferred_font_for_language(language: &str) -> Option<&'static str> {
    LANGUAGE_FONT_MAP
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, font)| *font)
}

/// Orchestrates per-word font selection over a [`FontProvider`].
///
/// Selection results are cached by `(word text, language)`. When no real font
/// covers a non-ASCII word, a warning naming the Noto font to install is
/// emitted once per language.
pub struct MultiFontManager {
    font_provider: Arc<dyn FontProvider>,
    selection_cache: Mutex<HashMap<(String, Option<String>), String>>,
    warned_scripts: Mutex<HashSet<String>>,
}

impl MultiFontManager {
    pub fn new(font_provider: Arc<dyn FontProvider>) -> Self {
        Self {
            font_provider,
            selection_cache: Mutex::new(HashMap::new()),
            warned_scripts: Mutex::new(HashSet::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn FontProvider> {
        &self.font_provider
    }

    /// Select the font to render one word with.
    pub fn select_font_for_word(
        &self,
        word_text: &str,
        line_language: Option<&str>,
    ) -> Arc<FontManager> {
        let cache_key = (word_text.to_owned(), line_language.map(str::to_owned));
        {
            #[allow(clippy::unwrap_used)]
            let cache = self.selection_cache.lock().unwrap();
            if let Some(cached_name) = cache.get(&cache_key)
                && let Some(font) = self.resolve(cached_name)
            {
                return font;
            }
        }

        let mut tried: Vec<&str> = Vec::new();

        // Phase 1: language-preferred font
        if let Some(preferred) = line_language.and_then(preferred_font_for_language) {
            tried.push(preferred);
            if let Some(font) = self.try_font(preferred, word_text, &cache_key) {
                return font;
            }
        }

        // Phase 2: fallback fonts in order
        for font_name in FALLBACK_FONTS {
            if tried.contains(font_name) {
                continue;
            }
            if let Some(font) = self.try_font(font_name, word_text, &cache_key) {
                return font;
            }
        }

        // Phase 3: glyphless fallback, always succeeds
        self.warn_missing_font(word_text, line_language);
        let fallback = self.font_provider.get_fallback_font();
        #[allow(clippy::unwrap_used)]
        self.selection_cache
            .lock()
            .unwrap()
            .insert(cache_key, fallback.name().to_owned());
        fallback
    }

    fn resolve(&self, font_name: &str) -> Option<Arc<FontManager>> {
        if font_name == self.font_provider.get_fallback_font().name() {
            return Some(self.font_provider.get_fallback_font());
        }
        self.font_provider.get_font(font_name)
    }

    fn try_font(
        &self,
        font_name: &str,
        word_text: &str,
        cache_key: &(String, Option<String>),
    ) -> Option<Arc<FontManager>> {
        let font = self.font_provider.get_font(font_name)?;
        if !font.covers(word_text) {
            return None;
        }
        #[allow(clippy::unwrap_used)]
        self.selection_cache
            .lock()
            .unwrap()
            .insert(cache_key.clone(), font_name.to_owned());
        Some(font)
    }

    /// Check whether a named font exists and covers the text.
    pub fn has_all_glyphs(&self, font_name: &str, text: &str) -> bool {
        self.font_provider
            .get_font(font_name)
            .is_some_and(|f| f.covers(text))
    }

    /// The font used for metric defaults when a line has no usable baseline.
    pub fn default_metrics_font(&self) -> Arc<FontManager> {
        self.font_provider
            .get_font("NotoSans-Regular")
            .unwrap_or_else(|| self.font_provider.get_fallback_font())
    }

    /// Warn, once per language, that text fell through to the glyphless
    /// fallback. ASCII text is not worth warning about.
    fn warn_missing_font(&self, word_text: &str, line_language: Option<&str>) {
        let warn_key = line_language.unwrap_or("unknown").to_owned();
        if !word_text.chars().any(|c| !c.is_ascii()) {
            return;
        }
        {
            #[allow(clippy::unwrap_used)]
            let mut warned = self.warned_scripts.lock().unwrap();
            if !warned.insert(warn_key) {
                return;
            }
        }

        if let Some(font_name) = line_language.and_then(preferred_font_for_language) {
            warn!(
                "No font found with glyphs for '{}' text. Install {} for \
                 better rendering. See https://fonts.google.com/noto",
                line_language.unwrap_or_default(),
                font_name,
            );
        } else {
            warn!(
                "No font found with glyphs for some text. Install Noto fonts \
                 for better rendering. See https://fonts.google.com/noto"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::font::provider::{BuiltinFontProvider, SystemFontProvider};

    fn empty_manager() -> MultiFontManager {
        // A provider with no real fonts: everything lands on the fallback.
        MultiFontManager::new(Arc::new(BuiltinFontProvider::new(None)))
    }

    #[test]
    fn test_language_map_lookup() {
        assert_eq!(
            preferred_font_for_language("ara"),
            Some("NotoSansArabic-Regular")
        );
        assert_eq!(
            preferred_font_for_language("chi_sim"),
            Some("NotoSansCJK-Regular")
        );
        assert_eq!(preferred_font_for_language("eng"), None);
    }

    #[test]
    fn test_fallback_order_starts_latin() {
        assert_eq!(FALLBACK_FONTS[0], "NotoSans-Regular");
    }

    #[test]
    fn test_selection_without_fonts_yields_glyphless() {
        let manager = empty_manager();
        let font = manager.select_font_for_word("Hello", Some("eng"));
        assert!(font.is_glyphless());
        let font = manager.select_font_for_word("مرحبا", Some("ara"));
        assert!(font.is_glyphless());
    }

    #[test]
    fn test_selection_is_cached() {
        let manager = empty_manager();
        let _ = manager.select_font_for_word("Hello", None);
        let cache = manager.selection_cache.lock().unwrap();
        assert!(cache.contains_key(&("Hello".to_owned(), None)));
    }

    #[test]
    fn test_warning_deduplicated_per_language() {
        let manager = empty_manager();
        let _ = manager.select_font_for_word("مرحبا", Some("ara"));
        let _ = manager.select_font_for_word("سلام", Some("ara"));
        assert_eq!(manager.warned_scripts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_ascii_text_does_not_warn() {
        let manager = empty_manager();
        let _ = manager.select_font_for_word("plain", None);
        assert!(manager.warned_scripts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_metrics_font_falls_back() {
        let manager = MultiFontManager::new(Arc::new(SystemFontProvider::with_font_dirs(vec![])));
        assert!(manager.default_metrics_font().is_glyphless());
    }

    #[test]
    fn test_has_all_glyphs_unknown_font() {
        let manager = empty_manager();
        assert!(!manager.has_all_glyphs("NotoSans-Regular", "abc"));
    }
}
