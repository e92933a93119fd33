//! Font providers: where fonts come from.
//!
//! A [`FontProvider`] knows where fonts are located and loads them on demand.
//! [`MultiFontManager`](super::MultiFontManager) asks for fonts by logical
//! name and checks their glyph coverage. Three implementations are provided:
//! bundled fonts from a directory, lazily scanned system fonts, and an
//! ordered chain of other providers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::font::manager::FontManager;

/// Provides fonts by logical name (e.g. `NotoSans-Regular`).
pub trait FontProvider: Send + Sync {
    /// Get the named font, or `None` when this provider does not have it.
    fn get_font(&self, font_name: &str) -> Option<Arc<FontManager>>;

    /// Logical names this provider can currently resolve.
    fn get_available_fonts(&self) -> Vec<String>;

    /// The glyphless fallback font. Always available.
    fn get_fallback_font(&self) -> Arc<FontManager>;
}

/// Logical font names mapped to filenames expected in the font directory.
/// Only Latin coverage is expected to be bundled; other scripts come from
/// system fonts to keep the installation small.
const BUILTIN_FONT_FILES: &[(&str, &str)] = &[("NotoSans-Regular", "NotoSans-Regular.ttf")];

/// Fonts shipped in a directory chosen at build/install time.
///
/// Missing or unreadable non-fallback fonts degrade with a warning; the
/// glyphless fallback is synthesized and cannot fail.
pub struct BuiltinFontProvider {
    fonts: HashMap<String, Arc<FontManager>>,
    fallback: Arc<FontManager>,
}

impl BuiltinFontProvider {
    pub fn new(font_dir: Option<PathBuf>) -> Self {
        let mut fonts = HashMap::new();
        if let Some(dir) = font_dir {
            for (name, file) in BUILTIN_FONT_FILES {
                let path = dir.join(file);
                if !path.exists() {
                    warn!(
                        "font {} not found at {} - OCR output quality for some \
                         scripts may be affected",
                        name,
                        path.display()
                    );
                    continue;
                }
                match FontManager::from_file(*name, &path) {
                    Ok(font) => {
                        fonts.insert((*name).to_owned(), Arc::new(font));
                    }
                    Err(e) => {
                        warn!("failed to load font {name}: {e} - OCR output quality may be affected");
                    }
                }
            }
        }
        Self {
            fonts,
            fallback: Arc::new(FontManager::glyphless()),
        }
    }
}

impl FontProvider for BuiltinFontProvider {
    fn get_font(&self, font_name: &str) -> Option<Arc<FontManager>> {
        self.fonts.get(font_name).cloned()
    }

    fn get_available_fonts(&self) -> Vec<String> {
        self.fonts.keys().cloned().collect()
    }

    fn get_fallback_font(&self) -> Arc<FontManager> {
        Arc::clone(&self.fallback)
    }
}

/// Candidate filenames for each logical Noto font name, in priority order.
const NOTO_FONT_PATTERNS: &[(&str, &[&str])] = &[
    (
        "NotoSans-Regular",
        &["NotoSans-Regular.ttf", "NotoSans-Regular.otf"],
    ),
    (
        "NotoSansArabic-Regular",
        &["NotoSansArabic-Regular.ttf", "NotoSansArabic-Regular.otf"],
    ),
    (
        "NotoSansDevanagari-Regular",
        &[
            "NotoSansDevanagari-Regular.ttf",
            "NotoSansDevanagari-Regular.otf",
        ],
    ),
    (
        "NotoSansCJK-Regular",
        &[
            // Language-specific variants (any will work for coverage)
            "NotoSansCJKsc-Regular.otf",
            "NotoSansCJKtc-Regular.otf",
            "NotoSansCJKjp-Regular.otf",
            "NotoSansCJKkr-Regular.otf",
            // TTC collections, common on Linux distros
            "NotoSansCJK-Regular.ttc",
            "NotoSansCJKsc-Regular.ttc",
        ],
    ),
    (
        "NotoSansThai-Regular",
        &["NotoSansThai-Regular.ttf", "NotoSansThai-Regular.otf"],
    ),
    (
        "NotoSansHebrew-Regular",
        &["NotoSansHebrew-Regular.ttf", "NotoSansHebrew-Regular.otf"],
    ),
    (
        "NotoSansBengali-Regular",
        &["NotoSansBengali-Regular.ttf", "NotoSansBengali-Regular.otf"],
    ),
    (
        "NotoSansTamil-Regular",
        &["NotoSansTamil-Regular.ttf", "NotoSansTamil-Regular.otf"],
    ),
    (
        "NotoSansGujarati-Regular",
        &["NotoSansGujarati-Regular.ttf", "NotoSansGujarati-Regular.otf"],
    ),
    (
        "NotoSansTelugu-Regular",
        &["NotoSansTelugu-Regular.ttf", "NotoSansTelugu-Regular.otf"],
    ),
    (
        "NotoSansKannada-Regular",
        &["NotoSansKannada-Regular.ttf", "NotoSansKannada-Regular.otf"],
    ),
    (
        "NotoSansMalayalam-Regular",
        &[
            "NotoSansMalayalam-Regular.ttf",
            "NotoSansMalayalam-Regular.otf",
        ],
    ),
    (
        "NotoSansMyanmar-Regular",
        &["NotoSansMyanmar-Regular.ttf", "NotoSansMyanmar-Regular.otf"],
    ),
    (
        "NotoSansKhmer-Regular",
        &["NotoSansKhmer-Regular.ttf", "NotoSansKhmer-Regular.otf"],
    ),
    (
        "NotoSansLao-Regular",
        &["NotoSansLao-Regular.ttf", "NotoSansLao-Regular.otf"],
    ),
    (
        "NotoSansGeorgian-Regular",
        &["NotoSansGeorgian-Regular.ttf", "NotoSansGeorgian-Regular.otf"],
    ),
    (
        "NotoSansArmenian-Regular",
        &["NotoSansArmenian-Regular.ttf", "NotoSansArmenian-Regular.otf"],
    ),
    (
        "NotoSansEthiopic-Regular",
        &["NotoSansEthiopic-Regular.ttf", "NotoSansEthiopic-Regular.otf"],
    ),
    (
        "NotoSansSinhala-Regular",
        &["NotoSansSinhala-Regular.ttf", "NotoSansSinhala-Regular.otf"],
    ),
    (
        "NotoSansGurmukhi-Regular",
        &["NotoSansGurmukhi-Regular.ttf", "NotoSansGurmukhi-Regular.otf"],
    ),
    (
        "NotoSansOriya-Regular",
        &["NotoSansOriya-Regular.ttf", "NotoSansOriya-Regular.otf"],
    ),
    (
        "NotoSansTibetan-Regular",
        &["NotoSansTibetan-Regular.ttf", "NotoSansTibetan-Regular.otf"],
    ),
];

/// Discovers Noto fonts installed on the system.
///
/// Directories are platform specific. Scanning is lazy: a font is searched
/// only the first time it is requested, and both hits and misses are cached
/// for the lifetime of the provider.
pub struct SystemFontProvider {
    font_dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Option<Arc<FontManager>>>>,
    fallback: OnceLock<Arc<FontManager>>,
}

impl Default for SystemFontProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemFontProvider {
    pub fn new() -> Self {
        Self::with_font_dirs(Self::platform_font_dirs())
    }

    /// Build a provider over explicit directories (used by tests).
    pub fn with_font_dirs(font_dirs: Vec<PathBuf>) -> Self {
        Self {
            font_dirs,
            cache: Mutex::new(HashMap::new()),
            fallback: OnceLock::new(),
        }
    }

    fn platform_font_dirs() -> Vec<PathBuf> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let mut dirs: Vec<PathBuf> = Vec::new();
        if cfg!(target_os = "macos") {
            dirs.push(PathBuf::from("/Library/Fonts"));
            dirs.push(PathBuf::from("/System/Library/Fonts"));
            if let Some(home) = &home {
                dirs.push(home.join("Library/Fonts"));
            }
        } else if cfg!(windows) {
            if let Some(windir) = std::env::var_os("WINDIR") {
                dirs.push(PathBuf::from(windir).join("Fonts"));
            }
        } else {
            // linux, freebsd and friends
            dirs.push(PathBuf::from("/usr/share/fonts"));
            dirs.push(PathBuf::from("/usr/local/share/fonts"));
            if let Some(home) = &home {
                dirs.push(home.join(".fonts"));
                dirs.push(home.join(".local/share/fonts"));
            }
        }
        dirs
    }

    fn candidate_files(font_name: &str) -> Option<&'static [&'static str]> {
        NOTO_FONT_PATTERNS
            .iter()
            .find(|(name, _)| *name == font_name)
            .map(|(_, files)| *files)
    }

    /// Recursively search the font directories for the first candidate match.
    fn find_font_file(&self, candidates: &[&str]) -> Option<PathBuf> {
        for candidate in candidates {
            for dir in &self.font_dirs {
                if let Some(found) = find_file_recursive(dir, candidate, 0) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// Bounded recursive directory search; system font trees are shallow.
fn find_file_recursive(dir: &std::path::Path, filename: &str, depth: usize) -> Option<PathBuf> {
    const MAX_DEPTH: usize = 6;
    if depth > MAX_DEPTH {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|n| n == filename) {
            return Some(path);
        }
    }
    for subdir in subdirs {
        if let Some(found) = find_file_recursive(&subdir, filename, depth + 1) {
            return Some(found);
        }
    }
    None
}

impl FontProvider for SystemFontProvider {
    fn get_font(&self, font_name: &str) -> Option<Arc<FontManager>> {
        #[allow(clippy::unwrap_used)] // mutex poisoning is unrecoverable here
        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.get(font_name) {
            return cached.clone();
        }

        let loaded = Self::candidate_files(font_name)
            .and_then(|candidates| self.find_font_file(candidates))
            .and_then(|path| match FontManager::from_file(font_name, &path) {
                Ok(font) => {
                    debug!("found system font {} at {}", font_name, path.display());
                    Some(Arc::new(font))
                }
                Err(e) => {
                    warn!("system font {} at {} is unusable: {e}", font_name, path.display());
                    None
                }
            });
        cache.insert(font_name.to_owned(), loaded.clone());
        loaded
    }

    fn get_available_fonts(&self) -> Vec<String> {
        // Names we know how to search for; availability is decided lazily.
        NOTO_FONT_PATTERNS
            .iter()
            .map(|(name, _)| (*name).to_owned())
            .collect()
    }

    fn get_fallback_font(&self) -> Arc<FontManager> {
        Arc::clone(
            self.fallback
                .get_or_init(|| Arc::new(FontManager::glyphless())),
        )
    }
}

/// Tries providers in order; the first hit wins.
pub struct ChainedFontProvider {
    providers: Vec<Box<dyn FontProvider>>,
}

impl ChainedFontProvider {
    pub fn new(providers: Vec<Box<dyn FontProvider>>) -> Self {
        assert!(!providers.is_empty(), "at least one provider is required");
        Self { providers }
    }

    /// The default chain: bundled fonts first, then system fonts.
    pub fn standard(font_dir: Option<PathBuf>) -> Self {
        Self::new(vec![
            Box::new(BuiltinFontProvider::new(font_dir)),
            Box::new(SystemFontProvider::new()),
        ])
    }
}

impl FontProvider for ChainedFontProvider {
    fn get_font(&self, font_name: &str) -> Option<Arc<FontManager>> {
        self.providers.iter().find_map(|p| p.get_font(font_name))
    }

    fn get_available_fonts(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for provider in &self.providers {
            for name in provider.get_available_fonts() {
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    fn get_fallback_font(&self) -> Arc<FontManager> {
        self.providers[0].get_fallback_font()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_without_dir_still_has_fallback() {
        let provider = BuiltinFontProvider::new(None);
        assert!(provider.get_available_fonts().is_empty());
        assert!(provider.get_fallback_font().is_glyphless());
    }

    #[test]
    fn test_builtin_missing_files_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let provider = BuiltinFontProvider::new(Some(dir.path().to_path_buf()));
        assert!(provider.get_font("NotoSans-Regular").is_none());
        assert!(provider.get_fallback_font().is_glyphless());
    }

    #[test]
    fn test_system_provider_caches_misses() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SystemFontProvider::with_font_dirs(vec![dir.path().to_path_buf()]);
        assert!(provider.get_font("NotoSansThai-Regular").is_none());
        // Second call answers from the cache.
        assert!(provider.get_font("NotoSansThai-Regular").is_none());
        assert_eq!(provider.cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_system_provider_unknown_name() {
        let provider = SystemFontProvider::with_font_dirs(vec![]);
        assert!(provider.get_font("ComicSans-Bold").is_none());
    }

    #[test]
    fn test_chained_first_hit_wins() {
        let chain = ChainedFontProvider::new(vec![
            Box::new(BuiltinFontProvider::new(None)),
            Box::new(SystemFontProvider::with_font_dirs(vec![])),
        ]);
        assert!(chain.get_fallback_font().is_glyphless());
        assert!(chain.get_font("NoSuchFont").is_none());
        // Names from both providers are merged without duplicates.
        let names = chain.get_available_fonts();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
