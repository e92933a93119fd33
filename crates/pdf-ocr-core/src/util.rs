//! Small helpers shared across the crate.

use std::path::{Path, PathBuf};

/// Scratch file name for a page: six-digit, one-based page prefix so that
/// lexical order equals page order (`000001.page.png`, `000002.hocr`, ...).
pub fn page_file_name(pageno: usize, suffix: &str) -> String {
    format!("{:06}.{suffix}", pageno + 1)
}

/// Platform config directory (`~/.config` on unix-likes).
pub fn config_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_file_name_is_sortable() {
        assert_eq!(page_file_name(0, "page.pdf"), "000001.page.pdf");
        assert_eq!(page_file_name(9, "hocr"), "000010.hocr");
        assert_eq!(page_file_name(99999, "ocr.png"), "100000.ocr.png");
        assert!(page_file_name(1, "x") < page_file_name(2, "x"));
    }
}
