use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do with pages that already contain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingTextAction {
    /// Fail the run (the default): the user probably did not mean to OCR an
    /// already-OCRed file.
    #[default]
    Fail,
    /// Pass such pages through untouched.
    SkipText,
    /// Strip prior invisible text and OCR again.
    RedoOcr,
    /// Rasterize everything, including vector text, and OCR the result.
    ForceOcr,
}

/// Options controlling one OCR run.
///
/// The field set mirrors the CLI surface; everything has a serde default so a
/// partial TOML file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOptions {
    /// Worker parallelism. 0 means one worker per CPU.
    #[serde(default)]
    pub jobs: usize,

    /// Use thread workers. Process workers are not implemented; this flag is
    /// accepted for compatibility and behaves the same either way.
    #[serde(default = "default_true")]
    pub use_threads: bool,

    /// Languages passed to the OCR engine, Tesseract codes.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    #[serde(default)]
    pub existing_text: ExistingTextAction,

    /// Skip OCR on pages larger than this many megapixels. 0 disables.
    #[serde(default)]
    pub skip_big_mpixels: f64,

    /// Refuse to decode images larger than this many megapixels.
    #[serde(default = "default_max_image_mpixels")]
    pub max_image_mpixels: f64,

    /// Rasterization resolution for OCR.
    #[serde(default = "default_ocr_dpi")]
    pub ocr_image_dpi: f64,

    /// Detect page orientation and correct it.
    #[serde(default)]
    pub rotate_pages: bool,

    /// Minimum orientation confidence before a correction is applied.
    #[serde(default = "default_rotate_threshold")]
    pub rotate_pages_threshold: f64,

    /// Deskew page images before OCR.
    #[serde(default)]
    pub deskew: bool,

    /// Exclude vector content from the raster handed to the OCR engine.
    #[serde(default)]
    pub remove_vectors: bool,

    /// Keep going when the rasterizer reports a recoverable per-page error;
    /// the page is passed through without OCR.
    #[serde(default = "default_true")]
    pub continue_on_soft_render_error: bool,

    /// Write the concatenated recognized text to this file.
    #[serde(default)]
    pub sidecar: Option<PathBuf>,

    /// Directory with bundled fonts for the text renderer.
    #[serde(default)]
    pub font_dir: Option<PathBuf>,

    /// Keep the working directory and interim files for debugging.
    #[serde(default)]
    pub keep_temporary_files: bool,

    /// Suppress time-dependent output so identical runs produce identical
    /// bytes.
    #[serde(default)]
    pub deterministic_output: bool,

    /// Draw text visibly instead of with render mode 3.
    #[serde(default)]
    pub visible_text: bool,
}

const fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_owned()]
}

const fn default_max_image_mpixels() -> f64 {
    250.0
}

const fn default_ocr_dpi() -> f64 {
    300.0
}

const fn default_rotate_threshold() -> f64 {
    2.0
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            use_threads: true,
            languages: default_languages(),
            existing_text: ExistingTextAction::default(),
            skip_big_mpixels: 0.0,
            max_image_mpixels: default_max_image_mpixels(),
            ocr_image_dpi: default_ocr_dpi(),
            rotate_pages: false,
            rotate_pages_threshold: default_rotate_threshold(),
            deskew: false,
            remove_vectors: false,
            continue_on_soft_render_error: true,
            sidecar: None,
            font_dir: None,
            keep_temporary_files: false,
            deterministic_output: false,
            visible_text: false,
        }
    }
}

impl OcrOptions {
    /// Effective worker count: explicit, or one per CPU.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_image_mpixels < 0.0 {
            return Err(Error::ConfigInvalid {
                field: "max_image_mpixels".into(),
                reason: "must be non-negative".into(),
            });
        }
        if self.ocr_image_dpi <= 0.0 {
            return Err(Error::ConfigInvalid {
                field: "ocr_image_dpi".into(),
                reason: "must be positive".into(),
            });
        }
        if self.languages.is_empty() {
            return Err(Error::ConfigInvalid {
                field: "languages".into(),
                reason: "at least one language is required".into(),
            });
        }
        Ok(())
    }
}

/// Application configuration: run options plus file-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ocr: OcrOptions,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config: {e}")))
    }

    /// Load from default locations (`~/.config/pdf-ocr/config.toml`, then
    /// `./config.toml`), falling back to defaults.
    pub fn load() -> Self {
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("pdf-ocr").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        let local_config = std::path::PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./config.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./config.toml: {}", e);
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Self::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = OcrOptions::default();
        assert_eq!(options.languages, vec!["eng"]);
        assert_eq!(options.existing_text, ExistingTextAction::Fail);
        assert!(options.use_threads);
        assert!(options.continue_on_soft_render_error);
        assert!(!options.deterministic_output);
        assert!((options.max_image_mpixels - 250.0).abs() < f64::EPSILON);
        assert!(options.effective_jobs() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
[ocr]
jobs = 4
languages = ["deu", "eng"]
existing_text = "skip_text"
deskew = true
"#,
        )
        .unwrap();
        assert_eq!(config.ocr.jobs, 4);
        assert_eq!(config.ocr.languages, vec!["deu", "eng"]);
        assert_eq!(config.ocr.existing_text, ExistingTextAction::SkipText);
        assert!(config.ocr.deskew);
        // Unspecified fields keep their defaults.
        assert!((config.ocr.ocr_image_dpi - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation() {
        let mut options = OcrOptions::default();
        options.languages.clear();
        assert!(options.validate().is_err());

        let mut options = OcrOptions::default();
        options.ocr_image_dpi = 0.0;
        assert!(options.validate().is_err());

        assert!(OcrOptions::default().validate().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(AppConfig::from_file("/nonexistent/config.toml").is_err());
    }
}
