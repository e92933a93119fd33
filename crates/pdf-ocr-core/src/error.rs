use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for pdf-ocr-core
///
/// This enum encompasses all error cases that can occur in the library:
/// - Input PDF problems (invalid file, prior OCR, DPI trouble)
/// - Collaborator failures (OCR engine, rasterizer)
/// - Rendering and grafting failures
/// - Worker pool / cancellation
/// - Configuration and general I/O
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Input Errors
    // ==========================================================================
    /// The origin file is not a usable PDF, or access was lost mid-run
    #[error("input file error: {0}")]
    InputFile(String),

    /// A page already carries a text layer and no override was given
    #[error(
        "page {page} already has text! - aborting (use --force-ocr to force OCR, \
         --skip-text to skip OCR on pages with text, or --redo-ocr to redo OCR)"
    )]
    PriorOcrFound { page: usize },

    /// No resolution was found for an image and none was supplied
    #[error("DPI error: {0}")]
    Dpi(String),

    /// An image exceeds the configured pixel cap
    #[error(
        "image with {megapixels:.1} megapixels exceeds the limit of \
         {limit_megapixels:.1} (increase --max-image-mpixels to override)"
    )]
    DecompressionBomb {
        megapixels: f64,
        limit_megapixels: f64,
    },

    // ==========================================================================
    // Collaborator Errors
    // ==========================================================================
    /// A required collaborator (OCR engine, rasterizer) is absent
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A collaborator returned non-zero or unparseable output
    #[error("subprocess output error: {0}")]
    SubprocessOutput(String),

    /// Invalid OCR-engine configuration flag
    #[error("invalid OCR engine configuration: {0}")]
    OcrEngineConfig(String),

    /// The rasterizer reported a recoverable problem on one page
    #[error("soft render error on page {page}: {reason}")]
    SoftRender { page: usize, reason: String },

    // ==========================================================================
    // hOCR / Rendering Errors
    // ==========================================================================
    /// The hOCR document could not be parsed or has no usable page
    #[error("failed to parse hOCR: {0}")]
    HocrParse(String),

    /// Failed to build the text layer PDF
    #[error("failed to render text layer: {0}")]
    Render(String),

    /// A matrix with no inverse was encountered
    #[error("matrix is singular and cannot be inverted")]
    SingularMatrix,

    // ==========================================================================
    // Grafting Errors
    // ==========================================================================
    /// The grafter could not insert a text layer into the base PDF
    #[error("failed to merge text layer into page {page}: {reason}")]
    PdfMergeFailed { page: usize, reason: String },

    /// Error from the lopdf library
    #[error("pdf error: {0}")]
    Pdf(String),

    // ==========================================================================
    // Pipeline Errors
    // ==========================================================================
    /// The worker pool lost a worker
    #[error(
        "a worker died unexpectedly; the system may be low on memory \
         (try reducing --jobs)"
    )]
    BrokenWorkerPool,

    /// The run was interrupted by the user
    #[error("processing was cancelled")]
    Cancelled,

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with the offending path attached
    #[error("{path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Self::Pdf(e.to_string())
    }
}

impl Error {
    /// Map this error to the process exit code reported to the shell.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InputFile(_) | Self::HocrParse(_) | Self::Dpi(_) => ExitCode::InputFile,
            Self::PriorOcrFound { .. } => ExitCode::AlreadyDoneOcr,
            Self::MissingDependency(_) => ExitCode::MissingDependency,
            Self::OcrEngineConfig(_) | Self::ConfigLoad(_) | Self::ConfigInvalid { .. } => {
                ExitCode::BadArgs
            }
            Self::PdfMergeFailed { .. } | Self::Pdf(_) | Self::Render(_) => {
                ExitCode::InvalidOutputPdf
            }
            Self::BrokenWorkerPool => ExitCode::ChildProcessError,
            Self::Cancelled => ExitCode::CtrlC,
            Self::IoPath { .. } | Self::Io(_) => ExitCode::FileAccessError,
            _ => ExitCode::OtherError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Process exit codes, one per error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    InputFile = 2,
    MissingDependency = 3,
    InvalidOutputPdf = 4,
    FileAccessError = 5,
    AlreadyDoneOcr = 6,
    ChildProcessError = 7,
    InvalidConfig = 8,
    InvalidOutputPdfA = 9,
    PdfaConversionFailed = 10,
    OtherError = 15,
    CtrlC = 130,
}

impl ExitCode {
    pub const fn code(self) -> i32 {
        self as i32
    }
}
