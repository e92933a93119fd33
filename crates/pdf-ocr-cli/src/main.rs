//! pdf-ocr - command line tool for adding searchable text layers to PDFs.

mod raster;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_ocr_core::pipeline::ProgressReporter;
use pdf_ocr_core::render::DebugRenderOptions;
use pdf_ocr_core::{
    AppConfig, CancellationToken, ExistingTextAction, ExitCode, NullOcrEngine, OcrEngine,
    OcrOptions, RenderOptions, TextLayerRenderer, parse_hocr_file, run_pipeline,
};
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, ValueEnum)]
enum EngineOption {
    /// Produce no text; image processing and conversion only.
    None,
}

#[derive(Parser, Debug)]
#[command(name = "pdf-ocr")]
#[command(author, version, about = "Add a searchable text layer to image-only PDFs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR a PDF and write a searchable copy
    Run(RunArgs),
    /// Convert an existing hOCR file into a single-page text PDF
    Hocr(HocrArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input PDF file
    input: PathBuf,

    /// Output PDF file
    output: PathBuf,

    /// OCR engine to use
    #[arg(long, value_enum, default_value = "none")]
    ocr_engine: EngineOption,

    /// Languages to recognize (Tesseract codes)
    #[arg(short = 'l', long = "language", default_value = "eng")]
    languages: Vec<String>,

    /// Number of parallel workers (0 = one per CPU)
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Skip pages that already contain text
    #[arg(long, conflicts_with_all = ["redo_ocr", "force_ocr"])]
    skip_text: bool,

    /// Strip existing invisible text and OCR again
    #[arg(long, conflicts_with = "force_ocr")]
    redo_ocr: bool,

    /// Rasterize all pages and OCR them, even pages with text
    #[arg(long)]
    force_ocr: bool,

    /// Skip OCR on pages bigger than this many megapixels
    #[arg(long, default_value_t = 0.0)]
    skip_big: f64,

    /// Refuse images bigger than this many megapixels
    #[arg(long, default_value_t = 250.0)]
    max_image_mpixels: f64,

    /// Rasterization resolution for OCR
    #[arg(long, default_value_t = 300.0)]
    ocr_image_dpi: f64,

    /// Detect and correct page orientation
    #[arg(long)]
    rotate_pages: bool,

    /// Confidence threshold for --rotate-pages
    #[arg(long, default_value_t = 2.0)]
    rotate_pages_threshold: f64,

    /// Deskew pages before OCR
    #[arg(long)]
    deskew: bool,

    /// Hide vector content from the OCR engine
    #[arg(long)]
    remove_vectors: bool,

    /// Write recognized plain text to this file
    #[arg(long)]
    sidecar: Option<PathBuf>,

    /// Directory containing bundled fonts
    #[arg(long)]
    font_dir: Option<PathBuf>,

    /// Keep the working directory for debugging
    #[arg(short = 'k', long)]
    keep_temporary_files: bool,

    /// Produce byte-identical output for identical inputs
    #[arg(long)]
    deterministic_output: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct HocrArgs {
    /// Input hOCR file
    hocr: PathBuf,

    /// Output PDF file
    output: PathBuf,

    /// Resolution of the image that was OCRed
    #[arg(short, long, default_value_t = 300.0)]
    resolution: f64,

    /// Directory containing bundled fonts
    #[arg(long)]
    font_dir: Option<PathBuf>,

    /// Render text visibly instead of invisibly
    #[arg(long)]
    visible_text: bool,

    /// Sketch bounding boxes and baselines for debugging
    #[arg(short = 'b', long)]
    bounding_boxes: bool,
}

/// indicatif-backed progress reporting for the pipeline.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::no_length()
        };
        // Template is hardcoded and valid, unwrap is safe
        #[allow(clippy::unwrap_used)]
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn update(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_owned());
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match dispatch(cli) {
        Ok(()) => ExitCode::Ok.code(),
        Err(e) => {
            error!("{e:#}");
            e.downcast_ref::<pdf_ocr_core::Error>()
                .map_or(ExitCode::OtherError.code(), |core| core.exit_code().code())
        }
    };
    std::process::exit(exit_code);
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = if let Some(config_path) = &cli.config {
        AppConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        AppConfig::load()
    };

    match cli.command {
        Command::Run(args) => run_ocr(args, config),
        Command::Hocr(args) => convert_hocr(&args),
    }
}

fn run_ocr(args: RunArgs, config: AppConfig) -> anyhow::Result<()> {
    let mut options: OcrOptions = config.ocr;

    // CLI arguments override the config file.
    options.jobs = args.jobs;
    options.languages = args.languages;
    options.existing_text = if args.force_ocr {
        ExistingTextAction::ForceOcr
    } else if args.redo_ocr {
        ExistingTextAction::RedoOcr
    } else if args.skip_text {
        ExistingTextAction::SkipText
    } else {
        ExistingTextAction::Fail
    };
    options.skip_big_mpixels = args.skip_big;
    options.max_image_mpixels = args.max_image_mpixels;
    options.ocr_image_dpi = args.ocr_image_dpi;
    options.rotate_pages = args.rotate_pages;
    options.rotate_pages_threshold = args.rotate_pages_threshold;
    options.deskew = args.deskew;
    options.remove_vectors = args.remove_vectors;
    options.sidecar = args.sidecar;
    if args.font_dir.is_some() {
        options.font_dir = args.font_dir;
    }
    options.keep_temporary_files = args.keep_temporary_files;
    options.deterministic_output = args.deterministic_output;

    let engine: Arc<dyn OcrEngine> = match args.ocr_engine {
        EngineOption::None => Arc::new(NullOcrEngine),
    };
    let rasterizer = Arc::new(raster::EmbeddedImageRasterizer::default());
    let progress = CliProgress::new(args.no_progress);
    let cancel = CancellationToken::new();

    let output = run_pipeline(
        &args.input,
        &args.output,
        &options,
        engine,
        rasterizer,
        &progress,
        &cancel,
    )
    .with_context(|| format!("Failed to OCR {}", args.input.display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("Output written to: {}", output.display());
    }
    Ok(())
}

fn convert_hocr(args: &HocrArgs) -> anyhow::Result<()> {
    use pdf_ocr_core::font::{ChainedFontProvider, MultiFontManager};

    let tree = parse_hocr_file(&args.hocr)
        .with_context(|| format!("Failed to parse {}", args.hocr.display()))?;
    let dpi = tree.dpi.unwrap_or(args.resolution);

    let fonts = MultiFontManager::new(Arc::new(ChainedFontProvider::standard(
        args.font_dir.clone(),
    )));
    let debug = if args.bounding_boxes {
        DebugRenderOptions {
            render_line_bbox: true,
            render_word_bbox: true,
            render_baseline: true,
            ..Default::default()
        }
    } else {
        DebugRenderOptions::default()
    };
    let renderer = TextLayerRenderer::new(
        &fonts,
        RenderOptions {
            invisible_text: !args.visible_text,
            debug,
        },
    );
    renderer
        .render_page(&tree, dpi, &args.output)
        .with_context(|| format!("Failed to render {}", args.output.display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("Text PDF written to: {}", args.output.display());
    }
    Ok(())
}
