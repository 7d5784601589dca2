use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;

use bioscan::config::{ConfigError, ExtractionConfig};
use bioscan::models::PassSelection;
use bioscan::pipeline::ocr::OcrError;

#[derive(Parser)]
#[command(
    name = "bioscan",
    version,
    about = "Extract the TSH value, unit and reference interval from a scanned lab report"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// OCR an image (JPEG, PNG, WebP or TIFF) and extract the field
    Image {
        /// Path to the image file
        input_file: PathBuf,

        /// Pass selection: auto (default), fast, standard or aggressive
        #[arg(short, long, default_value = "auto")]
        pass: PassSelection,

        /// Directory holding the Tesseract traineddata files
        #[arg(long, value_name = "DIR", default_value = "/usr/share/tesseract-ocr/5/tessdata")]
        tessdata: PathBuf,

        /// OCR language hint, overrides the config file
        #[arg(short, long)]
        lang: Option<String>,

        /// JSON configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print the full report (passes attempted, raw OCR text)
        #[arg(long)]
        debug: bool,
    },
    /// Extract the field from already-recognized text
    Text {
        /// Path to a UTF-8 text file
        input_file: PathBuf,

        /// JSON configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("This build has no OCR engine; rebuild with `--features ocr`")]
    #[allow(dead_code)]
    OcrUnavailable,
}

fn main() {
    let cli = Cli::parse();
    bioscan::init_tracing();

    let result = match cli.command {
        Commands::Image {
            input_file,
            pass,
            tessdata,
            lang,
            config,
            debug,
        } => run_image(&input_file, pass, &tessdata, lang, config.as_deref(), debug),
        Commands::Text { input_file, config } => run_text(&input_file, config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ExtractionConfig, CliError> {
    let config = match path {
        Some(path) => ExtractionConfig::from_json_file(path)?,
        None => ExtractionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn run_text(input_file: &Path, config: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config)?;
    let bytes = read_file(input_file)?;
    let text = String::from_utf8_lossy(&bytes);
    let field = bioscan::parse_text(&text, &config);
    println!("{}", serde_json::to_string_pretty(&field)?);
    Ok(())
}

#[cfg(feature = "ocr")]
fn run_image(
    input_file: &Path,
    pass: PassSelection,
    tessdata: &Path,
    lang: Option<String>,
    config: Option<&Path>,
    debug: bool,
) -> Result<(), CliError> {
    let mut config = load_config(config)?;
    if let Some(lang) = lang {
        config = config.with_language(&lang);
    }
    let engine = bioscan::pipeline::ocr::BundledTesseract::new(tessdata)?;
    let bytes = read_file(input_file)?;

    let report = bioscan::extract_field(&engine, &bytes, pass, &config);
    let json = if debug {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string_pretty(&report.field)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(not(feature = "ocr"))]
fn run_image(
    _input_file: &Path,
    _pass: PassSelection,
    _tessdata: &Path,
    _lang: Option<String>,
    _config: Option<&Path>,
    _debug: bool,
) -> Result<(), CliError> {
    Err(CliError::OcrUnavailable)
}
