pub mod types;
pub mod engine;
pub mod preprocess;
pub mod passes;

pub use types::*;
pub use engine::*;
pub use passes::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("OCR produced neither text nor word boxes")]
    EmptyResult,

    #[error("OCR engine aborted: {0}")]
    EngineAborted(String),
}
