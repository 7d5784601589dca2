use serde::{Deserialize, Serialize};

use super::OcrError;
use crate::models::PassKind;

/// Pixel bounding box of a recognized word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognized word with its position on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence in `[0, 1]`, when the engine reports one.
    pub confidence: Option<f32>,
}

impl OcrToken {
    pub fn new(text: &str, left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            text: text.to_string(),
            bbox: BoundingBox {
                left,
                top,
                width,
                height,
            },
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn left(&self) -> u32 {
        self.bbox.left
    }

    pub fn top(&self) -> u32 {
        self.bbox.top
    }
}

/// Output of one OCR pass. Tokens are empty for text-only passes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub raw_text: String,
    pub tokens: Vec<OcrToken>,
}

impl OcrResult {
    pub fn text_only(raw_text: &str) -> Self {
        Self {
            raw_text: raw_text.to_string(),
            tokens: Vec::new(),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.raw_text.trim().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.tokens.is_empty()
    }
}

/// External OCR engine: PNG bytes in, plain text and/or positioned words out.
///
/// Implementations may return empty or garbled output on poor input; the
/// passes contain any error (or panic) they raise.
pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, png_bytes: &[u8], language_hint: &str) -> Result<String, OcrError>;

    fn extract_tokens(
        &self,
        png_bytes: &[u8],
        language_hint: &str,
    ) -> Result<Vec<OcrToken>, OcrError>;
}

/// Outcome of one attempted pass, kept for the extraction report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassAttempt {
    pub pass: PassKind,
    /// Failure of the pass itself (`None` when it produced a result).
    pub failure: Option<String>,
    pub candidates: usize,
    pub with_interval: bool,
    pub elapsed_ms: u64,
}
