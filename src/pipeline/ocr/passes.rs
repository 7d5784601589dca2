//! The three OCR passes, cheapest first.
//!
//! Every pass decodes the source bytes itself, preprocesses a grayscale copy
//! and calls the engine. Only an undecodable image or an engine that yields
//! nothing at all fails a pass; preprocessing trouble degrades in place.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::preprocess::{encode_png, load_image, prepare, PreprocessStep};
use super::types::{OcrEngine, OcrResult, OcrToken};
use super::OcrError;
use crate::config::ExtractionConfig;
use crate::models::PassKind;
use crate::pipeline::parsing::spatial::build_layout;

const FAST_STEPS: &[PreprocessStep] = &[
    PreprocessStep::CropToContent,
    PreprocessStep::BoundedResize,
    PreprocessStep::Autocontrast,
    PreprocessStep::Sharpen,
];

const AGGRESSIVE_STEPS: &[PreprocessStep] = &[
    PreprocessStep::CropToContent,
    PreprocessStep::BoundedResize,
    PreprocessStep::Autocontrast,
    PreprocessStep::Sharpen,
    PreprocessStep::Upscale,
    PreprocessStep::Binarize,
];

/// One image-to-text strategy at a fixed cost/quality tier.
pub trait OcrPass: Send + Sync {
    fn kind(&self) -> PassKind;

    fn run(
        &self,
        engine: &dyn OcrEngine,
        image_bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<OcrResult, OcrError>;
}

/// Minimal preprocessing, one text-only engine call.
pub struct FastPass;

/// Fast preprocessing plus a second call for positioned words.
pub struct StandardPass;

/// Upscaled, binarized input; keeps low-confidence words.
pub struct AggressivePass;

static FAST: FastPass = FastPass;
static STANDARD: StandardPass = StandardPass;
static AGGRESSIVE: AggressivePass = AggressivePass;

/// The pass implementing `kind`.
pub fn pass_for(kind: PassKind) -> &'static dyn OcrPass {
    match kind {
        PassKind::Fast => &FAST,
        PassKind::Standard => &STANDARD,
        PassKind::Aggressive => &AGGRESSIVE,
    }
}

impl OcrPass for FastPass {
    fn kind(&self) -> PassKind {
        PassKind::Fast
    }

    fn run(
        &self,
        engine: &dyn OcrEngine,
        image_bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<OcrResult, OcrError> {
        let png = prepared_png(image_bytes, FAST_STEPS, config)?;
        let text = contained(|| engine.extract_text(&png, &config.language_hint))?;
        if text.trim().is_empty() {
            return Err(OcrError::EmptyResult);
        }
        Ok(OcrResult::text_only(&text))
    }
}

impl OcrPass for StandardPass {
    fn kind(&self) -> PassKind {
        PassKind::Standard
    }

    fn run(
        &self,
        engine: &dyn OcrEngine,
        image_bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<OcrResult, OcrError> {
        let png = prepared_png(image_bytes, FAST_STEPS, config)?;
        text_and_tokens(engine, &png, config, config.passes.standard_token_floor)
    }
}

impl OcrPass for AggressivePass {
    fn kind(&self) -> PassKind {
        PassKind::Aggressive
    }

    fn run(
        &self,
        engine: &dyn OcrEngine,
        image_bytes: &[u8],
        config: &ExtractionConfig,
    ) -> Result<OcrResult, OcrError> {
        let png = prepared_png(image_bytes, AGGRESSIVE_STEPS, config)?;
        text_and_tokens(engine, &png, config, config.passes.aggressive_token_floor)
    }
}

fn prepared_png(
    image_bytes: &[u8],
    steps: &[PreprocessStep],
    config: &ExtractionConfig,
) -> Result<Vec<u8>, OcrError> {
    let image = load_image(image_bytes)?;
    let gray = prepare(&image, steps, &config.passes);
    encode_png(&gray)
}

/// Text call plus word-box call. Either may fail alone; the pass fails only
/// when neither yields anything. Words without text become the raw text.
fn text_and_tokens(
    engine: &dyn OcrEngine,
    png: &[u8],
    config: &ExtractionConfig,
    token_floor: f32,
) -> Result<OcrResult, OcrError> {
    let lang = config.language_hint.as_str();
    let text = contained(|| engine.extract_text(png, lang));
    let tokens = match contained(|| engine.extract_tokens(png, lang)) {
        Ok(tokens) => Some(filter_tokens(tokens, token_floor)),
        Err(e) => {
            tracing::warn!(error = %e, "Word box extraction failed, continuing without tokens");
            None
        }
    };

    let text = match (text, &tokens) {
        (Ok(text), _) => text,
        (Err(e), Some(tokens)) if !tokens.is_empty() => {
            tracing::warn!(error = %e, "Text extraction failed, rebuilding text from word boxes");
            String::new()
        }
        (Err(e), _) => return Err(e),
    };

    let tokens = tokens.unwrap_or_default();
    if text.trim().is_empty() && tokens.is_empty() {
        return Err(OcrError::EmptyResult);
    }

    let raw_text = if text.trim().is_empty() {
        build_layout(&tokens, config.layout.line_tolerance_px).text
    } else {
        text
    };

    Ok(OcrResult { raw_text, tokens })
}

/// Drop words below `floor`. Words without a reported confidence are kept.
fn filter_tokens(tokens: Vec<OcrToken>, floor: f32) -> Vec<OcrToken> {
    let before = tokens.len();
    let kept: Vec<OcrToken> = tokens
        .into_iter()
        .filter(|t| t.confidence.map_or(true, |c| c >= floor))
        .collect();
    if kept.len() < before {
        tracing::debug!(
            dropped = before - kept.len(),
            kept = kept.len(),
            floor,
            "Low-confidence words dropped"
        );
    }
    kept
}

/// Run an engine call, turning a panic into `EngineAborted`.
fn contained<T>(call: impl FnOnce() -> Result<T, OcrError>) -> Result<T, OcrError> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(OcrError::EngineAborted(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine panicked".to_string()
    }
}
