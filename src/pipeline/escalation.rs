//! Escalation across OCR passes.
//!
//! Passes run strictly in cost order. A pass whose best candidate carries a
//! reference interval ends the chain at once; otherwise the next pass runs.
//! When the chain ends without such a candidate, the best one seen so far
//! (by label strength, then consistency; earlier passes win ties) is
//! returned. The caller-supplied deadline is checked before each pass after
//! the first.

use std::time::Instant;

use serde::Serialize;

use super::ocr::{pass_for, OcrEngine, OcrError, PassAttempt};
use super::parsing::{FieldParser, FIELD_MARKER};
use crate::config::ExtractionConfig;
use crate::models::{ErrorCode, ParsedField, PassKind, PassSelection};

/// Where the controller stands. The `*Attempted` states name the last pass run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    FastAttempted,
    StandardAttempted,
    AggressiveAttempted,
    Accepted,
    Exhausted,
}

impl EscalationState {
    fn attempted(kind: PassKind) -> Self {
        match kind {
            PassKind::Fast => Self::FastAttempted,
            PassKind::Standard => Self::StandardAttempted,
            PassKind::Aggressive => Self::AggressiveAttempted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted)
    }
}

/// Final answer plus how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    #[serde(flatten)]
    pub field: ParsedField,
    pub marker: &'static str,
    /// Pass that produced the answer.
    pub pass: Option<PassKind>,
    pub state: EscalationState,
    pub passes_attempted: Vec<PassAttempt>,
    /// Raw OCR text of the answering pass (or the last pass with text).
    pub raw_text: Option<String>,
}

impl ExtractionReport {
    /// Report for a run that never reached the passes.
    pub fn failed(code: ErrorCode) -> Self {
        Self {
            field: ParsedField::failed(code),
            marker: FIELD_MARKER,
            pass: None,
            state: EscalationState::Exhausted,
            passes_attempted: Vec::new(),
            raw_text: None,
        }
    }
}

/// Best answer held between passes.
struct Held {
    pass: PassKind,
    field: ParsedField,
    raw_text: String,
    /// (label rank, consistency); lower is better.
    key: (u8, u8),
}

/// Runs passes against one engine until a result is good enough.
pub struct EscalationController<'a> {
    engine: &'a dyn OcrEngine,
    config: &'a ExtractionConfig,
}

impl<'a> EscalationController<'a> {
    pub fn new(engine: &'a dyn OcrEngine, config: &'a ExtractionConfig) -> Self {
        Self { engine, config }
    }

    pub fn run(&self, image_bytes: &[u8], selection: PassSelection) -> ExtractionReport {
        let started = Instant::now();
        let deadline = self.config.deadline();
        let parser = FieldParser::new(self.config);

        let mut state: Option<EscalationState> = None;
        let mut attempts: Vec<PassAttempt> = Vec::new();
        let mut held: Option<Held> = None;
        let mut last_text: Option<String> = None;
        let mut only_empty_failures = true;

        for &kind in selection.plan() {
            if let (Some(limit), false) = (deadline, attempts.is_empty()) {
                if started.elapsed() >= limit {
                    tracing::warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        skipped = kind.as_str(),
                        "Extraction deadline exceeded, returning best result so far"
                    );
                    break;
                }
            }

            tracing::info!(pass = kind.as_str(), "Starting OCR pass");
            let pass_started = Instant::now();
            let result = pass_for(kind).run(self.engine, image_bytes, self.config);
            let elapsed_ms = pass_started.elapsed().as_millis() as u64;
            state = Some(EscalationState::attempted(kind));

            let ocr = match result {
                Ok(ocr) => ocr,
                Err(e) => {
                    tracing::warn!(pass = kind.as_str(), error = %e, "OCR pass failed");
                    if !matches!(e, OcrError::EmptyResult) {
                        only_empty_failures = false;
                    }
                    attempts.push(PassAttempt {
                        pass: kind,
                        failure: Some(e.to_string()),
                        candidates: 0,
                        with_interval: false,
                        elapsed_ms,
                    });
                    continue;
                }
            };

            let outcome = parser.analyze(&ocr);
            let with_interval = outcome.has_interval();
            attempts.push(PassAttempt {
                pass: kind,
                failure: None,
                candidates: outcome.candidates.len(),
                with_interval,
                elapsed_ms,
            });
            tracing::info!(
                pass = kind.as_str(),
                candidates = outcome.candidates.len(),
                selected = outcome.best.is_some(),
                with_interval,
                elapsed_ms,
                "OCR pass complete"
            );

            if let Some(score) = outcome.best_score() {
                let key = (score.label, score.consistency);
                let replace = with_interval || held.as_ref().map_or(true, |h| key < h.key);
                if replace {
                    held = Some(Held {
                        pass: kind,
                        field: parser.finish(&outcome),
                        raw_text: ocr.raw_text.clone(),
                        key,
                    });
                }
            }
            last_text = Some(ocr.raw_text);

            if with_interval {
                state = Some(EscalationState::Accepted);
                break;
            }
        }

        let report = match held {
            Some(h) => ExtractionReport {
                field: h.field,
                marker: FIELD_MARKER,
                pass: Some(h.pass),
                state: EscalationState::Accepted,
                passes_attempted: attempts,
                raw_text: Some(h.raw_text),
            },
            None => {
                let code = if last_text.is_some() {
                    ErrorCode::FieldNotFound
                } else if only_empty_failures && !attempts.is_empty() {
                    ErrorCode::EmptyText
                } else {
                    ErrorCode::OcrFailed
                };
                ExtractionReport {
                    field: ParsedField::failed(code),
                    marker: FIELD_MARKER,
                    pass: None,
                    state: EscalationState::Exhausted,
                    passes_attempted: attempts,
                    raw_text: last_text,
                }
            }
        };

        tracing::info!(
            ok = report.field.ok,
            error = report.field.error.map(|e| e.as_str()),
            pass = report.pass.map(|p| p.as_str()),
            last_state = ?state,
            passes = report.passes_attempted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;
    use crate::pipeline::ocr::{MockOcrEngine, OcrToken};
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
    use std::io::Cursor;
    use std::time::Duration;

    fn page_png() -> Vec<u8> {
        let img = GrayImage::from_fn(400, 200, |x, y| {
            if (50..350).contains(&x) && (80..110).contains(&y) {
                Luma([10])
            } else {
                Luma([245])
            }
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn run(engine: &MockOcrEngine, selection: PassSelection) -> ExtractionReport {
        let config = ExtractionConfig::default();
        EscalationController::new(engine, &config).run(&page_png(), selection)
    }

    #[test]
    fn interval_on_fast_pass_stops_escalation() {
        let engine = MockOcrEngine::new("TSH 3,20 mUI/L (0,40 - 4,00)", 0.9);
        let report = run(&engine, PassSelection::Auto);

        assert!(report.field.ok);
        assert_eq!(report.state, EscalationState::Accepted);
        assert_eq!(report.pass, Some(PassKind::Fast));
        assert_eq!(report.passes_attempted.len(), 1);
        // standard and aggressive never touched the engine
        assert_eq!(engine.text_calls(), 1);
        assert_eq!(engine.token_calls(), 0);
    }

    #[test]
    fn escalates_until_interval_found() {
        let engine = MockOcrEngine::new("TSH 3,20 mUI/L (0,40 - 4,00)", 0.9)
            .with_text_script(&["TSH 3,20 mUI/L"]);
        let report = run(&engine, PassSelection::Auto);

        assert_eq!(report.pass, Some(PassKind::Standard));
        assert_eq!(report.state, EscalationState::Accepted);
        assert_eq!(report.field.ref_min, Some(0.4));
        assert_eq!(report.field.confidence, Some(Confidence::High));
        assert_eq!(report.passes_attempted.len(), 2);
        assert!(!report.passes_attempted[0].with_interval);
        assert!(report.passes_attempted[1].with_interval);
        assert_eq!(engine.text_calls(), 2);
    }

    #[test]
    fn accepts_best_without_interval_after_all_passes() {
        let engine = MockOcrEngine::new("TSH 2,10 mUI/L", 0.9);
        let report = run(&engine, PassSelection::Auto);

        assert!(report.field.ok);
        assert_eq!(report.state, EscalationState::Accepted);
        assert_eq!(report.passes_attempted.len(), 3);
        // all passes tie; the earliest wins
        assert_eq!(report.pass, Some(PassKind::Fast));
        assert_eq!(report.field.confidence, Some(Confidence::Medium));
    }

    #[test]
    fn stronger_label_from_later_pass_replaces_held_answer() {
        let engine = MockOcrEngine::new("TSH 2,10 mUI/L", 0.9)
            .with_text_script(&["macro-TSH 5,0 mUI/L"]);
        // fast reads only the variant; standard reads the genuine label
        let report = run(&engine, PassSelection::Auto);
        assert_eq!(report.pass, Some(PassKind::Standard));
        assert_eq!(report.field.value, Some(2.1));
    }

    #[test]
    fn nothing_found_is_field_not_found() {
        let engine = MockOcrEngine::new("Glycémie 0,92 g/L", 0.9);
        let report = run(&engine, PassSelection::Auto);
        assert_eq!(report.field.error, Some(ErrorCode::FieldNotFound));
        assert_eq!(report.state, EscalationState::Exhausted);
        assert_eq!(report.raw_text.as_deref(), Some("Glycémie 0,92 g/L"));
    }

    #[test]
    fn zero_byte_image_is_ocr_failed() {
        let engine = MockOcrEngine::new("TSH 3,20 mUI/L (0,40 - 4,00)", 0.9);
        let config = ExtractionConfig::default();
        let report = EscalationController::new(&engine, &config).run(&[], PassSelection::Auto);

        assert!(!report.field.ok);
        assert_eq!(report.field.error, Some(ErrorCode::OcrFailed));
        assert_eq!(report.passes_attempted.len(), 3);
        assert!(report.passes_attempted.iter().all(|a| a.failure.is_some()));
        assert_eq!(engine.text_calls(), 0);
    }

    #[test]
    fn blank_ocr_everywhere_is_empty_text() {
        let engine = MockOcrEngine::new("", 0.9).with_tokens(Vec::new());
        let report = run(&engine, PassSelection::Auto);
        assert_eq!(report.field.error, Some(ErrorCode::EmptyText));
    }

    #[test]
    fn failing_engine_is_ocr_failed() {
        let report = run(&MockOcrEngine::failing(), PassSelection::Auto);
        assert_eq!(report.field.error, Some(ErrorCode::OcrFailed));
        assert_eq!(report.state, EscalationState::Exhausted);
    }

    #[test]
    fn panicking_engine_never_escapes() {
        let report = run(&MockOcrEngine::panicking(), PassSelection::Auto);
        assert_eq!(report.field.error, Some(ErrorCode::OcrFailed));
        assert!(report.passes_attempted[0]
            .failure
            .as_deref()
            .is_some_and(|f| f.contains("aborted")));
    }

    #[test]
    fn explicit_pass_runs_alone() {
        let engine = MockOcrEngine::new("TSH 2,10 mUI/L", 0.9);
        let report = run(&engine, PassSelection::Aggressive);
        assert_eq!(report.passes_attempted.len(), 1);
        assert_eq!(report.pass, Some(PassKind::Aggressive));
        assert!(report.field.ok);
        assert_eq!(engine.text_calls(), 1);
        assert_eq!(engine.token_calls(), 1);
    }

    #[test]
    fn spatial_tokens_used_by_standard_pass() {
        let tokens = vec![
            OcrToken::new("TSH", 10, 130, 40, 14),
            OcrToken::new("2,85", 305, 133, 40, 14),
            OcrToken::new("mUI/L", 360, 131, 50, 14),
            OcrToken::new("1,90", 448, 129, 40, 14),
        ];
        let engine = MockOcrEngine::new("", 0.9).with_tokens(tokens);
        let report = run(&engine, PassSelection::Standard);
        assert!(report.field.ok);
        assert_eq!(report.field.value, Some(2.85));
        assert_eq!(report.raw_text.as_deref(), Some("tsh 2,85 mui/l 1,90"));
    }

    #[test]
    fn expired_deadline_returns_best_so_far() {
        let engine = MockOcrEngine::new("TSH 2,10 mUI/L", 0.9);
        let config = ExtractionConfig::default().with_deadline(Duration::ZERO);
        let report = EscalationController::new(&engine, &config).run(&page_png(), PassSelection::Auto);

        assert!(report.field.ok);
        assert_eq!(report.passes_attempted.len(), 1);
        assert_eq!(report.pass, Some(PassKind::Fast));
    }

    #[test]
    fn report_serializes_flat() {
        let engine = MockOcrEngine::new("TSH 3,20 mUI/L (0,40 - 4,00)", 0.9);
        let report = run(&engine, PassSelection::Auto);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["marker"], "TSH");
        assert_eq!(json["pass"], "fast");
        assert_eq!(json["state"], "accepted");
        assert_eq!(json["confidence"], "high");
        assert_eq!(json["passes_attempted"][0]["pass"], "fast");
    }

    #[test]
    fn failed_report_is_exhausted() {
        let report = ExtractionReport::failed(ErrorCode::OcrFailed);
        assert!(report.state.is_terminal());
        assert_eq!(report.marker, "TSH");
        assert!(report.passes_attempted.is_empty());
    }
}
