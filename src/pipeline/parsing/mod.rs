pub mod normalize;
pub mod rules;
pub mod numbers;
pub mod spatial;
pub mod candidates;
pub mod scoring;
pub mod confidence;

pub use candidates::*;
pub use normalize::normalize_text;
pub use rules::{LabelStrength, MatchStrategy, FIELD_MARKER};
pub use scoring::CandidateScore;

use crate::config::ExtractionConfig;
use crate::models::{ErrorCode, ParsedField};
use crate::pipeline::ocr::OcrResult;

/// Outcome of parsing one OCR result: every candidate plus the selection.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub candidates: Vec<FieldCandidate>,
    /// Index into `candidates` of the selected one, with its score.
    pub best: Option<(usize, CandidateScore)>,
    /// True when neither text nor word boxes carried anything.
    pub empty_input: bool,
}

impl ParseOutcome {
    pub fn best_candidate(&self) -> Option<&FieldCandidate> {
        self.best.map(|(i, _)| &self.candidates[i])
    }

    pub fn best_score(&self) -> Option<CandidateScore> {
        self.best.map(|(_, s)| s)
    }

    pub fn has_interval(&self) -> bool {
        self.best_candidate().is_some_and(|c| c.has_interval())
    }
}

/// Text (and word boxes) in, one parsed field out.
pub struct FieldParser<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> FieldParser<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    /// Every candidate in `result`.
    ///
    /// Label-anchored and spatial candidates are combined. Variant labels
    /// (macro-TSH) are dropped once a genuine label yields a plausible value.
    /// The unit-anchored fallback only runs when nothing plausible is left.
    pub fn candidates(&self, result: &OcrResult) -> Vec<FieldCandidate> {
        let text = normalize_text(&result.raw_text);
        let extractor = CandidateExtractor::new(self.config);

        let mut found = extractor.label_anchored(&text);

        if !result.tokens.is_empty() {
            let layout =
                spatial::build_layout(&result.tokens, self.config.layout.line_tolerance_px);
            found.extend(extractor.spatial(&layout));
        }

        let genuine = found.iter().any(|c| {
            c.label_strength == LabelStrength::Strong
                && scoring::is_plausible(c, &self.config.plausibility)
        });
        if genuine {
            found.retain(|c| !c.variant);
        }

        let any_plausible = found
            .iter()
            .any(|c| scoring::is_plausible(c, &self.config.plausibility));
        if !any_plausible {
            found.extend(extractor.unit_anchored(&text));
        }

        tracing::debug!(
            candidates = found.len(),
            text_length = text.len(),
            tokens = result.tokens.len(),
            "Candidates extracted"
        );
        found
    }

    /// Extract and select without promoting, for the escalation controller.
    pub fn analyze(&self, result: &OcrResult) -> ParseOutcome {
        let empty_input =
            normalize_text(&result.raw_text).trim().is_empty() && result.tokens.is_empty();
        if empty_input {
            return ParseOutcome {
                candidates: Vec::new(),
                best: None,
                empty_input,
            };
        }

        let candidates = self.candidates(result);
        let best = scoring::select_best(&candidates, self.config);

        ParseOutcome {
            candidates,
            best,
            empty_input,
        }
    }

    /// Final result for one OCR output.
    pub fn parse(&self, result: &OcrResult) -> ParsedField {
        self.finish(&self.analyze(result))
    }

    /// Final result for plain text (no word boxes).
    pub fn parse_text(&self, text: &str) -> ParsedField {
        self.parse(&OcrResult::text_only(text))
    }

    /// Promote an outcome's selection, or report why there is none.
    pub fn finish(&self, outcome: &ParseOutcome) -> ParsedField {
        if outcome.empty_input {
            return ParsedField::failed(ErrorCode::EmptyText);
        }
        match outcome.best_candidate() {
            Some(best) => confidence::promote(best, self.config),
            None => ParsedField::failed(ErrorCode::FieldNotFound),
        }
    }
}
