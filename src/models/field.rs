use serde::{Deserialize, Serialize};

use super::enums::{Confidence, ErrorCode};

/// Final extraction result for the target field.
///
/// Either a success (`ok`, `value` and `confidence` set, `error` empty) or a
/// structured failure (`error` set, everything else empty). Built only through
/// [`ParsedField::found`] and [`ParsedField::failed`] so the two never mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedField {
    pub ok: bool,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub ref_min: Option<f64>,
    pub ref_max: Option<f64>,
    pub confidence: Option<Confidence>,
    pub error: Option<ErrorCode>,
}

impl ParsedField {
    /// Successful extraction. An interval is kept only when both bounds are
    /// present and strictly ordered.
    pub fn found(
        value: f64,
        unit: Option<String>,
        interval: Option<(f64, f64)>,
        confidence: Confidence,
    ) -> Self {
        let (ref_min, ref_max) = match interval {
            Some((lo, hi)) if lo < hi => (Some(lo), Some(hi)),
            _ => (None, None),
        };
        Self {
            ok: true,
            value: Some(value),
            unit,
            ref_min,
            ref_max,
            confidence: Some(confidence),
            error: None,
        }
    }

    pub fn failed(code: ErrorCode) -> Self {
        Self {
            ok: false,
            value: None,
            unit: None,
            ref_min: None,
            ref_max: None,
            confidence: None,
            error: Some(code),
        }
    }

    pub fn has_interval(&self) -> bool {
        self.ref_min.is_some() && self.ref_max.is_some()
    }

    /// Confidence as a float in `[0, 1]`; failures score 0.
    pub fn confidence_score(&self) -> f32 {
        self.confidence.map(|c| c.score()).unwrap_or(0.0)
    }
}
