use super::candidates::FieldCandidate;
use super::rules::LabelStrength;
use super::scoring::is_consistent;
use crate::config::ExtractionConfig;
use crate::models::{Confidence, ParsedField};

/// Categorical confidence of a plausible candidate.
///
/// High needs the strong label plus a consistent interval. Any other
/// corroboration (a unit or an interval) gives medium; none gives low.
pub fn estimate(candidate: &FieldCandidate, config: &ExtractionConfig) -> Confidence {
    let consistent = is_consistent(candidate, config.consistency_margin_ratio);

    if candidate.label_strength == LabelStrength::Strong && candidate.has_interval() && consistent {
        Confidence::High
    } else if candidate.unit.is_some() || candidate.has_interval() {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Promote the selected candidate to the final result.
pub fn promote(candidate: &FieldCandidate, config: &ExtractionConfig) -> ParsedField {
    ParsedField::found(
        candidate.value,
        candidate.unit.clone(),
        candidate.interval,
        estimate(candidate, config),
    )
}
