use serde::Serialize;

use super::candidates::FieldCandidate;
use super::rules::MatchStrategy;
use crate::config::{ExtractionConfig, PlausibilityBounds};

/// Lexicographic ranking key for a candidate; lower sorts first.
///
/// Field order is the ranking order: interval presence dominates label
/// strength, which dominates value/interval consistency. Remaining ties go
/// to candidates read from the raw text over those read from the word-box
/// layout, then to the earliest position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CandidateScore {
    /// 0 when both reference bounds are present.
    pub interval: u8,
    /// 0 strong label, 1 partial label, 2 no label.
    pub label: u8,
    /// 0 when the value sits within the interval plus margin.
    pub consistency: u8,
    /// 0 raw text, 1 word-box layout. Positions only compare within one source.
    pub source: u8,
    pub position: usize,
}

/// Value inside the absolute physiological bound.
pub fn is_plausible(candidate: &FieldCandidate, bounds: &PlausibilityBounds) -> bool {
    bounds.contains(candidate.value)
}

/// Value within `[ref_min - margin, ref_max + margin]`, where the margin is
/// `margin_ratio` times the interval width. False without an interval.
pub fn is_consistent(candidate: &FieldCandidate, margin_ratio: f64) -> bool {
    match candidate.interval {
        Some((lo, hi)) => {
            let margin = margin_ratio * (hi - lo);
            candidate.value >= lo - margin && candidate.value <= hi + margin
        }
        None => false,
    }
}

/// Score a candidate. Implausible values are rejected outright.
pub fn score(candidate: &FieldCandidate, config: &ExtractionConfig) -> Option<CandidateScore> {
    if !is_plausible(candidate, &config.plausibility) {
        return None;
    }
    Some(CandidateScore {
        interval: if candidate.has_interval() { 0 } else { 1 },
        label: candidate.label_strength.rank(),
        consistency: if is_consistent(candidate, config.consistency_margin_ratio) { 0 } else { 1 },
        source: match candidate.strategy {
            MatchStrategy::SpatialColumn => 1,
            _ => 0,
        },
        position: candidate.position,
    })
}

/// Index of the lowest-scoring plausible candidate, with its score. Among
/// equal scores the one listed first wins, so strategy order is the final
/// tie-breaker.
pub fn select_best(
    candidates: &[FieldCandidate],
    config: &ExtractionConfig,
) -> Option<(usize, CandidateScore)> {
    let best = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| score(c, config).map(|s| (i, s)))
        .min_by_key(|(_, s)| *s);

    if best.is_none() && !candidates.is_empty() {
        tracing::debug!(
            candidates = candidates.len(),
            "All candidates rejected as implausible"
        );
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parsing::rules::LabelStrength;

    fn candidate(value: f64, strength: LabelStrength, interval: Option<(f64, f64)>, position: usize) -> FieldCandidate {
        FieldCandidate {
            strategy: MatchStrategy::LabelAnchored,
            label: Some("tsh".into()),
            label_strength: strength,
            variant: false,
            position,
            value,
            unit: None,
            interval,
            snippet: String::new(),
            column: None,
        }
    }

    #[test]
    fn interval_dominates_label() {
        let config = ExtractionConfig::default();
        let cands = vec![
            candidate(2.0, LabelStrength::Strong, None, 0),
            candidate(2.1, LabelStrength::Partial, Some((0.4, 4.0)), 50),
        ];
        let (i, s) = select_best(&cands, &config).unwrap();
        let best = &cands[i];
        assert!((best.value - 2.1).abs() < 1e-9);
        assert_eq!(s.interval, 0);
        assert_eq!(s.label, 1);
    }

    #[test]
    fn label_dominates_consistency() {
        let config = ExtractionConfig::default();
        let cands = vec![
            candidate(2.0, LabelStrength::Partial, Some((0.4, 4.0)), 0),
            candidate(90.0, LabelStrength::Strong, Some((0.4, 4.0)), 50),
        ];
        let (i, _) = select_best(&cands, &config).unwrap();
        let best = &cands[i];
        assert!((best.value - 90.0).abs() < 1e-9);
    }

    #[test]
    fn consistency_breaks_label_ties() {
        let config = ExtractionConfig::default();
        let cands = vec![
            candidate(90.0, LabelStrength::Strong, Some((0.4, 4.0)), 0),
            candidate(2.0, LabelStrength::Strong, Some((0.4, 4.0)), 50),
        ];
        let (i, s) = select_best(&cands, &config).unwrap();
        let best = &cands[i];
        assert!((best.value - 2.0).abs() < 1e-9);
        assert_eq!(s.consistency, 0);
    }

    #[test]
    fn earliest_position_breaks_full_ties() {
        let config = ExtractionConfig::default();
        let cands = vec![
            candidate(3.0, LabelStrength::Strong, None, 40),
            candidate(2.0, LabelStrength::Strong, None, 10),
        ];
        let (i, _) = select_best(&cands, &config).unwrap();
        let best = &cands[i];
        assert_eq!(best.position, 10);
    }

    #[test]
    fn text_source_wins_over_layout_offsets() {
        let config = ExtractionConfig::default();
        // layout offset 5 is smaller but lives in a different coordinate space
        let mut spatial = candidate(2.5, LabelStrength::Strong, None, 5);
        spatial.strategy = MatchStrategy::SpatialColumn;
        let cands = vec![spatial, candidate(2.0, LabelStrength::Strong, None, 40)];
        let (i, s) = select_best(&cands, &config).unwrap();
        assert_eq!(i, 1);
        assert_eq!(s.source, 0);
    }

    #[test]
    fn implausible_values_rejected() {
        let config = ExtractionConfig::default();
        assert!(score(&candidate(187.0, LabelStrength::Strong, None, 0), &config).is_none());
        assert!(score(&candidate(-1.0, LabelStrength::Strong, None, 0), &config).is_none());
        let cands = vec![candidate(187.0, LabelStrength::Strong, None, 0)];
        assert!(select_best(&cands, &config).is_none());
    }

    #[test]
    fn ceiling_is_configurable() {
        let mut config = ExtractionConfig::default();
        config.plausibility.max = 500.0;
        let cands = vec![candidate(187.0, LabelStrength::Strong, None, 0)];
        assert!(select_best(&cands, &config).is_some());
    }

    #[test]
    fn consistency_margin_scales_with_width() {
        // width 3.6, margin 7.2: accepted up to 11.2
        let c = candidate(11.0, LabelStrength::Strong, Some((0.4, 4.0)), 0);
        assert!(is_consistent(&c, 2.0));
        let c = candidate(11.5, LabelStrength::Strong, Some((0.4, 4.0)), 0);
        assert!(!is_consistent(&c, 2.0));
        let c = candidate(3.0, LabelStrength::Strong, None, 0);
        assert!(!is_consistent(&c, 2.0));
    }

    #[test]
    fn empty_set_selects_nothing() {
        assert!(select_best(&[], &ExtractionConfig::default()).is_none());
    }
}
