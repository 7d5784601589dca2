use serde::Serialize;

use super::numbers::{first_interval, parse_standalone, scan_numbers, NumberToken};
use super::rules::{find_labels, find_units, LabelStrength, MatchStrategy, UnitMatch};
use super::spatial::{column_centers, nearest_column, Layout};
use crate::config::ExtractionConfig;

/// One hypothesis for the target field, built within a single extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCandidate {
    pub strategy: MatchStrategy,
    /// Matched label text (normalized), absent for unit-anchored candidates.
    pub label: Option<String>,
    pub label_strength: LabelStrength,
    /// Label names a variant assay; only used when no genuine label matched.
    pub variant: bool,
    /// Byte offset of the match in the text it was found in.
    pub position: usize,
    pub value: f64,
    /// Canonical unit spelling.
    pub unit: Option<String>,
    /// `(ref_min, ref_max)`, already repaired and ordered.
    pub interval: Option<(f64, f64)>,
    /// Text the candidate was read from.
    pub snippet: String,
    /// Numeric column of the value (spatial candidates only).
    pub column: Option<usize>,
}

impl FieldCandidate {
    pub fn has_interval(&self) -> bool {
        self.interval.is_some()
    }
}

/// Runs the three match strategies over normalized text.
pub struct CandidateExtractor<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> CandidateExtractor<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    /// Label-anchored strategy.
    ///
    /// For each label, the scan window runs `label_window_chars` past the
    /// label, stopping early at the next label so neighbours never share
    /// numbers. The first number in the window that is not a bound of a
    /// `min <sep> max` pair is the value. The earliest unit and the first
    /// interval after it, on the value's own line, complete the candidate.
    pub fn label_anchored(&self, text: &str) -> Vec<FieldCandidate> {
        let labels = find_labels(text);
        if labels.is_empty() {
            return Vec::new();
        }
        let numbers = scan_numbers(text);
        let units = find_units(text);

        let mut out = Vec::new();
        for (i, label) in labels.iter().enumerate() {
            let next_label = labels.get(i + 1).map_or(text.len(), |l| l.start);
            let window_end = advance_chars(text, label.end, self.config.label_window_chars)
                .min(next_label);

            let Some(idx) = (0..numbers.len()).find(|&i| {
                numbers[i].start >= label.end
                    && numbers[i].start < window_end
                    && !opens_interval(text, &numbers, i)
                    && !closes_interval(text, &numbers, i)
            }) else {
                continue;
            };
            let value = &numbers[idx];

            let rest_end = window_end.min(line_end(text, value.end)).max(value.end);
            out.push(FieldCandidate {
                strategy: MatchStrategy::LabelAnchored,
                label: Some(label.text.clone()),
                label_strength: label.strength,
                variant: label.variant,
                position: label.start,
                value: value.value,
                unit: unit_between(&units, value.end, rest_end),
                interval: self.interval_between(text, &numbers, value.end, rest_end),
                snippet: text[label.start..rest_end].to_string(),
                column: None,
            });
        }
        out
    }

    /// Unit-anchored fallback: the number right before a unit is the value.
    ///
    /// A number that closes an interval (`0,4 - 4,0 mui/l`) is the interval's
    /// upper bound, not a value, and is skipped.
    pub fn unit_anchored(&self, text: &str) -> Vec<FieldCandidate> {
        let units = find_units(text);
        if units.is_empty() {
            return Vec::new();
        }
        let numbers = scan_numbers(text);

        let mut out = Vec::new();
        for unit in &units {
            let Some(idx) = numbers
                .iter()
                .rposition(|n| n.end <= unit.start && text[n.end..unit.start].trim().is_empty())
            else {
                continue;
            };
            if closes_interval(text, &numbers, idx) {
                continue;
            }

            let value = &numbers[idx];
            let rest_end = advance_chars(text, unit.end, self.config.label_window_chars)
                .min(line_end(text, unit.end));
            out.push(FieldCandidate {
                strategy: MatchStrategy::UnitAnchored,
                label: None,
                label_strength: LabelStrength::Absent,
                variant: false,
                position: value.start,
                value: value.value,
                unit: Some(unit.canonical.to_string()),
                interval: self.interval_between(text, &numbers, unit.end, rest_end),
                snippet: text[value.start..rest_end].to_string(),
                column: None,
            });
        }
        out
    }

    /// Spatial strategy over word boxes.
    ///
    /// On each label line, numeric words after the label are mapped to
    /// page-wide columns; the leftmost column holds the current value,
    /// later ones are earlier visits. Unit and interval come from the rest
    /// of the line.
    pub fn spatial(&self, layout: &Layout) -> Vec<FieldCandidate> {
        if layout.is_empty() {
            return Vec::new();
        }
        let text = layout.text.as_str();
        let labels = find_labels(text);
        if labels.is_empty() {
            return Vec::new();
        }
        let centers = column_centers(layout, self.config.layout.column_tolerance_px);
        let numbers = scan_numbers(text);
        let units = find_units(text);

        let mut out = Vec::new();
        for label in &labels {
            let Some(line) = layout.line_at(label.start) else {
                continue;
            };

            let best = line
                .words
                .iter()
                .filter(|w| w.start >= label.end)
                .filter_map(|w| {
                    let value = parse_standalone(&w.text)?;
                    let column = nearest_column(w.left, &centers)?;
                    Some((column, w, value))
                })
                .min_by_key(|(column, w, _)| (*column, w.left));

            let Some((column, word, value)) = best else {
                continue;
            };

            tracing::debug!(
                column,
                columns = centers.len(),
                value,
                "Spatial value column selected"
            );

            out.push(FieldCandidate {
                strategy: MatchStrategy::SpatialColumn,
                label: Some(label.text.clone()),
                label_strength: label.strength,
                variant: label.variant,
                position: label.start,
                value,
                unit: unit_between(&units, word.end, line.end),
                interval: self.interval_between(text, &numbers, word.end, line.end),
                snippet: text[line.start..line.end].to_string(),
                column: Some(column),
            });
        }
        out
    }

    fn interval_between(
        &self,
        text: &str,
        numbers: &[NumberToken],
        from: usize,
        to: usize,
    ) -> Option<(f64, f64)> {
        let lo = numbers.partition_point(|n| n.start < from);
        let hi = numbers.partition_point(|n| n.end <= to);
        if lo >= hi {
            return None;
        }
        first_interval(
            text,
            &numbers[lo..hi],
            &self.config.bound_rescale,
            &self.config.plausibility,
        )
        .map(|i| (i.ref_min, i.ref_max))
    }
}

/// Canonical spelling of the first unit fully inside `[from, to)`.
fn unit_between(units: &[UnitMatch], from: usize, to: usize) -> Option<String> {
    units
        .iter()
        .find(|u| u.start >= from && u.end <= to)
        .map(|u| u.canonical.to_string())
}

/// True when `numbers[idx]` is the second number of a `min <sep> max` pair.
fn closes_interval(text: &str, numbers: &[NumberToken], idx: usize) -> bool {
    idx > 0 && super::rules::is_interval_separator(&text[numbers[idx - 1].end..numbers[idx].start])
}

/// True when `numbers[idx]` is the first number of a `min <sep> max` pair.
fn opens_interval(text: &str, numbers: &[NumberToken], idx: usize) -> bool {
    idx + 1 < numbers.len() && closes_interval(text, numbers, idx + 1)
}

/// Byte offset of the end of the line holding `pos`.
fn line_end(text: &str, pos: usize) -> usize {
    text[pos..].find('\n').map_or(text.len(), |i| pos + i)
}

/// Byte offset `chars` characters past `from`, clamped to the text end.
fn advance_chars(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(i, _)| from + i)
}
