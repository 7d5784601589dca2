//! Declarative match rules for the target field.
//!
//! One table of label synonyms, one unit-pattern set and one interval
//! separator set. All patterns run against normalized text (lower-case,
//! no diacritics, single spaces), so they never need case or accent folding.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker reported alongside every extraction.
pub const FIELD_MARKER: &str = "TSH";

/// How a candidate was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Label found in text, value scanned forward from it.
    LabelAnchored,
    /// No usable label; value is the number right before a unit.
    UnitAnchored,
    /// Label line rebuilt from word boxes; value from its first numeric column.
    SpatialColumn,
}

/// How well the matched label identifies the target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelStrength {
    /// The expected label or one of its recognized synonyms.
    Strong,
    /// A variant or OCR-damaged form of the label.
    Partial,
    /// No label at all (unit-anchored fallback).
    Absent,
}

impl LabelStrength {
    /// Rank used by the scorer; lower is better.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Strong => 0,
            Self::Partial => 1,
            Self::Absent => 2,
        }
    }
}

/// A label occurrence in normalized text (byte offsets).
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub strength: LabelStrength,
    /// Names a variant assay (macro-TSH), not the field itself.
    pub variant: bool,
}

/// A unit occurrence in normalized text (byte offsets) with its canonical spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMatch {
    pub start: usize,
    pub end: usize,
    pub canonical: &'static str,
}

// ═══════════════════════════════════════════════════════════
// Labels
// ═══════════════════════════════════════════════════════════

struct LabelRule {
    regex: Regex,
    strength: LabelStrength,
    variant: bool,
}

fn label(regex_str: &str, strength: LabelStrength) -> LabelRule {
    LabelRule {
        regex: Regex::new(regex_str).expect("Invalid label regex pattern"),
        strength,
        variant: false,
    }
}

/// A related assay whose value is reported under its own label.
fn variant_label(regex_str: &str) -> LabelRule {
    LabelRule {
        variant: true,
        ..label(regex_str, LabelStrength::Partial)
    }
}

static LABEL_RULES: LazyLock<Vec<LabelRule>> = LazyLock::new(|| {
    vec![
        // tsh, t.s.h, t . s . h, t-s-h, with the usual assay suffixes
        label(
            r"\bt\s?[.\-]?\s?s\s?[.\-]?\s?h\b(?:\s?[-(]?\s?(?:us|ultra\s?-?\s?sensible|3\s?(?:e|eme|g)(?:\s?generation)?)\b\)?)?",
            LabelStrength::Strong,
        ),
        label(r"\bthyr[eo]ostimuline\b", LabelStrength::Strong),
        label(r"\bthyrotropine?\b", LabelStrength::Strong),
        label(r"\bhormone\s?thyreotrope\b", LabelStrength::Strong),
        label(r"\bthyroid\s?-?\s?stimulating\s?hormone\b", LabelStrength::Strong),
        variant_label(r"\bmacro\s?-?\s?tsh\b"),
        // s read as 5, t read as 7
        label(r"\b(?:7\s?[s5]|t\s?5)\s?h\b", LabelStrength::Partial),
    ]
});

/// Full names eligible for fuzzy matching against OCR-damaged words.
const FUZZY_NAMES: &[&str] = &["thyreostimuline", "thyroostimuline", "thyrotropine", "thyrotropin"];

/// Words shorter than this are never fuzzy-matched.
const FUZZY_MIN_LEN: usize = 8;

/// Maximum edit distance for a fuzzy full-name match.
const FUZZY_MAX_DISTANCE: u32 = 2;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]+").expect("Invalid word regex"));

/// Every label occurrence in `text`, in text order, without overlaps.
///
/// Overlapping matches resolve to the earliest start, then the longest
/// span, then the stronger label. A `tsh` inside `macro-tsh` is therefore
/// swallowed by the variant and never counts as a strong label.
pub fn find_labels(text: &str) -> Vec<LabelMatch> {
    let mut found: Vec<LabelMatch> = Vec::new();

    for rule in LABEL_RULES.iter() {
        for m in rule.regex.find_iter(text) {
            found.push(LabelMatch {
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_string(),
                strength: rule.strength,
                variant: rule.variant,
            });
        }
    }

    for m in WORD_RE.find_iter(text) {
        let word = m.as_str();
        if word.len() < FUZZY_MIN_LEN {
            continue;
        }
        let close = FUZZY_NAMES.iter().any(|name| {
            let d = edit_distance(word, name);
            d > 0 && d <= FUZZY_MAX_DISTANCE
        });
        if close {
            found.push(LabelMatch {
                start: m.start(),
                end: m.end(),
                text: word.to_string(),
                strength: LabelStrength::Partial,
                variant: false,
            });
        }
    }

    found.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
            .then(a.strength.cmp(&b.strength))
    });

    let mut kept: Vec<LabelMatch> = Vec::new();
    for m in found {
        if kept.last().map_or(true, |last| m.start >= last.end) {
            kept.push(m);
        }
    }
    kept
}

/// Levenshtein distance between two strings (character-level).
pub fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 { return n as u32; }
    if n == 0 { return m as u32; }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = if a_ch == b_ch { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

// ═══════════════════════════════════════════════════════════
// Units
// ═══════════════════════════════════════════════════════════

struct UnitRule {
    regex: Regex,
    canonical: &'static str,
}

fn unit(regex_str: &str, canonical: &'static str) -> UnitRule {
    UnitRule {
        regex: Regex::new(regex_str).expect("Invalid unit regex pattern"),
        canonical,
    }
}

// `i` is often read as `l` or `1`; micro is often read as `u`.
static UNIT_RULES: LazyLock<Vec<UnitRule>> = LazyLock::new(|| {
    vec![
        unit(r"m\s?u\s?[il1]\s?/\s?m\s?l\b", "mUI/mL"),
        unit(r"m\s?[il1]\s?u\s?/\s?m\s?l\b", "mIU/mL"),
        unit(r"m\s?u\s?[il1]\s?/\s?l\b", "mUI/L"),
        unit(r"m\s?[il1]\s?u\s?/\s?l\b", "mIU/L"),
        unit(r"[µu]\s?u\s?[il1]\s?/\s?m\s?l\b", "µUI/mL"),
        unit(r"[µu]\s?[il1]\s?u\s?/\s?m\s?l\b", "µIU/mL"),
        unit(r"[µu]\s?u\s?[il1]\s?/\s?l\b", "µUI/L"),
        unit(r"\bu\s?[il1]\s?/\s?l\b", "UI/L"),
    ]
});

/// Every unit occurrence in `text`, in text order, without overlaps
/// (earliest start, then longest span).
pub fn find_units(text: &str) -> Vec<UnitMatch> {
    let mut found: Vec<UnitMatch> = UNIT_RULES
        .iter()
        .flat_map(|rule| {
            rule.regex.find_iter(text).map(move |m| UnitMatch {
                start: m.start(),
                end: m.end(),
                canonical: rule.canonical,
            })
        })
        .collect();

    found.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
    });

    let mut kept: Vec<UnitMatch> = Vec::new();
    for m in found {
        if kept.last().map_or(true, |last| m.start >= last.end) {
            kept.push(m);
        }
    }
    kept
}

// ═══════════════════════════════════════════════════════════
// Interval separators
// ═══════════════════════════════════════════════════════════

static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-\u{2010}-\u{2015}\u{2212}~_;]+|to|and|a|et|au)$")
        .expect("Invalid separator regex")
});

/// True when the text between two numbers reads as an interval separator.
pub fn is_interval_separator(between: &str) -> bool {
    SEPARATOR_RE.is_match(between.trim())
}
