//! Numeric tokens in normalized OCR text.
//!
//! OCR routinely reads `0` as `o` and `1` as `l`, `i` or `|`, and drops
//! decimal separators from reference bounds. Scanning repairs the first kind
//! of damage in place; [`rescale_bound`] approximates a fix for the second.

use std::sync::LazyLock;

use regex::Regex;

use super::rules::is_interval_separator;
use crate::config::{BoundRescale, PlausibilityBounds};

/// Digits plus the letters OCR substitutes for them, with an optional decimal part.
static NUMBER_RUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9oil|]+(?:[.,][0-9oil|]+)?").expect("Invalid number regex")
});

static STRICT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(?:[.,][0-9]+)?").expect("Invalid number regex"));

/// A number found in text (byte offsets into the scanned text).
#[derive(Debug, Clone, PartialEq)]
pub struct NumberToken {
    pub start: usize,
    pub end: usize,
    pub value: f64,
    /// Digit count when the token has no decimal part (rescaling input).
    pub integer_digits: Option<usize>,
    /// True when letters were read back as digits.
    pub repaired: bool,
}

/// All numbers in `text`, in order.
///
/// A run of digits is rejected when glued to a letter on its left (`t4`,
/// `b12`), so label fragments never turn into values. Runs holding repaired
/// letters must stand alone on both sides; if they don't, their strict digit
/// prefix is kept instead (`4.00iu/l` yields `4.00`). Table borders (`|`)
/// at either end of a run are never part of the number.
pub fn scan_numbers(text: &str) -> Vec<NumberToken> {
    let mut out = Vec::new();

    for m in NUMBER_RUN_RE.find_iter(text) {
        let Some((start, run)) = strip_borders(m.start(), m.as_str()) else {
            continue;
        };
        let end = start + run.len();
        if !run.bytes().any(|b| b.is_ascii_digit()) {
            continue;
        }
        if glued_before(text, start) {
            continue;
        }

        let has_letters = run.bytes().any(|b| matches!(b, b'o' | b'i' | b'l' | b'|'));
        let (raw, repaired) = if has_letters && glued_after(text, end) {
            match STRICT_PREFIX_RE.find(run) {
                Some(prefix) => (prefix.as_str(), false),
                None => continue,
            }
        } else {
            (run, has_letters)
        };

        if let Some(token) = parse_token(raw, start, repaired) {
            out.push(token);
        }
    }

    out
}

/// Drop `|` table borders from a run. A `|` survives only between two real
/// digits (`1|5` is `115`); the run is cut at any other one. Returns the new
/// start offset and the remaining run, or `None` when nothing is left.
fn strip_borders(start: usize, run: &str) -> Option<(usize, &str)> {
    let trimmed = run.trim_start_matches('|');
    let start = start + (run.len() - trimmed.len());
    let trimmed = trimmed.trim_end_matches('|');

    let bytes = trimmed.as_bytes();
    let cut = (0..bytes.len())
        .find(|&i| {
            bytes[i] == b'|'
                && !(i > 0
                    && bytes[i - 1].is_ascii_digit()
                    && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()))
        })
        .unwrap_or(bytes.len());

    let kept = trimmed[..cut].trim_end_matches(|c| c == ',' || c == '.');
    if kept.is_empty() {
        None
    } else {
        Some((start, kept))
    }
}

fn glued_before(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphabetic())
}

fn glued_after(text: &str, end: usize) -> bool {
    text[end..].chars().next().is_some_and(|c| c.is_alphabetic())
}

fn parse_token(raw: &str, start: usize, repaired: bool) -> Option<NumberToken> {
    let digits: String = raw
        .chars()
        .map(|c| match c {
            'o' => '0',
            'i' | 'l' | '|' => '1',
            ',' => '.',
            c => c,
        })
        .collect();

    // A repaired token must start with a real digit ("l0" is more often a word).
    if repaired && !raw.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let value: f64 = digits.parse().ok()?;
    let integer_digits = if digits.contains('.') {
        None
    } else {
        Some(digits.len())
    };

    Some(NumberToken {
        start,
        end: start + raw.len(),
        value,
        integer_digits,
        repaired,
    })
}

/// Parse a whole string as exactly one number, ignoring surrounding brackets
/// and trailing punctuation. Used for word tokens from positioned OCR.
pub fn parse_standalone(text: &str) -> Option<f64> {
    let trimmed = text.trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']' | '*' | ':' | ';'));
    let tokens = scan_numbers(trimmed);
    match tokens.as_slice() {
        [only] if only.start == 0 && only.end == trimmed.len() => Some(only.value),
        _ => None,
    }
}

/// Undo a lost decimal separator on an integer-only reference bound.
///
/// The rule with the most digits not above the token's digit count applies.
/// Deliberately approximate: "150" becomes 1.5 just like "494" becomes 4.94.
pub fn rescale_bound(token: &NumberToken, rescale: &BoundRescale) -> f64 {
    if !rescale.enabled {
        return token.value;
    }
    let Some(digits) = token.integer_digits else {
        return token.value;
    };

    rescale
        .rules
        .iter()
        .filter(|r| r.min_digits <= digits)
        .max_by_key(|r| r.min_digits)
        .map(|r| token.value / r.divisor)
        .unwrap_or(token.value)
}

/// First `min <separator> max` pair among `numbers`, repaired and ordered.
///
/// Only consecutive numbers with a separator between them count. Bounds are
/// rescaled, sorted ascending, and the pair must then satisfy
/// `bounds.min <= ref_min < ref_max <= bounds.max`; pairs that don't are skipped.
pub fn first_interval(
    text: &str,
    numbers: &[NumberToken],
    rescale: &BoundRescale,
    bounds: &PlausibilityBounds,
) -> Option<IntervalMatch> {
    numbers.windows(2).find_map(|pair| {
        let (a, b) = (&pair[0], &pair[1]);
        if !is_interval_separator(&text[a.end..b.start]) {
            return None;
        }

        let x = rescale_bound(a, rescale);
        let y = rescale_bound(b, rescale);
        let (lo, hi) = if x <= y { (x, y) } else { (y, x) };

        if lo >= bounds.min && lo < hi && hi <= bounds.max {
            Some(IntervalMatch {
                start: a.start,
                end: b.end,
                ref_min: lo,
                ref_max: hi,
            })
        } else {
            None
        }
    })
}

/// A reference interval found in text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalMatch {
    pub start: usize,
    pub end: usize,
    pub ref_min: f64,
    pub ref_max: f64,
}
