// Line and column reconstruction from positioned OCR words.
// Lab reports are tables: one analyte per row, and several value columns
// when earlier visits are printed next to the current one. Words are grouped
// into rows by vertical proximity and numeric words into columns by
// horizontal proximity, so the current-value column can be told apart.

use super::normalize::normalize_text;
use super::numbers::parse_standalone;
use crate::pipeline::ocr::OcrToken;

/// A word placed in the layout text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedWord {
    /// Normalized word text.
    pub text: String,
    pub left: u32,
    /// Byte span in [`Layout::text`].
    pub start: usize,
    pub end: usize,
}

/// One reconstructed text line.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    /// Top of the first word assigned to the line.
    pub top: u32,
    pub words: Vec<PlacedWord>,
    /// Byte span in [`Layout::text`].
    pub start: usize,
    pub end: usize,
}

/// Normalized text rebuilt from word boxes, one line per row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layout {
    pub text: String,
    pub lines: Vec<LayoutLine>,
}

impl Layout {
    /// Line holding the byte offset `pos`, if any.
    pub fn line_at(&self, pos: usize) -> Option<&LayoutLine> {
        self.lines.iter().find(|l| pos >= l.start && pos < l.end)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Group tokens into lines and lay them out as normalized text.
///
/// A token joins the first line whose anchor top lies within
/// `line_tolerance` pixels; otherwise it starts a new line. Words are
/// ordered left to right, lines top to bottom.
pub fn build_layout(tokens: &[OcrToken], line_tolerance: u32) -> Layout {
    let mut rows: Vec<(u32, Vec<(u32, String)>)> = Vec::new();

    for token in tokens {
        let text = normalize_text(&token.text.replace('\n', " "));
        if text.is_empty() {
            continue;
        }
        let top = token.top();
        match rows
            .iter_mut()
            .find(|(anchor, _)| anchor.abs_diff(top) <= line_tolerance)
        {
            Some((_, words)) => words.push((token.left(), text)),
            None => rows.push((top, vec![(token.left(), text)])),
        }
    }

    for (_, words) in rows.iter_mut() {
        words.sort_by_key(|(left, _)| *left);
    }
    rows.sort_by_key(|(top, _)| *top);

    let mut layout = Layout::default();
    for (top, words) in rows {
        if !layout.text.is_empty() {
            layout.text.push('\n');
        }
        let line_start = layout.text.len();
        let mut placed = Vec::with_capacity(words.len());
        for (i, (left, text)) in words.into_iter().enumerate() {
            if i > 0 {
                layout.text.push(' ');
            }
            let start = layout.text.len();
            layout.text.push_str(&text);
            placed.push(PlacedWord {
                text,
                left,
                start,
                end: layout.text.len(),
            });
        }
        layout.lines.push(LayoutLine {
            top,
            words: placed,
            start: line_start,
            end: layout.text.len(),
        });
    }

    layout
}

/// Column centers of all numeric words, left to right.
///
/// Sorted left edges are split wherever the gap to the previous edge
/// reaches `column_tolerance`; each cluster's mean is a column center.
pub fn column_centers(layout: &Layout, column_tolerance: u32) -> Vec<f64> {
    let mut xs: Vec<u32> = layout
        .lines
        .iter()
        .flat_map(|l| l.words.iter())
        .filter(|w| parse_standalone(&w.text).is_some())
        .map(|w| w.left)
        .collect();

    xs.sort_unstable();

    let mut clusters: Vec<Vec<u32>> = Vec::new();
    for x in xs {
        match clusters.last_mut() {
            Some(last) if last.last().is_some_and(|&prev| x - prev < column_tolerance) => {
                last.push(x)
            }
            _ => clusters.push(vec![x]),
        }
    }

    clusters
        .iter()
        .map(|c| c.iter().map(|&x| x as f64).sum::<f64>() / c.len() as f64)
        .collect()
}

/// Index of the column center nearest to `left`.
pub fn nearest_column(left: u32, centers: &[f64]) -> Option<usize> {
    centers
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (left as f64 - **a).abs();
            let db = (left as f64 - **b).abs();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
}
