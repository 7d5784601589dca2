use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize raw OCR text before any pattern matching.
///
/// Lower-cases, strips diacritics (NFD, then combining marks dropped),
/// folds the Greek mu onto the micro sign, removes control characters and
/// collapses whitespace runs inside each line to one space. Line breaks are
/// preserved (`\r\n` and `\r` become `\n`). Idempotent.
pub fn normalize_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let folded: String = unified
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter_map(|c| match c {
            '\n' => Some('\n'),
            '\t' => Some(' '),
            '\u{03BC}' => Some('\u{00B5}'),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    folded
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}
