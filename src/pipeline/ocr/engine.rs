use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::types::{OcrEngine, OcrToken};
use super::OcrError;

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
    /// Page segmentation mode; 6 = single uniform block, the lab-report layout.
    page_seg_mode: u8,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory containing at least `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, OcrError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(OcrError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        if !tessdata_dir.join("fra.traineddata").exists() {
            tracing::warn!(
                "No French traineddata found at {}, French reports will OCR poorly",
                tessdata_dir.display()
            );
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            page_seg_mode: 6,
        })
    }

    pub fn with_page_seg_mode(mut self, psm: u8) -> Self {
        self.page_seg_mode = psm;
        self
    }

    fn load(&self, png_bytes: &[u8], lang: &str) -> Result<tesseract::Tesseract, OcrError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| OcrError::OcrInit("Invalid tessdata path".into()))?;

        tesseract::Tesseract::new(Some(tessdata_str), Some(lang))
            .map_err(|e| OcrError::OcrInit(format!("{e:?}")))?
            .set_variable("tessedit_pageseg_mode", &self.page_seg_mode.to_string())
            .map_err(|e| OcrError::OcrConfig(format!("Failed to set page segmentation: {e:?}")))?
            .set_image_from_mem(png_bytes)
            .map_err(|e| OcrError::OcrProcessing(format!("{e:?}")))
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn extract_text(&self, png_bytes: &[u8], language_hint: &str) -> Result<String, OcrError> {
        let mut tess = self.load(png_bytes, language_hint)?;
        tess.get_text()
            .map_err(|e| OcrError::OcrProcessing(format!("{e:?}")))
    }

    fn extract_tokens(
        &self,
        png_bytes: &[u8],
        language_hint: &str,
    ) -> Result<Vec<OcrToken>, OcrError> {
        let mut tess = self.load(png_bytes, language_hint)?;
        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| OcrError::OcrProcessing(format!("{e:?}")))?;
        Ok(parse_tsv_tokens(&tsv))
    }
}

/// Mock OCR engine for unit testing without Tesseract.
///
/// Returns `text` for every text call unless a per-call script is queued.
/// Tokens are either given explicitly or laid out from the text on a
/// fixed grid (one line per text line, 10px per character).
pub struct MockOcrEngine {
    text: String,
    confidence: f32,
    tokens: Option<Vec<OcrToken>>,
    text_script: Mutex<VecDeque<String>>,
    fail: bool,
    panic: bool,
    text_calls: AtomicUsize,
    token_calls: AtomicUsize,
    languages: Mutex<Vec<String>>,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            tokens: None,
            text_script: Mutex::new(VecDeque::new()),
            fail: false,
            panic: false,
            text_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            languages: Mutex::new(Vec::new()),
        }
    }

    /// Engine that errors on every call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("", 0.0)
        }
    }

    /// Engine that panics on every call.
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::new("", 0.0)
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<OcrToken>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Queue texts returned by successive text calls, before falling back to `text`.
    pub fn with_text_script(self, script: &[&str]) -> Self {
        {
            let mut queue = self.text_script.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(script.iter().map(|s| s.to_string()));
        }
        self
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    /// Language hints received, in call order.
    pub fn languages_seen(&self) -> Vec<String> {
        self.languages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, lang: &str) -> Result<(), OcrError> {
        self.languages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(lang.to_string());
        if self.panic {
            panic!("mock OCR engine panicked");
        }
        if self.fail {
            return Err(OcrError::OcrProcessing("Mock OCR failure".into()));
        }
        Ok(())
    }
}

impl OcrEngine for MockOcrEngine {
    fn extract_text(&self, _png_bytes: &[u8], language_hint: &str) -> Result<String, OcrError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.record(language_hint)?;
        let scripted = self
            .text_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(scripted.unwrap_or_else(|| self.text.clone()))
    }

    fn extract_tokens(
        &self,
        _png_bytes: &[u8],
        language_hint: &str,
    ) -> Result<Vec<OcrToken>, OcrError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.record(language_hint)?;
        Ok(match &self.tokens {
            Some(tokens) => tokens.clone(),
            None => grid_tokens(&self.text, self.confidence),
        })
    }
}

/// Lay words out on a fixed grid: 30px per line, 10px per character.
fn grid_tokens(text: &str, confidence: f32) -> Vec<OcrToken> {
    let mut tokens = Vec::new();
    for (row, line) in text.lines().enumerate() {
        let mut col = 0u32;
        for word in line.split(' ') {
            let width = word.chars().count() as u32;
            if width > 0 {
                tokens.push(
                    OcrToken::new(word, col * 10, row as u32 * 30, width * 10, 20)
                        .with_confidence(confidence),
                );
            }
            col += width + 1;
        }
    }
    tokens
}

/// Parse Tesseract TSV output into positioned word tokens.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0;
/// Tesseract's -1 ("no confidence") becomes `None`.
pub fn parse_tsv_tokens(tsv: &str) -> Vec<OcrToken> {
    let mut results = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: f32 = match fields[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let Some(bbox) = parse_bounding_box(fields[6], fields[7], fields[8], fields[9]) else {
            continue;
        };

        results.push(OcrToken {
            text: word.to_string(),
            bbox,
            confidence: (conf >= 0.0).then(|| (conf / 100.0).min(1.0)),
        });
    }

    results
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(
    left: &str,
    top: &str,
    width: &str,
    height: &str,
) -> Option<super::types::BoundingBox> {
    Some(super::types::BoundingBox {
        left: left.trim().parse().ok()?,
        top: top.trim().parse().ok()?,
        width: width.trim().parse().ok()?,
        height: height.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn mock_returns_configured_text_and_counts_calls() {
        let engine = MockOcrEngine::new("TSH 3,20 mUI/L", 0.92);
        assert_eq!(engine.extract_text(b"png", "fra+eng").unwrap(), "TSH 3,20 mUI/L");
        assert_eq!(engine.text_calls(), 1);
        assert_eq!(engine.token_calls(), 0);
        assert_eq!(engine.languages_seen(), vec!["fra+eng".to_string()]);
    }

    #[test]
    fn mock_script_then_fallback() {
        let engine = MockOcrEngine::new("fallback", 0.9).with_text_script(&["first", "second"]);
        assert_eq!(engine.extract_text(b"", "eng").unwrap(), "first");
        assert_eq!(engine.extract_text(b"", "eng").unwrap(), "second");
        assert_eq!(engine.extract_text(b"", "eng").unwrap(), "fallback");
        assert_eq!(engine.text_calls(), 3);
    }

    #[test]
    fn mock_grid_tokens_follow_lines() {
        let engine = MockOcrEngine::new("TSH 1,8\nT4 12", 0.85);
        let tokens = engine.extract_tokens(b"", "eng").unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].text, "TSH");
        assert_eq!(tokens[0].left(), 0);
        assert_eq!(tokens[1].text, "1,8");
        assert_eq!(tokens[1].left(), 40);
        assert_eq!(tokens[2].top(), 30);
        assert_eq!(tokens[3].confidence, Some(0.85));
    }

    #[test]
    fn failing_mock_errors() {
        let engine = MockOcrEngine::failing();
        assert!(matches!(
            engine.extract_text(b"", "eng"),
            Err(OcrError::OcrProcessing(_))
        ));
        assert!(engine.extract_tokens(b"", "eng").is_err());
        assert_eq!(engine.token_calls(), 1);
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_rejects_missing_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        let result = BundledTesseract::new(dir.path());
        assert!(matches!(result, Err(OcrError::TessdataNotFound(_))));
    }

    #[test]
    fn tsv_parser_extracts_tokens_with_boxes() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tTSH\n\
             5\t1\t1\t1\t1\t2\t100\t25\t60\t28\t88\t3,20"
        );
        let tokens = parse_tsv_tokens(&tsv);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "TSH");
        assert_eq!(tokens[0].bbox.left, 10);
        assert_eq!(tokens[0].bbox.top, 20);
        assert_eq!(tokens[0].bbox.width, 80);
        assert_eq!(tokens[0].bbox.height, 30);
        assert!((tokens[0].confidence.unwrap() - 0.95).abs() < f32::EPSILON);
        assert_eq!(tokens[1].bbox.left, 100);
        assert!((tokens[1].confidence.unwrap() - 0.88).abs() < f32::EPSILON);
    }

    #[test]
    fn tsv_parser_accepts_fractional_confidence() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t91.734\tmUI/L");
        let tokens = parse_tsv_tokens(&tsv);
        assert_eq!(tokens.len(), 1);
        assert!((tokens[0].confidence.unwrap() - 0.91734).abs() < 1e-4);
    }

    #[test]
    fn tsv_parser_negative_confidence_is_none() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t-1\tgarbled");
        let tokens = parse_tsv_tokens(&tsv);
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].confidence.is_none());
    }

    #[test]
    fn tsv_parser_skips_non_word_levels_and_empty_words() {
        let tsv = format!(
            "{HEADER}\n\
             4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\t\n\
             5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t85\tvalid"
        );
        let tokens = parse_tsv_tokens(&tsv);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "valid");
    }

    #[test]
    fn tsv_parser_skips_malformed_lines() {
        let tsv = format!(
            "{HEADER}\n\
             too\tfew\tfields\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t92\tOK\n\
             5\t1\t1\t1\t1\t2\tx\t20\t80\t30\t50\tbadbox\n\
             notanumber\t1\t1\t1\t1\t1\t10\t20\t80\t30\t50\tbad"
        );
        let tokens = parse_tsv_tokens(&tsv);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "OK");
    }

    #[test]
    fn tsv_parser_handles_empty_input() {
        assert!(parse_tsv_tokens("").is_empty());
        assert!(parse_tsv_tokens(HEADER).is_empty());
    }
}
