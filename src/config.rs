use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "bioscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default `tracing` filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "bioscan=info,warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Absolute physiological bound for the target field.
/// A value outside this is an OCR artefact, never a real result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlausibilityBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for PlausibilityBounds {
    fn default() -> Self {
        Self { min: 0.0, max: 150.0 }
    }
}

impl PlausibilityBounds {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// One decimal-repair rule: an integer bound with at least `min_digits`
/// digits is divided by `divisor`. The rule with the most digits wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RescaleRule {
    pub min_digits: usize,
    pub divisor: f64,
}

/// Repair of reference bounds whose decimal separator was lost by OCR
/// ("0400" read for "0.400"). Approximate: it trades a few false
/// corrections for many recovered intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundRescale {
    pub enabled: bool,
    pub rules: Vec<RescaleRule>,
}

impl Default for BoundRescale {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: vec![
                RescaleRule { min_digits: 3, divisor: 100.0 },
                RescaleRule { min_digits: 4, divisor: 1000.0 },
            ],
        }
    }
}

/// Pixel tolerances for rebuilding lines and columns from word boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutTolerances {
    pub line_tolerance_px: u32,
    pub column_tolerance_px: u32,
}

impl Default for LayoutTolerances {
    fn default() -> Self {
        Self {
            line_tolerance_px: 12,
            column_tolerance_px: 40,
        }
    }
}

/// Image preprocessing and token filtering knobs for the OCR passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassSettings {
    /// Longest side after the bounded resize (fast + standard).
    pub max_side: u32,
    /// Aggressive pass upscaling factor.
    pub upscale_factor: f32,
    /// Upscaling never produces a side longer than this.
    pub max_upscaled_side: u32,
    /// Fixed global threshold for binarization. `None` = Otsu.
    pub binarize_threshold: Option<u8>,
    /// Margin (pixels) kept around the detected content region.
    pub crop_margin_px: u32,
    /// Tokens below this confidence are dropped by the standard pass.
    pub standard_token_floor: f32,
    /// Tokens below this confidence are dropped by the aggressive pass.
    pub aggressive_token_floor: f32,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            max_side: 1400,
            upscale_factor: 1.5,
            max_upscaled_side: 4000,
            binarize_threshold: None,
            crop_margin_px: 16,
            standard_token_floor: 0.40,
            aggressive_token_floor: 0.20,
        }
    }
}

/// Everything the extraction pipeline needs, passed explicitly to each entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Language hint handed to the OCR engine (Tesseract syntax).
    pub language_hint: String,
    pub plausibility: PlausibilityBounds,
    /// How far (in characters) past a label the value/unit/interval scan looks.
    pub label_window_chars: usize,
    /// Consistency margin around the interval, as a multiple of its width.
    pub consistency_margin_ratio: f64,
    pub bound_rescale: BoundRescale,
    pub layout: LayoutTolerances,
    pub passes: PassSettings,
    /// Overall budget for the escalation chain, in milliseconds.
    pub deadline_ms: Option<u64>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            language_hint: "fra+eng".to_string(),
            plausibility: PlausibilityBounds::default(),
            label_window_chars: 60,
            consistency_margin_ratio: 2.0,
            bound_rescale: BoundRescale::default(),
            layout: LayoutTolerances::default(),
            passes: PassSettings::default(),
            deadline_ms: None,
        }
    }
}

impl ExtractionConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_language(mut self, lang: &str) -> Self {
        self.language_hint = lang.to_string();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.language_hint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "language_hint",
                reason: "must not be empty".into(),
            });
        }
        if !(self.plausibility.min < self.plausibility.max) {
            return Err(ConfigError::Invalid {
                field: "plausibility",
                reason: format!(
                    "min ({}) must be below max ({})",
                    self.plausibility.min, self.plausibility.max
                ),
            });
        }
        if self.label_window_chars == 0 {
            return Err(ConfigError::Invalid {
                field: "label_window_chars",
                reason: "must be positive".into(),
            });
        }
        if self.consistency_margin_ratio < 0.0 {
            return Err(ConfigError::Invalid {
                field: "consistency_margin_ratio",
                reason: "must not be negative".into(),
            });
        }
        if self.bound_rescale.rules.iter().any(|r| r.divisor <= 0.0) {
            return Err(ConfigError::Invalid {
                field: "bound_rescale.rules",
                reason: "divisors must be positive".into(),
            });
        }
        if self.passes.max_side == 0 || self.passes.upscale_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "passes",
                reason: "max_side must be positive and upscale_factor >= 1.0".into(),
            });
        }
        Ok(())
    }
}
