use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {field} value: {value}")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The wire spelling doubles as the serde representation.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(UnknownVariant {
                        field: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(
    /// Categorical confidence of a successful extraction.
    Confidence {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

str_enum!(
    /// Closed set of failure codes reported to callers.
    ErrorCode {
        EmptyText => "EMPTY_TEXT",
        FieldNotFound => "FIELD_NOT_FOUND",
        OcrFailed => "OCR_FAILED",
    }
);

str_enum!(
    /// One OCR quality/cost tier, cheapest first.
    PassKind {
        Fast => "fast",
        Standard => "standard",
        Aggressive => "aggressive",
    }
);

str_enum!(
    /// Caller's pass choice: full escalation or a single explicit pass.
    PassSelection {
        Auto => "auto",
        Fast => "fast",
        Standard => "standard",
        Aggressive => "aggressive",
    }
);

impl Default for PassSelection {
    fn default() -> Self {
        Self::Auto
    }
}

impl PassSelection {
    /// Passes to attempt, in escalation order.
    pub fn plan(&self) -> &'static [PassKind] {
        match self {
            Self::Auto => &[PassKind::Fast, PassKind::Standard, PassKind::Aggressive],
            Self::Fast => &[PassKind::Fast],
            Self::Standard => &[PassKind::Standard],
            Self::Aggressive => &[PassKind::Aggressive],
        }
    }
}

impl Confidence {
    /// Float form for consumers that need a score in `[0, 1]`.
    pub fn score(&self) -> f32 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.6,
            Self::Low => 0.3,
        }
    }
}
