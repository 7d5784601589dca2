pub mod ocr;
pub mod parsing;
pub mod escalation; // Multi-pass OCR with early acceptance

pub use escalation::{EscalationController, EscalationState, ExtractionReport};
