pub mod config;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::ExtractionConfig;
use models::{ErrorCode, ParsedField, PassSelection};
use pipeline::ocr::{OcrEngine, OcrResult};
use pipeline::parsing::FieldParser;
use pipeline::{EscalationController, ExtractionReport};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}

/// Image bytes in, one extraction report out. Never panics, never errors:
/// every failure is folded into the report's error code.
pub fn extract_field(
    engine: &dyn OcrEngine,
    image_bytes: &[u8],
    selection: PassSelection,
    config: &ExtractionConfig,
) -> ExtractionReport {
    EscalationController::new(engine, config).run(image_bytes, selection)
}

/// Parse already-recognized text.
pub fn parse_text(text: &str, config: &ExtractionConfig) -> ParsedField {
    FieldParser::new(config).parse_text(text)
}

/// Parse an OCR result that may carry positioned words.
pub fn parse_ocr_result(result: &OcrResult, config: &ExtractionConfig) -> ParsedField {
    FieldParser::new(config).parse(result)
}

/// [`extract_field`] on tokio's blocking pool, for async callers.
pub async fn extract_field_blocking_pool(
    engine: Arc<dyn OcrEngine>,
    image_bytes: Vec<u8>,
    selection: PassSelection,
    config: ExtractionConfig,
) -> ExtractionReport {
    let result = tokio::task::spawn_blocking(move || {
        extract_field(engine.as_ref(), &image_bytes, selection, &config)
    })
    .await;

    match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Extraction task failed");
            ExtractionReport::failed(ErrorCode::OcrFailed)
        }
    }
}
