use subtitle_extract_types::Quad;

use crate::error::OcrError;
use crate::request::OcrRequest;
use crate::response::OcrResponse;

/// Finds text boxes without reading them.
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, request: &OcrRequest<'_>) -> Result<Vec<Quad>, OcrError>;
}

/// Detects and reads every text line in a frame.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn warm_up(&self) -> Result<(), OcrError> {
        Ok(())
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError>;
}

/// Engine that never finds any text.
#[derive(Debug, Default)]
pub struct NoopOcrEngine;

impl OcrEngine for NoopOcrEngine {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn recognize(&self, _: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        Ok(OcrResponse::empty())
    }
}

impl TextDetector for NoopOcrEngine {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn detect(&self, _: &OcrRequest<'_>) -> Result<Vec<Quad>, OcrError> {
        Ok(Vec::new())
    }
}
