use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use subtitle_extract_types::{Point, Quad};

use crate::engine::{OcrEngine, TextDetector};
use crate::error::OcrError;
use crate::request::OcrRequest;
use crate::response::{OcrResponse, OcrText};

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    frame: u64,
    #[serde(default)]
    lines: Vec<RecordedLine>,
}

#[derive(Debug, Deserialize)]
struct RecordedLine {
    quad: [[f32; 2]; 4],
    text: String,
    #[serde(default = "full_confidence")]
    confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Serves previously recorded detector and recognizer output, keyed by frame index.
///
/// The file is a JSON array of `{"frame": n, "lines": [{"quad": [[x, y]; 4], "text": "...",
/// "confidence": 0.98}]}`. Frames that are not listed contain no text.
#[derive(Debug, Default, Clone)]
pub struct ReplayOcrEngine {
    frames: HashMap<u64, OcrResponse>,
}

impl ReplayOcrEngine {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| OcrError::ReplayIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| OcrError::ReplayParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let recorded: Vec<RecordedFrame> = serde_json::from_str(contents)?;
        let frames = recorded
            .into_iter()
            .map(|frame| {
                let texts = frame
                    .lines
                    .into_iter()
                    .map(|line| {
                        let quad = Quad(line.quad.map(|[x, y]| Point::new(x, y)));
                        OcrText::new(quad, line.text, line.confidence)
                    })
                    .collect();
                (frame.frame, OcrResponse::new(texts))
            })
            .collect();
        Ok(Self { frames })
    }

    pub fn from_responses(frames: impl IntoIterator<Item = (u64, OcrResponse)>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    fn lookup(&self, request: &OcrRequest<'_>) -> Result<&OcrResponse, OcrError> {
        static EMPTY: OcrResponse = OcrResponse { texts: Vec::new() };
        let index = request
            .frame_index()
            .ok_or_else(|| OcrError::backend("replayed results need indexed frames"))?;
        Ok(self.frames.get(&index).unwrap_or(&EMPTY))
    }
}

impl OcrEngine for ReplayOcrEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        self.lookup(request).cloned()
    }
}

impl TextDetector for ReplayOcrEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, request: &OcrRequest<'_>) -> Result<Vec<Quad>, OcrError> {
        Ok(self.lookup(request)?.boxes())
    }
}
