use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use subtitle_extract_decoder::{DecoderConfig, FrameError};
use subtitle_extract_ocr::{NoopOcrEngine, OcrEngine, OcrError, ReplayOcrEngine, TextDetector};

pub mod backend;
pub mod cli;
pub mod config;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod rawlog;
pub mod region;
pub mod settings;
pub mod similarity;
pub mod stage;
pub mod subtitle;
pub mod workdir;

pub use config::{ExtractConfig, ExtractionMode, ExtractorConfig};
pub use pipeline::{Engines, ExtractionReport, FrameSource, PipelineError, run_extraction};
pub use stage::StopSignal;

use backend::{ExecutionPlan, parse_backend};
use cli::OcrBackend;
use settings::EffectiveSettings;

/// Builds the text engines for the selected OCR backend.
///
/// `auto` replays a recording when one is configured and finds no text otherwise.
pub fn build_engines(backend: OcrBackend, replay: Option<&Path>) -> Result<Engines, OcrError> {
    match (backend, replay) {
        (OcrBackend::Replay, None) => Err(OcrError::backend(
            "the replay OCR backend needs a recording (--ocr-replay)",
        )),
        (OcrBackend::Replay | OcrBackend::Auto, Some(path)) => {
            let engine = Arc::new(ReplayOcrEngine::from_path(path)?);
            engine.warm_up()?;
            let detector: Arc<dyn TextDetector> = engine.clone();
            Ok(Engines {
                detector: Some(detector),
                recognizer: engine,
            })
        }
        (OcrBackend::Noop | OcrBackend::Auto, None) | (OcrBackend::Noop, Some(_)) => {
            let engine = Arc::new(NoopOcrEngine);
            let detector: Arc<dyn TextDetector> = engine.clone();
            Ok(Engines {
                detector: Some(detector),
                recognizer: engine,
            })
        }
    }
}

pub fn build_plan(
    settings: &EffectiveSettings,
    input: PathBuf,
    output: PathBuf,
    engines: Engines,
) -> Result<ExecutionPlan, FrameError> {
    let mut decoder_config = DecoderConfig::new(input);
    let env_backend_present = decoder_config.apply_env()?;
    let backend = settings.backend.as_deref().map(parse_backend).transpose()?;
    if let Some(backend) = backend {
        decoder_config.backend = backend;
    }
    if let Some(capacity) = settings
        .decoder_channel_capacity
        .and_then(NonZeroUsize::new)
    {
        decoder_config.channel_capacity = Some(capacity);
    }

    Ok(ExecutionPlan {
        config: decoder_config,
        backend_locked: backend.is_some() || env_backend_present,
        extract: settings.extract_config(output),
        engines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_backend_requires_a_recording() {
        assert!(build_engines(OcrBackend::Replay, None).is_err());
        let engines = build_engines(OcrBackend::Auto, None).unwrap();
        assert_eq!(engines.recognizer.name(), "noop");
        assert!(engines.detector.is_some());
    }

    #[test]
    fn auto_prefers_a_configured_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr.json");
        std::fs::write(&path, "[]").unwrap();
        let engines = build_engines(OcrBackend::Auto, Some(&path)).unwrap();
        assert_eq!(engines.recognizer.name(), "replay");
        let engines = build_engines(OcrBackend::Noop, Some(&path)).unwrap();
        assert_eq!(engines.recognizer.name(), "noop");
    }
}
