use std::str::FromStr;
use std::time::Instant;

use subtitle_extract_decoder::{Backend, DecoderConfig, FrameError};
use tracing::{info, warn};

use crate::config::ExtractConfig;
use crate::pipeline::{self, Engines, ExtractionReport, PipelineError};
use crate::region::RegionReviewer;
use crate::stage::StopSignal;
use crate::stage::progress::ProgressSender;

#[derive(Clone)]
pub struct ExecutionPlan {
    pub config: DecoderConfig,
    pub backend_locked: bool,
    pub extract: ExtractConfig,
    pub engines: Engines,
}

/// Runs the pipeline, moving on to the next compiled decoder backend when the
/// current one fails before decoding anything and the backend was not locked.
pub async fn run(
    plan: ExecutionPlan,
    reviewer: &mut dyn RegionReviewer,
    stop: &StopSignal,
    progress: Option<ProgressSender>,
) -> Result<ExtractionReport, PipelineError> {
    let ExecutionPlan {
        config,
        backend_locked,
        extract,
        engines,
    } = plan;

    let available = Backend::available();
    if available.is_empty() {
        return Err(PipelineError::Open(FrameError::configuration(
            "no decoding backend available; rebuild with a backend feature such as \"backend-ffmpeg\"",
        )));
    }
    if !available.contains(&config.backend) {
        return Err(PipelineError::Open(FrameError::unsupported(
            config.backend.as_str(),
        )));
    }

    let mut attempt_config = config;
    let mut tried = Vec::new();

    loop {
        if !tried.contains(&attempt_config.backend) {
            tried.push(attempt_config.backend);
        }

        let started = Instant::now();
        info!(backend = attempt_config.backend.as_str(), "using decoder backend");
        match pipeline::run_extraction(
            &attempt_config,
            &engines,
            &extract,
            reviewer,
            stop,
            progress.clone(),
        )
        .await
        {
            Ok(report) => {
                info!(elapsed = ?started.elapsed(), "extraction finished");
                return Ok(report);
            }
            Err(err) => {
                if err.is_decoder_startup_failure() && !backend_locked {
                    if let Some(next_backend) = select_next_backend(&available, &tried) {
                        warn!(
                            failed = attempt_config.backend.as_str(),
                            reason = %err,
                            next = next_backend.as_str(),
                            "decoder backend failed; trying the next one"
                        );
                        attempt_config.backend = next_backend;
                        continue;
                    }
                }
                return Err(err);
            }
        }
    }
}

pub fn display_available_backends() {
    let names: Vec<&'static str> = Backend::available()
        .iter()
        .map(Backend::as_str)
        .collect();
    if names.is_empty() {
        println!("available backends: (none compiled)");
    } else {
        println!("available backends: {}", names.join(", "));
    }
}

pub fn parse_backend(value: &str) -> Result<Backend, FrameError> {
    Backend::from_str(value)
}

fn select_next_backend(available: &[Backend], tried: &[Backend]) -> Option<Backend> {
    available
        .iter()
        .copied()
        .find(|backend| !tried.contains(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_backend_skips_tried_ones() {
        let available = [Backend::Ffmpeg, Backend::Mock];
        assert_eq!(select_next_backend(&available, &[Backend::Ffmpeg]), Some(Backend::Mock));
        assert_eq!(
            select_next_backend(&available, &[Backend::Ffmpeg, Backend::Mock]),
            None
        );
    }
}
