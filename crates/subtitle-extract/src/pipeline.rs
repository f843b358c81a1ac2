use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use subtitle_extract_decoder::{
    BlockingFrames, DecoderConfig, DynFrameProvider, FrameCursor, FrameError, FrameResult,
};
use subtitle_extract_ocr::{OcrEngine, TextDetector};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::{ExtractConfig, ExtractConfigError, ExtractionMode};
use crate::merge::merge_observations;
use crate::normalize::normalize_log;
use crate::rawlog::{RawLog, RawLogError};
use crate::region::{RegionReviewer, apply_region_filters};
use crate::stage::boundary::BoundaryScanner;
use crate::stage::compare::OcrComparator;
use crate::stage::dispatch::{
    ConsumerOutput, FrameFetcher, NoFrames, ObservationFilter, OcrConsumer, TaskSender, task_queue,
};
use crate::stage::extractor::{ExtractorDriver, ExtractorError, ExtractorJob};
use crate::stage::progress::{ProgressSender, ProgressStage, ProgressTracker};
use crate::stage::sampler::{FrameSampler, sample_step};
use crate::stage::{ScanError, StopSignal};
use crate::subtitle::{
    SrtCue, SrtError, cues_from_candidates, read_srt, reconcile_external, write_srt, write_txt,
};
use crate::workdir::WorkDir;

/// Opens the video being processed.
pub trait FrameSource: Send + Sync {
    fn open(&self) -> FrameResult<DynFrameProvider>;

    /// File handed to the external extractor.
    fn video_path(&self) -> Option<&Path> {
        None
    }
}

impl FrameSource for DecoderConfig {
    fn open(&self) -> FrameResult<DynFrameProvider> {
        DecoderConfig::open(self)
    }

    fn video_path(&self) -> Option<&Path> {
        Some(&self.input)
    }
}

/// Text engines used by a run. The detector is only needed in detect mode.
#[derive(Clone)]
pub struct Engines {
    pub detector: Option<Arc<dyn TextDetector>>,
    pub recognizer: Arc<dyn OcrEngine>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ExtractConfigError),
    #[error("detect mode needs a text detector")]
    MissingDetector,
    #[error("external mode needs the video file path")]
    MissingVideoPath,
    #[error("video metadata does not provide the {0}")]
    MissingMetadata(&'static str),
    #[error("failed to open the video: {0}")]
    Open(#[source] FrameError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("failed to prepare working directory {path}: {source}")]
    WorkDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    RawLog(#[from] RawLogError),
    #[error("failed to read the extractor subtitles: {0}")]
    ExtractorSubtitles(#[from] SrtError),
    #[error("failed to write {path}: {source}")]
    Output { path: PathBuf, source: io::Error },
    #[error("{stage} task failed: {source}")]
    Join {
        stage: &'static str,
        source: JoinError,
    },
    #[error("extraction cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The decoder failed before producing a single frame.
    pub fn is_decoder_startup_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Open(_)
                | PipelineError::Scan(ScanError {
                    frames_scanned: 0,
                    ..
                })
        )
    }
}

#[derive(Debug)]
pub struct ExtractionReport {
    pub output: PathBuf,
    pub txt_output: Option<PathBuf>,
    pub cues: Vec<SrtCue>,
    pub frames_scanned: u64,
    pub ocr_tasks: u64,
    pub failed_tasks: u64,
    /// Observations left after filtering, before same-frame concatenation.
    pub observations: usize,
}

/// Runs one video from frames to a written subtitle file.
///
/// On stop, or when the frame producer fails, the raw log collected so far
/// is checkpointed into the working directory before the error is returned.
pub async fn run_extraction(
    source: &dyn FrameSource,
    engines: &Engines,
    config: &ExtractConfig,
    reviewer: &mut dyn RegionReviewer,
    stop: &StopSignal,
    progress: Option<ProgressSender>,
) -> Result<ExtractionReport, PipelineError> {
    config.validate()?;
    if config.mode == ExtractionMode::Detect && engines.detector.is_none() {
        return Err(PipelineError::MissingDetector);
    }

    let provider = source.open().map_err(PipelineError::Open)?;
    let metadata = provider.metadata();
    let fps = metadata
        .fps
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .ok_or(PipelineError::MissingMetadata("frame rate"))?;
    let total_frames = metadata.calculate_total_frames();
    let frame_size = metadata.width.zip(metadata.height);
    info!(mode = %config.mode, fps, total_frames, "starting extraction");

    let stem = workdir_stem(source.video_path(), &config.output);
    let workdir = WorkDir::create(&config.output, &stem, config.keep_cache)
        .await
        .map_err(|source| PipelineError::WorkDir {
            path: WorkDir::location(&config.output, &stem),
            source,
        })?;

    let (tasks, receiver) = task_queue();
    let runtime = Handle::current();
    let filter = ObservationFilter::new(config.drop_score, config.area_deviation_rate, frame_size);
    let spawn_consumer = |fetcher: Box<dyn FrameFetcher>| {
        OcrConsumer::new(
            engines.recognizer.clone(),
            filter,
            fetcher,
            ProgressTracker::new(ProgressStage::Ocr, progress.clone()),
            stop.clone(),
        )
        .spawn(receiver)
    };
    let extract_progress = ProgressTracker::new(ProgressStage::FrameExtract, progress.clone());

    let (consumer, produced): (JoinHandle<ConsumerOutput>, Result<u64, PipelineError>) =
        match config.mode {
            ExtractionMode::Fps => {
                let consumer = spawn_consumer(Box::new(NoFrames));
                let sampler = FrameSampler::new(
                    sample_step(fps, config.extract_frequency),
                    config.subtitle_area,
                    total_frames,
                    tasks.clone(),
                    extract_progress,
                    stop.clone(),
                );
                let frames = BlockingFrames::new(provider.into_stream(), runtime);
                let result = tokio::task::spawn_blocking(move || {
                    sampler.run(frames).map(|summary| summary.frames_scanned)
                })
                .await;
                (consumer, joined("frame sampling", result))
            }
            ExtractionMode::Detect => {
                let detector = engines
                    .detector
                    .clone()
                    .ok_or(PipelineError::MissingDetector)?;
                let consumer = spawn_consumer(Box::new(NoFrames));
                let comparator = OcrComparator::new(
                    engines.recognizer.clone(),
                    config.subtitle_area,
                    config.similarity_threshold,
                    config.compare_window,
                );
                let scanner = BoundaryScanner::new(
                    detector,
                    comparator,
                    config.subtitle_area,
                    total_frames,
                    tasks.clone(),
                    extract_progress,
                    stop.clone(),
                );
                let frames = BlockingFrames::new(provider.into_stream(), runtime);
                let result = tokio::task::spawn_blocking(move || {
                    scanner.scan(frames).map(|summary| {
                        debug!(boundaries = summary.boundaries.len(), "boundary scan finished");
                        summary.frames_scanned
                    })
                })
                .await;
                (consumer, joined("boundary scan", result))
            }
            ExtractionMode::External => {
                let cursor = FrameCursor::new(BlockingFrames::new(provider.into_stream(), runtime));
                let consumer = spawn_consumer(Box::new(cursor));
                let job = extractor_job(
                    source.video_path(),
                    config,
                    &workdir,
                    fps,
                    total_frames,
                    frame_size,
                    metadata.duration_ms(),
                );
                let produced = match job {
                    Ok(job) => run_extractor(config, &job, &tasks, extract_progress, stop).await,
                    Err(err) => Err(err),
                };
                (consumer, produced)
            }
        };
    tasks.finish();
    drop(tasks);

    let output = consumer.await.map_err(|source| PipelineError::Join {
        stage: "recognition",
        source,
    })?;
    let ConsumerOutput {
        log,
        tasks: ocr_tasks,
        failed_tasks,
        stopped,
    } = output;

    let raw_path = workdir.raw_log();
    if stopped || stop.is_stopped() {
        checkpoint(&log, &raw_path).await;
        warn!(observations = log.len(), "extraction stopped");
        return Err(PipelineError::Cancelled);
    }
    let frames_scanned = match produced {
        Ok(frames_scanned) => frames_scanned,
        Err(err) => {
            checkpoint(&log, &raw_path).await;
            warn!(observations = log.len(), error = %err, "frame producer failed");
            return Err(err);
        }
    };

    let mut log = log;
    log.save(&raw_path).await?;
    normalize_log(&mut log, config.tolerance);
    log.save(&raw_path).await?;

    if config.subtitle_area.is_none() {
        apply_region_filters(
            &mut log,
            config.watermark_area_num,
            config.band_deviation,
            reviewer,
        );
        log.save(&raw_path).await?;
    }
    let observations = log.len();

    let log = log.concat_same_frame();
    log.save(&raw_path).await?;

    let look_ahead = config.mode != ExtractionMode::External;
    let candidates = merge_observations(log.observations(), config.similarity_threshold, look_ahead);
    let cues = match config.mode {
        ExtractionMode::External => {
            let extractor_cues = read_srt(&workdir.extractor_srt()).await?;
            reconcile_external(
                &extractor_cues,
                &candidates,
                fps,
                !config.delete_empty_timestamp,
            )
        }
        _ => cues_from_candidates(&candidates, fps),
    };

    write_srt(&config.output, &cues)
        .await
        .map_err(|source| PipelineError::Output {
            path: config.output.clone(),
            source,
        })?;
    let txt_output = if config.generate_txt {
        let path = config.output.with_extension("txt");
        write_txt(&path, &cues)
            .await
            .map_err(|source| PipelineError::Output {
                path: path.clone(),
                source,
            })?;
        Some(path)
    } else {
        None
    };

    info!(
        cues = cues.len(),
        frames = frames_scanned,
        tasks = ocr_tasks,
        output = %config.output.display(),
        "subtitle file written"
    );
    Ok(ExtractionReport {
        output: config.output.clone(),
        txt_output,
        cues,
        frames_scanned,
        ocr_tasks,
        failed_tasks,
        observations,
    })
}

fn joined<E>(
    stage: &'static str,
    result: Result<Result<u64, E>, JoinError>,
) -> Result<u64, PipelineError>
where
    PipelineError: From<E>,
{
    match result {
        Ok(inner) => inner.map_err(PipelineError::from),
        Err(source) => Err(PipelineError::Join { stage, source }),
    }
}

fn extractor_job(
    video: Option<&Path>,
    config: &ExtractConfig,
    workdir: &WorkDir,
    fps: f64,
    total_frames: Option<u64>,
    frame_size: Option<(u32, u32)>,
    duration_ms: Option<f64>,
) -> Result<ExtractorJob, PipelineError> {
    let video = video.ok_or(PipelineError::MissingVideoPath)?;
    let area = config
        .subtitle_area
        .ok_or(ExtractConfigError::MissingArea { mode: config.mode })?;
    let frame_size = frame_size.ok_or(PipelineError::MissingMetadata("frame size"))?;
    let duration_ms = duration_ms.ok_or(PipelineError::MissingMetadata("duration"))?;
    Ok(ExtractorJob {
        video: video.to_path_buf(),
        output_dir: workdir.path().to_path_buf(),
        raw_srt: workdir.extractor_srt(),
        area,
        frame_size,
        fps,
        total_frames,
        duration_ms,
    })
}

async fn run_extractor(
    config: &ExtractConfig,
    job: &ExtractorJob,
    tasks: &TaskSender,
    mut progress: ProgressTracker,
    stop: &StopSignal,
) -> Result<u64, PipelineError> {
    let extractor = config
        .extractor
        .clone()
        .ok_or(ExtractConfigError::MissingExtractor)?;
    let summary = ExtractorDriver::new(extractor)
        .run(job, tasks, &mut progress, stop)
        .await?;
    Ok(summary.timestamps_seen)
}

async fn checkpoint(log: &RawLog, path: &Path) {
    if let Err(err) = log.save(path).await {
        warn!(path = %path.display(), error = %err, "failed to checkpoint raw log");
    }
}

fn workdir_stem(video: Option<&Path>, output: &Path) -> String {
    video
        .and_then(Path::file_stem)
        .or_else(|| output.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_prefers_the_video_name() {
        assert_eq!(
            workdir_stem(Some(Path::new("/v/movie.mkv")), Path::new("out/sub.srt")),
            "movie"
        );
        assert_eq!(workdir_stem(None, Path::new("out/sub.srt")), "sub");
    }

    #[test]
    fn only_early_decoder_failures_allow_another_backend() {
        assert!(PipelineError::Open(FrameError::unsupported("ffmpeg")).is_decoder_startup_failure());
        let early = ScanError {
            frames_scanned: 0,
            source: FrameError::configuration("boom"),
        };
        assert!(PipelineError::Scan(early).is_decoder_startup_failure());
        let late = ScanError {
            frames_scanned: 12,
            source: FrameError::configuration("boom"),
        };
        assert!(!PipelineError::Scan(late).is_decoder_startup_failure());
        assert!(!PipelineError::Cancelled.is_decoder_startup_failure());
    }
}
