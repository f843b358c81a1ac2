//! External-mode producer: drives the frame-extractor binary and turns the
//! timestamps it reports into OCR tasks.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use subtitle_extract_types::Coordinate;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::StopSignal;
use super::dispatch::{OcrTask, TaskSender};
use super::progress::ProgressTracker;
use crate::config::ExtractorConfig;
use crate::subtitle::extractor_frame_no;

/// Directory the extractor writes its frame images to, inside the output directory.
pub const IMAGE_DIR_NAME: &str = "RGBImages";

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const FRAME_LINE_PREFIX: &str = "Frame: ";

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_(\d+)_(\d+)_(\d+)__").expect("timestamp pattern is valid")
});

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to start extractor {program}: {source}")]
    Spawn { program: PathBuf, source: io::Error },
    #[error("extractor I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("extractor exited with {0}")]
    Failed(ExitStatus),
    #[error("extractor needs the video dimensions and frame rate")]
    MissingMetadata,
    #[error("extraction cancelled")]
    Cancelled,
}

/// Where frame timestamps are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEventSource {
    /// `Frame: HH_MM_SS_MS__...` lines on the extractor's stderr.
    Stderr,
    /// File names appearing in the image directory.
    ImageDirectory,
}

impl FrameEventSource {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            FrameEventSource::ImageDirectory
        } else {
            FrameEventSource::Stderr
        }
    }
}

/// One extractor invocation.
#[derive(Debug, Clone)]
pub struct ExtractorJob {
    pub video: PathBuf,
    pub output_dir: PathBuf,
    /// Subtitle file the extractor writes alongside the images.
    pub raw_srt: PathBuf,
    pub area: Coordinate,
    pub frame_size: (u32, u32),
    pub fps: f64,
    pub total_frames: Option<u64>,
    pub duration_ms: f64,
}

/// Area edges as the extractor expects them: top and bottom measured from the
/// bottom of the frame, left and right from the left, all as fractions.
pub fn region_fractions(area: &Coordinate, width: u32, height: u32) -> [f64; 4] {
    let width = width.max(1) as f64;
    let height = height.max(1) as f64;
    [
        1.0 - area.ymin as f64 / height,
        1.0 - area.ymax as f64 / height,
        area.xmin as f64 / width,
        area.xmax as f64 / width,
    ]
}

pub fn build_command(config: &ExtractorConfig, job: &ExtractorJob) -> Command {
    let [top, bottom, left, right] = region_fractions(&job.area, job.frame_size.0, job.frame_size.1);
    let threads = config.thread_count().to_string();

    let mut command = Command::new(&config.program);
    command
        .arg("-c")
        .arg("-r")
        .arg("-i")
        .arg(&job.video)
        .arg("-o")
        .arg(&job.output_dir)
        .arg("-ces")
        .arg(&job.raw_srt)
        .arg("-te")
        .arg(top.to_string())
        .arg("-be")
        .arg(bottom.to_string())
        .arg("-le")
        .arg(left.to_string())
        .arg("-re")
        .arg(right.to_string())
        .arg("-nthr")
        .arg(&threads);
    if cfg!(windows) {
        command.arg("-nocrthr").arg(&threads);
    } else {
        command.arg("-dsi");
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Milliseconds encoded in an `HH_MM_SS_MS__` prefix.
pub fn parse_frame_timestamp(name: &str) -> Option<u64> {
    let captures = TIMESTAMP_PATTERN.captures(name)?;
    let field = |index: usize| captures.get(index)?.as_str().parse::<u64>().ok();
    let (hours, minutes, seconds, millis) = (field(1)?, field(2)?, field(3)?, field(4)?);
    Some(millis + seconds * 1000 + minutes * 60_000 + hours * 3_600_000)
}

/// Milliseconds from a `Frame: ...` stderr line.
pub fn parse_frame_line(line: &str) -> Option<u64> {
    parse_frame_timestamp(line.trim().strip_prefix(FRAME_LINE_PREFIX)?)
}

/// Turns reported timestamps into tasks. Only timestamps beyond the latest
/// one seen produce a task, and once the video duration is reached further
/// timestamps are ignored.
pub struct TimestampGate {
    fps: f64,
    duration_ms: f64,
    total_frames: Option<u64>,
    area: Option<Coordinate>,
    last_total_ms: u64,
    finished: bool,
}

impl TimestampGate {
    pub fn new(fps: f64, duration_ms: f64, total_frames: Option<u64>, area: Option<Coordinate>) -> Self {
        Self {
            fps,
            duration_ms,
            total_frames,
            area,
            last_total_ms: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn observe(&mut self, total_ms: u64, progress: &mut ProgressTracker) -> Option<OcrTask> {
        if self.finished {
            return None;
        }
        let task = (total_ms > self.last_total_ms).then(|| {
            OcrTask::new(extractor_frame_no(total_ms, self.fps), self.total_frames)
                .with_timestamp(Some(Duration::from_millis(total_ms)))
                .with_region(self.area)
        });
        self.last_total_ms = self.last_total_ms.max(total_ms);

        let fraction = if self.duration_ms > 0.0 {
            total_ms as f64 / self.duration_ms
        } else {
            0.0
        };
        if fraction >= 1.0 {
            self.finished = true;
            progress.finish();
        } else {
            progress.report(fraction * 100.0);
        }
        task
    }
}

/// New image names in `dir`, sorted, that match the timestamp pattern.
pub fn scan_image_dir(dir: &Path, processed: &mut HashSet<String>) -> io::Result<Vec<u64>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut timestamps = Vec::new();
    for name in names {
        if processed.contains(&name) {
            continue;
        }
        let Some(total_ms) = parse_frame_timestamp(&name) else {
            continue;
        };
        processed.insert(name);
        timestamps.push(total_ms);
    }
    Ok(timestamps)
}

/// Kills the extractor's whole process group unless it has been reaped.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(child: &Child) -> Self {
        Self { pid: child.id() }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }

    fn kill(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: killpg only sends a signal; a stale group id fails with ESRCH.
            let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if result != 0 {
                debug!(pid, error = %io::Error::last_os_error(), "killpg failed");
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Debug, Default)]
pub struct ExtractorSummary {
    pub timestamps_seen: u64,
    pub tasks_sent: u64,
}

pub struct ExtractorDriver {
    config: ExtractorConfig,
    source: FrameEventSource,
}

impl ExtractorDriver {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            source: FrameEventSource::platform_default(),
        }
    }

    pub fn with_source(mut self, source: FrameEventSource) -> Self {
        self.source = source;
        self
    }

    /// Runs the extractor to completion, enqueueing a task per new timestamp.
    ///
    /// On stop the process group is killed and reaped before returning
    /// [`ExtractorError::Cancelled`].
    pub async fn run(
        &self,
        job: &ExtractorJob,
        tasks: &TaskSender,
        progress: &mut ProgressTracker,
        stop: &StopSignal,
    ) -> Result<ExtractorSummary, ExtractorError> {
        if !(job.fps.is_finite() && job.fps > 0.0) || job.frame_size.0 == 0 || job.frame_size.1 == 0 {
            return Err(ExtractorError::MissingMetadata);
        }

        let mut command = build_command(&self.config, job);
        info!(program = %self.config.program.display(), video = %job.video.display(), "starting extractor");
        let mut child = command.spawn().map_err(|source| ExtractorError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;
        let mut guard = ProcessGroupGuard::new(&child);

        let mut stderr_lines = child.stderr.take().map(|err| BufReader::new(err).lines());
        let mut stdout_lines = child.stdout.take().map(|out| BufReader::new(out).lines());
        let image_dir = job.output_dir.join(IMAGE_DIR_NAME);
        let mut processed = HashSet::new();
        let mut poll = tokio::time::interval(POLL_INTERVAL);

        let mut gate = TimestampGate::new(job.fps, job.duration_ms, job.total_frames, Some(job.area));
        let mut summary = ExtractorSummary::default();
        let mut handle = |total_ms: u64, summary: &mut ExtractorSummary, progress: &mut ProgressTracker| {
            summary.timestamps_seen += 1;
            if let Some(task) = gate.observe(total_ms, progress) {
                if tasks.send(task) {
                    summary.tasks_sent += 1;
                }
            }
        };

        let status = loop {
            tokio::select! {
                _ = stop.stopped() => {
                    guard.kill();
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    warn!("extractor cancelled");
                    return Err(ExtractorError::Cancelled);
                }
                line = next_line(&mut stderr_lines) => match line {
                    Some(line) => {
                        if self.source == FrameEventSource::Stderr {
                            if let Some(total_ms) = parse_frame_line(&line) {
                                handle(total_ms, &mut summary, progress);
                                continue;
                            }
                        }
                        debug!(target: "subtitle_extract::extractor", "{}", line.trim());
                    }
                    None => stderr_lines = None,
                },
                line = next_line(&mut stdout_lines) => match line {
                    Some(line) => debug!(target: "subtitle_extract::extractor", "{}", line.trim()),
                    None => stdout_lines = None,
                },
                _ = poll.tick(), if self.source == FrameEventSource::ImageDirectory => {
                    if image_dir.is_dir() {
                        for total_ms in scan_image_dir(&image_dir, &mut processed)? {
                            handle(total_ms, &mut summary, progress);
                        }
                    }
                }
                status = child.wait() => break status?,
            }
        };
        guard.disarm();

        // Lines still buffered after exit; the reader is gone if EOF won the race.
        if let Some(reader) = stderr_lines.as_mut() {
            while let Ok(Some(line)) = reader.next_line().await {
                if self.source == FrameEventSource::Stderr {
                    if let Some(total_ms) = parse_frame_line(&line) {
                        handle(total_ms, &mut summary, progress);
                    }
                }
            }
        }
        if self.source == FrameEventSource::ImageDirectory && image_dir.is_dir() {
            for total_ms in scan_image_dir(&image_dir, &mut processed)? {
                handle(total_ms, &mut summary, progress);
            }
        }

        if !status.success() {
            return Err(ExtractorError::Failed(status));
        }
        info!(
            timestamps = summary.timestamps_seen,
            tasks = summary.tasks_sent,
            "extractor finished"
        );
        Ok(summary)
    }
}

/// Next line from an optional reader; pends forever once the reader is gone
/// so the select loop stops polling it.
async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::dispatch::{TaskMessage, TaskReceiver, task_queue};
    use crate::stage::progress::{ProgressStage, progress_channel};

    fn drain(mut receiver: TaskReceiver) -> Vec<OcrTask> {
        let mut tasks = Vec::new();
        while let Some(message) = receiver.try_recv() {
            if let TaskMessage::Task(task) = message {
                tasks.push(task);
            }
        }
        tasks
    }

    #[test]
    fn parses_timestamps_from_names_and_lines() {
        assert_eq!(parse_frame_timestamp("0_01_02_345__0_0.jpeg"), Some(62_345));
        assert_eq!(parse_frame_timestamp("1_00_00_000__x"), Some(3_600_000));
        assert_eq!(parse_frame_timestamp("0_01_02_345.jpeg"), None);
        assert_eq!(parse_frame_timestamp("frame_0_01_02_345__"), None);
        assert_eq!(parse_frame_line("Frame: 0_00_01_500__0_0\n"), Some(1_500));
        assert_eq!(parse_frame_line("Progress: 10%"), None);
    }

    #[test]
    fn region_is_expressed_as_fractions() {
        let area = Coordinate::new(192, 1728, 810, 1080);
        let [top, bottom, left, right] = region_fractions(&area, 1920, 1080);
        assert!((top - 0.25).abs() < 1e-9);
        assert!(bottom.abs() < 1e-9);
        assert!((left - 0.1).abs() < 1e-9);
        assert!((right - 0.9).abs() < 1e-9);
    }

    #[test]
    fn gate_enqueues_only_increasing_timestamps() {
        let (tx, mut rx) = progress_channel();
        let mut progress = ProgressTracker::new(ProgressStage::FrameExtract, Some(tx));
        let mut gate = TimestampGate::new(25.0, 4_000.0, Some(100), None);
        let frames: Vec<Option<u64>> = [1_000, 1_000, 2_000, 1_500, 3_000, 4_000, 5_000]
            .into_iter()
            .map(|ms| gate.observe(ms, &mut progress).map(|task| task.frame_no))
            .collect();
        assert_eq!(
            frames,
            vec![Some(40), None, Some(80), None, Some(120), Some(160), None]
        );
        assert!(gate.is_finished());
        let mut last = 0.0;
        while let Ok(update) = rx.try_recv() {
            assert!(update.percent >= last);
            last = update.percent;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn gate_drops_timestamps_behind_the_latest() {
        let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
        let mut gate = TimestampGate::new(25.0, 10_000.0, Some(250), None);
        let frames: Vec<Option<u64>> = [2_000, 1_500, 1_800, 2_040]
            .into_iter()
            .map(|ms| gate.observe(ms, &mut progress).map(|task| task.frame_no))
            .collect();
        assert_eq!(frames, vec![Some(80), None, None, Some(81)]);
    }

    #[test]
    fn image_directory_scan_skips_seen_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0_00_02_000__a.jpeg", "0_00_01_000__b.jpeg", "thumbs.db"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut processed = HashSet::new();
        assert_eq!(scan_image_dir(dir.path(), &mut processed).unwrap(), vec![1_000, 2_000]);
        std::fs::write(dir.path().join("0_00_03_000__c.jpeg"), b"").unwrap();
        assert_eq!(scan_image_dir(dir.path(), &mut processed).unwrap(), vec![3_000]);
    }

    #[cfg(unix)]
    fn fake_extractor(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-extractor.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn job(dir: &Path) -> ExtractorJob {
        ExtractorJob {
            video: dir.join("video.mp4"),
            output_dir: dir.to_path_buf(),
            raw_srt: dir.join("raw_extractor.srt"),
            area: Coordinate::new(0, 1920, 900, 1080),
            frame_size: (1920, 1080),
            fps: 25.0,
            total_frames: Some(250),
            duration_ms: 10_000.0,
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn reads_frame_lines_from_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_extractor(
            dir.path(),
            "echo 'Frame: 0_00_01_000__0' >&2\n\
             echo 'Frame: 0_00_01_000__1' >&2\n\
             echo 'some log line'\n\
             echo 'Frame: 0_00_02_000__0' >&2\n\
             echo \"$@\" > \"$(dirname \"$0\")/args.txt\"",
        );
        let driver = ExtractorDriver::new(ExtractorConfig {
            program,
            threads: Some(3),
        })
        .with_source(FrameEventSource::Stderr);
        let (tx, rx) = task_queue();
        let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
        let summary = driver
            .run(&job(dir.path()), &tx, &mut progress, &StopSignal::new())
            .await
            .unwrap();
        assert_eq!(summary.timestamps_seen, 3);
        assert_eq!(summary.tasks_sent, 2);

        let tasks = drain(rx);
        let frames: Vec<u64> = tasks.iter().map(|t| t.frame_no).collect();
        assert_eq!(frames, vec![40, 80]);
        assert_eq!(tasks[0].timestamp, Some(Duration::from_millis(1_000)));

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert!(args.starts_with("-c -r -i "));
        assert!(args.contains("-nthr 3"));
        assert!(args.contains("-te 0.16666"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn fast_exiting_extractor_always_returns() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_extractor(dir.path(), "echo 'Frame: 0_00_00_400__0' >&2\nexit 0");
        let driver = ExtractorDriver::new(ExtractorConfig::new(program))
            .with_source(FrameEventSource::Stderr);
        for run in 0..20 {
            let (tx, _rx) = task_queue();
            let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
            let result = tokio::time::timeout(
                Duration::from_secs(3),
                driver.run(&job(dir.path()), &tx, &mut progress, &StopSignal::new()),
            )
            .await
            .unwrap_or_else(|_| panic!("run {run} did not return"));
            let summary = result.unwrap();
            assert_eq!(summary.timestamps_seen, 1);
            assert_eq!(summary.tasks_sent, 1);
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn failing_extractor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_extractor(dir.path(), "exit 3");
        let driver = ExtractorDriver::new(ExtractorConfig::new(program));
        let (tx, _rx) = task_queue();
        let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
        let result = driver
            .run(&job(dir.path()), &tx, &mut progress, &StopSignal::new())
            .await;
        assert!(matches!(result, Err(ExtractorError::Failed(_))));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn stop_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_extractor(dir.path(), "sleep 30 &\nwait");
        let driver = ExtractorDriver::new(ExtractorConfig::new(program));
        let (tx, _rx) = task_queue();
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.stop();
        });
        let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            driver.run(&job(dir.path()), &tx, &mut progress, &stop),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ExtractorError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ExtractorDriver::new(ExtractorConfig::new(dir.path().join("does-not-exist")));
        let (tx, _rx) = task_queue();
        let mut progress = ProgressTracker::disabled(ProgressStage::FrameExtract);
        let job = ExtractorJob {
            video: dir.path().join("video.mp4"),
            output_dir: dir.path().to_path_buf(),
            raw_srt: dir.path().join("raw.srt"),
            area: Coordinate::new(0, 100, 0, 100),
            frame_size: (100, 100),
            fps: 25.0,
            total_frames: None,
            duration_ms: 1_000.0,
        };
        let result = driver.run(&job, &tx, &mut progress, &StopSignal::new()).await;
        assert!(matches!(result, Err(ExtractorError::Spawn { .. })));
    }
}
