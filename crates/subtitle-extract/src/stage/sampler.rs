use subtitle_extract_decoder::{FrameResult, LumaFrame};
use subtitle_extract_types::Coordinate;
use tracing::{debug, warn};

use super::{ScanError, StopSignal};
use super::dispatch::{OcrTask, TaskSender};
use super::progress::ProgressTracker;

/// Frames between two samples when taking `per_second` samples each second.
pub fn sample_step(fps: f64, per_second: u32) -> u64 {
    if per_second == 0 || !fps.is_finite() || fps <= 0.0 {
        return 1;
    }
    ((fps / per_second as f64).floor() as u64).max(1)
}

#[derive(Debug, Default)]
pub struct SampleSummary {
    pub frames_scanned: u64,
    pub tasks_sent: u64,
    pub stopped: bool,
}

/// Fps-mode producer: every `step`-th frame, starting with the first, goes to
/// recognition as is.
pub struct FrameSampler {
    step: u64,
    area: Option<Coordinate>,
    total_frames: Option<u64>,
    tasks: TaskSender,
    progress: ProgressTracker,
    stop: StopSignal,
}

impl FrameSampler {
    pub fn new(
        step: u64,
        area: Option<Coordinate>,
        total_frames: Option<u64>,
        tasks: TaskSender,
        progress: ProgressTracker,
        stop: StopSignal,
    ) -> Self {
        Self {
            step: step.max(1),
            area,
            total_frames,
            tasks,
            progress,
            stop,
        }
    }

    pub fn run<I>(mut self, frames: I) -> Result<SampleSummary, ScanError>
    where
        I: Iterator<Item = FrameResult<LumaFrame>>,
    {
        let mut summary = SampleSummary::default();
        for (position, frame) in frames.enumerate() {
            if self.stop.is_stopped() {
                summary.stopped = true;
                break;
            }
            let frame = match frame {
                Ok(frame) => frame,
                Err(source) if summary.frames_scanned == 0 => {
                    return Err(ScanError {
                        frames_scanned: 0,
                        source,
                    });
                }
                Err(err) => {
                    warn!(frame_no = position, error = %err, "frame unreadable; skipping it");
                    summary.frames_scanned += 1;
                    continue;
                }
            };
            let frame_no = frame.frame_index().unwrap_or(position as u64);
            summary.frames_scanned += 1;

            if (position as u64) % self.step == 0 {
                let task = OcrTask::new(frame_no, self.total_frames)
                    .with_frame(frame)
                    .with_region(self.area);
                if !self.tasks.send(task) {
                    debug!(frame_no, "task queue closed; sampling stopped");
                    break;
                }
                summary.tasks_sent += 1;
            }
            self.progress
                .report_fraction(frame_no.saturating_add(1), self.total_frames);
        }
        Ok(summary)
    }
}
