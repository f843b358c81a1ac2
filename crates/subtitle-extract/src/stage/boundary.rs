//! Detect-mode producer: finds where each subtitle line starts and ends.

use std::sync::Arc;

use subtitle_extract_decoder::{FrameResult, LumaFrame};
use subtitle_extract_ocr::{OcrRequest, TextDetector};
use subtitle_extract_types::Coordinate;
use tracing::{debug, warn};

use super::{ScanError, StopSignal};
use super::compare::OcrComparator;
use super::dispatch::{OcrTask, TaskSender};
use super::progress::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub frames_scanned: u64,
    pub boundaries: Vec<Boundary>,
    pub tasks_sent: u64,
    pub stopped: bool,
}

enum ScanState {
    SeekingStart,
    SeekingEnd { start: u64, anchor: LumaFrame },
}

/// Runs the detector on every frame and compares recognized text to decide
/// cue boundaries. Each boundary frame becomes an OCR task carrying the
/// recognition the comparison already produced.
pub struct BoundaryScanner {
    detector: Arc<dyn TextDetector>,
    comparator: OcrComparator,
    area: Option<Coordinate>,
    total_frames: Option<u64>,
    tasks: TaskSender,
    progress: ProgressTracker,
    stop: StopSignal,
    summary: ScanSummary,
}

impl BoundaryScanner {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        comparator: OcrComparator,
        area: Option<Coordinate>,
        total_frames: Option<u64>,
        tasks: TaskSender,
        progress: ProgressTracker,
        stop: StopSignal,
    ) -> Self {
        Self {
            detector,
            comparator,
            area,
            total_frames,
            tasks,
            progress,
            stop,
            summary: ScanSummary::default(),
        }
    }

    /// Scans frames in order. Must run on a blocking thread when `frames`
    /// pulls from an async stream.
    ///
    /// Only a failure before the first frame is an error; later unreadable
    /// frames count as frames without a subtitle.
    pub fn scan<I>(mut self, frames: I) -> Result<ScanSummary, ScanError>
    where
        I: Iterator<Item = FrameResult<LumaFrame>>,
    {
        let mut frames = frames.peekable();
        let mut state = ScanState::SeekingStart;
        let mut previous: Option<(u64, LumaFrame)> = None;
        let mut position: u64 = 0;

        while let Some(frame) = frames.next() {
            if self.stop.is_stopped() {
                self.summary.stopped = true;
                break;
            }
            let frame = match frame {
                Ok(frame) => frame,
                Err(source) if self.summary.frames_scanned == 0 => {
                    return Err(ScanError {
                        frames_scanned: 0,
                        source,
                    });
                }
                Err(err) => {
                    warn!(frame_no = position, error = %err, "frame unreadable; treating it as empty");
                    position = position.saturating_add(1);
                    self.summary.frames_scanned += 1;
                    if let ScanState::SeekingEnd { start, .. } = state {
                        if let Some((previous_no, previous_frame)) = &previous {
                            self.close(start, *previous_no, previous_frame);
                        }
                        state = ScanState::SeekingStart;
                    }
                    self.progress.report_fraction(position, self.total_frames);
                    continue;
                }
            };
            let frame_no = frame.frame_index().unwrap_or(position);
            position = position.saturating_add(1);
            self.summary.frames_scanned += 1;

            let subtitle = self.has_subtitle(&frame);
            state = match state {
                ScanState::SeekingStart if subtitle => self.open(frame_no, &frame),
                ScanState::SeekingStart => ScanState::SeekingStart,
                ScanState::SeekingEnd { start, anchor } if subtitle => {
                    if self.comparator.similar(start, &anchor, frame_no, &frame) {
                        ScanState::SeekingEnd { start, anchor }
                    } else {
                        if let Some((previous_no, previous_frame)) = &previous {
                            self.close(start, *previous_no, previous_frame);
                        }
                        self.open(frame_no, &frame)
                    }
                }
                ScanState::SeekingEnd { start, .. } => {
                    if let Some((previous_no, previous_frame)) = &previous {
                        self.close(start, *previous_no, previous_frame);
                    }
                    ScanState::SeekingStart
                }
            };

            if frames.peek().is_none() {
                if let ScanState::SeekingEnd { start, .. } = &state {
                    self.close(*start, frame_no, &frame);
                }
            }

            self.progress
                .report_fraction(frame_no.saturating_add(1), self.total_frames);
            previous = Some((frame_no, frame));
        }

        self.comparator.clear();
        Ok(self.summary)
    }

    /// Any detected box when no area is set; otherwise a box fully inside the area.
    fn has_subtitle(&self, frame: &LumaFrame) -> bool {
        match self.detector.detect(&OcrRequest::from_frame(frame)) {
            Ok(boxes) => match self.area {
                Some(area) => boxes
                    .iter()
                    .any(|quad| area.contains(&quad.to_coordinate())),
                None => !boxes.is_empty(),
            },
            Err(err) => {
                warn!(
                    frame = frame.frame_index(),
                    error = %err,
                    "detection failed; treating frame as empty"
                );
                false
            }
        }
    }

    fn open(&mut self, frame_no: u64, frame: &LumaFrame) -> ScanState {
        if let Err(err) = self.comparator.ensure(frame_no, frame) {
            warn!(frame_no, error = %err, "recognition failed on cue start");
        }
        self.enqueue(frame_no, frame);
        ScanState::SeekingEnd {
            start: frame_no,
            anchor: frame.clone(),
        }
    }

    fn close(&mut self, start: u64, end: u64, end_frame: &LumaFrame) {
        debug!(start, end, "subtitle boundary");
        self.summary.boundaries.push(Boundary { start, end });
        if end != start {
            self.enqueue(end, end_frame);
        }
    }

    fn enqueue(&mut self, frame_no: u64, frame: &LumaFrame) {
        let recognition = self
            .comparator
            .get(frame_no)
            .map(|cached| cached.response.clone());
        let task = OcrTask::new(frame_no, self.total_frames)
            .with_recognition(recognition)
            .with_frame(frame.clone())
            .with_region(self.area);
        if self.tasks.send(task) {
            self.summary.tasks_sent += 1;
        }
    }
}
