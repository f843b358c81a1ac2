//! FIFO hand-off between the frame producer and the recognition consumer.

use std::sync::Arc;
use std::time::Duration;

use subtitle_extract_decoder::{FrameCursor, FrameError, FrameResult, LumaFrame};
use subtitle_extract_ocr::{OcrEngine, OcrError, OcrResponse};
use subtitle_extract_types::{Coordinate, Observation};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::StopSignal;
use super::progress::ProgressTracker;
use super::recognize_ranked;
use crate::rawlog::{RawLog, sanitize_text};

/// One frame to turn into observations.
#[derive(Debug, Clone)]
pub struct OcrTask {
    pub total_frames: Option<u64>,
    pub frame_no: u64,
    /// Ranked detector boxes and recognized lines, when the producer already has them.
    pub recognition: Option<OcrResponse>,
    pub frame: Option<LumaFrame>,
    pub timestamp: Option<Duration>,
    pub region: Option<Coordinate>,
}

impl OcrTask {
    pub fn new(frame_no: u64, total_frames: Option<u64>) -> Self {
        Self {
            total_frames,
            frame_no,
            recognition: None,
            frame: None,
            timestamp: None,
            region: None,
        }
    }

    pub fn with_frame(mut self, frame: LumaFrame) -> Self {
        self.timestamp = self.timestamp.or(frame.timestamp());
        self.frame = Some(frame);
        self
    }

    pub fn with_recognition(mut self, recognition: Option<OcrResponse>) -> Self {
        self.recognition = recognition;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_region(mut self, region: Option<Coordinate>) -> Self {
        self.region = region;
        self
    }
}

#[derive(Debug)]
pub enum TaskMessage {
    Task(OcrTask),
    EndOfStream,
}

#[derive(Clone)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<TaskMessage>,
}

impl TaskSender {
    /// Returns `false` once the consumer is gone.
    pub fn send(&self, task: OcrTask) -> bool {
        self.tx.send(TaskMessage::Task(task)).is_ok()
    }

    pub fn finish(&self) {
        let _ = self.tx.send(TaskMessage::EndOfStream);
    }
}

pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<TaskMessage>,
}

impl TaskReceiver {
    /// Next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<TaskMessage> {
        self.rx.try_recv().ok()
    }
}

pub fn task_queue() -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TaskSender { tx }, TaskReceiver { rx })
}

/// Supplies frames for tasks that arrive without one.
pub trait FrameFetcher: Send {
    fn fetch(&mut self, frame_no: u64, timestamp: Option<Duration>)
    -> FrameResult<Option<LumaFrame>>;
}

/// For producers that always attach the frame.
pub struct NoFrames;

impl FrameFetcher for NoFrames {
    fn fetch(&mut self, _: u64, _: Option<Duration>) -> FrameResult<Option<LumaFrame>> {
        Ok(None)
    }
}

impl<I> FrameFetcher for FrameCursor<I>
where
    I: Iterator<Item = FrameResult<LumaFrame>> + Send,
{
    fn fetch(
        &mut self,
        frame_no: u64,
        timestamp: Option<Duration>,
    ) -> FrameResult<Option<LumaFrame>> {
        match timestamp {
            Some(timestamp) => self.frame_at_time(timestamp),
            None => self.frame_at(frame_no),
        }
    }
}

/// Turns recognized lines into observations.
#[derive(Debug, Clone, Copy)]
pub struct ObservationFilter {
    pub drop_score: f32,
    pub deviation_rate: f64,
    pub frame_size: Option<(u32, u32)>,
}

impl ObservationFilter {
    pub fn new(drop_score: f32, deviation_rate: f64, frame_size: Option<(u32, u32)>) -> Self {
        Self {
            drop_score,
            deviation_rate,
            frame_size,
        }
    }

    /// Keeps confident lines inside the task region, widened by the deviation rate.
    pub fn observations(
        &self,
        frame_no: u64,
        response: &OcrResponse,
        region: Option<Coordinate>,
    ) -> Vec<Observation> {
        let bounds = region.map(|area| self.widen(area));
        response
            .texts
            .iter()
            .filter(|line| line.confidence >= self.drop_score)
            .filter_map(|line| {
                let coordinate = line.coordinate();
                if bounds.is_some_and(|bounds| !bounds.contains(&coordinate)) {
                    return None;
                }
                let text = sanitize_text(line.text.trim());
                (!text.is_empty()).then(|| Observation::new(frame_no, coordinate, text))
            })
            .collect()
    }

    fn widen(&self, area: Coordinate) -> Coordinate {
        match self.frame_size {
            Some((width, height)) if self.deviation_rate > 0.0 => area.expand(
                (width as f64 * self.deviation_rate) as i32,
                (height as f64 * self.deviation_rate) as i32,
            ),
            _ => area,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("recognition failed on frame {frame_no}: {source}")]
    Ocr { frame_no: u64, source: OcrError },
    #[error("could not fetch frame {frame_no}: {source}")]
    Frame { frame_no: u64, source: FrameError },
    #[error("frame {frame_no} is not available")]
    MissingFrame { frame_no: u64 },
}

#[derive(Debug, Default)]
pub struct ConsumerOutput {
    pub log: RawLog,
    pub tasks: u64,
    pub failed_tasks: u64,
    pub stopped: bool,
}

pub struct OcrConsumer {
    engine: Arc<dyn OcrEngine>,
    filter: ObservationFilter,
    fetcher: Box<dyn FrameFetcher>,
    progress: ProgressTracker,
    stop: StopSignal,
}

impl OcrConsumer {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        filter: ObservationFilter,
        fetcher: Box<dyn FrameFetcher>,
        progress: ProgressTracker,
        stop: StopSignal,
    ) -> Self {
        Self {
            engine,
            filter,
            fetcher,
            progress,
            stop,
        }
    }

    /// Drains the queue on a blocking thread and hands back the raw log.
    pub fn spawn(self, receiver: TaskReceiver) -> JoinHandle<ConsumerOutput> {
        tokio::task::spawn_blocking(move || self.run(receiver))
    }

    /// Processes tasks in arrival order until the end-of-stream marker.
    ///
    /// Per-task failures are logged and skipped. On stop the remaining queue
    /// is discarded and the log collected so far is returned.
    pub fn run(mut self, mut receiver: TaskReceiver) -> ConsumerOutput {
        let mut output = ConsumerOutput::default();
        while let Some(message) = receiver.rx.blocking_recv() {
            if self.stop.is_stopped() {
                output.stopped = true;
                break;
            }
            let task = match message {
                TaskMessage::Task(task) => task,
                TaskMessage::EndOfStream => {
                    self.progress.finish();
                    break;
                }
            };

            output.tasks += 1;
            let frame_no = task.frame_no;
            let total_frames = task.total_frames;
            match self.handle_task(task) {
                Ok(observations) => {
                    debug!(frame_no, lines = observations.len(), "recognized frame");
                    output.log.extend(observations);
                }
                Err(err) => {
                    output.failed_tasks += 1;
                    warn!(frame_no, error = %err, "skipping frame");
                }
            }
            self.progress.report_fraction(frame_no, total_frames);
        }
        receiver.rx.close();

        info!(
            tasks = output.tasks,
            failed = output.failed_tasks,
            observations = output.log.len(),
            stopped = output.stopped,
            "recognition finished"
        );
        output
    }

    fn handle_task(&mut self, task: OcrTask) -> Result<Vec<Observation>, DispatchError> {
        let OcrTask {
            frame_no,
            recognition,
            frame,
            timestamp,
            region,
            ..
        } = task;

        let response = match recognition {
            Some(response) => response,
            None => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => self
                        .fetcher
                        .fetch(frame_no, timestamp)
                        .map_err(|source| DispatchError::Frame { frame_no, source })?
                        .ok_or(DispatchError::MissingFrame { frame_no })?,
                };
                recognize_ranked(self.engine.as_ref(), &frame)
                    .map_err(|source| DispatchError::Ocr { frame_no, source })?
            }
        };
        Ok(self.filter.observations(frame_no, &response, region))
    }
}

#[cfg(test)]
mod tests {
    use subtitle_extract_ocr::{OcrText, ReplayOcrEngine};
    use subtitle_extract_types::Quad;

    use super::*;
    use crate::stage::progress::ProgressStage;

    fn line(coordinate: Coordinate, text: &str, confidence: f32) -> OcrText {
        OcrText::new(Quad::from_coordinate(&coordinate), text, confidence)
    }

    fn frame(index: u64) -> LumaFrame {
        LumaFrame::new(4, 4, vec![0; 16])
            .unwrap()
            .with_frame_index(Some(index))
            .with_timestamp(Some(Duration::from_millis(index * 40)))
    }

    fn consumer(engine: ReplayOcrEngine, fetcher: Box<dyn FrameFetcher>) -> OcrConsumer {
        OcrConsumer::new(
            Arc::new(engine),
            ObservationFilter::new(0.75, 0.0, None),
            fetcher,
            ProgressTracker::disabled(ProgressStage::Ocr),
            StopSignal::new(),
        )
    }

    #[test]
    fn filter_drops_low_confidence_and_out_of_area_lines() {
        let area = Coordinate::new(0, 1000, 400, 500);
        let response = OcrResponse::new(vec![
            line(Coordinate::new(10, 200, 410, 440), "keep\tme", 0.9),
            line(Coordinate::new(10, 200, 410, 440), "blurry", 0.5),
            line(Coordinate::new(900, 950, 10, 30), "LOGO", 0.99),
            line(Coordinate::new(10, 200, 450, 520), "edge", 0.9),
        ]);
        let filter = ObservationFilter::new(0.75, 0.0, Some((1000, 1000)));
        let kept = filter.observations(7, &response, Some(area));
        assert_eq!(kept, vec![Observation::new(7, Coordinate::new(10, 200, 410, 440), "keep me")]);

        let widened = ObservationFilter::new(0.75, 0.05, Some((1000, 1000)));
        let kept = widened.observations(7, &response, Some(area));
        assert_eq!(kept.len(), 2);

        let everything = filter.observations(7, &response, None);
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn consumer_prefers_attached_recognition_then_frame_then_fetcher() {
        let recorded = ReplayOcrEngine::from_responses([
            (2, OcrResponse::new(vec![line(Coordinate::new(0, 100, 0, 20), "from frame", 0.9)])),
            (3, OcrResponse::new(vec![line(Coordinate::new(0, 100, 0, 20), "fetched", 0.9)])),
        ]);
        let frames = (0..5).map(|i| Ok(frame(i)));
        let worker = consumer(recorded, Box::new(FrameCursor::new(frames)));

        let (tx, rx) = task_queue();
        let attached = OcrResponse::new(vec![line(Coordinate::new(0, 100, 0, 20), "attached", 0.9)]);
        tx.send(OcrTask::new(1, Some(5)).with_recognition(Some(attached)));
        tx.send(OcrTask::new(2, Some(5)).with_frame(frame(2)));
        tx.send(OcrTask::new(3, Some(5)));
        tx.finish();

        let output = worker.run(rx);
        let texts: Vec<(u64, &str)> = output
            .log
            .observations()
            .iter()
            .map(|o| (o.frame_no, o.text.as_str()))
            .collect();
        assert_eq!(texts, vec![(1, "attached"), (2, "from frame"), (3, "fetched")]);
        assert_eq!(output.tasks, 3);
        assert!(!output.stopped);
    }

    #[test]
    fn missing_frames_are_skipped() {
        let worker = consumer(ReplayOcrEngine::default(), Box::new(NoFrames));
        let (tx, rx) = task_queue();
        tx.send(OcrTask::new(9, None));
        tx.finish();
        let output = worker.run(rx);
        assert_eq!(output.failed_tasks, 1);
        assert!(output.log.is_empty());
    }

    #[test]
    fn stop_discards_the_rest_of_the_queue() {
        let stop = StopSignal::new();
        let worker = OcrConsumer::new(
            Arc::new(ReplayOcrEngine::default()),
            ObservationFilter::new(0.75, 0.0, None),
            Box::new(NoFrames),
            ProgressTracker::disabled(ProgressStage::Ocr),
            stop.clone(),
        );
        let (tx, rx) = task_queue();
        stop.stop();
        tx.send(OcrTask::new(1, None).with_frame(frame(1)));
        tx.finish();
        let output = worker.run(rx);
        assert!(output.stopped);
        assert_eq!(output.tasks, 0);
        assert!(!tx.send(OcrTask::new(2, None)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawned_consumer_reports_progress() {
        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        let worker = OcrConsumer::new(
            Arc::new(ReplayOcrEngine::default()),
            ObservationFilter::new(0.75, 0.0, None),
            Box::new(NoFrames),
            ProgressTracker::new(ProgressStage::Ocr, Some(progress_tx)),
            StopSignal::new(),
        );
        let (tx, rx) = task_queue();
        let handle = worker.spawn(rx);
        tx.send(OcrTask::new(5, Some(10)).with_frame(frame(5)));
        tx.finish();
        let output = handle.await.unwrap();
        assert_eq!(output.tasks, 1);
        let mut seen = Vec::new();
        while let Ok(update) = progress_rx.try_recv() {
            seen.push(update.percent);
        }
        assert_eq!(seen, vec![50.0, 100.0]);
    }
}
