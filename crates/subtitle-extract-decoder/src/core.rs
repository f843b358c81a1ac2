use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::unfold;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, Sender};
use tokio_stream::StreamExt;

pub use subtitle_extract_types::{FrameError, FrameResult, LumaFrame};

pub type FrameStream = Pin<Box<dyn Stream<Item = FrameResult<LumaFrame>> + Send>>;

pub type DynFrameProvider = Box<dyn FrameStreamProvider>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoMetadata {
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub total_frames: Option<u64>,
}

impl VideoMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration_ms(&self) -> Option<f64> {
        if let Some(duration) = self.duration {
            return Some(duration.as_secs_f64() * 1000.0);
        }
        match (self.total_frames, self.fps) {
            (Some(total), Some(fps)) if fps > 0.0 => Some(total as f64 / fps * 1000.0),
            _ => None,
        }
    }

    pub fn calculate_total_frames(&self) -> Option<u64> {
        if let Some(total) = self.total_frames {
            return Some(total);
        }

        if let (Some(duration), Some(fps)) = (self.duration, self.fps) {
            let total = (duration.as_secs_f64() * fps).round();
            if total.is_finite() && total >= 0.0 {
                return Some(total as u64);
            }
        }

        None
    }
}

pub trait FrameStreamProvider: Send + 'static {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata::default()
    }

    fn into_stream(self: Box<Self>) -> FrameStream;
}

pub fn spawn_stream_from_channel(
    capacity: usize,
    task: impl FnOnce(Sender<FrameResult<LumaFrame>>) + Send + 'static,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::task::spawn_blocking(move || task(tx));
    let stream = unfold(rx, |mut receiver| async {
        receiver.recv().await.map(|item| (item, receiver))
    });
    Box::pin(stream)
}

/// Pulls a [`FrameStream`] from synchronous code.
///
/// Must run on a blocking thread (for example inside `spawn_blocking`);
/// calling `next` from an async worker thread panics.
pub struct BlockingFrames {
    stream: FrameStream,
    handle: Handle,
}

impl BlockingFrames {
    pub fn new(stream: FrameStream, handle: Handle) -> Self {
        Self { stream, handle }
    }
}

impl Iterator for BlockingFrames {
    type Item = FrameResult<LumaFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = &mut self.stream;
        self.handle.block_on(stream.next())
    }
}

/// Forward-only random access over a decoded frame sequence.
///
/// Requests must be non-decreasing; a request behind the cursor only succeeds
/// when it names the frame the cursor is currently parked on.
pub struct FrameCursor<I> {
    frames: I,
    current: Option<LumaFrame>,
    position: u64,
    exhausted: bool,
}

impl<I> FrameCursor<I>
where
    I: Iterator<Item = FrameResult<LumaFrame>>,
{
    pub fn new(frames: I) -> Self {
        Self {
            frames,
            current: None,
            position: 0,
            exhausted: false,
        }
    }

    /// Frame whose index equals `index`, or `None` once the source is past it.
    pub fn frame_at(&mut self, index: u64) -> FrameResult<Option<LumaFrame>> {
        loop {
            if let Some(frame) = &self.current {
                let current_index = frame.frame_index().unwrap_or(self.position);
                if current_index == index {
                    return Ok(Some(frame.clone()));
                }
                if current_index > index {
                    return Ok(None);
                }
            }
            if !self.advance()? {
                return Ok(None);
            }
        }
    }

    /// First frame whose timestamp is at or after `timestamp`.
    pub fn frame_at_time(&mut self, timestamp: Duration) -> FrameResult<Option<LumaFrame>> {
        loop {
            if let Some(frame) = &self.current {
                if frame.timestamp().is_some_and(|ts| ts >= timestamp) {
                    return Ok(Some(frame.clone()));
                }
            }
            if !self.advance()? {
                return Ok(None);
            }
        }
    }

    fn advance(&mut self) -> FrameResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.frames.next() {
            Some(Ok(frame)) => {
                if self.current.is_some() {
                    self.position = self.position.saturating_add(1);
                }
                self.current = Some(frame);
                Ok(true)
            }
            Some(Err(err)) => {
                self.exhausted = true;
                Err(err)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }
}
