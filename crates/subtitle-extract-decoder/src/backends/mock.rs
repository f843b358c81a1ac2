use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::core::{
    DynFrameProvider, FrameResult, FrameStream, FrameStreamProvider, LumaFrame, VideoMetadata,
    spawn_stream_from_channel,
};

/// Synthetic source: a gradient whose rows shift by one step per frame.
pub struct MockProvider {
    width: u32,
    height: u32,
    frame_count: u64,
    fps: f64,
    frame_interval: Duration,
    channel_capacity: usize,
}

impl MockProvider {
    const DEFAULT_CHANNEL_CAPACITY: usize = 8;
    const DEFAULT_FRAME_COUNT: u64 = 120;
    const DEFAULT_FPS: f64 = 25.0;

    pub fn new(frame_count: u64, fps: f64) -> Self {
        Self {
            width: 640,
            height: 360,
            frame_count,
            fps,
            frame_interval: Duration::ZERO,
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    fn emit_frames(&self, tx: Sender<FrameResult<LumaFrame>>) {
        let row_len = self.width as usize;
        for index in 0..self.frame_count {
            if tx.is_closed() {
                break;
            }
            let mut buffer = vec![0u8; row_len * self.height as usize];
            for (row, chunk) in buffer.chunks_mut(row_len).enumerate() {
                chunk.fill(((row as u64 + index) % 256) as u8);
            }
            let timestamp = Duration::from_nanos((index as f64 * 1e9 / self.fps).round() as u64);
            let frame = LumaFrame::new(self.width, self.height, buffer).map(|frame| {
                frame
                    .with_frame_index(Some(index))
                    .with_timestamp(Some(timestamp))
            });
            if tx.blocking_send(frame).is_err() {
                break;
            }
            if !self.frame_interval.is_zero() {
                thread::sleep(self.frame_interval);
            }
        }
    }
}

impl FrameStreamProvider for MockProvider {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            duration: Some(Duration::from_secs_f64(self.frame_count as f64 / self.fps)),
            fps: Some(self.fps),
            width: Some(self.width),
            height: Some(self.height),
            total_frames: Some(self.frame_count),
        }
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| provider.emit_frames(tx))
    }
}

pub fn boxed_mock(channel_capacity: Option<usize>) -> FrameResult<DynFrameProvider> {
    let mut provider = MockProvider::new(
        MockProvider::DEFAULT_FRAME_COUNT,
        MockProvider::DEFAULT_FPS,
    );
    if let Some(capacity) = channel_capacity {
        provider.channel_capacity = capacity.max(1);
    }
    Ok(Box::new(provider))
}
