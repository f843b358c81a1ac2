use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub type FrameResult<T> = Result<T, FrameError>;

/// Brightness plane of one decoded frame, rows packed back to back.
///
/// Detection and recognition only look at luminance, so decoders drop chroma
/// and any row padding before a frame leaves the backend. Cloning shares the
/// pixels.
#[derive(Clone)]
pub struct LumaFrame {
    width: u32,
    height: u32,
    frame_index: Option<u64>,
    timestamp: Option<Duration>,
    pixels: Arc<[u8]>,
}

impl fmt::Debug for LumaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LumaFrame({}x{}", self.width, self.height)?;
        if let Some(index) = self.frame_index {
            write!(f, " #{index}")?;
        }
        if let Some(timestamp) = self.timestamp {
            write!(f, " @{timestamp:?}")?;
        }
        f.write_str(")")
    }
}

impl LumaFrame {
    /// `pixels` must hold exactly `width * height` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> FrameResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or(FrameError::Oversized { width, height })?;
        if pixels.len() != expected {
            return Err(FrameError::PlaneSize {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            frame_index: None,
            timestamp: None,
            pixels: pixels.into(),
        })
    }

    pub fn with_frame_index(mut self, index: Option<u64>) -> Self {
        self.frame_index = index;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Position in decode order, when the backend knows it.
    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        self.pixels.chunks_exact(self.width.max(1) as usize).nth(y as usize)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("decoder backend {backend} is not compiled into this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} decoder failed: {message}")]
    BackendFailure {
        backend: &'static str,
        message: String,
    },

    #[error("decoder configuration: {message}")]
    Configuration { message: String },

    #[error("{width}x{height} luma plane needs {} bytes, got {actual}", *width as usize * *height as usize)]
    PlaneSize {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("{width}x{height} frame is too large to address")]
    Oversized { width: u32, height: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn unsupported(backend: &'static str) -> Self {
        Self::Unsupported { backend }
    }

    pub fn backend_failure(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            backend,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
