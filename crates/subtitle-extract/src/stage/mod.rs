use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use subtitle_extract_ocr::{OcrEngine, OcrError, OcrRequest, OcrResponse};
use subtitle_extract_types::{FrameError, LumaFrame};
use thiserror::Error;
use tokio::sync::Notify;

pub mod boundary;
pub mod compare;
pub mod dispatch;
pub mod extractor;
pub mod progress;
pub mod sampler;

/// Cooperative cancellation shared by the producer, the consumer and the
/// external extractor. Once stopped it stays stopped.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopSignal::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// The frame source failed part way through a producer run.
#[derive(Debug, Error)]
#[error("frame source failed after {frames_scanned} frames: {source}")]
pub struct ScanError {
    pub frames_scanned: u64,
    #[source]
    pub source: FrameError,
}

/// Recognizes a frame and puts the lines into reading order.
pub(crate) fn recognize_ranked(
    engine: &dyn OcrEngine,
    frame: &LumaFrame,
) -> Result<OcrResponse, OcrError> {
    engine
        .recognize(&OcrRequest::from_frame(frame))
        .map(OcrResponse::into_ranked)
}
