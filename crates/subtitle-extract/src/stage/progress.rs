use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    FrameExtract,
    Ocr,
}

impl ProgressStage {
    pub fn label(&self) -> &'static str {
        match self {
            ProgressStage::FrameExtract => "extract",
            ProgressStage::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    /// Always within `[0, 100]`.
    pub percent: f64,
}

pub type ProgressSender = mpsc::Sender<ProgressUpdate>;

pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ProgressUpdate>) {
    mpsc::channel(PROGRESS_CHANNEL_CAPACITY)
}

/// Reports one stage's progress. Values are clamped and never go backwards.
///
/// At most one update per whole percent is sent. Sending never blocks; an
/// update that does not fit in the channel is superseded by the next one,
/// except the 100% update, which is queued until the channel has room.
#[derive(Debug)]
pub struct ProgressTracker {
    stage: ProgressStage,
    sender: Option<ProgressSender>,
    last: f64,
}

impl ProgressTracker {
    pub fn new(stage: ProgressStage, sender: Option<ProgressSender>) -> Self {
        Self {
            stage,
            sender,
            last: 0.0,
        }
    }

    pub fn disabled(stage: ProgressStage) -> Self {
        Self::new(stage, None)
    }

    pub fn current(&self) -> f64 {
        self.last
    }

    pub fn report(&mut self, percent: f64) {
        if percent.is_nan() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.last {
            return;
        }
        let crossed_whole_percent = percent.floor() > self.last.floor();
        self.last = percent;
        if !crossed_whole_percent {
            return;
        }
        if let Some(sender) = &self.sender {
            let update = ProgressUpdate {
                stage: self.stage,
                percent,
            };
            if percent >= 100.0 {
                send_final(sender, update);
            } else {
                let _ = sender.try_send(update);
            }
        }
    }

    /// `done` out of `total`; unknown totals report nothing.
    pub fn report_fraction(&mut self, done: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|total| *total > 0) {
            self.report(done as f64 / total as f64 * 100.0);
        }
    }

    pub fn finish(&mut self) {
        self.report(100.0);
    }
}

/// Nothing follows the final update, so a full channel must not swallow it.
fn send_final(sender: &ProgressSender, update: ProgressUpdate) {
    let Err(TrySendError::Full(update)) = sender.try_send(update) else {
        return;
    };
    match Handle::try_current() {
        Ok(handle) => {
            let sender = sender.clone();
            handle.spawn(async move {
                let _ = sender.send(update).await;
            });
        }
        Err(_) => {
            let _ = sender.blocking_send(update);
        }
    }
}

/// Draws one bar per stage until every sender is dropped. A bar is finished
/// as soon as its stage reaches 100%.
pub fn spawn_progress_display(mut rx: mpsc::Receiver<ProgressUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let multi = MultiProgress::new();
        let extract = multi.add(stage_bar(ProgressStage::FrameExtract));
        let ocr = multi.add(stage_bar(ProgressStage::Ocr));

        while let Some(update) = rx.recv().await {
            let bar = match update.stage {
                ProgressStage::FrameExtract => &extract,
                ProgressStage::Ocr => &ocr,
            };
            bar.set_position(update.percent.round() as u64);
            if bar.position() >= 100 && !bar.is_finished() {
                bar.finish_with_message("done");
            }
        }

        for bar in [&extract, &ocr] {
            if !bar.is_finished() {
                bar.abandon_with_message("stopped");
            }
        }
    })
}

fn stage_bar(stage: ProgressStage) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(bar_style());
    bar.set_prefix(stage.label());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<8.bold} {bar:40.cyan/blue} {pos:>3.bold}% [{elapsed_precise:.dim}<{eta_precise:.dim}] {msg:.yellow}",
    )
    .expect("invalid progress bar template")
    .progress_chars("█▉▊▋▌▍▎▏ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ProgressUpdate>) -> Vec<f64> {
        let mut values = Vec::new();
        while let Ok(update) = rx.try_recv() {
            values.push(update.percent);
        }
        values
    }

    #[test]
    fn progress_is_clamped_and_monotonic() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut tracker = ProgressTracker::new(ProgressStage::Ocr, Some(tx));
        tracker.report(-5.0);
        tracker.report(10.0);
        tracker.report(5.0);
        tracker.report(f64::NAN);
        tracker.report(250.0);
        tracker.report(100.0);
        assert_eq!(drain(&mut rx), vec![10.0, 100.0]);
        assert_eq!(tracker.current(), 100.0);
    }

    #[test]
    fn fractions_need_a_known_total() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut tracker = ProgressTracker::new(ProgressStage::FrameExtract, Some(tx));
        tracker.report_fraction(5, None);
        tracker.report_fraction(5, Some(0));
        tracker.report_fraction(5, Some(20));
        tracker.finish();
        assert_eq!(drain(&mut rx), vec![25.0, 100.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finish_survives_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut tracker = ProgressTracker::new(ProgressStage::Ocr, Some(tx));
        tracker.report(10.0);
        tracker.report(50.0);
        tracker.finish();
        assert_eq!(rx.recv().await.map(|update| update.percent), Some(10.0));
        let last = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.stage, ProgressStage::Ocr);
    }

    #[test]
    fn disabled_tracker_still_tracks() {
        let mut tracker = ProgressTracker::disabled(ProgressStage::Ocr);
        tracker.report(42.0);
        assert_eq!(tracker.current(), 42.0);
    }
}
