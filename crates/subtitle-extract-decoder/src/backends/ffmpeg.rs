#![cfg(feature = "backend-ffmpeg")]

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use tokio::sync::mpsc;

use crate::core::{
    DynFrameProvider, FrameError, FrameResult, FrameStream, FrameStreamProvider, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};

const BACKEND_NAME: &str = "ffmpeg";
const DEFAULT_CHANNEL_CAPACITY: usize = 8;

fn backend_error(err: impl Display) -> FrameError {
    FrameError::backend_failure(BACKEND_NAME, err.to_string())
}

/// An opened container with its best video stream resolved.
struct VideoInput {
    context: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
}

impl VideoInput {
    fn open(path: &Path) -> FrameResult<Self> {
        let context = ffmpeg::format::input(&path).map_err(backend_error)?;
        let stream = context
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| backend_error("no video stream found"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        Ok(Self {
            context,
            stream_index,
            time_base,
        })
    }

    fn stream(&self) -> FrameResult<ffmpeg::format::stream::Stream<'_>> {
        self.context
            .stream(self.stream_index)
            .ok_or_else(|| backend_error("video stream disappeared"))
    }

    fn decoder(&self) -> FrameResult<ffmpeg::decoder::Video> {
        ffmpeg::codec::context::Context::from_parameters(self.stream()?.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(backend_error)
    }

    fn metadata(&self) -> FrameResult<VideoMetadata> {
        let stream = self.stream()?;
        let rate = stream.avg_frame_rate();
        let fps = (rate.denominator() != 0)
            .then(|| f64::from(rate))
            .filter(|fps| fps.is_finite() && *fps > 0.0);
        // AV_TIME_BASE units, i.e. microseconds.
        let duration = u64::try_from(self.context.duration())
            .ok()
            .filter(|micros| *micros > 0)
            .map(Duration::from_micros);
        let total_frames = u64::try_from(stream.frames()).ok().filter(|n| *n > 0);
        let decoder = self.decoder().ok();
        Ok(VideoMetadata {
            duration,
            fps,
            width: decoder.as_ref().map(|video| video.width()),
            height: decoder.as_ref().map(|video| video.height()),
            total_frames,
        })
    }
}

fn pts_to_duration(pts: Option<i64>, time_base: ffmpeg::Rational) -> Option<Duration> {
    pts.map(|pts| Duration::from_secs_f64((pts as f64 * f64::from(time_base)).max(0.0)))
}

/// Decodes a file and hands out its luma plane, one frame at a time.
pub struct FfmpegProvider {
    input: PathBuf,
    metadata: VideoMetadata,
    channel_capacity: usize,
}

impl FfmpegProvider {
    pub fn open<P: AsRef<Path>>(path: P, channel_capacity: Option<usize>) -> FrameResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file {} does not exist", path.display()),
            )));
        }
        ffmpeg::init().map_err(backend_error)?;
        let metadata = VideoInput::open(path)?.metadata()?;
        Ok(Self {
            input: path.to_path_buf(),
            metadata,
            channel_capacity: channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1),
        })
    }

    fn decode_into(&self, tx: &mpsc::Sender<FrameResult<LumaFrame>>) -> FrameResult<()> {
        let mut input = VideoInput::open(&self.input)?;
        let mut decoder = input.decoder()?;
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::pixel::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::FAST_BILINEAR,
        )
        .map_err(backend_error)?;

        let stream_index = input.stream_index;
        let time_base = input.time_base;
        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut gray = ffmpeg::util::frame::Video::empty();
        let mut next_index: u64 = 0;

        // Ok(false) once the receiver is gone.
        let mut forward = |decoder: &mut ffmpeg::decoder::Video| -> FrameResult<bool> {
            loop {
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        scaler.run(&decoded, &mut gray).map_err(backend_error)?;
                        let timestamp = pts_to_duration(decoded.pts(), time_base);
                        let frame =
                            copy_luma(&gray, timestamp)?.with_frame_index(Some(next_index));
                        next_index += 1;
                        if tx.blocking_send(Ok(frame)).is_err() {
                            return Ok(false);
                        }
                    }
                    Err(ffmpeg::Error::Eof) => return Ok(true),
                    Err(err) if is_retryable_error(&err) => return Ok(true),
                    Err(err) => return Err(backend_error(err)),
                }
            }
        };

        for (stream, packet) in input.context.packets() {
            if stream.index() != stream_index {
                continue;
            }
            match decoder.send_packet(&packet) {
                Err(err) if !is_retryable_error(&err) => return Err(backend_error(err)),
                _ => {}
            }
            if !forward(&mut decoder)? {
                return Ok(());
            }
        }

        decoder.send_eof().map_err(backend_error)?;
        forward(&mut decoder)?;
        Ok(())
    }
}

impl FrameStreamProvider for FfmpegProvider {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            if let Err(err) = provider.decode_into(&tx) {
                let _ = tx.blocking_send(Err(err));
            }
        })
    }
}

/// Copies the visible part of each row, dropping the decoder's row padding.
fn copy_luma(
    frame: &ffmpeg::util::frame::Video,
    timestamp: Option<Duration>,
) -> FrameResult<LumaFrame> {
    let plane = frame.data(0);
    let stride = frame.stride(0);
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let mut buffer = Vec::with_capacity(width * height);
    for row in plane.chunks(stride).take(height) {
        buffer.extend_from_slice(&row[..width.min(row.len())]);
    }
    Ok(LumaFrame::new(frame.width(), frame.height(), buffer)?.with_timestamp(timestamp))
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

pub fn boxed_ffmpeg<P: AsRef<Path>>(
    path: P,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameProvider> {
    Ok(Box::new(FfmpegProvider::open(path, channel_capacity)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_error() {
        let result = FfmpegProvider::open("/tmp/nonexistent-subtitle-extract-input.mp4", None);
        assert!(matches!(result, Err(FrameError::Io(_))));
    }
}
