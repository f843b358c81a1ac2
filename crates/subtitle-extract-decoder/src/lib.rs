pub mod backends;
pub mod config;
pub mod core;

pub use config::{BACKEND_ENV, Backend, CHANNEL_CAPACITY_ENV, DecoderConfig};
pub use core::{
    BlockingFrames, DynFrameProvider, FrameCursor, FrameError, FrameResult, FrameStream,
    FrameStreamProvider, LumaFrame, VideoMetadata, spawn_stream_from_channel,
};
