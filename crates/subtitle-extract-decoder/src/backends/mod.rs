#[cfg(feature = "backend-mock")]
pub mod mock;

#[cfg(feature = "backend-ffmpeg")]
pub mod ffmpeg;
