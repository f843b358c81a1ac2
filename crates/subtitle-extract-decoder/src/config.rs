//! Which decoder opens the input video, and how far it may run ahead.

use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::{DynFrameProvider, FrameError, FrameResult};

/// Forces a backend and disables fallback to the others.
pub const BACKEND_ENV: &str = "SUBEXTRACT_BACKEND";
/// Frames a backend may decode before the scan catches up.
pub const CHANNEL_CAPACITY_ENV: &str = "SUBEXTRACT_CHANNEL_CAPACITY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Ffmpeg,
    Mock,
}

impl Backend {
    /// Preference order when nothing is forced.
    const PREFERRED: [Backend; 2] = [Backend::Ffmpeg, Backend::Mock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ffmpeg => "ffmpeg",
            Backend::Mock => "mock",
        }
    }

    /// Compiled in and, for ffmpeg, able to load its libraries.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Ffmpeg => ffmpeg_usable(),
            Backend::Mock => cfg!(feature = "backend-mock"),
        }
    }

    /// Usable backends, most preferred first.
    pub fn available() -> Vec<Backend> {
        Self::PREFERRED
            .into_iter()
            .filter(|backend| backend.is_available())
            .collect()
    }
}

impl FromStr for Backend {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::PREFERRED
            .into_iter()
            .find(|backend| backend.as_str() == name)
            .ok_or_else(|| FrameError::configuration(format!("unknown decoder backend '{name}'")))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "backend-ffmpeg")]
fn ffmpeg_usable() -> bool {
    static USABLE: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *USABLE.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "ffmpeg libraries failed to load; backend disabled");
            false
        }
    })
}

#[cfg(not(feature = "backend-ffmpeg"))]
fn ffmpeg_usable() -> bool {
    false
}

fn parse_capacity(raw: &str) -> FrameResult<NonZeroUsize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            FrameError::configuration(format!(
                "{CHANNEL_CAPACITY_ENV}='{raw}' is not a positive integer"
            ))
        })
}

/// Decoder settings for one input video.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub backend: Backend,
    pub input: PathBuf,
    pub channel_capacity: Option<NonZeroUsize>,
}

impl DecoderConfig {
    /// Uses the most preferred usable backend. With none usable, ffmpeg is
    /// kept so that opening reports what is missing.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::available()
                .first()
                .copied()
                .unwrap_or(Backend::Ffmpeg),
            input: input.into(),
            channel_capacity: None,
        }
    }

    /// Applies [`BACKEND_ENV`] and [`CHANNEL_CAPACITY_ENV`]. Returns whether
    /// the environment forced the backend.
    pub fn apply_env(&mut self) -> FrameResult<bool> {
        if let Ok(raw) = env::var(CHANNEL_CAPACITY_ENV) {
            self.channel_capacity = Some(parse_capacity(&raw)?);
        }
        match env::var(BACKEND_ENV) {
            Ok(raw) => {
                self.backend = raw.parse()?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    pub fn open(&self) -> FrameResult<DynFrameProvider> {
        let capacity = self.channel_capacity.map(NonZeroUsize::get);
        match self.backend {
            #[cfg(feature = "backend-ffmpeg")]
            Backend::Ffmpeg => crate::backends::ffmpeg::boxed_ffmpeg(&self.input, capacity),
            #[cfg(feature = "backend-mock")]
            Backend::Mock => crate::backends::mock::boxed_mock(capacity),
            #[allow(unreachable_patterns)]
            other => Err(FrameError::unsupported(other.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_loosely() {
        assert_eq!(" FFmpeg ".parse::<Backend>().unwrap(), Backend::Ffmpeg);
        assert_eq!("mock".parse::<Backend>().unwrap(), Backend::Mock);
        let err = "gstreamer".parse::<Backend>().unwrap_err();
        assert!(err.to_string().contains("gstreamer"));
    }

    #[test]
    fn capacity_must_be_positive() {
        assert_eq!(parse_capacity(" 16 ").unwrap().get(), 16);
        assert!(parse_capacity("0").is_err());
        assert!(parse_capacity("-3").is_err());
        assert!(parse_capacity("lots").is_err());
    }

    #[test]
    fn new_config_keeps_the_input() {
        let config = DecoderConfig::new("/videos/movie.mp4");
        assert_eq!(config.input, PathBuf::from("/videos/movie.mp4"));
        assert!(config.channel_capacity.is_none());
        if !Backend::available().is_empty() {
            assert!(config.backend.is_available());
        }
    }

    #[cfg(feature = "backend-mock")]
    #[test]
    fn mock_backend_opens_without_a_file() {
        let mut config = DecoderConfig::new("/does/not/exist.mp4");
        config.backend = Backend::Mock;
        config.channel_capacity = NonZeroUsize::new(2);
        assert!(config.open().is_ok());
        assert!(Backend::available().contains(&Backend::Mock));
    }
}
