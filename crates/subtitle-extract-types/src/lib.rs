//! Shared domain models for the subtitle-extract workspace.
//!
//! This crate holds the lightweight values passed between the decoder, the
//! OCR engine boundary and the reconstruction pipeline. Keep it free of
//! platform-specific dependencies so every crate can depend on it.

mod frame;
mod geometry;
mod record;

pub use frame::{FrameError, FrameResult, LumaFrame};
pub use geometry::{Coordinate, ParseCoordinateError, Point, Quad, Tolerance};
pub use record::{BandCandidate, CueCandidate, Observation, RegionCandidate};
