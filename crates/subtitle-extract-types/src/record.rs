use serde::{Deserialize, Serialize};

use crate::geometry::Coordinate;

/// One recognized line of text in one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub frame_no: u64,
    pub coordinate: Coordinate,
    pub text: String,
}

impl Observation {
    pub fn new(frame_no: u64, coordinate: Coordinate, text: impl Into<String>) -> Self {
        Self {
            frame_no,
            coordinate,
            text: text.into(),
        }
    }
}

/// Merged cue expressed in frame numbers. `start_frame <= end_frame`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueCandidate {
    pub start_frame: u64,
    pub end_frame: u64,
    pub text: String,
}

impl CueCandidate {
    pub fn new(start_frame: u64, end_frame: u64, text: impl Into<String>) -> Self {
        Self {
            start_frame,
            end_frame,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionCandidate {
    pub coordinate: Coordinate,
    pub occurrence_count: usize,
}

/// Most frequent vertical range seen in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandCandidate {
    pub ymin: i32,
    pub ymax: i32,
    pub occurrence_count: usize,
}
