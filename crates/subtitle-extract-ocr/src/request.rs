use subtitle_extract_types::LumaFrame;

use crate::plane::LumaPlane;

/// Frame handed to a detector or recognizer.
#[derive(Debug)]
pub struct OcrRequest<'a> {
    plane: LumaPlane<'a>,
    frame_index: Option<u64>,
}

impl<'a> OcrRequest<'a> {
    pub fn new(plane: LumaPlane<'a>, frame_index: Option<u64>) -> Self {
        Self { plane, frame_index }
    }

    pub fn from_frame(frame: &'a LumaFrame) -> Self {
        Self::new(LumaPlane::from_frame(frame), frame.frame_index())
    }

    pub fn plane(&self) -> &LumaPlane<'a> {
        &self.plane
    }

    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }
}
