use std::fmt;
use std::ops::Deref;

use subtitle_extract_types::LumaFrame;

use crate::error::OcrError;

/// Borrowed view over a luminance plane handed to an engine.
#[derive(Clone)]
pub struct LumaPlane<'a> {
    width: u32,
    height: u32,
    stride: usize,
    data: &'a [u8],
}

impl<'a> LumaPlane<'a> {
    pub fn from_parts(
        width: u32,
        height: u32,
        stride: usize,
        data: &'a [u8],
    ) -> Result<Self, OcrError> {
        let required = stride
            .checked_mul(height as usize)
            .ok_or(OcrError::PlaneOverflow { stride, height })?;
        if data.len() < required {
            return Err(OcrError::InsufficientPlaneData {
                provided: data.len(),
                required,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data: &data[..required],
        })
    }

    /// `LumaFrame` already validated its buffer length.
    pub fn from_frame(frame: &'a LumaFrame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            stride: frame.width() as usize,
            data: frame.data(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Debug for LumaPlane<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LumaPlane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Deref for LumaPlane<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_validates_length() {
        let data = [0u8; 7];
        assert!(matches!(
            LumaPlane::from_parts(2, 2, 4, &data),
            Err(OcrError::InsufficientPlaneData {
                provided: 7,
                required: 8
            })
        ));
        let plane = LumaPlane::from_parts(2, 1, 4, &data).unwrap();
        assert_eq!(plane.len(), 4);
    }

    #[test]
    fn from_frame_borrows_frame_bytes() {
        let frame = LumaFrame::new(2, 2, vec![1, 2, 3, 4]).unwrap();
        let plane = LumaPlane::from_frame(&frame);
        assert_eq!(plane.width(), 2);
        assert_eq!(&plane[..], &[1, 2, 3, 4]);
    }
}
