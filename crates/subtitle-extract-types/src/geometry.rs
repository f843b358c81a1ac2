use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned box in pixel space, stored as `(xmin, xmax, ymin, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

impl Coordinate {
    /// Builds a box, swapping bounds so that `xmin <= xmax` and `ymin <= ymax`.
    pub fn new(xmin: i32, xmax: i32, ymin: i32, ymax: i32) -> Self {
        Self {
            xmin: xmin.min(xmax),
            xmax: xmin.max(xmax),
            ymin: ymin.min(ymax),
            ymax: ymin.max(ymax),
        }
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    pub fn band(&self) -> (i32, i32) {
        (self.ymin, self.ymax)
    }

    /// Every component differs by strictly less than the tolerance on its axis.
    pub fn is_similar(&self, other: &Coordinate, tolerance: Tolerance) -> bool {
        (self.xmin - other.xmin).abs() < tolerance.x
            && (self.xmax - other.xmax).abs() < tolerance.x
            && (self.ymin - other.ymin).abs() < tolerance.y
            && (self.ymax - other.ymax).abs() < tolerance.y
    }

    /// `inner` lies fully inside `self`, edges included.
    pub fn contains(&self, inner: &Coordinate) -> bool {
        self.xmin <= inner.xmin
            && inner.xmax <= self.xmax
            && self.ymin <= inner.ymin
            && inner.ymax <= self.ymax
    }

    pub fn expand(&self, dx: i32, dy: i32) -> Coordinate {
        Coordinate::new(
            self.xmin - dx,
            self.xmax + dx,
            self.ymin - dy,
            self.ymax + dy,
        )
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.xmin, self.xmax, self.ymin, self.ymax
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed coordinate '{input}': {reason}")]
pub struct ParseCoordinateError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for Coordinate {
    type Err = ParseCoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseCoordinateError {
            input: s.to_string(),
            reason,
        };
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| fail("expected parentheses"))?;
        let mut values = [0i32; 4];
        let mut parts = inner.split(',');
        for slot in values.iter_mut() {
            let part = parts.next().ok_or_else(|| fail("expected four values"))?;
            *slot = part
                .trim()
                .parse()
                .map_err(|_| fail("value is not an integer"))?;
        }
        if parts.next().is_some() {
            return Err(fail("expected four values"));
        }
        let [xmin, xmax, ymin, ymax] = values;
        Ok(Coordinate::new(xmin, xmax, ymin, ymax))
    }
}

/// Per-axis pixel tolerance used when deciding whether two boxes are the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    pub x: i32,
    pub y: i32,
}

impl Tolerance {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { x: 100, y: 50 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Detector output: four corners, clockwise from top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    /// Axis-aligned quad covering `coordinate`.
    pub fn from_coordinate(coordinate: &Coordinate) -> Self {
        let Coordinate {
            xmin,
            xmax,
            ymin,
            ymax,
        } = *coordinate;
        Quad([
            Point::new(xmin as f32, ymin as f32),
            Point::new(xmax as f32, ymin as f32),
            Point::new(xmax as f32, ymax as f32),
            Point::new(xmin as f32, ymax as f32),
        ])
    }

    /// Reduces the quad to the largest axis-aligned box inside it:
    /// `xmin = max(x1, x4)`, `xmax = min(x2, x3)`, `ymin = max(y1, y2)`, `ymax = min(y3, y4)`.
    pub fn to_coordinate(&self) -> Coordinate {
        let [p1, p2, p3, p4] = self.0;
        let (x1, y1) = (p1.x as i32, p1.y as i32);
        let (x2, y2) = (p2.x as i32, p2.y as i32);
        let (x3, y3) = (p3.x as i32, p3.y as i32);
        let (x4, y4) = (p4.x as i32, p4.y as i32);
        Coordinate::new(x1.max(x4), x2.min(x3), y1.max(y2), y3.min(y4))
    }
}
