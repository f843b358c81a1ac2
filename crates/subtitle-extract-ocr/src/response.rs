use subtitle_extract_types::{Coordinate, Quad};

/// Vertical distance within which two recognized lines count as the same row.
const ROW_STEP_PX: i32 = 10;

/// One recognized text line.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub quad: Quad,
    pub text: String,
    pub confidence: f32,
}

impl OcrText {
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.quad.to_coordinate()
    }
}

/// Collection of OCR results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResponse {
    pub texts: Vec<OcrText>,
}

impl OcrResponse {
    pub fn new(texts: Vec<OcrText>) -> Self {
        Self { texts }
    }

    pub fn empty() -> Self {
        Self { texts: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn boxes(&self) -> Vec<Quad> {
        self.texts.iter().map(|text| text.quad).collect()
    }

    /// Reorders lines into reading order.
    ///
    /// Each line's top edge is snapped to a 10 px grid and lines whose snapped
    /// rows are within one step share a row. Rows go top to bottom, lines in a
    /// row left to right. Returned boxes are axis-aligned with the row's `ymin`.
    pub fn into_ranked(self) -> OcrResponse {
        let mut items: Vec<(Coordinate, OcrText)> = self
            .texts
            .into_iter()
            .map(|text| (text.coordinate(), text))
            .collect();

        let mut rows: Vec<i32> = Vec::new();
        for (coordinate, _) in &items {
            let row = snap_row(coordinate.ymin);
            let known = rows.contains(&row)
                || rows.contains(&(row + ROW_STEP_PX))
                || rows.contains(&(row - ROW_STEP_PX));
            if !known {
                rows.push(row);
            }
        }
        rows.sort_unstable();

        for (coordinate, _) in items.iter_mut() {
            for &row in &rows {
                if (row - snap_row(coordinate.ymin)).abs() <= ROW_STEP_PX {
                    coordinate.ymin = row;
                }
            }
        }

        let mut ranked = Vec::with_capacity(items.len());
        for &row in &rows {
            let mut in_row: Vec<&(Coordinate, OcrText)> = items
                .iter()
                .filter(|(coordinate, _)| coordinate.ymin == row)
                .collect();
            in_row.sort_by_key(|(coordinate, _)| coordinate.xmin);
            for (coordinate, text) in in_row {
                ranked.push(OcrText {
                    quad: Quad::from_coordinate(coordinate),
                    text: text.text.clone(),
                    confidence: text.confidence,
                });
            }
        }
        OcrResponse::new(ranked)
    }
}

/// Rounds to the nearest multiple of ten; ties round down.
fn snap_row(y: i32) -> i32 {
    let down = y - y.rem_euclid(ROW_STEP_PX);
    let up = down + ROW_STEP_PX;
    if (y - up).abs() < (y - down).abs() {
        up
    } else {
        down
    }
}
