use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use subtitle_extract_types::{Coordinate, Tolerance};
use thiserror::Error;

/// Number of frames a cached recognition stays around behind the compared pair.
pub const DEFAULT_COMPARE_WINDOW: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    /// Sample a fixed number of frames per second and OCR all of them.
    Fps,
    /// Run the detector on every frame and OCR only cue boundaries.
    #[default]
    Detect,
    /// Hand frame selection to the external extractor binary.
    External,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Fps => "fps",
            ExtractionMode::Detect => "detect",
            ExtractionMode::External => "external",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = ExtractConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fps" => Ok(ExtractionMode::Fps),
            "detect" => Ok(ExtractionMode::Detect),
            "external" => Ok(ExtractionMode::External),
            other => Err(ExtractConfigError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub program: PathBuf,
    /// Worker threads handed to the extractor; `None` picks `cpus - 2`.
    pub threads: Option<usize>,
}

impl ExtractorConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            threads: None,
        }
    }

    pub fn thread_count(&self) -> usize {
        match self.threads {
            Some(threads) if threads > 0 => threads,
            _ => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(2))
                .unwrap_or(1)
                .max(1),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractConfigError {
    #[error("unknown extraction mode '{0}' (expected fps, detect or external)")]
    UnknownMode(String),
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{mode} mode requires a subtitle area")]
    MissingArea { mode: ExtractionMode },
    #[error("external mode requires the extractor program path")]
    MissingExtractor,
    #[error("subtitle area {0} is empty")]
    EmptyArea(Coordinate),
}

/// Everything one extraction run needs. Built once from settings and passed
/// by reference into each stage.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub mode: ExtractionMode,
    pub subtitle_area: Option<Coordinate>,
    pub extract_frequency: u32,
    pub tolerance: Tolerance,
    pub band_deviation: i32,
    pub watermark_area_num: usize,
    /// Similarity ratio in `[0, 1]` above which two texts are the same line.
    pub similarity_threshold: f64,
    /// Recognized lines with a lower confidence are dropped.
    pub drop_score: f32,
    /// Fraction of the frame size by which the subtitle area is widened when filtering lines.
    pub area_deviation_rate: f64,
    pub compare_window: u64,
    pub keep_cache: bool,
    pub delete_empty_timestamp: bool,
    pub generate_txt: bool,
    pub output: PathBuf,
    pub extractor: Option<ExtractorConfig>,
}

impl ExtractConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            mode: ExtractionMode::default(),
            subtitle_area: None,
            extract_frequency: 3,
            tolerance: Tolerance::default(),
            band_deviation: 50,
            watermark_area_num: 5,
            similarity_threshold: 0.80,
            drop_score: 0.75,
            area_deviation_rate: 0.0,
            compare_window: DEFAULT_COMPARE_WINDOW,
            keep_cache: false,
            delete_empty_timestamp: true,
            generate_txt: false,
            output: output.into(),
            extractor: None,
        }
    }

    pub fn validate(&self) -> Result<(), ExtractConfigError> {
        check_range("extract_frequency", self.extract_frequency as f64, 1.0, 60.0)?;
        check_range("tolerant_pixel_x", self.tolerance.x as f64, 1.0, 1000.0)?;
        check_range("tolerant_pixel_y", self.tolerance.y as f64, 1.0, 1000.0)?;
        check_range(
            "subtitle_area_deviation_pixel",
            self.band_deviation as f64,
            1.0,
            1000.0,
        )?;
        check_range("watermark_area_num", self.watermark_area_num as f64, 1.0, 10.0)?;
        check_range("threshold_text_similarity", self.similarity_threshold, 0.0, 1.0)?;
        check_range("drop_score", self.drop_score as f64, 0.0, 1.0)?;
        check_range(
            "subtitle_area_deviation_rate",
            self.area_deviation_rate,
            0.0,
            1.0,
        )?;

        if let Some(area) = self.subtitle_area {
            if area.width() == 0 || area.height() == 0 {
                return Err(ExtractConfigError::EmptyArea(area));
            }
        }

        if self.mode == ExtractionMode::External {
            if self.subtitle_area.is_none() {
                return Err(ExtractConfigError::MissingArea { mode: self.mode });
            }
            if self.extractor.is_none() {
                return Err(ExtractConfigError::MissingExtractor);
            }
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ExtractConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ExtractConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
