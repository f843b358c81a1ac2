//! The raw per-frame text log.
//!
//! On disk every observation is one line: `frame_no\t(xmin, xmax, ymin, ymax)\ttext`.
//! The file is rewritten after each reconstruction step and doubles as the
//! recovery point when a run is interrupted.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use subtitle_extract_types::{Coordinate, Observation};
use thiserror::Error;
use tokio::fs;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Error)]
pub enum RawLogError {
    #[error("raw log line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("failed to access raw log {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    observations: Vec<Observation>,
}

impl RawLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observations(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn extend(&mut self, observations: impl IntoIterator<Item = Observation>) {
        self.observations.extend(observations);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn observations_mut(&mut self) -> &mut [Observation] {
        &mut self.observations
    }

    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }

    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.observations.iter().map(|o| o.coordinate).collect()
    }

    /// Keeps observations matching `keep`, returning how many were dropped.
    pub fn retain(&mut self, keep: impl FnMut(&Observation) -> bool) -> usize {
        let before = self.observations.len();
        self.observations.retain(keep);
        before - self.observations.len()
    }

    /// Collapses observations sharing a frame number into one, in place of the
    /// first of them. Texts are joined with a space, newlines become spaces and
    /// every text is NFKC-normalized. Applying it twice changes nothing.
    pub fn concat_same_frame(&self) -> RawLog {
        let mut merged: Vec<Observation> = Vec::with_capacity(self.observations.len());
        let mut first_position: std::collections::HashMap<u64, usize> =
            std::collections::HashMap::new();
        let mut parts: Vec<Vec<&str>> = Vec::new();

        for observation in &self.observations {
            match first_position.get(&observation.frame_no) {
                Some(&position) => parts[position].push(&observation.text),
                None => {
                    first_position.insert(observation.frame_no, merged.len());
                    merged.push(observation.clone());
                    parts.push(vec![&observation.text]);
                }
            }
        }

        for (observation, texts) in merged.iter_mut().zip(parts) {
            let joined = texts.join(" ").replace('\n', " ");
            observation.text = joined.nfkc().collect();
        }
        RawLog::from_observations(merged)
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        for observation in &self.observations {
            let _ = writeln!(
                &mut output,
                "{}\t{}\t{}",
                observation.frame_no,
                observation.coordinate,
                sanitize_text(&observation.text)
            );
        }
        output
    }

    pub fn parse(contents: &str) -> Result<Self, RawLogError> {
        let mut observations = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            observations.push(parse_line(line, index + 1)?);
        }
        Ok(Self { observations })
    }

    pub async fn save(&self, path: &Path) -> Result<(), RawLogError> {
        fs::write(path, self.render())
            .await
            .map_err(|source| RawLogError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn load(path: &Path) -> Result<Self, RawLogError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| RawLogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&contents)
    }
}

/// Tabs and line breaks would corrupt the line format.
pub fn sanitize_text(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}

fn parse_line(line: &str, number: usize) -> Result<Observation, RawLogError> {
    let malformed = |reason: String| RawLogError::Malformed {
        line: number,
        reason,
    };
    let mut fields = line.splitn(3, '\t');
    let frame_field = fields.next().unwrap_or_default();
    let (Some(coordinate_field), Some(text)) = (fields.next(), fields.next()) else {
        return Err(malformed("expected three tab-separated fields".into()));
    };
    let frame_no = frame_field
        .trim()
        .parse::<u64>()
        .map_err(|_| malformed(format!("invalid frame number '{frame_field}'")))?;
    let coordinate = coordinate_field
        .parse::<Coordinate>()
        .map_err(|err| malformed(err.to_string()))?;
    Ok(Observation::new(frame_no, coordinate, text))
}
