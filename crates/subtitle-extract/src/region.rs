//! Watermark and subtitle-band inference over a normalized raw log.
//!
//! Classification is automatic; whether a candidate is actually excluded is
//! decided by a [`RegionReviewer`].

use std::collections::HashMap;
use std::hash::Hash;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

use subtitle_extract_types::{BandCandidate, Coordinate, RegionCandidate};
use tracing::{debug, info};

use crate::rawlog::RawLog;

/// Counts occurrences and orders them by count, ties by first appearance.
fn most_common<K: Copy + Eq + Hash>(keys: impl IntoIterator<Item = K>) -> Vec<(K, usize)> {
    let mut order: Vec<K> = Vec::new();
    let mut counts: HashMap<K, usize> = HashMap::new();
    for key in keys {
        let count = counts.entry(key).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    let mut ranked: Vec<(K, usize)> = order
        .into_iter()
        .map(|key| (key, counts.get(&key).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// The `limit` most frequent coordinates, or every distinct coordinate when
/// there are no more than `limit` of them.
pub fn watermark_candidates(log: &RawLog, limit: usize) -> Vec<RegionCandidate> {
    let mut ranked = most_common(log.observations().iter().map(|o| o.coordinate));
    ranked.truncate(limit);
    ranked
        .into_iter()
        .map(|(coordinate, occurrence_count)| RegionCandidate {
            coordinate,
            occurrence_count,
        })
        .collect()
}

/// Most frequent `(ymin, ymax)` pair.
pub fn subtitle_band(log: &RawLog) -> Option<BandCandidate> {
    most_common(log.observations().iter().map(|o| o.coordinate.band()))
        .into_iter()
        .next()
        .map(|((ymin, ymax), occurrence_count)| BandCandidate {
            ymin,
            ymax,
            occurrence_count,
        })
}

/// Drops observations whose coordinate equals one of `watermarks`.
pub fn remove_watermarks(log: &mut RawLog, watermarks: &[Coordinate]) -> usize {
    log.retain(|observation| !watermarks.contains(&observation.coordinate))
}

/// Keeps observations whose vertical range lies inside the band widened by `deviation`.
pub fn retain_band(log: &mut RawLog, band: &BandCandidate, deviation: i32) -> usize {
    let lower = (band.ymin - deviation).max(0);
    let upper = band.ymax + deviation;
    log.retain(|observation| lower <= observation.coordinate.ymin && observation.coordinate.ymax <= upper)
}

/// Confirms which inferred regions should be acted on.
pub trait RegionReviewer: Send {
    /// `true` removes every observation at this coordinate.
    fn confirm_watermark(&mut self, candidate: &RegionCandidate) -> bool;
    /// `true` drops every observation outside the band.
    fn confirm_band(&mut self, band: &BandCandidate) -> bool;
}

/// Answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoReviewer {
    pub accept: bool,
}

impl AutoReviewer {
    pub fn accept_all() -> Self {
        Self { accept: true }
    }

    pub fn reject_all() -> Self {
        Self { accept: false }
    }
}

impl RegionReviewer for AutoReviewer {
    fn confirm_watermark(&mut self, _candidate: &RegionCandidate) -> bool {
        self.accept
    }

    fn confirm_band(&mut self, _band: &BandCandidate) -> bool {
        self.accept
    }
}

/// Asks a y/n question per candidate. Anything but `y`/`yes` (or a read error) is a no.
pub struct PromptReviewer<R, W> {
    input: R,
    output: W,
}

impl<R, W> PromptReviewer<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> bool {
        if write!(self.output, "{question} [y/N] ").and_then(|_| self.output.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

impl PromptReviewer<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> RegionReviewer for PromptReviewer<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn confirm_watermark(&mut self, candidate: &RegionCandidate) -> bool {
        self.ask(&format!(
            "remove text at {} (seen {} times) as a watermark?",
            candidate.coordinate, candidate.occurrence_count
        ))
    }

    fn confirm_band(&mut self, band: &BandCandidate) -> bool {
        self.ask(&format!(
            "keep only text between y={} and y={} (seen {} times)?",
            band.ymin, band.ymax, band.occurrence_count
        ))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionFilterSummary {
    pub watermark_removed: usize,
    pub outside_band_removed: usize,
}

/// Runs both classifiers and applies whatever the reviewer confirms.
pub fn apply_region_filters(
    log: &mut RawLog,
    watermark_limit: usize,
    band_deviation: i32,
    reviewer: &mut dyn RegionReviewer,
) -> RegionFilterSummary {
    let mut summary = RegionFilterSummary::default();

    let confirmed: Vec<Coordinate> = watermark_candidates(log, watermark_limit)
        .into_iter()
        .filter(|candidate| reviewer.confirm_watermark(candidate))
        .map(|candidate| candidate.coordinate)
        .collect();
    if !confirmed.is_empty() {
        summary.watermark_removed = remove_watermarks(log, &confirmed);
        info!(
            regions = confirmed.len(),
            removed = summary.watermark_removed,
            "removed watermark text"
        );
    }

    if let Some(band) = subtitle_band(log) {
        if reviewer.confirm_band(&band) {
            summary.outside_band_removed = retain_band(log, &band, band_deviation);
            info!(
                ymin = band.ymin,
                ymax = band.ymax,
                removed = summary.outside_band_removed,
                "kept subtitle band"
            );
        } else {
            debug!(ymin = band.ymin, ymax = band.ymax, "subtitle band not confirmed");
        }
    }
    summary
}
