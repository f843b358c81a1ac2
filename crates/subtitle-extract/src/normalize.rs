use subtitle_extract_types::{Coordinate, Tolerance};
use tracing::debug;

use crate::rawlog::RawLog;

/// One pass that rewrites every coordinate to the last coordinate in the
/// list that is similar to it, scanning the list as it is being rewritten.
/// Returns whether anything changed.
///
/// Earlier rewrites are visible to later ones, so the representative of a
/// cluster can drift while the scan runs.
fn unify_pass(coordinates: &mut [Coordinate], tolerance: Tolerance) -> bool {
    let mut changed = false;
    for index in 0..coordinates.len() {
        let current = coordinates[index];
        if let Some(last_similar) = coordinates
            .iter()
            .rev()
            .find(|candidate| current.is_similar(candidate, tolerance))
        {
            changed |= *last_similar != current;
            coordinates[index] = *last_similar;
        }
    }
    changed
}

/// Repeats [`unify_pass`] until the list stops changing, so chained clusters
/// collapse onto one representative and a second call is a no-op.
pub fn unify_coordinates(coordinates: &mut [Coordinate], tolerance: Tolerance) {
    let mut passes = 0;
    while unify_pass(coordinates, tolerance) {
        passes += 1;
        if passes > coordinates.len() {
            debug!(passes, "coordinate rewrite did not settle");
            break;
        }
    }
}

/// Applies [`unify_coordinates`] to the log and returns how many coordinates changed.
pub fn normalize_log(log: &mut RawLog, tolerance: Tolerance) -> usize {
    let mut coordinates = log.coordinates();
    unify_coordinates(&mut coordinates, tolerance);
    let mut changed = 0;
    for (observation, coordinate) in log.observations_mut().iter_mut().zip(coordinates) {
        if observation.coordinate != coordinate {
            observation.coordinate = coordinate;
            changed += 1;
        }
    }
    debug!(changed, total = log.len(), "normalized coordinates");
    changed
}
