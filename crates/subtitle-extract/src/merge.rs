use subtitle_extract_types::{CueCandidate, Observation};
use tracing::debug;

use crate::similarity::{is_similar, strip_spaces};

/// Collapses runs of similar consecutive observations into cues.
///
/// Each run is anchored on its first observation; the run grows while the
/// next observation is similar to that anchor. The cue text is the variant
/// with the most non-space characters, the earliest one on ties.
///
/// With `look_ahead`, a run that covers a single frame ends on the frame of
/// the next observation instead, so a lone sample is not a zero-length cue.
pub fn merge_observations(
    observations: &[Observation],
    threshold: f64,
    look_ahead: bool,
) -> Vec<CueCandidate> {
    let mut cues = Vec::new();
    let mut i = 0;
    while i < observations.len() {
        let anchor = &observations[i];
        let mut j = i;
        while j + 1 < observations.len()
            && is_similar(&anchor.text, &observations[j + 1].text, threshold)
        {
            j += 1;
        }

        let start = anchor.frame_no;
        let mut end = observations[j].frame_no;
        if look_ahead && end == start {
            if let Some(next) = observations.get(j + 1) {
                end = next.frame_no;
            }
        }

        let text = canonical_text(&observations[i..=j]);
        debug!(start, end, text = %text, "merged cue");
        cues.push(CueCandidate::new(start, end, text));
        i = j + 1;
    }
    cues
}

fn canonical_text(run: &[Observation]) -> String {
    let mut best: Option<(&str, usize)> = None;
    for observation in run {
        let length = strip_spaces(&observation.text).chars().count();
        if best.is_none_or(|(_, best_length)| length > best_length) {
            best = Some((&observation.text, length));
        }
    }
    best.map(|(text, _)| text.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use subtitle_extract_types::Coordinate;

    use super::*;

    fn obs(frame_no: u64, text: &str) -> Observation {
        Observation::new(frame_no, Coordinate::new(100, 500, 400, 440), text)
    }

    fn triples(cues: &[CueCandidate]) -> Vec<(u64, u64, &str)> {
        cues.iter()
            .map(|cue| (cue.start_frame, cue.end_frame, cue.text.as_str()))
            .collect()
    }

    #[test]
    fn merges_similar_run_and_keeps_lone_tail() {
        let log = vec![obs(1, "Hi"), obs(2, "Hi"), obs(3, "Hi."), obs(5, "Bye")];
        let cues = merge_observations(&log, 0.8, true);
        assert_eq!(triples(&cues), vec![(1, 3, "Hi."), (5, 5, "Bye")]);
    }

    #[test]
    fn single_frame_run_extends_to_next_observation() {
        let log = vec![obs(1, "Hello"), obs(4, "Goodbye"), obs(5, "Goodbye")];
        let cues = merge_observations(&log, 0.8, true);
        assert_eq!(triples(&cues), vec![(1, 4, "Hello"), (4, 5, "Goodbye")]);

        let cues = merge_observations(&log, 0.8, false);
        assert_eq!(triples(&cues), vec![(1, 1, "Hello"), (4, 5, "Goodbye")]);
    }

    #[test]
    fn cues_are_ordered_and_disjoint_without_look_ahead() {
        let log = vec![
            obs(0, "one"),
            obs(3, "one"),
            obs(6, "two two"),
            obs(9, "three"),
            obs(12, "three"),
            obs(15, "three!"),
            obs(18, "four"),
        ];
        let cues = merge_observations(&log, 0.8, false);
        for cue in &cues {
            assert!(cue.start_frame <= cue.end_frame);
        }
        for pair in cues.windows(2) {
            assert!(pair[0].end_frame < pair[1].start_frame);
        }
        assert_eq!(cues.len(), 4);
    }

    #[test]
    fn similarity_is_measured_against_the_anchor() {
        // "abcdefgh" is close to "abcdef" but only 0.67 similar to "abcd".
        let log = vec![obs(1, "abcd"), obs(2, "abcde"), obs(3, "abcdef"), obs(4, "abcdefgh")];
        let cues = merge_observations(&log, 0.8, false);
        assert_eq!(triples(&cues), vec![(1, 3, "abcdef"), (4, 4, "abcdefgh")]);
    }

    #[test]
    fn longest_variant_ignores_spaces_and_prefers_first_on_ties() {
        let log = vec![obs(1, "a b c"), obs(2, "abc"), obs(3, "abc ")];
        let cues = merge_observations(&log, 0.8, false);
        assert_eq!(triples(&cues), vec![(1, 3, "a b c")]);
    }

    #[test]
    fn empty_log_yields_no_cues() {
        assert!(merge_observations(&[], 0.8, true).is_empty());
    }
}
