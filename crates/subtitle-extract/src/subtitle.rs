use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::path::Path;

use subtitle_extract_types::CueCandidate;
use thiserror::Error;
use tokio::fs;

/// One timed subtitle block as written to an `.srt` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrtCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl SrtCue {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SrtError {
    #[error("subtitle line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("failed to access subtitle file: {0}")]
    Io(#[from] io::Error),
}

/// Presentation time of a frame, truncated to whole milliseconds.
pub fn frame_to_ms(frame_no: u64, fps: f64) -> u64 {
    (frame_no as f64 / fps * 1000.0) as u64
}

/// Inverse of [`frame_to_ms`] for any frame rate below 500 fps.
pub fn ms_to_frame(ms: u64, fps: f64) -> u64 {
    (ms as f64 * fps / 1000.0).round() as u64
}

/// Frame number the external extractor's timestamps are keyed by.
///
/// This is `floor(ms / fps)`, not a presentation-time conversion. Frame
/// numbers produced this way are only ever compared with each other.
pub fn extractor_frame_no(ms: u64, fps: f64) -> u64 {
    (ms as f64 / fps) as u64
}

/// Converts merged cues into timed blocks. A cue spanning less than one
/// second worth of frames is shown for exactly `fps` frames.
pub fn cues_from_candidates(candidates: &[CueCandidate], fps: f64) -> Vec<SrtCue> {
    candidates
        .iter()
        .map(|candidate| {
            let span = candidate.end_frame.abs_diff(candidate.start_frame);
            let end_frame = if (span as f64) < fps {
                (candidate.start_frame as f64 + fps) as u64
            } else {
                candidate.end_frame
            };
            SrtCue::new(
                frame_to_ms(candidate.start_frame, fps),
                frame_to_ms(end_frame, fps),
                candidate.text.clone(),
            )
        })
        .collect()
}

/// Maps timed blocks back to frame numbers.
pub fn candidates_from_cues(cues: &[SrtCue], fps: f64) -> Vec<CueCandidate> {
    cues.iter()
        .map(|cue| {
            CueCandidate::new(
                ms_to_frame(cue.start_ms, fps),
                ms_to_frame(cue.end_ms, fps),
                cue.text.clone(),
            )
        })
        .collect()
}

pub fn render_srt(cues: &[SrtCue]) -> String {
    let mut output = String::new();
    for (idx, cue) in cues.iter().enumerate() {
        let _ = writeln!(&mut output, "{}", idx + 1);
        let _ = writeln!(
            &mut output,
            "{} --> {}",
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms)
        );
        let _ = writeln!(&mut output, "{}", cue.text);
        output.push('\n');
    }
    output
}

/// One cue text per line.
pub fn render_txt(cues: &[SrtCue]) -> String {
    let mut output = String::new();
    for cue in cues {
        let _ = writeln!(&mut output, "{}", cue.text);
    }
    output
}

pub fn parse_srt(contents: &str) -> Result<Vec<SrtCue>, SrtError> {
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
    let mut cues = Vec::new();
    let mut lines = contents.lines().enumerate().peekable();

    loop {
        while lines.next_if(|(_, line)| line.trim().is_empty()).is_some() {}
        let Some((index_line, index)) = lines.next() else {
            break;
        };
        if index.trim().parse::<u64>().is_err() {
            return Err(SrtError::Malformed {
                line: index_line + 1,
                reason: format!("expected a cue number, found '{index}'"),
            });
        }

        let Some((timing_line, timing)) = lines.next() else {
            return Err(SrtError::Malformed {
                line: index_line + 2,
                reason: "missing timing line".into(),
            });
        };
        let (start_ms, end_ms) = parse_timing(timing).ok_or_else(|| SrtError::Malformed {
            line: timing_line + 1,
            reason: format!("invalid timing '{timing}'"),
        })?;

        let mut text_lines = Vec::new();
        while let Some((_, line)) = lines.next_if(|(_, line)| !line.trim().is_empty()) {
            text_lines.push(line.trim_end_matches('\r'));
        }
        cues.push(SrtCue::new(start_ms, end_ms, text_lines.join("\n")));
    }
    Ok(cues)
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

pub fn parse_timestamp(value: &str) -> Option<u64> {
    let (clock, millis) = value.split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    let millis: u64 = millis.trim().parse().ok()?;
    if millis >= 1000 {
        return None;
    }
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

pub fn format_timestamp(millis: u64) -> String {
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let remain_ms = millis % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{remain_ms:03}")
}

/// Takes timing from the extractor's own subtitle file and text from the
/// merged cue starting on the same frame.
///
/// A matched cue ends where the extractor cue starting on the merged end
/// frame ends, if there is one. Unmatched extractor cues are dropped, or kept
/// with empty text when `keep_unmatched` is set.
pub fn reconcile_external(
    extractor_cues: &[SrtCue],
    merged: &[CueCandidate],
    fps: f64,
    keep_unmatched: bool,
) -> Vec<SrtCue> {
    let by_start: HashMap<u64, &SrtCue> = extractor_cues
        .iter()
        .map(|cue| (extractor_frame_no(cue.start_ms, fps), cue))
        .collect();
    let merged_by_start: HashMap<u64, &CueCandidate> = merged
        .iter()
        .map(|candidate| (candidate.start_frame, candidate))
        .collect();

    let mut reconciled = Vec::with_capacity(extractor_cues.len());
    for cue in extractor_cues {
        let start_no = extractor_frame_no(cue.start_ms, fps);
        match merged_by_start.get(&start_no) {
            Some(candidate) => {
                let end_ms = by_start
                    .get(&candidate.end_frame)
                    .map(|end_cue| end_cue.end_ms)
                    .unwrap_or(cue.end_ms);
                reconciled.push(SrtCue::new(cue.start_ms, end_ms, candidate.text.clone()));
            }
            None if keep_unmatched => {
                reconciled.push(SrtCue::new(cue.start_ms, cue.end_ms, String::new()));
            }
            None => {}
        }
    }
    reconciled
}

async fn write_creating_parent(path: &Path, contents: String) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, contents).await
}

pub async fn write_srt(path: &Path, cues: &[SrtCue]) -> io::Result<()> {
    write_creating_parent(path, render_srt(cues)).await
}

pub async fn write_txt(path: &Path, cues: &[SrtCue]) -> io::Result<()> {
    write_creating_parent(path, render_txt(cues)).await
}

pub async fn read_srt(path: &Path) -> Result<Vec<SrtCue>, SrtError> {
    let contents = fs::read_to_string(path).await?;
    parse_srt(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_timestamp() {
        assert_eq!(format_timestamp(3_723_456), "01:02:03,456");
        assert_eq!(format_timestamp(0), "00:00:00,000");
    }

    #[test]
    fn parses_timestamp() {
        assert_eq!(parse_timestamp("01:02:03,456"), Some(3_723_456));
        assert_eq!(parse_timestamp("00:00:01.500"), Some(1_500));
        assert_eq!(parse_timestamp("00:61:00,000"), None);
        assert_eq!(parse_timestamp("garbage"), None);
    }

    #[test]
    fn short_cues_are_stretched_to_one_second() {
        let candidates = vec![
            CueCandidate::new(25, 30, "short"),
            CueCandidate::new(100, 200, "long"),
        ];
        let cues = cues_from_candidates(&candidates, 25.0);
        assert_eq!(cues[0], SrtCue::new(1000, 2000, "short"));
        assert_eq!(cues[1], SrtCue::new(4000, 8000, "long"));
    }

    #[test]
    fn renders_blocks_with_blank_separator() {
        let cues = vec![SrtCue::new(1000, 2000, "Hi."), SrtCue::new(3000, 4500, "Bye")];
        assert_eq!(
            render_srt(&cues),
            "1\n00:00:01,000 --> 00:00:02,000\nHi.\n\n2\n00:00:03,000 --> 00:00:04,500\nBye\n\n"
        );
        assert_eq!(render_txt(&cues), "Hi.\nBye\n");
    }

    #[test]
    fn written_cues_parse_back_without_double_stretch() {
        for fps in [25.0, 29.97, 30.0, 60.0] {
            let candidates = vec![
                CueCandidate::new(1, 3, "Hi."),
                CueCandidate::new(5, 5, "Bye"),
                CueCandidate::new(120, 400, "A longer line"),
            ];
            let rendered = render_srt(&cues_from_candidates(&candidates, fps));
            let parsed = candidates_from_cues(&parse_srt(&rendered).unwrap(), fps);
            let rewritten = render_srt(&cues_from_candidates(&parsed, fps));
            assert_eq!(rendered, rewritten, "fps {fps}");
            assert_eq!(parsed[2], candidates[2]);
            assert_eq!(parsed[0].start_frame, 1);
        }
    }

    #[test]
    fn parse_handles_multiline_and_empty_text() {
        let contents = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nfirst\r\nsecond\r\n\r\n2\n00:00:03,000 --> 00:00:04,000\n\n\n";
        let cues = parse_srt(contents).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "first\nsecond");
        assert_eq!(cues[1], SrtCue::new(3000, 4000, ""));
    }

    #[test]
    fn parse_reports_bad_blocks() {
        assert!(matches!(
            parse_srt("one\n00:00:01,000 --> 00:00:02,000\ntext\n"),
            Err(SrtError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            parse_srt("1\nnot a timing\ntext\n"),
            Err(SrtError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn reconcile_takes_text_from_merged_and_timing_from_extractor() {
        let fps = 25.0;
        // Extractor cues start at 1000, 2000 and 3000 ms -> frames 40, 80, 120.
        let extractor = vec![
            SrtCue::new(1000, 1900, ""),
            SrtCue::new(2000, 2900, ""),
            SrtCue::new(3000, 3900, ""),
        ];
        let merged = vec![CueCandidate::new(40, 80, "Hello"), CueCandidate::new(120, 999, "Bye")];

        let kept = reconcile_external(&extractor, &merged, fps, false);
        assert_eq!(
            kept,
            vec![SrtCue::new(1000, 2900, "Hello"), SrtCue::new(3000, 3900, "Bye")]
        );

        let with_empty = reconcile_external(&extractor, &merged, fps, true);
        assert_eq!(with_empty.len(), 3);
        assert_eq!(with_empty[1], SrtCue::new(2000, 2900, ""));
    }

    #[tokio::test]
    async fn writes_files_creating_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.srt");
        let cues = vec![SrtCue::new(0, 1000, "x")];
        write_srt(&path, &cues).await.unwrap();
        assert_eq!(read_srt(&path).await.unwrap(), cues);
        let txt = dir.path().join("nested").join("out.txt");
        write_txt(&txt, &cues).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&txt).await.unwrap(), "x\n");
    }
}
