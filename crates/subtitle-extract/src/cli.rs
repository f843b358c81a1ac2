use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};

use crate::config::ExtractionMode;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Fps,
    Detect,
    External,
}

impl From<ModeArg> for ExtractionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Fps => ExtractionMode::Fps,
            ModeArg::Detect => ExtractionMode::Detect,
            ModeArg::External => ExtractionMode::External,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrBackend {
    /// Replay recorded results when a recording is configured, otherwise noop
    Auto,
    Replay,
    Noop,
}

#[derive(Debug, Default)]
pub struct CliSources {
    pub mode_from_cli: bool,
    pub extract_frequency_from_cli: bool,
    pub ocr_backend_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            mode_from_cli: value_from_cli(matches, "mode"),
            extract_frequency_from_cli: value_from_cli(matches, "extract_frequency"),
            ocr_backend_from_cli: value_from_cli(matches, "ocr_backend"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "subtitle-extract",
    about = "Extract hard-coded subtitles from a video into an SRT file",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Subtitle output path; defaults to the input path with an .srt extension
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the list of available decoding backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// How frames are picked for recognition
    #[arg(long = "mode", value_enum, default_value_t = ModeArg::Detect)]
    pub mode: ModeArg,

    /// Subtitle area as "(xmin, xmax, ymin, ymax)" in pixels
    #[arg(long = "area", value_name = "BOX")]
    pub area: Option<String>,

    /// Frames sampled per second in fps mode
    #[arg(
        long = "extract-frequency",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=60)
    )]
    pub extract_frequency: u32,

    /// Horizontal pixel tolerance when unifying text boxes
    #[arg(long = "tolerant-pixel-x")]
    pub tolerant_pixel_x: Option<i32>,

    /// Vertical pixel tolerance when unifying text boxes
    #[arg(long = "tolerant-pixel-y")]
    pub tolerant_pixel_y: Option<i32>,

    /// Pixels kept above and below the inferred subtitle band
    #[arg(long = "area-deviation-pixel")]
    pub area_deviation_pixel: Option<i32>,

    /// Number of watermark candidates offered for removal
    #[arg(long = "watermark-area-num")]
    pub watermark_area_num: Option<usize>,

    /// Text similarity in percent above which two lines are the same
    #[arg(long = "similarity", value_parser = clap::value_parser!(u32).range(0..=100))]
    pub similarity: Option<u32>,

    /// Minimum recognition confidence in percent
    #[arg(long = "drop-score", value_parser = clap::value_parser!(u32).range(0..=100))]
    pub drop_score: Option<u32>,

    /// Percent of the frame size by which the subtitle area is widened when filtering lines
    #[arg(long = "area-deviation-rate", value_parser = clap::value_parser!(u32).range(0..=100))]
    pub area_deviation_rate: Option<u32>,

    /// Keep the working directory after the run
    #[arg(long = "keep-cache")]
    pub keep_cache: bool,

    /// Keep extractor timings that matched no recognized text
    #[arg(long = "keep-empty-timestamps")]
    pub keep_empty_timestamps: bool,

    /// Also write a plain text file with one line per cue
    #[arg(long = "txt")]
    pub generate_txt: bool,

    /// External frame extractor executable
    #[arg(long = "extractor", value_name = "PATH")]
    pub extractor: Option<PathBuf>,

    /// Threads handed to the external extractor (0 picks automatically)
    #[arg(long = "extractor-threads")]
    pub extractor_threads: Option<usize>,

    /// OCR backend
    #[arg(long = "ocr-backend", value_enum, default_value_t = OcrBackend::Auto)]
    pub ocr_backend: OcrBackend,

    /// Recorded detector and recognizer output for the replay backend
    #[arg(long = "ocr-replay", value_name = "FILE")]
    pub ocr_replay: Option<PathBuf>,

    /// Accept every watermark and subtitle band suggestion without asking
    #[arg(short = 'y', long = "yes", conflicts_with = "no_filter")]
    pub yes: bool,

    /// Skip watermark and subtitle band filtering
    #[arg(long = "no-filter")]
    pub no_filter: bool,

    /// Decoder frame queue capacity before applying backpressure
    #[arg(
        long = "decoder-channel-capacity",
        id = "decoder_channel_capacity",
        value_parser = clap::value_parser!(usize)
    )]
    pub decoder_channel_capacity: Option<usize>,

    /// Input video path
    pub input: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (CliArgs, CliSources) {
        let matches = CliArgs::command().try_get_matches_from(args).unwrap();
        let cli = CliArgs::from_arg_matches(&matches).unwrap();
        (cli, CliSources::from_matches(&matches))
    }

    #[test]
    fn defaults_are_not_marked_as_from_cli() {
        let (cli, sources) = parse(&["subtitle-extract", "movie.mp4"]);
        assert_eq!(cli.mode, ModeArg::Detect);
        assert_eq!(cli.extract_frequency, 3);
        assert!(!sources.mode_from_cli);
        assert!(!sources.extract_frequency_from_cli);
        assert_eq!(cli.input, Some(PathBuf::from("movie.mp4")));
    }

    #[test]
    fn explicit_values_are_tracked() {
        let (cli, sources) = parse(&[
            "subtitle-extract",
            "--mode",
            "fps",
            "--extract-frequency",
            "5",
            "--area",
            "(0, 1920, 900, 1080)",
            "movie.mp4",
        ]);
        assert_eq!(ExtractionMode::from(cli.mode), ExtractionMode::Fps);
        assert!(sources.mode_from_cli);
        assert!(sources.extract_frequency_from_cli);
        assert_eq!(cli.area.as_deref(), Some("(0, 1920, 900, 1080)"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(
            CliArgs::command()
                .try_get_matches_from(["subtitle-extract", "--extract-frequency", "0"])
                .is_err()
        );
        assert!(
            CliArgs::command()
                .try_get_matches_from(["subtitle-extract", "--similarity", "101"])
                .is_err()
        );
        assert!(
            CliArgs::command()
                .try_get_matches_from(["subtitle-extract", "--yes", "--no-filter"])
                .is_err()
        );
    }
}
