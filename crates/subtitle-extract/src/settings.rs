use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use subtitle_extract_types::{Coordinate, Tolerance};

use crate::cli::{CliArgs, CliSources, OcrBackend};
use crate::config::{DEFAULT_COMPARE_WINDOW, ExtractConfig, ExtractionMode, ExtractorConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    mode: Option<String>,
    subtitle_area: Option<String>,
    extract_frequency: Option<u32>,
    tolerant_pixel_x: Option<i32>,
    tolerant_pixel_y: Option<i32>,
    subtitle_area_deviation_pixel: Option<i32>,
    watermark_area_num: Option<usize>,
    threshold_text_similarity: Option<u32>,
    drop_score: Option<u32>,
    subtitle_area_deviation_rate: Option<u32>,
    debug_no_delete_cache: Option<bool>,
    delete_empty_timestamp: Option<bool>,
    generate_txt: Option<bool>,
    extractor_path: Option<String>,
    extractor_threads: Option<usize>,
    decoder_backend: Option<String>,
    decoder_channel_capacity: Option<usize>,
    ocr_backend: Option<String>,
    ocr_replay: Option<String>,
}

#[derive(Debug)]
pub struct EffectiveSettings {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub backend: Option<String>,
    pub decoder_channel_capacity: Option<usize>,
    pub mode: ExtractionMode,
    pub subtitle_area: Option<Coordinate>,
    pub extract_frequency: u32,
    pub tolerance: Tolerance,
    pub band_deviation: i32,
    pub watermark_area_num: usize,
    /// Percent.
    pub similarity: u32,
    /// Percent.
    pub drop_score: u32,
    /// Percent.
    pub area_deviation_rate: u32,
    pub keep_cache: bool,
    pub delete_empty_timestamp: bool,
    pub generate_txt: bool,
    pub extractor_path: Option<PathBuf>,
    pub extractor_threads: Option<usize>,
    pub ocr_backend: OcrBackend,
    pub ocr_replay: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
}

impl EffectiveSettings {
    /// Where the subtitle file goes: the explicit output, else the input with `.srt`.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output
            .clone()
            .or_else(|| self.input.as_ref().map(|input| input.with_extension("srt")))
    }

    pub fn extract_config(&self, output: PathBuf) -> ExtractConfig {
        ExtractConfig {
            mode: self.mode,
            subtitle_area: self.subtitle_area,
            extract_frequency: self.extract_frequency,
            tolerance: self.tolerance,
            band_deviation: self.band_deviation,
            watermark_area_num: self.watermark_area_num,
            similarity_threshold: self.similarity as f64 / 100.0,
            drop_score: self.drop_score as f32 / 100.0,
            area_deviation_rate: self.area_deviation_rate as f64 / 100.0,
            compare_window: DEFAULT_COMPARE_WINDOW,
            keep_cache: self.keep_cache,
            delete_empty_timestamp: self.delete_empty_timestamp,
            generate_txt: self.generate_txt,
            output,
            extractor: self.extractor_path.clone().map(|program| ExtractorConfig {
                program,
                threads: self.extractor_threads.filter(|threads| *threads > 0),
            }),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let config = read_config(&path)?;
        return Ok((config, Some(path)));
    }

    for candidate in [project_config_path(), default_config_path()]
        .into_iter()
        .flatten()
    {
        if candidate.exists() {
            let config = read_config(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }
    Ok((FileConfig::default(), None))
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let config_dir = config_path
        .as_ref()
        .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));
    let path = config_path.as_ref();

    let FileConfig {
        mode: file_mode,
        subtitle_area: file_area,
        extract_frequency: file_frequency,
        tolerant_pixel_x: file_tolerance_x,
        tolerant_pixel_y: file_tolerance_y,
        subtitle_area_deviation_pixel: file_band_deviation,
        watermark_area_num: file_watermark_num,
        threshold_text_similarity: file_similarity,
        drop_score: file_drop_score,
        subtitle_area_deviation_rate: file_deviation_rate,
        debug_no_delete_cache: file_keep_cache,
        delete_empty_timestamp: file_delete_empty,
        generate_txt: file_generate_txt,
        extractor_path: file_extractor_path,
        extractor_threads: file_extractor_threads,
        decoder_backend: file_backend,
        decoder_channel_capacity: file_decoder_channel_capacity,
        ocr_backend: file_ocr_backend,
        ocr_replay: file_ocr_replay,
    } = file;

    let mut backend = normalize_string(cli.backend.clone());
    if backend.is_none() {
        backend = normalize_string(file_backend);
    }

    let mut mode = ExtractionMode::from(cli.mode);
    if !sources.mode_from_cli {
        if let Some(value) = normalize_string(file_mode) {
            mode = value.parse().map_err(|_| ConfigError::InvalidValue {
                path: path.cloned(),
                field: "mode",
                value,
            })?;
        }
    }

    let subtitle_area = match normalize_string(cli.area.clone()) {
        Some(value) => Some(parse_area(&value, None)?),
        None => match normalize_string(file_area) {
            Some(value) => Some(parse_area(&value, path)?),
            None => None,
        },
    };

    let mut extract_frequency = cli.extract_frequency;
    if !sources.extract_frequency_from_cli {
        if let Some(value) = file_frequency {
            extract_frequency = value;
        }
    }
    let extract_frequency = in_range(
        "extract_frequency",
        extract_frequency,
        1..=60,
        sources.extract_frequency_from_cli,
        path,
    )?;

    let setting = |cli_value: Option<i32>, file_value: Option<i32>, default: i32, field| {
        match cli_value {
            Some(value) => in_range(field, value, 1..=1000, true, path),
            None => in_range(field, file_value.unwrap_or(default), 1..=1000, false, path),
        }
    };
    let tolerance = Tolerance::new(
        setting(cli.tolerant_pixel_x, file_tolerance_x, 100, "tolerant_pixel_x")?,
        setting(cli.tolerant_pixel_y, file_tolerance_y, 50, "tolerant_pixel_y")?,
    );
    let band_deviation = setting(
        cli.area_deviation_pixel,
        file_band_deviation,
        50,
        "subtitle_area_deviation_pixel",
    )?;

    let percent = |cli_value: Option<u32>, file_value: Option<u32>, default: u32, field| {
        match cli_value {
            Some(value) => in_range(field, value, 0..=100, true, path),
            None => in_range(field, file_value.unwrap_or(default), 0..=100, false, path),
        }
    };
    let similarity = percent(cli.similarity, file_similarity, 80, "threshold_text_similarity")?;
    let drop_score = percent(cli.drop_score, file_drop_score, 75, "drop_score")?;
    let area_deviation_rate = percent(
        cli.area_deviation_rate,
        file_deviation_rate,
        0,
        "subtitle_area_deviation_rate",
    )?;

    let watermark_area_num = match cli.watermark_area_num {
        Some(value) => in_range("watermark_area_num", value, 1..=10, true, path)?,
        None => in_range(
            "watermark_area_num",
            file_watermark_num.unwrap_or(5),
            1..=10,
            false,
            path,
        )?,
    };

    let keep_cache = cli.keep_cache || file_keep_cache.unwrap_or(false);
    let delete_empty_timestamp = !cli.keep_empty_timestamps && file_delete_empty.unwrap_or(true);
    let generate_txt = cli.generate_txt || file_generate_txt.unwrap_or(false);

    let extractor_path = match cli.extractor.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_extractor_path)
            .and_then(|value| resolve_path_from_config(value, config_dir.as_deref())),
    };
    let extractor_threads = cli.extractor_threads.or(file_extractor_threads);

    let mut ocr_backend = cli.ocr_backend;
    if !sources.ocr_backend_from_cli {
        if let Some(value) = normalize_string(file_ocr_backend) {
            ocr_backend =
                OcrBackend::from_str(&value, true).map_err(|_| ConfigError::InvalidValue {
                    path: path.cloned(),
                    field: "ocr_backend",
                    value,
                })?;
        }
    }
    let ocr_replay = match cli.ocr_replay.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_ocr_replay)
            .and_then(|value| resolve_path_from_config(value, config_dir.as_deref())),
    };

    let mut decoder_channel_capacity = cli.decoder_channel_capacity;
    if let Some(0) = decoder_channel_capacity {
        return Err(ConfigError::InvalidValue {
            path: None,
            field: "decoder_channel_capacity",
            value: "0".to_string(),
        });
    }
    if decoder_channel_capacity.is_none() {
        if let Some(value) = file_decoder_channel_capacity {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    path: path.cloned(),
                    field: "decoder_channel_capacity",
                    value: value.to_string(),
                });
            }
            decoder_channel_capacity = Some(value);
        }
    }

    Ok(EffectiveSettings {
        input: cli.input.clone().map(expand_pathbuf),
        output: cli.output.clone().map(expand_pathbuf),
        backend,
        decoder_channel_capacity,
        mode,
        subtitle_area,
        extract_frequency,
        tolerance,
        band_deviation,
        watermark_area_num,
        similarity,
        drop_score,
        area_deviation_rate,
        keep_cache,
        delete_empty_timestamp,
        generate_txt,
        extractor_path,
        extractor_threads,
        ocr_backend,
        ocr_replay,
        config_dir,
    })
}

fn in_range<T>(
    field: &'static str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    from_cli: bool,
    path: Option<&PathBuf>,
) -> Result<T, ConfigError>
where
    T: PartialOrd + fmt::Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            path: if from_cli { None } else { path.cloned() },
            field,
            value: value.to_string(),
        })
    }
}

/// Accepts `(xmin, xmax, ymin, ymax)` with or without the parentheses.
fn parse_area(value: &str, path: Option<&PathBuf>) -> Result<Coordinate, ConfigError> {
    let wrapped;
    let text = if value.starts_with('(') {
        value
    } else {
        wrapped = format!("({value})");
        &wrapped
    };
    text.parse().map_err(|_| ConfigError::InvalidValue {
        path: path.cloned(),
        field: "subtitle_area",
        value: value.to_string(),
    })
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "subtitle-extract", "subtitle-extract")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_home_path(s),
        None => path,
    }
}

fn resolve_path_from_config(value: String, base: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_home_path(trimmed);
    match base {
        Some(base) if !expanded.is_absolute() => Some(base.join(expanded)),
        _ => Some(expanded),
    }
}

fn expand_home_path(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(stripped) = value.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(stripped);
        }
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, FromArgMatches};

    use super::*;

    fn cli(args: &[&str]) -> (CliArgs, CliSources) {
        let mut full = vec!["subtitle-extract"];
        full.extend_from_slice(args);
        let matches = CliArgs::command().try_get_matches_from(full).unwrap();
        let cli = CliArgs::from_arg_matches(&matches).unwrap();
        let sources = CliSources {
            mode_from_cli: args.contains(&"--mode"),
            extract_frequency_from_cli: args.contains(&"--extract-frequency"),
            ocr_backend_from_cli: args.contains(&"--ocr-backend"),
        };
        (cli, sources)
    }

    fn file(contents: &str) -> FileConfig {
        toml::from_str(contents).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let (args, sources) = cli(&["movie.mp4"]);
        let settings = merge(&args, &sources, FileConfig::default(), None).unwrap();
        assert_eq!(settings.mode, ExtractionMode::Detect);
        assert_eq!(settings.tolerance, Tolerance::new(100, 50));
        assert_eq!(settings.band_deviation, 50);
        assert_eq!(settings.watermark_area_num, 5);
        assert_eq!(settings.similarity, 80);
        assert_eq!(settings.drop_score, 75);
        assert!(settings.delete_empty_timestamp);
        assert_eq!(settings.output_path(), Some(PathBuf::from("movie.srt")));

        let config = settings.extract_config(PathBuf::from("movie.srt"));
        assert!((config.similarity_threshold - 0.8).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_fill_gaps_left_by_the_cli() {
        let (args, sources) = cli(&["--similarity", "90", "movie.mp4"]);
        let config = file(
            r#"
            mode = "fps"
            subtitle_area = "0, 1920, 900, 1080"
            extract_frequency = 5
            threshold_text_similarity = 60
            delete_empty_timestamp = false
            extractor_path = "tools/vsf"
            "#,
        );
        let settings = merge(
            &args,
            &sources,
            config,
            Some(PathBuf::from("/etc/subtitle-extract/config.toml")),
        )
        .unwrap();
        assert_eq!(settings.mode, ExtractionMode::Fps);
        assert_eq!(settings.extract_frequency, 5);
        assert_eq!(settings.similarity, 90);
        assert_eq!(settings.subtitle_area, Some(Coordinate::new(0, 1920, 900, 1080)));
        assert!(!settings.delete_empty_timestamp);
        assert_eq!(
            settings.extractor_path,
            Some(PathBuf::from("/etc/subtitle-extract/tools/vsf"))
        );
    }

    #[test]
    fn cli_mode_wins_over_file() {
        let (args, sources) = cli(&["--mode", "detect"]);
        let settings = merge(&args, &sources, file("mode = \"fps\""), None).unwrap();
        assert_eq!(settings.mode, ExtractionMode::Detect);
    }

    #[test]
    fn out_of_range_file_values_are_rejected() {
        let (args, sources) = cli(&[]);
        let err = merge(
            &args,
            &sources,
            file("tolerant_pixel_x = 0"),
            Some(PathBuf::from("config.toml")),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "tolerant_pixel_x",
                ..
            }
        ));

        let err = merge(&args, &sources, file("mode = \"auto\""), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "mode", .. }));

        let err = merge(&args, &sources, file("subtitle_area = \"(1, 2)\""), None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "subtitle_area",
                ..
            }
        ));
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::NotFound { .. })
        ));

        let present = dir.path().join("config.toml");
        fs::write(&present, "generate_txt = true\n").unwrap();
        let (config, path) = load_config(Some(&present)).unwrap();
        assert_eq!(config.generate_txt, Some(true));
        assert_eq!(path, Some(present));

        fs::write(&missing, "generate_txt = [").unwrap();
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
