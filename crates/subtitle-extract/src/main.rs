use std::process::ExitCode;

use subtitle_extract::backend::{self, display_available_backends};
use subtitle_extract::cli::{CliArgs, CliSources, parse_cli};
use subtitle_extract::region::{AutoReviewer, PromptReviewer, RegionReviewer};
use subtitle_extract::settings::{ConfigError, resolve_settings};
use subtitle_extract::stage::progress::{progress_channel, spawn_progress_display};
use subtitle_extract::{
    ExtractionReport, PipelineError, StopSignal, build_engines, build_plan,
};
use subtitle_extract_decoder::FrameError;
use subtitle_extract_ocr::OcrError;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Decoder(#[from] FrameError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("no input video given")]
    MissingInput,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_logging();
    let (cli, sources) = parse_cli();
    if cli.list_backends {
        display_available_backends();
        return ExitCode::SUCCESS;
    }

    match run(cli, sources).await {
        Ok(report) => {
            println!(
                "subtitle output written to {} ({} cues)",
                report.output.display(),
                report.cues.len()
            );
            if let Some(txt) = &report.txt_output {
                println!("text output written to {}", txt.display());
            }
            ExitCode::SUCCESS
        }
        Err(AppError::Pipeline(PipelineError::Cancelled)) => {
            warn!("stopped before completion");
            ExitCode::from(130)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs, sources: CliSources) -> Result<ExtractionReport, AppError> {
    let settings = resolve_settings(&cli, &sources)?;
    let input = settings.input.clone().ok_or(AppError::MissingInput)?;
    let output = settings.output_path().ok_or(AppError::MissingInput)?;
    let engines = build_engines(settings.ocr_backend, settings.ocr_replay.as_deref())?;
    let plan = build_plan(&settings, input, output, engines)?;

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                stop.stop();
            }
        });
    }

    let mut reviewer: Box<dyn RegionReviewer> = if cli.yes {
        Box::new(AutoReviewer::accept_all())
    } else if cli.no_filter {
        Box::new(AutoReviewer::reject_all())
    } else {
        Box::new(PromptReviewer::stdio())
    };

    let (progress_tx, progress_rx) = progress_channel();
    let display = spawn_progress_display(progress_rx);
    let result = backend::run(plan, reviewer.as_mut(), &stop, Some(progress_tx)).await;
    let _ = display.await;
    Ok(result?)
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subtitle_extract=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
