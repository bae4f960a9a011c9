//! IdScan - Capture an identity document, read it, and pull out its ID number
//!
//! Each trigger captures a still, runs OCR over it with bundled Spanish
//! trained data, and reports the recognized text along with the first
//! 8-10 digit identity number found in it.

mod analysis;
mod app;
mod capture;
mod config;
mod pipeline;
mod storage;
mod vision;

#[cfg(test)]
mod test_support;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::{AppComponents, IdScanApp, LogPreview, ReplayPermission, ResultSurface, TerminalSurface};
use crate::capture::ReplayCamera;
use crate::config::AppConfig;
use crate::pipeline::RunStatus;
use crate::storage::AppPaths;
use crate::vision::DirAssetSource;

const CAMERA_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// IdScan - identity number capture
#[derive(Parser, Debug)]
#[command(name = "idscan")]
#[command(about = "Capture a document still, OCR it, and extract its identity number")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image served by the replay camera
    #[arg(short, long, required_unless_present = "write_default_config")]
    image: Option<PathBuf>,

    /// Bundled assets directory holding tessdata/<lang>.traineddata
    #[arg(short, long)]
    assets: Option<PathBuf>,

    /// Print each result as a JSON object
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Capture once and exit
    #[arg(long)]
    once: bool,

    /// Write the default configuration and exit
    #[arg(long)]
    write_default_config: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    if args.write_default_config {
        let path = write_default_config(args.config.as_deref())?;
        println!("{}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    info!("IdScan starting...");

    let config = load_or_create_config(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let code = runtime.block_on(run(args, config))?;

    info!("IdScan shutdown complete");
    Ok(code)
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Load configuration from `path`, the platform config file, or defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn write_default_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => storage::get_config_dir()?.join("config.toml"),
    };
    config::save_config(&AppConfig::default(), &path)?;
    Ok(path)
}

async fn run(args: Args, config: AppConfig) -> Result<ExitCode> {
    let Some(image) = args.image else {
        bail!("--image is required");
    };

    let mut paths = AppPaths::resolve(&config)?;
    if let Some(assets) = args.assets {
        paths.bundle_dir = assets;
    }
    info!("OCR data directory: {:?}", paths.ocr_data_dir);
    info!("Capture directory: {:?}", paths.capture_dir);

    let surface: Arc<dyn ResultSurface> =
        Arc::new(TerminalSurface::new(args.json || config.general.json_output));
    let components = AppComponents {
        camera: Box::new(ReplayCamera::new(&image, config.capture.jpeg_quality)),
        preview: Box::new(LogPreview::default()),
        assets: Arc::new(DirAssetSource::new(&paths.bundle_dir)),
        recognizer: vision::default_backend(),
    };

    let app = match IdScanApp::launch(
        &config,
        &paths,
        &ReplayPermission::new(&image),
        components,
        surface,
    ) {
        Ok(app) => app,
        Err(e) => {
            error!("{:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Err(e) = app.wait_until_ready(CAMERA_READY_TIMEOUT).await {
        error!("{:#}", e);
        return Ok(ExitCode::FAILURE);
    }

    if args.once {
        return Ok(match app.capture().await {
            Ok(report) if report.status == RunStatus::Done => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        });
    }

    info!("Press Enter to capture, 'q' to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        app.trigger();
    }

    app.drain().await;
    Ok(ExitCode::SUCCESS)
}
