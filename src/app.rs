//! Application Coordinator
//!
//! Gates the camera behind the permission check, wires the camera session,
//! asset stager and OCR engine into the capture pipeline, and publishes run
//! results to the output surface.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{
    BindingState, CameraBackend, CameraSession, CaptureConfig, CapturedFrame, PreviewSurface,
};
use crate::config::AppConfig;
use crate::pipeline::{CapturePipeline, PipelineError, PipelineEvent, PipelineSettings, RunReport};
use crate::storage::AppPaths;
use crate::vision::{AssetSource, AssetStager, OcrEngine, RecognitionBackend};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Camera access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Platform camera permission
pub trait CameraPermission: Send + Sync {
    /// Current permission without prompting
    fn status(&self) -> PermissionStatus;

    /// Ask for access; platforms without a prompt just report the status
    fn request(&self) -> PermissionStatus {
        self.status()
    }
}

/// Access to a replay camera means being able to read its source image
pub struct ReplayPermission {
    source: PathBuf,
}

impl ReplayPermission {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl CameraPermission for ReplayPermission {
    fn status(&self) -> PermissionStatus {
        match std::fs::File::open(&self.source) {
            Ok(_) if self.source.is_file() => PermissionStatus::Granted,
            Ok(_) => PermissionStatus::Denied,
            Err(e) => {
                debug!("Replay source {:?} not readable: {}", self.source, e);
                PermissionStatus::Denied
            }
        }
    }
}

/// Where run results and status messages are shown
pub trait ResultSurface: Send + Sync {
    fn show_report(&self, report: &RunReport);
    /// Persistent status line (permission denial, camera failure, busy)
    fn show_message(&self, message: &str);
}

/// Prints results to stdout, as plain text or one JSON object per line
pub struct TerminalSurface {
    json: bool,
}

impl TerminalSurface {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn render_report(&self, report: &RunReport) -> Result<String> {
        if self.json {
            serde_json::to_string(report).context("Failed to serialize run report")
        } else {
            Ok(report.output.clone())
        }
    }

    fn render_message(&self, message: &str) -> String {
        if self.json {
            serde_json::json!({ "message": message }).to_string()
        } else {
            message.to_string()
        }
    }
}

impl ResultSurface for TerminalSurface {
    fn show_report(&self, report: &RunReport) {
        match self.render_report(report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("{:#}", e),
        }
    }

    fn show_message(&self, message: &str) {
        println!("{}", self.render_message(message));
    }
}

const PREVIEW_LOG_EVERY: u64 = 300;

/// Preview sink for headless runs: logs the stream instead of drawing it
#[derive(Debug, Default)]
pub struct LogPreview {
    frames: u64,
    first_frame: Option<Instant>,
}

impl LogPreview {
    /// Frames per second between the first frame and `frame`
    fn measured_fps(&self, frame: &CapturedFrame) -> Option<f32> {
        let first = self.first_frame?;
        let elapsed = frame.timestamp.saturating_duration_since(first).as_secs_f32();
        (elapsed > 0.0).then(|| (self.frames - 1) as f32 / elapsed)
    }
}

impl PreviewSurface for LogPreview {
    fn present(&mut self, frame: &CapturedFrame) {
        if self.frames == 0 {
            let (width, height) = frame.dimensions();
            info!("Preview running ({}x{})", width, height);
            self.first_frame = Some(frame.timestamp);
        }
        self.frames += 1;
        if self.frames % PREVIEW_LOG_EVERY == 0 {
            debug!(
                "Preview frames presented: {} ({:.1} fps, brightness {:.0})",
                self.frames,
                self.measured_fps(frame).unwrap_or(0.0),
                frame.mean_brightness()
            );
        }
    }
}

/// Platform pieces the app is assembled from
pub struct AppComponents {
    pub camera: Box<dyn CameraBackend>,
    pub preview: Box<dyn PreviewSurface>,
    pub assets: Arc<dyn AssetSource>,
    pub recognizer: Arc<dyn RecognitionBackend>,
}

/// Main application coordinator
pub struct IdScanApp {
    camera: Arc<CameraSession>,
    pipeline: Arc<CapturePipeline>,
    surface: Arc<dyn ResultSurface>,
    last_message: Arc<Mutex<Option<String>>>,
    running: Mutex<Vec<JoinHandle<()>>>,
}

impl IdScanApp {
    /// Check camera permission, then bind the camera and build the pipeline
    ///
    /// On denial the camera is never touched and the error downcasts to
    /// [`PipelineError::PermissionDenied`].
    pub fn launch(
        config: &AppConfig,
        paths: &AppPaths,
        permission: &dyn CameraPermission,
        components: AppComponents,
        surface: Arc<dyn ResultSurface>,
    ) -> Result<Self> {
        let granted = match permission.status() {
            PermissionStatus::Granted => true,
            PermissionStatus::Denied => {
                info!("Camera permission not granted; requesting");
                permission.request() == PermissionStatus::Granted
            }
        };
        if !granted {
            warn!("Camera permission denied");
            surface.show_message(PipelineError::PermissionDenied.user_message());
            return Err(PipelineError::PermissionDenied.into());
        }

        let capture_config = CaptureConfig {
            lens: config.capture.lens,
            preview_fps: config.capture.preview_fps,
        };
        let camera = CameraSession::new(components.camera, capture_config)
            .context("Failed to start camera session")?;
        camera.start(components.preview);
        let camera = Arc::new(camera);

        let stager = AssetStager::new(components.assets, config.ocr.language.clone())
            .with_expected_sha256(config.assets.expected_sha256.clone());
        let engine = OcrEngine::new(components.recognizer);
        info!(
            "OCR backend: {} (language: {})",
            engine.backend_name(),
            stager.language()
        );

        let settings = PipelineSettings {
            ocr_data_dir: paths.ocr_data_dir.clone(),
            capture_dir: paths.capture_dir.clone(),
            capture_timeout: config.capture.capture_timeout(),
            keep_captures: config.general.keep_captures,
        };
        let (events, event_log) = crossbeam_channel::unbounded();
        let pipeline = CapturePipeline::new(
            camera.clone(),
            Arc::new(stager),
            Arc::new(engine),
            settings,
        )
        .with_events(events);
        pipeline.sweep_stale_captures();

        // Ends once the pipeline, and with it the sender, is dropped
        std::thread::Builder::new()
            .name("pipeline-events".to_string())
            .spawn(move || log_pipeline_events(event_log))
            .context("Failed to spawn pipeline event thread")?;

        Ok(Self {
            camera,
            pipeline: Arc::new(pipeline),
            surface,
            last_message: Arc::new(Mutex::new(None)),
            running: Mutex::new(Vec::new()),
        })
    }

    /// Wait until the camera is bound
    ///
    /// A failed or slow bind is surfaced once and reported as
    /// [`PipelineError::CameraBind`].
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let failure = match self.camera.binding_state() {
                BindingState::Bound => {
                    info!("Camera ready");
                    return Ok(());
                }
                BindingState::Failed(reason) => reason,
                _ if Instant::now() >= deadline => {
                    format!("camera not bound after {:?}", timeout)
                }
                _ => {
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                    continue;
                }
            };

            error!("Camera bind failed: {}", failure);
            let error = PipelineError::CameraBind(failure);
            self.show_message(error.user_message());
            return Err(error.into());
        }
    }

    /// Run one capture and publish its result
    pub async fn capture(&self) -> Result<RunReport, PipelineError> {
        let result = self.pipeline.trigger().await;
        publish(&*self.surface, &self.last_message, &result);
        result
    }

    /// Start a capture in the background
    ///
    /// The run slot is claimed before returning, so a second call made before
    /// the first task is scheduled is already rejected. Returns `false` and
    /// shows the busy message while a run is in flight.
    pub fn trigger(&self) -> bool {
        let Some(slot) = self.pipeline.try_claim() else {
            self.show_message(PipelineError::Busy.user_message());
            return false;
        };

        let pipeline = self.pipeline.clone();
        let surface = self.surface.clone();
        let last_message = self.last_message.clone();
        let task = tokio::spawn(async move {
            let report = pipeline.run_claimed(slot).await;
            publish(&*surface, &last_message, &Ok(report));
        });

        let mut running = self.running.lock();
        running.retain(|task| !task.is_finished());
        running.push(task);
        true
    }

    /// Wait for every triggered run to finish and publish its result
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.running.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Capture task failed: {}", e);
            }
        }
    }

    fn show_message(&self, message: &str) {
        show_once(&*self.surface, &self.last_message, message);
    }
}

fn log_pipeline_events(events: Receiver<PipelineEvent>) {
    for event in events {
        match event {
            PipelineEvent::StateChanged(state) if state.is_running() => {
                debug!("Run stage: {:?}", state);
            }
            PipelineEvent::StateChanged(_) => {}
            PipelineEvent::Finished(report) => info!(
                run_id = %report.run_id,
                elapsed_ms = report.elapsed_ms,
                status = ?report.status,
                "Run finished"
            ),
        }
    }
}

fn publish(
    surface: &dyn ResultSurface,
    last_message: &Mutex<Option<String>>,
    result: &Result<RunReport, PipelineError>,
) {
    match result {
        Ok(report) => {
            *last_message.lock() = None;
            surface.show_report(report);
        }
        Err(e) => show_once(surface, last_message, e.user_message()),
    }
}

/// Show `message` unless it is already the current status line
fn show_once(surface: &dyn ResultSurface, last_message: &Mutex<Option<String>>, message: &str) {
    let mut last = last_message.lock();
    if last.as_deref() != Some(message) {
        surface.show_message(message);
        *last = Some(message.to_string());
    }
}
