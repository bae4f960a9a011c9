//! Capture Pipeline
//!
//! Runs capture → decode → stage → recognize → extract for one trigger at a
//! time. Stages run strictly in order; blocking work (decoding, file copies,
//! OCR) is moved off the async executor with `spawn_blocking`. Every stage
//! failure ends the run in a single `Failed` state and the pipeline returns to
//! `Idle`. Nothing is retried.

pub mod error;
pub mod state;

pub use error::PipelineError;
pub use state::{PipelineEvent, PipelineOutcome, PipelineState, RunReport, RunStatus};

use crossbeam_channel::Sender;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::id_extractor;
use crate::capture::{next_capture_path, remove_stale_captures, CameraSession, CaptureResult};
use crate::vision::{AssetStager, OcrEngine, OcrError, StageOutcome};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// OCR data root handed to staging and recognition
    pub ocr_data_dir: PathBuf,
    /// Directory captured stills are written to
    pub capture_dir: PathBuf,
    /// Longest wait for the camera to deliver a still
    pub capture_timeout: Duration,
    /// Keep stills on disk after decoding
    pub keep_captures: bool,
}

/// Exclusive claim on a pipeline's single run slot, released on drop
#[must_use = "the slot is released as soon as it is dropped"]
pub struct RunSlot(Arc<AtomicBool>);

impl RunSlot {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Capture-to-ID orchestrator
pub struct CapturePipeline {
    camera: Arc<CameraSession>,
    stager: Arc<AssetStager>,
    engine: Arc<OcrEngine>,
    settings: PipelineSettings,
    in_flight: Arc<AtomicBool>,
    events: Option<Sender<PipelineEvent>>,
}

impl CapturePipeline {
    pub fn new(
        camera: Arc<CameraSession>,
        stager: Arc<AssetStager>,
        engine: Arc<OcrEngine>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            camera,
            stager,
            engine,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    /// Publish state changes and finished runs on `events`
    pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Whether a run holds the slot
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the run slot now, or `None` while another run holds it
    ///
    /// The slot can be moved into a spawned task and handed to
    /// [`Self::run_claimed`], so no second trigger slips in between.
    pub fn try_claim(&self) -> Option<RunSlot> {
        let slot = RunSlot::claim(&self.in_flight);
        if slot.is_none() {
            warn!("Capture requested while a run is in progress; ignoring");
        }
        slot
    }

    /// Run the pipeline once
    ///
    /// Returns [`PipelineError::Busy`] without doing anything while another run
    /// is in flight. Otherwise the run always completes with a report, whether
    /// it ended in `Done` or `Failed`.
    pub async fn trigger(&self) -> Result<RunReport, PipelineError> {
        let slot = self.try_claim().ok_or(PipelineError::Busy)?;
        Ok(self.run_claimed(slot).await)
    }

    /// Run the pipeline on a slot obtained from [`Self::try_claim`]
    pub async fn run_claimed(&self, slot: RunSlot) -> RunReport {
        debug_assert!(Arc::ptr_eq(&slot.0, &self.in_flight));

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .run()
            .instrument(info_span!("capture_run", %run_id))
            .await;

        self.set_state(outcome.terminal_state());
        let report = RunReport::new(run_id, started.elapsed().as_millis() as u64, &outcome);
        self.emit(PipelineEvent::Finished(report.clone()));
        self.set_state(PipelineState::Idle);
        drop(slot);

        report
    }

    async fn run(&self) -> PipelineOutcome {
        match self.execute().await {
            Ok((text, id)) => {
                info!("Run complete (ID found: {})", id.is_some());
                PipelineOutcome::Done { text, id }
            }
            Err(error) => {
                warn!("Run failed: {}", error);
                PipelineOutcome::Failed(error)
            }
        }
    }

    async fn execute(&self) -> Result<(String, Option<String>), PipelineError> {
        let captured = self.capture().await?;
        let image = self.decode(captured).await?;
        self.stage().await?;
        let text = self.recognize(image).await?;

        self.set_state(PipelineState::Extracting);
        let id = id_extractor::extract(&text);
        debug!("ID candidates: {:?}", id_extractor::extract_all(&text));

        Ok((text, id))
    }

    /// Delete stills left behind by earlier processes
    ///
    /// Captures that timed out stay on disk until this runs. Nothing is
    /// removed when captures are kept.
    pub fn sweep_stale_captures(&self) -> usize {
        if self.settings.keep_captures {
            return 0;
        }
        match remove_stale_captures(&self.settings.capture_dir) {
            Ok(0) => 0,
            Ok(removed) => {
                info!("Removed {} stale captures from {:?}", removed, self.settings.capture_dir);
                removed
            }
            Err(e) => {
                warn!("Failed to sweep {:?}: {}", self.settings.capture_dir, e);
                0
            }
        }
    }

    async fn capture(&self) -> Result<PathBuf, PipelineError> {
        self.set_state(PipelineState::Capturing);

        let dest = next_capture_path(&self.settings.capture_dir).map_err(|e| {
            PipelineError::Capture(format!(
                "cannot create capture file in {:?}: {}",
                self.settings.capture_dir, e
            ))
        })?;
        debug!("Capturing still to {:?}", dest);

        let timeout = self.settings.capture_timeout;
        match tokio::time::timeout(timeout, self.camera.capture(dest.clone())).await {
            Ok(CaptureResult::Success(path)) => Ok(path),
            Ok(CaptureResult::Failure(reason)) => {
                remove_capture(&dest);
                Err(PipelineError::Capture(reason))
            }
            // The camera may still be writing; the next launch sweeps it
            Err(_) => Err(PipelineError::Capture(format!(
                "no still delivered within {:?}",
                timeout
            ))),
        }
    }

    async fn decode(&self, path: PathBuf) -> Result<DynamicImage, PipelineError> {
        self.set_state(PipelineState::Decoding);

        let keep = self.settings.keep_captures;
        let decoded = tokio::task::spawn_blocking(move || {
            let decoded = image::open(&path);
            if !keep {
                remove_capture(&path);
            }
            decoded
        })
        .await
        .map_err(|e| PipelineError::Decode(format!("decoder task failed: {}", e)))?;

        let image = decoded.map_err(|e| PipelineError::Decode(e.to_string()))?;
        debug!("Decoded {}x{} still", image.width(), image.height());
        Ok(image)
    }

    async fn stage(&self) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Staging);

        let stager = self.stager.clone();
        let data_dir = self.settings.ocr_data_dir.clone();
        let outcome = tokio::task::spawn_blocking(move || stager.ensure(&data_dir))
            .await
            .map_err(|e| PipelineError::AssetStaging(format!("staging task failed: {}", e)))?
            .map_err(|e| PipelineError::AssetStaging(e.to_string()))?;

        if let StageOutcome::Copied { path, bytes, .. } = outcome {
            info!("First use: staged {} bytes of trained data at {:?}", bytes, path);
        }
        Ok(())
    }

    async fn recognize(&self, image: DynamicImage) -> Result<String, PipelineError> {
        self.set_state(PipelineState::Recognizing);

        let engine = self.engine.clone();
        let data_dir = self.settings.ocr_data_dir.clone();
        let language = self.stager.language().to_string();
        let result = tokio::task::spawn_blocking(move || {
            engine.recognize(image, &data_dir, &language)
        })
        .await
        .map_err(|e| PipelineError::Ocr(format!("recognition task failed: {}", e)))?;

        result.map_err(|e| match e {
            OcrError::InitFailed(reason) => PipelineError::OcrInit(reason),
            other => PipelineError::Ocr(other.to_string()),
        })
    }

    fn set_state(&self, state: PipelineState) {
        self.emit(PipelineEvent::StateChanged(state));
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn remove_capture(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove capture {:?}: {}", path, e);
        }
    }
}
