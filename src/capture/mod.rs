//! Camera Capture Layer
//!
//! A [`CameraSession`] owns the single camera binding of the process. All
//! hardware work happens on a dedicated worker thread that previews
//! continuously and serves one-shot still captures in request order.

pub mod frame;
pub mod replay;
pub mod request;

pub use frame::CapturedFrame;
pub use replay::ReplayCamera;
pub use request::{next_capture_path, remove_stale_captures, CaptureRequest, CaptureResult};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Which physical camera to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    /// Rear camera (the one pointed at documents)
    #[default]
    Back,
    /// User-facing camera
    Front,
}

/// Camera session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera to bind
    pub lens: LensFacing,
    /// Preview frames per second; 0 disables the preview stream
    pub preview_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            lens: LensFacing::Back,
            preview_fps: 15,
        }
    }
}

impl CaptureConfig {
    fn preview_interval(&self) -> Option<Duration> {
        (self.preview_fps > 0).then(|| Duration::from_secs_f64(1.0 / self.preview_fps as f64))
    }
}

/// Errors raised by a camera backend
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("no camera available for lens {0:?}")]
    NoMatchingCamera(LensFacing),
    #[error("camera is not bound")]
    NotBound,
    #[error("failed to write still image: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to encode still image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Hardware abstraction driven by the camera worker
pub trait CameraBackend: Send + 'static {
    /// Acquire the camera and bind preview and still streams
    fn bind(&mut self, lens: LensFacing) -> Result<(), CameraError>;
    /// Release the current binding
    fn unbind(&mut self);
    /// Produce the next preview frame
    fn preview_frame(&mut self) -> Result<CapturedFrame, CameraError>;
    /// Write one still image to `dest`; returns once the file is closed
    fn take_picture(&mut self, dest: &Path) -> Result<(), CameraError>;
}

/// Receives live preview frames
pub trait PreviewSurface: Send + 'static {
    fn present(&mut self, frame: &CapturedFrame);
}

/// Binding state observed from outside the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Binding,
    Bound,
    Failed(String),
}

enum CameraCommand {
    Bind(Box<dyn PreviewSurface>),
    Capture(CaptureRequest),
    Shutdown,
}

/// Owned camera binding; only one exists per worker
struct Binding {
    surface: Box<dyn PreviewSurface>,
}

/// Handle to the camera worker
pub struct CameraSession {
    commands: Sender<CameraCommand>,
    state: Arc<RwLock<BindingState>>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSession {
    /// Spawn the camera worker around `backend`
    pub fn new(backend: Box<dyn CameraBackend>, config: CaptureConfig) -> Result<Self> {
        let (commands, receiver) = unbounded();
        let state = Arc::new(RwLock::new(BindingState::Unbound));

        let worker_state = state.clone();
        let worker = std::thread::Builder::new()
            .name("camera-worker".to_string())
            .spawn(move || run_worker(backend, receiver, worker_state, config))
            .context("Failed to spawn camera worker thread")?;

        Ok(Self {
            commands,
            state,
            worker: Some(worker),
        })
    }

    /// Bind the camera and start previewing into `surface`
    ///
    /// Returns immediately; progress is visible through [`Self::binding_state`].
    /// Any previous binding is released first.
    pub fn start(&self, surface: Box<dyn PreviewSurface>) {
        *self.state.write() = BindingState::Binding;
        if self.commands.send(CameraCommand::Bind(surface)).is_err() {
            *self.state.write() = BindingState::Failed("camera worker is not running".to_string());
        }
    }

    /// Request a single still written to `dest`
    pub fn capture(&self, dest: PathBuf) -> impl Future<Output = CaptureResult> + Send + 'static {
        let (request, receiver) = CaptureRequest::new(dest);
        // A failed send drops the request, which closes the receiver below.
        let _ = self.commands.send(CameraCommand::Capture(request));

        async move {
            receiver.await.unwrap_or_else(|_| {
                CaptureResult::Failure("camera worker dropped the request".to_string())
            })
        }
    }

    /// Current binding state
    pub fn binding_state(&self) -> BindingState {
        self.state.read().clone()
    }

    /// Unbind and join the worker thread
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = self.commands.send(CameraCommand::Shutdown);
        if worker.join().is_err() {
            error!("Camera worker panicked");
        }
        *self.state.write() = BindingState::Unbound;
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    mut backend: Box<dyn CameraBackend>,
    commands: Receiver<CameraCommand>,
    state: Arc<RwLock<BindingState>>,
    config: CaptureConfig,
) {
    info!("Camera worker started (lens: {:?})", config.lens);

    let preview_interval = config.preview_interval();
    let mut binding: Option<Binding> = None;

    loop {
        let command = match (&mut binding, preview_interval) {
            (Some(bound), Some(interval)) => match commands.recv_timeout(interval) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    match backend.preview_frame() {
                        Ok(frame) => bound.surface.present(&frame),
                        Err(e) => debug!("Preview frame unavailable: {}", e),
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            _ => match commands.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            CameraCommand::Bind(surface) => {
                if binding.take().is_some() {
                    backend.unbind();
                    debug!("Released previous camera binding");
                }

                match backend.bind(config.lens) {
                    Ok(()) => {
                        binding = Some(Binding { surface });
                        *state.write() = BindingState::Bound;
                        info!("Camera bound");
                    }
                    Err(e) => {
                        warn!("Camera bind failed: {}", e);
                        *state.write() = BindingState::Failed(e.to_string());
                    }
                }
            }
            CameraCommand::Capture(request) => {
                let result = if binding.is_none() {
                    CaptureResult::Failure(CameraError::NotBound.to_string())
                } else {
                    match backend.take_picture(request.dest()) {
                        Ok(()) => {
                            debug!("Still written to {:?}", request.dest());
                            CaptureResult::Success(request.dest().to_path_buf())
                        }
                        Err(e) => {
                            warn!("Still capture failed: {}", e);
                            CaptureResult::Failure(e.to_string())
                        }
                    }
                };
                request.resolve(result);
            }
            CameraCommand::Shutdown => break,
        }
    }

    if binding.take().is_some() {
        backend.unbind();
    }
    info!("Camera worker exiting");
}
