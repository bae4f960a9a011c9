//! Shared test doubles

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::capture::{
    BindingState, CameraBackend, CameraError, CameraSession, CaptureConfig, CapturedFrame,
    LensFacing, PreviewSurface,
};
use crate::pipeline::{CapturePipeline, PipelineEvent, PipelineSettings};
use crate::vision::ocr::RecognitionSession;
use crate::vision::{AssetSource, AssetStager, OcrEngine, OcrError, RecognitionBackend};

/// Stand-in for a bundled `spa.traineddata`
pub const TRAINEDDATA_BYTES: &[u8] = b"tesseract trained data fixture: spa lstm model v4\n";

/// Small white image
pub fn test_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 16, Rgb([255, 255, 255])))
}

/// Write `<dir>/tessdata/<language>.traineddata`
pub fn stage_traineddata(dir: &Path, language: &str) {
    let tessdata = dir.join("tessdata");
    std::fs::create_dir_all(&tessdata).unwrap();
    std::fs::write(tessdata.join(format!("{}.traineddata", language)), TRAINEDDATA_BYTES).unwrap();
}

/// Poll until the session leaves `Binding`
pub async fn wait_for_binding(session: &CameraSession) -> BindingState {
    for _ in 0..200 {
        let state = session.binding_state();
        if matches!(state, BindingState::Bound | BindingState::Failed(_)) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.binding_state()
}

// ---------------------------------------------------------------------------
// Camera

/// Counters shared between a [`MockCamera`] and the test
#[derive(Debug, Default)]
pub struct MockCameraProbe {
    pub binds: AtomicUsize,
    pub unbinds: AtomicUsize,
    pub pictures: AtomicUsize,
    pub active_bindings: AtomicUsize,
    pub max_active_bindings: AtomicUsize,
}

pub struct MockCamera {
    probe: Arc<MockCameraProbe>,
    fail_bind: bool,
    fail_pictures: bool,
    corrupt_pictures: bool,
    delay: Duration,
}

impl MockCamera {
    pub fn new() -> (Self, Arc<MockCameraProbe>) {
        let probe = Arc::new(MockCameraProbe::default());
        let camera = Self {
            probe: probe.clone(),
            fail_bind: false,
            fail_pictures: false,
            corrupt_pictures: false,
            delay: Duration::ZERO,
        };
        (camera, probe)
    }

    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    pub fn failing_pictures(mut self) -> Self {
        self.fail_pictures = true;
        self
    }

    /// Write bytes that are not an image
    pub fn corrupt_pictures(mut self) -> Self {
        self.corrupt_pictures = true;
        self
    }

    /// Block the worker for `delay` before each still
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl CameraBackend for MockCamera {
    fn bind(&mut self, _lens: LensFacing) -> Result<(), CameraError> {
        if self.fail_bind {
            return Err(CameraError::ProviderUnavailable("mock provider offline".to_string()));
        }
        self.probe.binds.fetch_add(1, Ordering::SeqCst);
        let active = self.probe.active_bindings.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active_bindings.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&mut self) {
        self.probe.unbinds.fetch_add(1, Ordering::SeqCst);
        self.probe.active_bindings.fetch_sub(1, Ordering::SeqCst);
    }

    fn preview_frame(&mut self) -> Result<CapturedFrame, CameraError> {
        Ok(CapturedFrame::new(vec![0; 16], 2, 2))
    }

    fn take_picture(&mut self, dest: &Path) -> Result<(), CameraError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.probe.pictures.fetch_add(1, Ordering::SeqCst);

        if self.fail_pictures {
            return Err(CameraError::Write(io::Error::new(
                io::ErrorKind::Other,
                "mock sensor error",
            )));
        }
        if self.corrupt_pictures {
            std::fs::write(dest, b"definitely not a jpeg")?;
            return Ok(());
        }
        test_image().save_with_format(dest, ImageFormat::Jpeg)?;
        Ok(())
    }
}

struct NullSurface;

impl PreviewSurface for NullSurface {
    fn present(&mut self, _frame: &CapturedFrame) {}
}

// ---------------------------------------------------------------------------
// Assets

/// In-memory bundle; every path resolves to the same bytes
pub struct MemoryAssetSource {
    data: Vec<u8>,
    fail_after: Option<usize>,
    pub opens: AtomicUsize,
}

impl MemoryAssetSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            fail_after: None,
            opens: AtomicUsize::new(0),
        }
    }

    /// Fail reads after `bytes` bytes
    pub fn failing_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

impl AssetSource for MemoryAssetSource {
    fn open(&self, _relative: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(limit) => {
                let prefix = self.data[..limit.min(self.data.len())].to_vec();
                Ok(Box::new(TruncatedReader(Cursor::new(prefix))))
            }
            None => Ok(Box::new(Cursor::new(self.data.clone()))),
        }
    }
}

/// Yields its bytes, then errors instead of reporting end of file
struct TruncatedReader(Cursor<Vec<u8>>);

impl Read for TruncatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source truncated")),
            n => Ok(n),
        }
    }
}

// ---------------------------------------------------------------------------
// OCR

/// Recognizer returning fixed text and tracking live sessions
pub struct MockRecognizer {
    text: String,
    fail_init: bool,
    fail_recognition: bool,
    pub sessions_created: AtomicUsize,
    pub live_sessions: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail_init: false,
            fail_recognition: false,
            sessions_created: AtomicUsize::new(0),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate a session, then fail initialization
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_recognition(mut self) -> Self {
        self.fail_recognition = true;
        self
    }
}

impl RecognitionBackend for MockRecognizer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn init(
        &self,
        _tessdata_dir: &Path,
        _language: &str,
    ) -> Result<Box<dyn RecognitionSession>, OcrError> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        let session = MockSession {
            live: self.live_sessions.clone(),
            text: self.text.clone(),
            fail_recognition: self.fail_recognition,
            has_image: false,
        };

        if self.fail_init {
            drop(session);
            return Err(OcrError::InitFailed("mock engine rejected data".to_string()));
        }
        Ok(Box::new(session))
    }
}

struct MockSession {
    live: Arc<AtomicUsize>,
    text: String,
    fail_recognition: bool,
    has_image: bool,
}

impl RecognitionSession for MockSession {
    fn set_image(&mut self, _image: &DynamicImage) -> Result<(), OcrError> {
        self.has_image = true;
        Ok(())
    }

    fn utf8_text(&mut self) -> Result<String, OcrError> {
        if self.fail_recognition {
            return Err(OcrError::Recognition("mock recognition failure".to_string()));
        }
        if !self.has_image {
            return Err(OcrError::Recognition("no image set".to_string()));
        }
        Ok(self.text.clone())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Pipeline

/// A bound pipeline over mocks in a temporary directory
pub struct PipelineHarness {
    pub pipeline: Arc<CapturePipeline>,
    pub events: crossbeam_channel::Receiver<PipelineEvent>,
    pub recognizer: Arc<MockRecognizer>,
    pub assets: Arc<MemoryAssetSource>,
    pub dir: TempDir,
}

impl PipelineHarness {
    pub fn builder() -> PipelineHarnessBuilder {
        PipelineHarnessBuilder {
            camera: None,
            recognizer: None,
            assets: None,
            capture_timeout: Duration::from_secs(5),
            keep_captures: false,
        }
    }

    /// Files currently in the capture directory
    pub fn capture_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("captures"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub struct PipelineHarnessBuilder {
    camera: Option<MockCamera>,
    recognizer: Option<MockRecognizer>,
    assets: Option<MemoryAssetSource>,
    capture_timeout: Duration,
    keep_captures: bool,
}

impl PipelineHarnessBuilder {
    pub fn camera(mut self, camera: MockCamera) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn recognizer(mut self, recognizer: MockRecognizer) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn assets(mut self, assets: MemoryAssetSource) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn keep_captures(mut self, keep: bool) -> Self {
        self.keep_captures = keep;
        self
    }

    pub async fn build(self) -> PipelineHarness {
        let dir = TempDir::new().unwrap();
        let camera = self.camera.unwrap_or_else(|| MockCamera::new().0);
        let recognizer = Arc::new(
            self.recognizer
                .unwrap_or_else(|| MockRecognizer::with_text("Cedula 12345678")),
        );
        let assets = Arc::new(
            self.assets
                .unwrap_or_else(|| MemoryAssetSource::new(TRAINEDDATA_BYTES.to_vec())),
        );

        let config = CaptureConfig {
            preview_fps: 0,
            ..Default::default()
        };
        let session = CameraSession::new(Box::new(camera), config).unwrap();
        session.start(Box::new(NullSurface));
        assert_eq!(wait_for_binding(&session).await, BindingState::Bound);

        let stager = AssetStager::new(assets.clone(), "spa");
        let engine = OcrEngine::new(recognizer.clone());
        let settings = PipelineSettings {
            ocr_data_dir: dir.path().join("tesseract"),
            capture_dir: dir.path().join("captures"),
            capture_timeout: self.capture_timeout,
            keep_captures: self.keep_captures,
        };

        let (sender, events) = crossbeam_channel::unbounded();
        let pipeline = CapturePipeline::new(
            Arc::new(session),
            Arc::new(stager),
            Arc::new(engine),
            settings,
        )
        .with_events(sender);

        PipelineHarness {
            pipeline: Arc::new(pipeline),
            events,
            recognizer,
            assets,
            dir,
        }
    }
}
