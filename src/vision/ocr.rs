//! OCR (Optical Character Recognition) module
//!
//! [`OcrEngine`] runs one recognition per call against a fresh native session.
//! Sessions release their native handle when dropped, so every exit path of
//! [`OcrEngine::recognize`] tears the session down.

use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::assets::{traineddata_file_name, TESSDATA_DIR};

/// OCR failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcrError {
    /// The engine rejected the data directory or language code
    #[error("OCR initialization failed: {0}")]
    InitFailed(String),
    /// The image could not be handed to the engine
    #[error("failed to prepare image for OCR: {0}")]
    ImageEncoding(String),
    /// The engine failed while recognizing
    #[error("OCR recognition failed: {0}")]
    Recognition(String),
}

/// An initialized native recognizer; dropping it releases the native handle
pub trait RecognitionSession {
    /// Hand the image to the recognizer
    fn set_image(&mut self, image: &DynamicImage) -> Result<(), OcrError>;
    /// Recognize and return the page text
    fn utf8_text(&mut self) -> Result<String, OcrError>;
}

/// Creates native recognition sessions
pub trait RecognitionBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Initialize a session reading `<language>.traineddata` from `tessdata_dir`
    ///
    /// Implementations must release anything they allocated before returning
    /// an error.
    fn init(
        &self,
        tessdata_dir: &Path,
        language: &str,
    ) -> Result<Box<dyn RecognitionSession>, OcrError>;
}

/// Backend used when the crate is built without a native OCR engine
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl RecognitionBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn init(
        &self,
        _tessdata_dir: &Path,
        _language: &str,
    ) -> Result<Box<dyn RecognitionSession>, OcrError> {
        Err(OcrError::InitFailed(
            "built without tesseract support (enable the `tesseract` feature)".to_string(),
        ))
    }
}

/// The recognition backend compiled into this build
pub fn default_backend() -> Arc<dyn RecognitionBackend> {
    #[cfg(feature = "tesseract")]
    {
        Arc::new(super::tesseract::TesseractBackend)
    }
    #[cfg(not(feature = "tesseract"))]
    {
        Arc::new(UnavailableBackend)
    }
}

/// OCR engine wrapper
pub struct OcrEngine {
    backend: Arc<dyn RecognitionBackend>,
}

impl OcrEngine {
    /// Create an engine over `backend`
    pub fn new(backend: Arc<dyn RecognitionBackend>) -> Self {
        Self { backend }
    }

    /// Name of the underlying backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Recognize the text in `image`
    ///
    /// `data_dir` is the OCR data root (holding `tessdata/`). The text is
    /// returned exactly as the engine produced it; an empty result is not an
    /// error.
    pub fn recognize(
        &self,
        image: DynamicImage,
        data_dir: &Path,
        language: &str,
    ) -> Result<String, OcrError> {
        validate_language(language)?;

        // Native init can crash instead of failing on a missing language file
        let tessdata_dir = data_dir.join(TESSDATA_DIR);
        let traineddata = tessdata_dir.join(traineddata_file_name(language));
        if !traineddata.is_file() {
            return Err(OcrError::InitFailed(format!(
                "language '{}' not found, trained data does not exist: {:?}",
                language, traineddata
            )));
        }

        let start = Instant::now();
        debug!(
            "Recognizing {}x{} image with {} ({})",
            image.width(),
            image.height(),
            self.backend.name(),
            language
        );

        let mut session = self.backend.init(&tessdata_dir, language)?;
        session.set_image(&image)?;
        drop(image);
        let text = session.utf8_text()?;
        drop(session);

        info!(
            "OCR complete in {:?}: {} characters",
            start.elapsed(),
            text.chars().count()
        );
        Ok(text)
    }
}

fn validate_language(language: &str) -> Result<(), OcrError> {
    if language.trim().is_empty() {
        return Err(OcrError::InitFailed(
            "language cannot be empty".to_string(),
        ));
    }
    if !language
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(OcrError::InitFailed(format!(
            "unsupported language code '{}'",
            language
        )));
    }
    Ok(())
}
