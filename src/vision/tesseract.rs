//! Tesseract OCR backend
//!
//! Wraps `leptess`. Each session owns one `TessBaseAPI` handle, which the
//! `LepTess` value frees when it is dropped.

use image::{DynamicImage, ImageFormat};
use leptess::LepTess;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

use super::ocr::{OcrError, RecognitionBackend, RecognitionSession};

/// Camera stills carry no usable DPI metadata; Tesseract is tuned for 300
const SOURCE_RESOLUTION: i32 = 300;

/// Tesseract engine backend
#[derive(Debug, Default)]
pub struct TesseractBackend;

impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn init(
        &self,
        tessdata_dir: &Path,
        language: &str,
    ) -> Result<Box<dyn RecognitionSession>, OcrError> {
        let data_path = tessdata_dir.to_str().ok_or_else(|| {
            OcrError::InitFailed(format!("data path {:?} is not valid UTF-8", tessdata_dir))
        })?;

        info!("Initializing Tesseract with language '{}' from {}", language, data_path);

        let api = LepTess::new(Some(data_path), language).map_err(|e| {
            OcrError::InitFailed(format!(
                "failed to initialize language '{}': {}",
                language, e
            ))
        })?;

        Ok(Box::new(TesseractSession { api }))
    }
}

struct TesseractSession {
    api: LepTess,
}

impl RecognitionSession for TesseractSession {
    fn set_image(&mut self, image: &DynamicImage) -> Result<(), OcrError> {
        // Leptonica reads encoded images; PNG keeps the pixels lossless
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::ImageEncoding(e.to_string()))?;

        debug!("Tesseract: loading {} byte PNG", png.len());

        self.api
            .set_image_from_mem(&png)
            .map_err(|e| OcrError::Recognition(format!("failed to set image: {}", e)))?;

        // Must follow set_image
        self.api.set_source_resolution(SOURCE_RESOLUTION);
        Ok(())
    }

    fn utf8_text(&mut self) -> Result<String, OcrError> {
        self.api
            .get_utf8_text()
            .map_err(|e| OcrError::Recognition(format!("failed to extract text: {}", e)))
    }
}
