//! Vision/OCR Layer
//!
//! Stages trained-language data and runs text recognition on decoded
//! captures. The native engine sits behind [`RecognitionBackend`]:
//! - Tesseract via `leptess` (`tesseract` feature)
//! - an always-failing placeholder otherwise

pub mod assets;
pub mod ocr;
#[cfg(feature = "tesseract")]
pub mod tesseract;

pub use assets::{AssetSource, AssetStager, DirAssetSource, StageOutcome};
pub use ocr::{default_backend, OcrEngine, OcrError, RecognitionBackend};
