//! Failure kinds surfaced by the pipeline

use serde::Serialize;

/// Terminal failure of a pipeline run (or of the surrounding app)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera bind failed: {0}")]
    CameraBind(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("captured image could not be decoded: {0}")]
    Decode(String),
    #[error("OCR data staging failed: {0}")]
    AssetStaging(String),
    #[error("OCR initialization failed: {0}")]
    OcrInit(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("a capture is already in progress")]
    Busy,
}

impl PipelineError {
    /// Short message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::PermissionDenied => "Permiso de cámara requerido",
            PipelineError::CameraBind(_) => "No se pudo iniciar la cámara",
            PipelineError::Capture(_) => "Error capturando imagen",
            PipelineError::Decode(_) => "No se pudo leer la imagen capturada",
            PipelineError::AssetStaging(_) => "Error preparando datos de OCR",
            PipelineError::OcrInit(_) => "Error iniciando OCR",
            PipelineError::Ocr(_) => "Error reconociendo texto",
            PipelineError::Busy => "Captura en curso",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            PipelineError::PermissionDenied,
            PipelineError::CameraBind(String::new()),
            PipelineError::Capture(String::new()),
            PipelineError::Decode(String::new()),
            PipelineError::AssetStaging(String::new()),
            PipelineError::OcrInit(String::new()),
            PipelineError::Ocr(String::new()),
            PipelineError::Busy,
        ];

        let messages: HashSet<_> = errors.iter().map(|e| e.user_message()).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_serializes_kind_and_detail() {
        let json = serde_json::to_value(PipelineError::OcrInit("bad data".into())).unwrap();
        assert_eq!(json["kind"], "ocr_init");
        assert_eq!(json["detail"], "bad data");
    }
}
