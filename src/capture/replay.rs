//! Camera backend that replays a still image from disk
//!
//! Stands in for camera hardware on machines without one: binding loads the
//! source image, the preview stream serves a thumbnail of it and each still
//! capture re-encodes it as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{CameraBackend, CameraError, CapturedFrame, LensFacing};

const PREVIEW_MAX_WIDTH: u32 = 320;
const PREVIEW_MAX_HEIGHT: u32 = 240;

/// Replays a single image as if it were the camera view
pub struct ReplayCamera {
    source: PathBuf,
    jpeg_quality: u8,
    frame: Option<DynamicImage>,
    preview: Option<DynamicImage>,
}

impl ReplayCamera {
    /// Create a replay camera over `source`
    pub fn new(source: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            source: source.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            frame: None,
            preview: None,
        }
    }
}

impl CameraBackend for ReplayCamera {
    fn bind(&mut self, lens: LensFacing) -> Result<(), CameraError> {
        // A replayed image stands in for the rear camera only
        if lens != LensFacing::Back {
            return Err(CameraError::NoMatchingCamera(lens));
        }

        let frame = image::open(&self.source).map_err(|e| {
            CameraError::ProviderUnavailable(format!("cannot open {:?}: {}", self.source, e))
        })?;

        info!(
            "Replay camera bound to {:?} ({}x{})",
            self.source,
            frame.width(),
            frame.height()
        );

        self.preview = Some(frame.thumbnail(PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT));
        self.frame = Some(frame);
        Ok(())
    }

    fn unbind(&mut self) {
        self.frame = None;
        self.preview = None;
    }

    fn preview_frame(&mut self) -> Result<CapturedFrame, CameraError> {
        let preview = self.preview.as_ref().ok_or(CameraError::NotBound)?;
        Ok(CapturedFrame::from_image(preview))
    }

    fn take_picture(&mut self, dest: &Path) -> Result<(), CameraError> {
        let frame = self.frame.as_ref().ok_or(CameraError::NotBound)?;

        // JPEG has no alpha channel
        let rgb = frame.to_rgb8();

        let file = File::create(dest)?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality).encode_image(&rgb)?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!("Replay still encoded to {:?}", dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_source(dir: &Path) -> PathBuf {
        let path = dir.join("source.png");
        let image = RgbImage::from_pixel(640, 480, Rgb([200, 200, 200]));
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_front_lens_has_no_camera() {
        let dir = TempDir::new().unwrap();
        let mut camera = ReplayCamera::new(write_source(dir.path()), 90);
        let result = camera.bind(LensFacing::Front);
        assert!(matches!(
            result,
            Err(CameraError::NoMatchingCamera(LensFacing::Front))
        ));
    }

    #[test]
    fn test_bind_missing_source_fails() {
        let mut camera = ReplayCamera::new("/nonexistent/source.png", 90);
        let result = camera.bind(LensFacing::Back);
        assert!(matches!(result, Err(CameraError::ProviderUnavailable(_))));
    }

    #[test]
    fn test_take_picture_requires_bind() {
        let dir = TempDir::new().unwrap();
        let mut camera = ReplayCamera::new(write_source(dir.path()), 90);
        let result = camera.take_picture(&dir.path().join("still.jpg"));
        assert!(matches!(result, Err(CameraError::NotBound)));
    }

    #[test]
    fn test_take_picture_writes_jpeg() {
        let dir = TempDir::new().unwrap();
        let mut camera = ReplayCamera::new(write_source(dir.path()), 90);
        camera.bind(LensFacing::Back).unwrap();

        let dest = dir.path().join("still.jpg");
        camera.take_picture(&dest).unwrap();

        let format = image::ImageFormat::from_path(&dest).unwrap();
        assert_eq!(format, image::ImageFormat::Jpeg);
        let decoded = image::open(&dest).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn test_preview_is_downscaled() {
        let dir = TempDir::new().unwrap();
        let mut camera = ReplayCamera::new(write_source(dir.path()), 90);
        camera.bind(LensFacing::Back).unwrap();

        let frame = camera.preview_frame().unwrap();
        assert!(frame.width <= PREVIEW_MAX_WIDTH);
        assert!(frame.height <= PREVIEW_MAX_HEIGHT);

        camera.unbind();
        assert!(camera.preview_frame().is_err());
    }
}
