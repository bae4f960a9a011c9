//! Application Configuration
//!
//! User settings and preferences stored in TOML format.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::LensFacing;

/// Language code of the bundled trained data (Spanish)
pub const DEFAULT_LANGUAGE: &str = "spa";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Camera and capture settings
    pub capture: CaptureSettings,
    /// OCR settings
    pub ocr: OcrSettings,
    /// Bundled asset settings
    pub assets: AssetSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Keep captured stills on disk after they have been decoded
    pub keep_captures: bool,
    /// Print run reports as JSON instead of plain text
    pub json_output: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            keep_captures: false,
            json_output: false,
        }
    }
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Which camera to bind
    pub lens: LensFacing,
    /// Preview frames pushed to the preview surface per second (0 disables preview)
    pub preview_fps: u32,
    /// Seconds to wait for a still capture before giving up
    pub capture_timeout_secs: u64,
    /// JPEG quality for captured stills (1-100)
    pub jpeg_quality: u8,
    /// Directory for captured stills; platform cache dir when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            lens: LensFacing::Back,
            preview_fps: 15,
            capture_timeout_secs: 10,
            jpeg_quality: 90,
            output_dir: None,
        }
    }
}

impl CaptureSettings {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

/// OCR settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Trained-data language code
    pub language: String,
    /// OCR data root; platform data dir when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            data_dir: None,
        }
    }
}

/// Bundled asset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Read-only directory containing `tessdata/<lang>.traineddata`
    pub bundle_dir: PathBuf,
    /// Expected SHA256 of the trained data, verified when staging
    pub expected_sha256: Option<String>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("assets"),
            expected_sha256: None,
        }
    }
}

impl AppConfig {
    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.capture.capture_timeout_secs == 0 {
            bail!("capture.capture_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
    Ok(())
}
