//! Storage Layer
//!
//! Resolves the per-user directories used for configuration, staged OCR
//! language data and captured stills.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use crate::config::AppConfig;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "idscan", "IdScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

    Ok(config_dir)
}

/// Get the cache directory
pub fn get_cache_dir() -> Result<PathBuf> {
    let cache_dir = project_dirs()?.cache_dir().to_path_buf();
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create cache directory {:?}", cache_dir))?;

    Ok(cache_dir)
}

/// Directories the pipeline reads from and writes to
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Root handed to the OCR engine; language files live under `tessdata/`
    pub ocr_data_dir: PathBuf,
    /// Where captured stills are written
    pub capture_dir: PathBuf,
    /// Read-only bundle holding `tessdata/<lang>.traineddata`
    pub bundle_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths from configuration, falling back to the platform directories
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        let ocr_data_dir = match &config.ocr.data_dir {
            Some(dir) => dir.clone(),
            None => get_data_dir()?.join("tesseract"),
        };

        let capture_dir = match &config.capture.output_dir {
            Some(dir) => dir.clone(),
            None => get_cache_dir()?.join("captures"),
        };

        Ok(Self {
            ocr_data_dir,
            capture_dir,
            bundle_dir: config.assets.bundle_dir.clone(),
        })
    }

    /// Build paths rooted under a single directory
    #[cfg(test)]
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            ocr_data_dir: root.join("tesseract"),
            capture_dir: root.join("captures"),
            bundle_dir: root.join("assets"),
        }
    }
}
