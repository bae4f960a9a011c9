//! Trained-data staging
//!
//! Copies the OCR language file from the read-only bundle into the writable
//! data directory the first time it is needed.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subdirectory holding trained-data files, both in the bundle and on disk
pub const TESSDATA_DIR: &str = "tessdata";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// File name of the trained data for `language`
pub fn traineddata_file_name(language: &str) -> String {
    format!("{}.traineddata", language)
}

/// Read-only source of bundled assets
pub trait AssetSource: Send + Sync {
    /// Open the asset at `relative` (e.g. `tessdata/spa.traineddata`)
    fn open(&self, relative: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// Bundled assets shipped as a directory next to the application
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for DirAssetSource {
    fn open(&self, relative: &Path) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.root.join(relative))?;
        Ok(Box::new(file))
    }
}

/// Staging failures
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bundled asset {name} is missing: {source}")]
    MissingSource {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read bundled asset {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bundled asset {0} is empty")]
    EmptySource(String),
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

/// What [`AssetStager::ensure`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The trained data was already in place
    AlreadyPresent(PathBuf),
    /// The trained data was copied from the bundle
    Copied {
        path: PathBuf,
        bytes: u64,
        sha256: String,
    },
}

/// Ensures trained data for one language exists under a data directory
pub struct AssetStager {
    source: Arc<dyn AssetSource>,
    language: String,
    expected_sha256: Option<String>,
    guard: Mutex<()>,
}

impl AssetStager {
    /// Create a stager copying `tessdata/<language>.traineddata` out of `source`
    pub fn new(source: Arc<dyn AssetSource>, language: impl Into<String>) -> Self {
        Self {
            source,
            language: language.into(),
            expected_sha256: None,
            guard: Mutex::new(()),
        }
    }

    /// Reject staged copies whose SHA256 differs from `expected`
    pub fn with_expected_sha256(mut self, expected: Option<String>) -> Self {
        self.expected_sha256 = expected.map(|hash| hash.to_ascii_lowercase());
        self
    }

    /// Language this stager handles
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Path of the staged trained data under `data_dir`
    pub fn traineddata_path(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join(TESSDATA_DIR)
            .join(traineddata_file_name(&self.language))
    }

    /// Check if the trained data is already staged
    pub fn is_staged(&self, data_dir: &Path) -> bool {
        self.traineddata_path(data_dir).is_file()
    }

    /// Stage the trained data under `data_dir` unless it is already there
    ///
    /// Concurrent callers are serialized, so the copy runs at most once. The
    /// copy is written to a temporary file and renamed into place, so the
    /// destination is either absent or complete.
    pub fn ensure(&self, data_dir: &Path) -> Result<StageOutcome, AssetError> {
        let _guard = self.guard.lock();

        let tessdata_dir = data_dir.join(TESSDATA_DIR);
        if !tessdata_dir.is_dir() {
            std::fs::create_dir_all(&tessdata_dir).map_err(|source| AssetError::CreateDir {
                path: tessdata_dir.clone(),
                source,
            })?;
            debug!("Created {:?}", tessdata_dir);
        }

        let path = self.traineddata_path(data_dir);
        if path.exists() {
            debug!("Trained data already staged at {:?}", path);
            return Ok(StageOutcome::AlreadyPresent(path));
        }

        let name = Path::new(TESSDATA_DIR).join(traineddata_file_name(&self.language));
        let name_str = name.display().to_string();
        info!("Staging {} into {:?}", name_str, path);

        let temp_path = path.with_extension("traineddata.tmp");
        let (bytes, sha256) = match self.copy_to(&name, &temp_path) {
            Ok(copied) => copied,
            Err(e) => {
                discard(&temp_path);
                return Err(e);
            }
        };

        if bytes == 0 {
            discard(&temp_path);
            return Err(AssetError::EmptySource(name_str));
        }

        if let Some(expected) = &self.expected_sha256 {
            if *expected != sha256 {
                discard(&temp_path);
                return Err(AssetError::ChecksumMismatch {
                    name: name_str,
                    expected: expected.clone(),
                    actual: sha256,
                });
            }
            debug!("Checksum verified for {}", name_str);
        }

        if let Err(source) = std::fs::rename(&temp_path, &path) {
            discard(&temp_path);
            return Err(AssetError::Write { path, source });
        }

        info!("Staged {} ({} bytes)", name_str, bytes);
        Ok(StageOutcome::Copied {
            path,
            bytes,
            sha256,
        })
    }

    /// Stream the bundled asset into `dest`, returning its size and SHA256
    fn copy_to(&self, name: &Path, dest: &Path) -> Result<(u64, String), AssetError> {
        let name_str = || name.display().to_string();

        let mut input = self
            .source
            .open(name)
            .map_err(|source| AssetError::MissingSource {
                name: name_str(),
                source,
            })?;

        let write_err = |source| AssetError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let mut output = File::create(dest).map_err(write_err)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied: u64 = 0;

        loop {
            let read = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(AssetError::Read {
                        name: name_str(),
                        source,
                    })
                }
            };

            output.write_all(&buffer[..read]).map_err(write_err)?;
            hasher.update(&buffer[..read]);
            copied += read as u64;
        }

        output.flush().map_err(write_err)?;
        output.sync_all().map_err(write_err)?;

        Ok((copied, format!("{:x}", hasher.finalize())))
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}
