//! One-shot still capture requests

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tracing::debug;

/// Outcome of a single still capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureResult {
    /// The still was fully written and closed at this path
    Success(PathBuf),
    /// The capture failed; the reason is meant for logs
    Failure(String),
}

/// A pending still capture, resolved exactly once by the camera worker
#[derive(Debug)]
pub struct CaptureRequest {
    dest: PathBuf,
    completion: oneshot::Sender<CaptureResult>,
}

impl CaptureRequest {
    /// Create a request and the receiver its result will arrive on
    pub fn new(dest: PathBuf) -> (Self, oneshot::Receiver<CaptureResult>) {
        let (completion, receiver) = oneshot::channel();
        (Self { dest, completion }, receiver)
    }

    /// Where the still must be written
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Resolve the request, consuming it
    pub fn resolve(self, result: CaptureResult) {
        if self.completion.send(result).is_err() {
            debug!("Capture for {:?} resolved after the requester went away", self.dest);
        }
    }
}

/// File name for a still taken at `millis` since the epoch
pub fn capture_file_name(millis: u128, attempt: u32) -> String {
    if attempt == 0 {
        format!("capture_{}.jpg", millis)
    } else {
        format!("capture_{}-{}.jpg", millis, attempt)
    }
}

/// Reserve a unique, timestamp-derived JPEG path inside `dir`
///
/// The file is created empty so two captures in the same millisecond never
/// share a destination.
pub fn next_capture_path(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut attempt = 0;
    loop {
        let path = dir.join(capture_file_name(millis, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Whether `name` looks like a still written by [`next_capture_path`]
fn is_capture_file_name(name: &str) -> bool {
    name.starts_with("capture_") && name.ends_with(".jpg")
}

/// Delete every capture file in `dir`; a missing directory counts as empty
pub fn remove_stale_captures(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_capture_file_name) || !entry.file_type()?.is_file() {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}
