//! Directory scanner.
//!
//! Turns a directory tree into pending `analyze_audio` jobs. The scanner is a
//! producer only; it never creates tracks itself.

pub mod scan;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::db::DbError;

pub use scan::DirectoryScanner;

/// Supported audio file extensions
pub const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a", ".aiff", ".aif", ".wma", ".opus", ".alac",
];

/// Scanner error types
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type ScanResult<T> = Result<T, ScanError>;

/// Progress after each processed file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
}

/// Progress sink; runs on the scanning thread and must return quickly.
///
/// It is called while the scan's store transaction is open, so the store lock
/// is held. The sink may call the store itself, but it must not wait on
/// another thread that uses the store: that thread blocks until the scan
/// commits. Hand updates off with a non-blocking send instead.
pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

/// Cooperative cancellation flag shared between a scan and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Check whether a file has a supported audio extension (case-insensitive).
/// Looks only at the name; the file need not exist.
pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            AUDIO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}
