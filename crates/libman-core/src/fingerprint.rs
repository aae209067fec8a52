//! Content hashing and acoustic fingerprinting.
//!
//! The acoustic fingerprint itself is opaque here: [`FpcalcFingerprinter`]
//! shells out to Chromaprint's `fpcalc` and stores whatever string it returns.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("fpcalc exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("Unexpected fpcalc output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("fpcalc returned an empty fingerprint")]
    Empty,
}

pub type FingerprintResult<T> = Result<T, FingerprintError>;

/// Produces an acoustic fingerprint for duplicate detection
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> FingerprintResult<String>;
}

#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    fingerprint: String,
}

/// Runs `fpcalc -json <file>`
#[derive(Debug, Clone)]
pub struct FpcalcFingerprinter {
    program: PathBuf,
}

impl Default for FpcalcFingerprinter {
    fn default() -> Self {
        Self::new("fpcalc")
    }
}

impl FpcalcFingerprinter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn parse_output(stdout: &[u8]) -> FingerprintResult<String> {
        let output: FpcalcOutput = serde_json::from_slice(stdout)?;
        let fingerprint = output.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(FingerprintError::Empty);
        }
        Ok(fingerprint.to_string())
    }
}

impl Fingerprinter for FpcalcFingerprinter {
    fn fingerprint(&self, path: &Path) -> FingerprintResult<String> {
        debug!(path = %path.display(), "Running fpcalc");
        let output = Command::new(&self.program).arg("-json").arg(path).output()?;

        if !output.status.success() {
            return Err(FingerprintError::ToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::parse_output(&output.stdout)
    }
}

/// SHA-256 of the file contents, formatted as `sha256:<hex>`
pub fn compute_content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    Ok(format!("sha256:{}", hex))
}
