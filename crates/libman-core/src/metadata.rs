//! Audio metadata extraction.
//!
//! The worker only depends on [`MetadataExtractor`]; [`LoftyExtractor`] is the
//! default implementation backed by `lofty`.

use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Tags and properties read from one file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub bpm: Option<i32>,
    pub key: Option<String>,
}

/// Reads metadata for the analysis worker
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> MetadataResult<AudioMetadata>;
}

/// Extractor backed by `lofty`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyExtractor;

impl LoftyExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a BPM tag such as `128`, `127.9` or ` 128 `
fn parse_bpm(value: &str) -> Option<i32> {
    let bpm = value.trim().parse::<f64>().ok()?;
    if bpm.is_finite() && bpm > 0.0 {
        Some(bpm.round() as i32)
    } else {
        None
    }
}

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> MetadataResult<AudioMetadata> {
        let tagged_file = Probe::open(path)
            .map_err(|e| MetadataError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .read()
            .map_err(|e| MetadataError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut metadata = AudioMetadata {
            duration: Some(tagged_file.properties().duration().as_secs_f64()),
            ..Default::default()
        };

        if let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        {
            metadata.title = non_empty(tag.title().as_deref());
            metadata.artist = non_empty(tag.artist().as_deref());
            metadata.album = non_empty(tag.album().as_deref());
            metadata.genre = non_empty(tag.genre().as_deref());
            metadata.bpm = tag
                .get_string(&ItemKey::Bpm)
                .or_else(|| tag.get_string(&ItemKey::IntegerBpm))
                .and_then(parse_bpm);
            metadata.key = non_empty(tag.get_string(&ItemKey::InitialKey));
        }

        Ok(metadata)
    }
}

/// Title used when a file carries none: its name without extension
pub fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string()
}
