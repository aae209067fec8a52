//! `analyze_audio` job handler.

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

use crate::db::{tracks, DbResult, Job, JobParameters, Track};
use crate::fingerprint::compute_content_hash;
use crate::metadata::{fallback_title, AudioMetadata};
use crate::worker::{JobError, Processor};

/// What the handler learned about the file before touching the store
struct Analysis {
    metadata: AudioMetadata,
    file_size: i64,
    file_hash: Option<String>,
    fingerprint: Option<String>,
}

pub(crate) fn analyze_audio(processor: &Processor, job: &Job) -> Result<(), JobError> {
    let params = JobParameters::from_json(&job.parameters)
        .map_err(|e| JobError::InvalidParameters(e.to_string()))?;

    let path = Path::new(&params.file_path);
    if !path.is_file() {
        return Err(JobError::FileNotFound(params.file_path.clone()));
    }

    let metadata = match processor.extractor.extract(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(job_id = job.id, path = %params.file_path, "Metadata extraction failed, using defaults: {}", e);
            AudioMetadata::default()
        }
    };

    let file_size = std::fs::metadata(path)
        .map(|m| m.len() as i64)
        .ok()
        .or(params.file_size)
        .unwrap_or(0);

    let file_hash = if processor.config.compute_file_hash {
        compute_content_hash(path)
            .map_err(|e| warn!(job_id = job.id, "Could not hash file: {}", e))
            .ok()
    } else {
        None
    };

    let fingerprint = processor.fingerprinter.as_ref().and_then(|fp| {
        fp.fingerprint(path)
            .map_err(|e| warn!(job_id = job.id, "Could not fingerprint file: {}", e))
            .ok()
    });

    processor.report(job, 50);

    let analysis = Analysis {
        metadata,
        file_size,
        file_hash,
        fingerprint,
    };
    let discovered = params
        .date_added
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let track_id = processor
        .db
        .transaction(|conn| -> DbResult<i64> {
            let existing = tracks::get_track_by_path(conn, &params.file_path)?;
            let track = build_track(&params.file_path, existing, analysis, discovered);
            if track.is_saved() {
                tracks::update_track(conn, &track)?;
                Ok(track.id)
            } else {
                tracks::add_track(conn, &track)
            }
        })?;

    debug!(job_id = job.id, track_id, "Track saved");
    Ok(())
}

/// Merge fresh analysis into the stored track, or build a new one.
///
/// Fields the file does not carry keep their stored values, so user edits
/// (bpm, key, artist...) survive re-analysis of an untagged file.
fn build_track(
    file_path: &str,
    existing: Option<Track>,
    analysis: Analysis,
    discovered: Option<DateTime<Utc>>,
) -> Track {
    let now = Utc::now();
    let Analysis {
        metadata,
        file_size,
        file_hash,
        fingerprint,
    } = analysis;

    let mut track = existing.unwrap_or_else(|| Track {
        date_added: discovered.unwrap_or(now),
        ..Track::new(file_path)
    });

    track.title = metadata
        .title
        .or(track.title.take())
        .or_else(|| Some(fallback_title(Path::new(file_path))));
    track.artist = metadata.artist.or(track.artist.take());
    track.album = metadata.album.or(track.album.take());
    track.genre = metadata.genre.or(track.genre.take());
    track.key = metadata.key.or(track.key.take());
    if let Some(bpm) = metadata.bpm {
        track.bpm = bpm;
    }
    if let Some(duration) = metadata.duration {
        track.duration = duration;
    }
    track.file_size = file_size;
    track.file_hash = file_hash.or(track.file_hash.take());
    track.acoustid_fingerprint = fingerprint.or(track.acoustid_fingerprint.take());
    track.last_modified = now.max(track.last_modified + chrono::Duration::microseconds(1));

    track
}
