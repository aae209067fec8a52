//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use libman_core::{
    Config, Database, DirectoryScanner, FpcalcFingerprinter, JobParameters, JobProgress,
    JobStatus, LoftyExtractor, ScanProgress, Track, Worker,
};
use tracing::{debug, info};

const DRAIN_POLL: Duration = Duration::from_millis(200);

pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create data directory {}", parent.display()))?;
    }
    let db = Database::open(&config.database_path)
        .with_context(|| format!("open library {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), "Library opened");
    Ok(db)
}

pub fn scan(db: &Database, config: &Config, dir: &Path, recursive: bool) -> Result<usize> {
    let scanner = DirectoryScanner::new(db.clone())
        .with_skip_already_queued(config.scanner.skip_already_queued)
        .with_progress_callback(Box::new(|p: ScanProgress| {
            debug!(processed = p.processed, total = p.total, "Scan progress");
        }));

    let count = scanner
        .scan_directory(dir, recursive)
        .with_context(|| format!("scan {}", dir.display()))?;
    println!("Queued {} file(s) from {}", count, dir.display());
    Ok(count)
}

/// Run the worker until nothing is pending or running
pub fn process(db: &Database, config: &Config) -> Result<()> {
    let pending = db.count_jobs_by_status(JobStatus::Pending)?;
    if pending == 0 {
        println!("No pending jobs");
        return Ok(());
    }

    let mut worker = Worker::new(db.clone(), Arc::new(LoftyExtractor::new()), config.worker.clone());
    if let Some(fpcalc) = &config.worker.fpcalc_path {
        worker = worker.with_fingerprinter(Arc::new(FpcalcFingerprinter::new(fpcalc)));
    }
    worker.set_progress_callback(Some(Arc::new(|p: JobProgress| {
        if p.status.is_terminal() {
            match &p.error_message {
                Some(e) => println!("  failed  {} ({})", p.file_path, e),
                None => println!("  done    {}", p.file_path),
            }
        }
    })));

    println!("Processing {} job(s)", pending);
    worker.start().context("start worker")?;
    while !worker.is_drained()? {
        thread::sleep(DRAIN_POLL);
    }
    worker.stop();

    let completed = db.count_jobs_by_status(JobStatus::Completed)?;
    let failed = db.count_jobs_by_status(JobStatus::Failed)?;
    println!("Queue drained: {} completed, {} failed in total", completed, failed);
    Ok(())
}

pub fn jobs(db: &Database, status: Option<JobStatus>) -> Result<()> {
    let jobs = match status {
        Some(status) => db.get_jobs_by_status(status)?,
        None => db.get_all_jobs()?,
    };

    for job in &jobs {
        let path = JobParameters::from_json(&job.parameters)
            .map(|p| p.file_path)
            .unwrap_or_else(|_| job.parameters.clone());
        print!("{:>6}  {:<10} {:>3}%  {}  {}", job.id, job.status, job.progress, job.job_type, path);
        match &job.error_message {
            Some(e) => println!("  [{}]", e),
            None => println!(),
        }
    }
    println!("{} job(s)", jobs.len());
    Ok(())
}

pub fn purge(db: &Database, status: JobStatus) -> Result<()> {
    let removed = db
        .purge_jobs(status)
        .with_context(|| format!("purge {} jobs", status))?;
    println!("Removed {} {} job(s)", removed, status);
    Ok(())
}

pub fn tracks(db: &Database, search: Option<&str>) -> Result<()> {
    let tracks = match search {
        Some(term) => db.search_tracks(term)?,
        None => db.get_all_tracks()?,
    };
    for track in &tracks {
        println!("{}", format_track(track));
    }
    println!("{} track(s)", tracks.len());
    Ok(())
}

pub fn duplicates(db: &Database) -> Result<()> {
    let groups = db.find_duplicate_fingerprints()?;
    if groups.is_empty() {
        println!("No duplicates found");
        return Ok(());
    }
    for (fingerprint, tracks) in &groups {
        let short: String = fingerprint.chars().take(16).collect();
        println!("{}... ({} tracks)", short, tracks.len());
        for track in tracks {
            println!("  {}", format_track(track));
        }
    }
    Ok(())
}

fn format_track(track: &Track) -> String {
    let title = track.title.as_deref().unwrap_or("Unknown");
    let artist = track.artist.as_deref().unwrap_or("Unknown Artist");
    let minutes = (track.duration / 60.0).floor() as i64;
    let seconds = (track.duration % 60.0).floor() as i64;
    let mut line = format!("{:>6}  {} - {}  [{}:{:02}]", track.id, artist, title, minutes, seconds);
    if track.bpm > 0 {
        line.push_str(&format!("  {} bpm", track.bpm));
    }
    if let Some(key) = &track.key {
        line.push_str(&format!("  {}", key));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_track() {
        let mut track = Track::new("/music/a.mp3");
        track.id = 3;
        track.title = Some("Night Drive".into());
        track.duration = 245.7;
        assert_eq!(format_track(&track), "     3  Unknown Artist - Night Drive  [4:05]");

        track.artist = Some("Kavinsky".into());
        track.bpm = 110;
        track.key = Some("4A".into());
        assert_eq!(format_track(&track), "     3  Kavinsky - Night Drive  [4:05]  110 bpm  4A");
    }

    #[test]
    fn test_process_with_empty_queue_returns_immediately() {
        let db = Database::open_in_memory().unwrap();
        process(&db, &Config::default()).unwrap();
    }

    #[test]
    fn test_purge_rejects_pending() {
        let db = Database::open_in_memory().unwrap();
        assert!(purge(&db, JobStatus::Pending).is_err());
        purge(&db, JobStatus::Completed).unwrap();
    }
}
