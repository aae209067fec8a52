//! Directory walk and job creation.
//!
//! A scan runs in two steps. Discovery walks the tree and collects candidate
//! files. Queueing then inserts one pending job per file inside a single
//! store transaction, so a cancelled scan leaves no jobs behind.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::{jobs, tracks, Database, DbError, Job, JobParameters};
use crate::scanner::{
    is_supported_audio_file, CancelToken, ProgressCallback, ScanError, ScanProgress, ScanResult,
};

/// A file found during discovery
#[derive(Debug, Clone)]
struct Candidate {
    path: String,
    size: i64,
}

pub struct DirectoryScanner {
    db: Database,
    cancel: CancelToken,
    progress: Option<ProgressCallback>,
    skip_already_queued: bool,
}

impl DirectoryScanner {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cancel: CancelToken::new(),
            progress: None,
            skip_already_queued: false,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Skip files that already have an active job or a track
    pub fn with_skip_already_queued(mut self, skip: bool) -> Self {
        self.skip_already_queued = skip;
        self
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    /// Handle for cancelling a running scan from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Queue an `analyze_audio` job for every supported file under `root`.
    ///
    /// Returns the number of jobs created, or 0 when cancelled. The flag is
    /// cleared when a scan starts, so a cancel only affects a scan in progress.
    /// Other threads using the store wait while jobs are being queued; see
    /// [`ProgressCallback`].
    pub fn scan_directory(&self, root: &Path, recursive: bool) -> ScanResult<usize> {
        self.cancel.reset();

        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.display().to_string()));
        }
        let root = std::path::absolute(root)?;

        let result = self
            .discover(&root, recursive)
            .and_then(|candidates| self.queue(candidates));

        match result {
            Ok(count) => {
                info!(root = %root.display(), count, "Scan complete");
                Ok(count)
            }
            Err(ScanError::Cancelled) => {
                info!(root = %root.display(), "Scan cancelled, no jobs created");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn check_cancelled(&self) -> ScanResult<()> {
        if self.cancel.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Walk the tree: files in a directory before its subdirectories are entered
    fn discover(&self, root: &Path, recursive: bool) -> ScanResult<Vec<Candidate>> {
        let walker = if recursive {
            WalkDir::new(root).follow_links(true)
        } else {
            WalkDir::new(root).max_depth(1).follow_links(true)
        };

        let mut candidates = Vec::new();
        for entry in walker.sort_by(|a, b| {
            b.file_type()
                .is_file()
                .cmp(&a.file_type().is_file())
                .then_with(|| a.file_name().cmp(b.file_name()))
        }) {
            self.check_cancelled()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_supported_audio_file(entry.path()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
            candidates.push(Candidate {
                path: entry.path().to_string_lossy().to_string(),
                size,
            });
        }

        debug!(count = candidates.len(), "Discovery finished");
        Ok(candidates)
    }

    fn queue(&self, candidates: Vec<Candidate>) -> ScanResult<usize> {
        let total = candidates.len();
        if total == 0 {
            return Ok(0);
        }

        let active: HashSet<String> = if self.skip_already_queued {
            self.db.get_active_job_paths()?
        } else {
            HashSet::new()
        };

        let discovered_at = Utc::now().to_rfc3339();

        self.db.transaction(|conn| {
            let mut created = 0;
            for (i, candidate) in candidates.iter().enumerate() {
                self.check_cancelled()?;

                let skip = self.skip_already_queued
                    && (active.contains(&candidate.path)
                        || tracks::get_track_by_path(conn, &candidate.path)?.is_some());

                if skip {
                    debug!(path = %candidate.path, "Already queued or catalogued, skipping");
                } else {
                    let params = JobParameters {
                        file_path: candidate.path.clone(),
                        file_size: Some(candidate.size),
                        date_added: Some(discovered_at.clone()),
                    };
                    let job = Job::analyze_audio(&params).map_err(DbError::from)?;
                    jobs::add_job(conn, &job)?;
                    created += 1;
                }

                if let Some(cb) = &self.progress {
                    cb(ScanProgress {
                        processed: i + 1,
                        total,
                    });
                }
            }
            Ok(created)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JobStatus;
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"fake audio").unwrap();
    }

    fn library(dir: &Path) {
        touch(&dir.join("a.mp3"));
        touch(&dir.join("b.FLAC"));
        touch(&dir.join("cover.jpg"));
        touch(&dir.join("sub").join("c.wav"));
        touch(&dir.join("sub").join("deeper").join("d.ogg"));
        touch(&dir.join("sub").join("notes.txt"));
    }

    fn queued_paths(db: &Database) -> Vec<String> {
        let mut paths: Vec<_> = db
            .get_jobs_by_status(JobStatus::Pending)
            .unwrap()
            .into_iter()
            .map(|j| JobParameters::from_json(&j.parameters).unwrap().file_path)
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_recursive_scan_queues_supported_files() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let count = DirectoryScanner::new(db.clone())
            .scan_directory(dir.path(), true)
            .unwrap();

        assert_eq!(count, 4);
        let paths = queued_paths(&db);
        assert_eq!(paths.len(), 4);
        assert!(paths.iter().all(|p| Path::new(p).is_absolute()));
        assert!(paths.iter().any(|p| p.ends_with("d.ogg")));

        let job = &db.get_all_jobs().unwrap()[0];
        assert_eq!(job.job_type, "analyze_audio");
        let params = JobParameters::from_json(&job.parameters).unwrap();
        assert_eq!(params.file_size, Some(10));
        assert!(params.date_added.is_some());
    }

    #[test]
    fn test_non_recursive_scan_stays_at_top_level() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let count = DirectoryScanner::new(db.clone())
            .scan_directory(dir.path(), false)
            .unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn test_rescan_duplicates_jobs_by_default() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();
        let scanner = DirectoryScanner::new(db.clone());

        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 4);
        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 4);
        assert_eq!(db.count_jobs_by_status(JobStatus::Pending).unwrap(), 8);
    }

    #[test]
    fn test_skip_already_queued() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();
        let scanner = DirectoryScanner::new(db.clone()).with_skip_already_queued(true);

        assert_eq!(scanner.scan_directory(dir.path(), false).unwrap(), 2);
        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 2);
        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 0);
        assert_eq!(db.count_jobs_by_status(JobStatus::Pending).unwrap(), 4);
    }

    #[test]
    fn test_progress_reports_each_file() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let scanner = DirectoryScanner::new(db).with_progress_callback(Box::new(move |p: ScanProgress| {
            sink.lock().push(p);
        }));

        scanner.scan_directory(dir.path(), true).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], ScanProgress { processed: 1, total: 4 });
        assert_eq!(seen[3], ScanProgress { processed: 4, total: 4 });
    }

    #[test]
    fn test_cancel_mid_scan_rolls_back() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let mut scanner = DirectoryScanner::new(db.clone());
        let token = scanner.cancel_token();
        scanner.set_progress_callback(Some(Box::new(move |p: ScanProgress| {
            if p.processed == 2 {
                token.cancel();
            }
        })));

        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 0);
        assert!(db.get_all_jobs().unwrap().is_empty());

        // The next scan starts with a cleared flag
        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 4);
    }

    #[test]
    fn test_progress_callback_can_read_the_store() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        let reader = db.clone();
        let scanner = DirectoryScanner::new(db).with_progress_callback(Box::new(move |_: ScanProgress| {
            sink.lock().push(reader.count_jobs_by_status(JobStatus::Pending).unwrap());
        }));

        scanner.scan_directory(dir.path(), true).unwrap();
        assert_eq!(*counts.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let scanner = DirectoryScanner::new(db);

        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 0);

        let file = dir.path().join("a.mp3");
        touch(&file);
        assert!(matches!(
            scanner.scan_directory(&file, true),
            Err(ScanError::NotADirectory(_))
        ));
        assert!(matches!(
            scanner.scan_directory(&dir.path().join("missing"), true),
            Err(ScanError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_other_threads_see_jobs_only_after_commit() {
        let dir = tempdir().unwrap();
        library(dir.path());
        let db = Database::open_in_memory().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));
        let rx_in_callback = Arc::clone(&rx);
        let reader = Arc::new(Mutex::new(None));
        let reader_slot = Arc::clone(&reader);
        let blocked = Arc::new(Mutex::new(None));
        let blocked_flag = Arc::clone(&blocked);
        let other = db.clone();

        let scanner = DirectoryScanner::new(db).with_progress_callback(Box::new(move |p: ScanProgress| {
            if p.processed != 1 {
                return;
            }
            let other = other.clone();
            let tx = tx.clone();
            *reader_slot.lock() = Some(std::thread::spawn(move || {
                let count = other.count_jobs_by_status(JobStatus::Pending).unwrap();
                tx.send(count).unwrap();
            }));
            // The store lock is ours until the scan commits
            *blocked_flag.lock() = Some(rx_in_callback.lock().recv_timeout(Duration::from_millis(100)).is_err());
        }));

        assert_eq!(scanner.scan_directory(dir.path(), true).unwrap(), 4);
        assert_eq!(*blocked.lock(), Some(true));

        let handle = reader.lock().take().unwrap();
        handle.join().unwrap();
        // The reader ran once the transaction committed
        assert_eq!(rx.lock().recv().unwrap(), 4);
    }
}
