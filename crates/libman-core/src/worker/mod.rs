//! Background job worker.
//!
//! One dedicated thread drains the `Jobs` table: it claims the oldest pending
//! job, runs its handler, and writes back a terminal status before looking at
//! the next one. At most one job is in flight at any time.
//!
//! The thread idles on a control channel with a timeout, so `wake()` and
//! `stop()` interrupt the wait instead of sleeping it out.

mod analyze;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::db::{Database, DbError, DbResult, Job, JobKind, JobParameters, JobStatus};
use crate::fingerprint::Fingerprinter;
use crate::metadata::MetadataExtractor;

/// Reasons a job ends up `failed`. The `Display` text becomes the job's error message.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to save to database: {0}")]
    Database(#[from] DbError),

    #[error("Job handler panicked: {0}")]
    Panicked(String),
}

/// Snapshot of the job being processed, pushed to the progress callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: i64,
    pub job_type: String,
    pub file_path: String,
    pub progress: i32,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

impl JobProgress {
    fn started(job: &Job) -> Self {
        let file_path = JobParameters::from_json(&job.parameters)
            .map(|p| p.file_path)
            .unwrap_or_default();
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            file_path,
            progress: 0,
            status: JobStatus::Running,
            error_message: None,
        }
    }
}

/// Progress sink. Runs on the worker thread; it must not block, and a panic
/// inside it is caught and ignored.
pub type JobProgressCallback = Arc<dyn Fn(JobProgress) + Send + Sync>;

enum Control {
    Wake,
    Stop,
}

struct RunningLoop {
    control: Sender<Control>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// State shared between the worker handle and its thread
pub(crate) struct Processor {
    pub(crate) db: Database,
    pub(crate) extractor: Arc<dyn MetadataExtractor>,
    pub(crate) fingerprinter: Option<Arc<dyn Fingerprinter>>,
    pub(crate) config: WorkerConfig,
    current: Arc<Mutex<Option<JobProgress>>>,
    callback: Arc<RwLock<Option<JobProgressCallback>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Processor {
    /// Claim and run the oldest pending job. Returns false when the queue is empty.
    fn process_next(&self) -> DbResult<bool> {
        let Some(job) = self.db.next_pending_job()? else {
            return Ok(false);
        };

        if !self.db.claim_job(job.id)? {
            debug!(job_id = job.id, "Job no longer pending, skipping");
            return Ok(true);
        }

        info!(job_id = job.id, job_type = %job.job_type, "Processing job");
        *self.current.lock() = Some(JobProgress::started(&job));
        self.notify();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&job)))
            .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload))));

        self.finish(&job, outcome);
        Ok(true)
    }

    fn execute(&self, job: &Job) -> Result<(), JobError> {
        match job.kind() {
            Some(JobKind::AnalyzeAudio) => analyze::analyze_audio(self, job),
            None => Err(JobError::UnknownJobType(job.job_type.clone())),
        }
    }

    fn finish(&self, job: &Job, outcome: Result<(), JobError>) {
        let (status, message) = match outcome {
            Ok(()) => match self.db.complete_job(job.id) {
                Ok(true) => (JobStatus::Completed, None),
                Ok(false) => {
                    // Someone else moved the row out of `running` meanwhile
                    let message = self.lost_job_message(job);
                    (JobStatus::Failed, Some(message))
                }
                Err(e) => {
                    let message = JobError::from(e).to_string();
                    self.record_failure(job, &message);
                    (JobStatus::Failed, Some(message))
                }
            },
            Err(e) => {
                let message = e.to_string();
                self.record_failure(job, &message);
                (JobStatus::Failed, Some(message))
            }
        };

        match status {
            JobStatus::Completed => info!(job_id = job.id, "Job completed"),
            _ => warn!(job_id = job.id, error = ?message, "Job failed"),
        }

        if let Some(snapshot) = self.current.lock().as_mut() {
            snapshot.status = status;
            if status == JobStatus::Completed {
                snapshot.progress = 100;
            }
            snapshot.error_message = message;
        }
        self.notify();
        *self.current.lock() = None;
    }

    fn record_failure(&self, job: &Job, message: &str) {
        match self.db.fail_job(job.id, message) {
            Ok(true) => {}
            Ok(false) => warn!(job_id = job.id, "Job was no longer running; failure not recorded"),
            // Left `running`; the next worker start marks it interrupted
            Err(e) => error!(job_id = job.id, "Could not record job failure: {}", e),
        }
    }

    fn lost_job_message(&self, job: &Job) -> String {
        match self.db.get_job(job.id) {
            Ok(Some(stored)) => stored
                .error_message
                .unwrap_or_else(|| format!("Job left running state ({})", stored.status)),
            Ok(None) => "Job was deleted while running".to_string(),
            Err(e) => JobError::from(e).to_string(),
        }
    }

    /// Persist and publish handler progress
    pub(crate) fn report(&self, job: &Job, progress: i32) {
        if let Err(e) = self.db.update_job_progress(job.id, progress) {
            warn!(job_id = job.id, "Could not store job progress: {}", e);
        }
        if let Some(snapshot) = self.current.lock().as_mut() {
            snapshot.progress = progress.clamp(0, 100);
        }
        self.notify();
    }

    fn notify(&self) {
        let Some(snapshot) = self.current.lock().clone() else {
            return;
        };
        let Some(callback) = self.callback.read().clone() else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            warn!("Job progress callback panicked");
        }
    }
}

/// Wait for the next control message, up to the poll interval.
/// Returns false when the loop should exit.
fn idle(rx: &Receiver<Control>, processor: &Processor) -> bool {
    match rx.recv_timeout(processor.config.poll_interval()) {
        Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => true,
        Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => false,
    }
}

/// Drain control messages without blocking. Returns false on stop.
fn keep_running(rx: &Receiver<Control>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(Control::Wake) => continue,
            Ok(Control::Stop) | Err(TryRecvError::Disconnected) => return false,
            Err(TryRecvError::Empty) => return true,
        }
    }
}

fn worker_thread(processor: Arc<Processor>, rx: Receiver<Control>, done: Sender<()>) {
    info!("Worker started");

    while keep_running(&rx) {
        match processor.process_next() {
            Ok(true) => {}
            Ok(false) => {
                if !idle(&rx, &processor) {
                    break;
                }
            }
            Err(e) => {
                error!("Worker could not read the job queue: {}", e);
                if !idle(&rx, &processor) {
                    break;
                }
            }
        }
    }

    info!("Worker stopped");
    let _ = done.send(());
}

/// Handle owning the worker thread
pub struct Worker {
    db: Database,
    extractor: Arc<dyn MetadataExtractor>,
    fingerprinter: Option<Arc<dyn Fingerprinter>>,
    config: WorkerConfig,
    current: Arc<Mutex<Option<JobProgress>>>,
    callback: Arc<RwLock<Option<JobProgressCallback>>>,
    running: Mutex<Option<RunningLoop>>,
    /// Loop whose `stop()` timed out; it exits after its current job
    lingering: Mutex<Option<RunningLoop>>,
}

impl Worker {
    pub fn new(db: Database, extractor: Arc<dyn MetadataExtractor>, config: WorkerConfig) -> Self {
        Self {
            db,
            extractor,
            fingerprinter: None,
            config,
            current: Arc::new(Mutex::new(None)),
            callback: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
            lingering: Mutex::new(None),
        }
    }

    /// Store acoustic fingerprints for analysed files. Takes effect on the next `start()`.
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    /// Replace the progress callback; applies immediately, even while running
    pub fn set_progress_callback(&self, callback: Option<JobProgressCallback>) {
        *self.callback.write() = callback;
    }

    /// Start the worker thread. Does nothing if it is already running.
    ///
    /// Fails with `WouldBlock` while a loop from an earlier timed-out
    /// `stop()` is still finishing its job.
    pub fn start(&self) -> std::io::Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let previous = self.lingering.lock().take();
        if let Some(previous) = previous {
            if let Err(previous) = self.join_loop(previous) {
                *self.lingering.lock() = Some(previous);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "previous worker loop is still finishing a job",
                ));
            }
        }

        if self.config.fail_interrupted_jobs {
            if let Err(e) = self.db.fail_interrupted_jobs() {
                warn!("Could not fail interrupted jobs: {}", e);
            }
        }

        let processor = Arc::new(Processor {
            db: self.db.clone(),
            extractor: Arc::clone(&self.extractor),
            fingerprinter: self.fingerprinter.clone(),
            config: self.config.clone(),
            current: Arc::clone(&self.current),
            callback: Arc::clone(&self.callback),
        });

        let (control, rx) = mpsc::channel();
        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("libman-worker".to_string())
            .spawn(move || worker_thread(processor, rx, done_tx))?;

        *running = Some(RunningLoop {
            control,
            done,
            handle,
        });
        Ok(())
    }

    /// Stop the worker thread and wait for it to exit, up to the configured
    /// timeout. Does nothing if it is not running.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let _ = running.control.send(Control::Stop);
        if let Err(running) = self.join_loop(running) {
            warn!(
                timeout_ms = self.config.stop_timeout_ms,
                "Worker did not stop in time; detaching"
            );
            *self.lingering.lock() = Some(running);
        }
    }

    /// Wait up to the stop timeout for a stopped loop to exit. Hands the
    /// loop back if it is still busy.
    fn join_loop(&self, running: RunningLoop) -> Result<(), RunningLoop> {
        match running.done.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if running.handle.join().is_err() {
                    error!("Worker thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(running),
        }
    }

    /// Interrupt the idle wait so new jobs are picked up immediately
    pub fn wake(&self) {
        if let Some(running) = self.running.lock().as_ref() {
            let _ = running.control.send(Control::Wake);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn is_processing(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn current_job(&self) -> Option<JobProgress> {
        self.current.lock().clone()
    }

    pub fn pending_job_count(&self) -> DbResult<usize> {
        self.db.count_jobs_by_status(JobStatus::Pending)
    }

    /// True when nothing is pending or running
    pub fn is_drained(&self) -> DbResult<bool> {
        Ok(self.db.count_jobs_by_status(JobStatus::Pending)? == 0
            && self.db.count_jobs_by_status(JobStatus::Running)? == 0)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
