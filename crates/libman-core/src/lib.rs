//! libman-core: audio library management backend
//!
//! # Architecture
//!
//! - `db`: SQLite store for tracks, virtual folders, cue points and the job queue
//! - `scanner`: walks directories and queues `analyze_audio` jobs
//! - `worker`: background thread that drains the job queue into the catalog
//! - `metadata` / `fingerprint`: per-file analysis used by the worker
//! - `config`: TOML configuration with environment overrides
//!
//! # Usage
//!
//! ```ignore
//! use libman_core::{Database, DirectoryScanner, LoftyExtractor, Worker, WorkerConfig};
//! use std::sync::Arc;
//!
//! let db = Database::open("library.db")?;
//! DirectoryScanner::new(db.clone()).scan_directory("/music".as_ref(), true)?;
//!
//! let worker = Worker::new(db, Arc::new(LoftyExtractor::new()), WorkerConfig::default());
//! worker.start()?;
//! ```

pub mod config;
pub mod db;
pub mod fingerprint;
pub mod metadata;
pub mod scanner;
pub mod worker;

// Re-export commonly used types at crate root
pub use config::{Config, ConfigError, ScannerConfig, WorkerConfig};
pub use db::{
    CuePoint, CueType, Database, DbError, DbResult, FolderTrackLink, Job, JobKind, JobParameters,
    JobStatus, Track, VirtualFolder,
};
pub use fingerprint::{compute_content_hash, FingerprintError, Fingerprinter, FpcalcFingerprinter};
pub use metadata::{AudioMetadata, LoftyExtractor, MetadataError, MetadataExtractor};
pub use scanner::{CancelToken, DirectoryScanner, ScanError, ScanProgress};
pub use worker::{JobError, JobProgress, JobProgressCallback, Worker};
