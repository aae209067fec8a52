//! Job queue operations (Jobs table).
//!
//! The table is the queue. Status only ever moves forward:
//! `pending -> running -> completed | failed`. The lifecycle helpers below
//! guard each transition on the current status so a stale caller cannot move
//! a job backwards.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::db::{Database, DbError, DbResult, Job, JobParameters, JobStatus};

/// Message stored on jobs found `running` when a worker starts
pub const INTERRUPTED_MESSAGE: &str = "Interrupted before completion";

const JOB_COLUMNS: &str = "id, job_type, status, parameters, date_created, date_started, \
     date_completed, error_message, progress";

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get("id")?,
        job_type: row.get("job_type")?,
        status: row.get("status")?,
        parameters: row.get::<_, Option<String>>("parameters")?.unwrap_or_default(),
        date_created: row.get("date_created")?,
        date_started: row.get("date_started")?,
        date_completed: row.get("date_completed")?,
        error_message: row.get("error_message")?,
        progress: row.get::<_, Option<i32>>("progress")?.unwrap_or(0),
    })
}

fn query_jobs<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> DbResult<Vec<Job>> {
    let mut stmt = conn.prepare(sql)?;
    let jobs = stmt
        .query_map(params, row_to_job)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn add_job(conn: &Connection, job: &Job) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO Jobs (job_type, status, parameters, date_created, date_started,
             date_completed, error_message, progress)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            job.job_type,
            job.status,
            job.parameters,
            job.date_created,
            job.date_started,
            job.date_completed,
            job.error_message,
            job.progress,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite a job row. Prefer the lifecycle helpers for status changes.
pub fn update_job(conn: &Connection, job: &Job) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Jobs SET job_type = ?1, status = ?2, parameters = ?3, date_started = ?4,
             date_completed = ?5, error_message = ?6, progress = ?7
         WHERE id = ?8",
        params![
            job.job_type,
            job.status,
            job.parameters,
            job.date_started,
            job.date_completed,
            job.error_message,
            job.progress,
            job.id,
        ],
    )?;
    Ok(updated > 0)
}

pub fn delete_job(conn: &Connection, id: i64) -> DbResult<bool> {
    let deleted = conn.execute("DELETE FROM Jobs WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

pub fn get_job(conn: &Connection, id: i64) -> DbResult<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM Jobs WHERE id = ?", JOB_COLUMNS),
            [id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// All jobs, newest first
pub fn get_all_jobs(conn: &Connection) -> DbResult<Vec<Job>> {
    query_jobs(
        conn,
        &format!("SELECT {} FROM Jobs ORDER BY date_created DESC, id DESC", JOB_COLUMNS),
        [],
    )
}

/// Jobs in one status, oldest first
pub fn get_jobs_by_status(conn: &Connection, status: JobStatus) -> DbResult<Vec<Job>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {} FROM Jobs WHERE status = ? ORDER BY date_created ASC, id ASC",
            JOB_COLUMNS
        ),
        [status],
    )
}

pub fn count_jobs_by_status(conn: &Connection, status: JobStatus) -> DbResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM Jobs WHERE status = ?",
        [status],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Oldest pending job, if any
pub fn next_pending_job(conn: &Connection) -> DbResult<Option<Job>> {
    let job = conn
        .query_row(
            &format!(
                "SELECT {} FROM Jobs WHERE status = ? ORDER BY date_created ASC, id ASC LIMIT 1",
                JOB_COLUMNS
            ),
            [JobStatus::Pending],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// Move a pending job to `running`, stamping `date_started` and resetting
/// progress. Returns false if the job is no longer pending.
pub fn claim_job(conn: &Connection, id: i64) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Jobs SET status = ?1, date_started = ?2, progress = 0
         WHERE id = ?3 AND status = ?4",
        params![JobStatus::Running, Utc::now(), id, JobStatus::Pending],
    )?;
    Ok(updated > 0)
}

/// Record progress (clamped to 0..=100) on a running job
pub fn update_job_progress(conn: &Connection, id: i64, progress: i32) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Jobs SET progress = ?1 WHERE id = ?2 AND status = ?3",
        params![progress.clamp(0, 100), id, JobStatus::Running],
    )?;
    Ok(updated > 0)
}

/// Finish a running job successfully; progress is forced to 100
pub fn complete_job(conn: &Connection, id: i64) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Jobs SET status = ?1, date_completed = ?2, progress = 100, error_message = NULL
         WHERE id = ?3 AND status = ?4",
        params![JobStatus::Completed, Utc::now(), id, JobStatus::Running],
    )?;
    Ok(updated > 0)
}

/// Fail a running job; progress keeps its last reported value
pub fn fail_job(conn: &Connection, id: i64, error_message: &str) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Jobs SET status = ?1, date_completed = ?2, error_message = ?3
         WHERE id = ?4 AND status = ?5",
        params![JobStatus::Failed, Utc::now(), error_message, id, JobStatus::Running],
    )?;
    Ok(updated > 0)
}

/// Fail every job left `running` by a previous process
pub fn fail_interrupted_jobs(conn: &Connection) -> DbResult<usize> {
    let updated = conn.execute(
        "UPDATE Jobs SET status = ?1, date_completed = ?2, error_message = ?3 WHERE status = ?4",
        params![JobStatus::Failed, Utc::now(), INTERRUPTED_MESSAGE, JobStatus::Running],
    )?;
    if updated > 0 {
        warn!(count = updated, "Marked interrupted jobs as failed");
    }
    Ok(updated)
}

/// Delete all jobs in a terminal status. Pending and running jobs cannot be purged.
pub fn purge_jobs(conn: &Connection, status: JobStatus) -> DbResult<usize> {
    if !status.is_terminal() {
        return Err(DbError::Constraint(format!(
            "only completed or failed jobs can be purged, not {}",
            status
        )));
    }
    let deleted = conn.execute("DELETE FROM Jobs WHERE status = ?", [status])?;
    debug!(count = deleted, %status, "Purged jobs");
    Ok(deleted)
}

/// File paths referenced by pending or running jobs
pub fn get_active_job_paths(conn: &Connection) -> DbResult<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT parameters FROM Jobs WHERE status IN (?1, ?2)")?;
    let payloads = stmt
        .query_map(params![JobStatus::Pending, JobStatus::Running], |row| {
            row.get::<_, Option<String>>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payloads
        .into_iter()
        .flatten()
        .filter_map(|json| JobParameters::from_json(&json).ok())
        .map(|p| p.file_path)
        .collect())
}

impl Database {
    pub fn add_job(&self, job: &Job) -> DbResult<i64> {
        self.with_conn("add_job", |conn| add_job(conn, job))
    }

    pub fn update_job(&self, job: &Job) -> DbResult<bool> {
        self.with_conn("update_job", |conn| update_job(conn, job))
    }

    pub fn delete_job(&self, id: i64) -> DbResult<bool> {
        self.with_conn("delete_job", |conn| delete_job(conn, id))
    }

    pub fn get_job(&self, id: i64) -> DbResult<Option<Job>> {
        self.with_conn("get_job", |conn| get_job(conn, id))
    }

    pub fn get_all_jobs(&self) -> DbResult<Vec<Job>> {
        self.with_conn("get_all_jobs", get_all_jobs)
    }

    pub fn get_jobs_by_status(&self, status: JobStatus) -> DbResult<Vec<Job>> {
        self.with_conn("get_jobs_by_status", |conn| get_jobs_by_status(conn, status))
    }

    pub fn count_jobs_by_status(&self, status: JobStatus) -> DbResult<usize> {
        self.with_conn("count_jobs_by_status", |conn| count_jobs_by_status(conn, status))
    }

    pub fn next_pending_job(&self) -> DbResult<Option<Job>> {
        self.with_conn("next_pending_job", next_pending_job)
    }

    pub fn claim_job(&self, id: i64) -> DbResult<bool> {
        self.with_conn("claim_job", |conn| claim_job(conn, id))
    }

    pub fn update_job_progress(&self, id: i64, progress: i32) -> DbResult<bool> {
        self.with_conn("update_job_progress", |conn| update_job_progress(conn, id, progress))
    }

    pub fn complete_job(&self, id: i64) -> DbResult<bool> {
        self.with_conn("complete_job", |conn| complete_job(conn, id))
    }

    pub fn fail_job(&self, id: i64, error_message: &str) -> DbResult<bool> {
        self.with_conn("fail_job", |conn| fail_job(conn, id, error_message))
    }

    pub fn fail_interrupted_jobs(&self) -> DbResult<usize> {
        self.with_conn("fail_interrupted_jobs", fail_interrupted_jobs)
    }

    pub fn purge_jobs(&self, status: JobStatus) -> DbResult<usize> {
        self.with_conn("purge_jobs", |conn| purge_jobs(conn, status))
    }

    pub fn get_active_job_paths(&self) -> DbResult<HashSet<String>> {
        self.with_conn("get_active_job_paths", get_active_job_paths)
    }
}
