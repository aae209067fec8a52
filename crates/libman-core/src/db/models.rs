//! Database models.
//!
//! These structs are plain copies of stored rows; mutating one has no effect
//! on the store until it is passed back through an update call.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalogued audio file with extracted metadata (Tracks table)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Track {
    /// Store-assigned identity; 0 means not yet saved
    pub id: i64,
    pub file_path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    /// 0 when unknown
    pub bpm: i32,
    pub key: Option<String>,
    /// Seconds
    pub duration: f64,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub acoustid_fingerprint: Option<String>,
    pub date_added: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Track {
    pub fn new(file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            file_path: file_path.into(),
            date_added: now,
            last_modified: now,
            ..Default::default()
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }
}

/// Playlist, either static (links) or smart (criteria)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VirtualFolder {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub date_created: DateTime<Utc>,
    pub is_smart_playlist: bool,
    /// Serialized predicate list, e.g. `bpmMin:120;bpmMax:130;genre:House`
    pub smart_criteria: Option<String>,
}

impl VirtualFolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            date_created: Utc::now(),
            ..Default::default()
        }
    }

    pub fn smart(name: impl Into<String>, criteria: impl Into<String>) -> Self {
        Self {
            is_smart_playlist: true,
            smart_criteria: Some(criteria.into()),
            ..Self::new(name)
        }
    }
}

/// Membership of a track in a virtual folder
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FolderTrackLink {
    pub id: i64,
    pub folder_id: i64,
    pub track_id: i64,
    pub display_order: i32,
    pub date_added: DateTime<Utc>,
}

impl FolderTrackLink {
    pub fn new(folder_id: i64, track_id: i64, display_order: i32) -> Self {
        Self {
            id: 0,
            folder_id,
            track_id,
            display_order,
            date_added: Utc::now(),
        }
    }
}

/// Cue point kind, stored as an integer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum CueType {
    #[default]
    MemoryCue,
    HotCue,
    LoopIn,
    LoopOut,
}

impl CueType {
    pub fn as_i64(&self) -> i64 {
        match self {
            CueType::MemoryCue => 0,
            CueType::HotCue => 1,
            CueType::LoopIn => 2,
            CueType::LoopOut => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(CueType::MemoryCue),
            1 => Some(CueType::HotCue),
            2 => Some(CueType::LoopIn),
            3 => Some(CueType::LoopOut),
            _ => None,
        }
    }
}

impl ToSql for CueType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for CueType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        CueType::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

/// Hot cue slots are 0..=7; -1 means "not a hot cue"
pub const NO_HOT_CUE: i32 = -1;
pub const MAX_HOT_CUE: i32 = 7;

/// Named position marker within a track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CuePoint {
    pub id: i64,
    pub track_id: i64,
    /// Seconds from track start
    pub position: f64,
    pub name: String,
    pub cue_type: CueType,
    pub hot_cue_number: i32,
    pub color: Option<String>,
    pub date_created: DateTime<Utc>,
}

impl Default for CuePoint {
    fn default() -> Self {
        Self {
            id: 0,
            track_id: 0,
            position: 0.0,
            name: String::new(),
            cue_type: CueType::MemoryCue,
            hot_cue_number: NO_HOT_CUE,
            color: None,
            date_created: DateTime::<Utc>::default(),
        }
    }
}

impl CuePoint {
    pub fn new(track_id: i64, position: f64, name: impl Into<String>) -> Self {
        Self {
            track_id,
            position,
            name: name.into(),
            date_created: Utc::now(),
            ..Default::default()
        }
    }

    pub fn hot_cue(track_id: i64, position: f64, number: i32) -> Self {
        Self {
            cue_type: CueType::HotCue,
            hot_cue_number: number,
            ..Self::new(track_id, position, format!("Hot Cue {}", number + 1))
        }
    }
}

/// Job status. Transitions are strictly `Pending -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Job types understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    AnalyzeAudio,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AnalyzeAudio => "analyze_audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyze_audio" => Some(JobKind::AnalyzeAudio),
            _ => None,
        }
    }
}

/// Payload of an `analyze_audio` job, persisted as JSON in `Jobs.parameters`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobParameters {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    /// Discovery timestamp (ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<String>,
}

impl JobParameters {
    pub fn for_file(file_path: impl Into<String>, file_size: i64) -> Self {
        Self {
            file_path: file_path.into(),
            file_size: Some(file_size),
            date_added: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Unit of deferred work (Jobs table)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub status: JobStatus,
    pub parameters: String,
    pub date_created: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// 0-100, advisory only
    pub progress: i32,
}

impl Job {
    pub fn new(job_type: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            parameters: parameters.into(),
            date_created: Utc::now(),
            ..Default::default()
        }
    }

    /// Pending `analyze_audio` job for one file
    pub fn analyze_audio(params: &JobParameters) -> Result<Self, serde_json::Error> {
        Ok(Self::new(JobKind::AnalyzeAudio.as_str(), params.to_json()?))
    }

    pub fn kind(&self) -> Option<JobKind> {
        JobKind::parse(&self.job_type)
    }
}
