//! Smart playlist criteria.
//!
//! Criteria persist as `key:value` pairs separated by `;`, for example
//! `bpmMin:120;bpmMax:130;genre:House`. Keys are case-insensitive. Unknown
//! keys and unparseable numbers are dropped during parsing.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::fmt;

use crate::db::tracks::{like_pattern, row_to_track};
use crate::db::{DbResult, Track, VirtualFolder};

/// One filter over the Tracks table
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Case-insensitive substring match
    Artist(String),
    Album(String),
    Genre(String),
    Title(String),
    /// Exact match
    Key(String),
    /// Inclusive lower bound
    BpmMin(i32),
    /// Inclusive upper bound
    BpmMax(i32),
}

impl Predicate {
    fn parse(key: &str, value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "artist" => Some(Predicate::Artist(value.to_string())),
            "album" => Some(Predicate::Album(value.to_string())),
            "genre" => Some(Predicate::Genre(value.to_string())),
            "title" => Some(Predicate::Title(value.to_string())),
            "key" => Some(Predicate::Key(value.to_string())),
            "bpmmin" => value.parse().ok().map(Predicate::BpmMin),
            "bpmmax" => value.parse().ok().map(Predicate::BpmMax),
            _ => None,
        }
    }

    fn sql(&self) -> (&'static str, Value) {
        match self {
            Predicate::Artist(v) => ("artist LIKE ? ESCAPE '\\'", Value::Text(like_pattern(v))),
            Predicate::Album(v) => ("album LIKE ? ESCAPE '\\'", Value::Text(like_pattern(v))),
            Predicate::Genre(v) => ("genre LIKE ? ESCAPE '\\'", Value::Text(like_pattern(v))),
            Predicate::Title(v) => ("title LIKE ? ESCAPE '\\'", Value::Text(like_pattern(v))),
            Predicate::Key(v) => ("key = ?", Value::Text(v.clone())),
            Predicate::BpmMin(n) => ("bpm >= ?", Value::Integer(i64::from(*n))),
            Predicate::BpmMax(n) => ("bpm <= ?", Value::Integer(i64::from(*n))),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Artist(v) => write!(f, "artist:{}", v),
            Predicate::Album(v) => write!(f, "album:{}", v),
            Predicate::Genre(v) => write!(f, "genre:{}", v),
            Predicate::Title(v) => write!(f, "title:{}", v),
            Predicate::Key(v) => write!(f, "key:{}", v),
            Predicate::BpmMin(n) => write!(f, "bpmMin:{}", n),
            Predicate::BpmMax(n) => write!(f, "bpmMax:{}", n),
        }
    }
}

/// Parsed smart playlist criteria; all predicates must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartCriteria {
    pub predicates: Vec<Predicate>,
}

impl SmartCriteria {
    pub fn parse(criteria: &str) -> Self {
        let predicates = criteria
            .split(';')
            .filter_map(|pair| pair.split_once(':'))
            .filter_map(|(key, value)| Predicate::parse(key, value))
            .collect();
        Self { predicates }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        if self.predicates.is_empty() {
            return (String::new(), Vec::new());
        }
        let (clauses, values): (Vec<_>, Vec<_>) = self.predicates.iter().map(Predicate::sql).unzip();
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

impl fmt::Display for SmartCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}", predicate)?;
        }
        Ok(())
    }
}

/// Tracks matching a smart folder's criteria, ordered by title.
///
/// A folder that is not smart yields nothing; a smart folder without any
/// recognised predicate matches every track.
pub fn evaluate_smart_playlist(conn: &Connection, folder: &VirtualFolder) -> DbResult<Vec<Track>> {
    if !folder.is_smart_playlist {
        return Ok(Vec::new());
    }

    let criteria = SmartCriteria::parse(folder.smart_criteria.as_deref().unwrap_or_default());
    let (where_clause, values) = criteria.where_clause();
    let sql = format!(
        "SELECT id, file_path, title, artist, album, genre, bpm, key, duration, file_size,
                file_hash, acoustid_fingerprint, date_added, last_modified
         FROM Tracks {} ORDER BY title COLLATE NOCASE, id",
        where_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let tracks = stmt
        .query_map(params_from_iter(values), row_to_track)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

impl crate::db::Database {
    pub fn evaluate_smart_playlist(&self, folder: &VirtualFolder) -> DbResult<Vec<Track>> {
        self.with_conn("evaluate_smart_playlist", |conn| {
            evaluate_smart_playlist(conn, folder)
        })
    }
}
