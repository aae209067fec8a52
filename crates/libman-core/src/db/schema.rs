//! Database schema definitions and migrations.
//!
//! Tables are created with `IF NOT EXISTS`; columns introduced after the
//! first release are added by [`run_migrations`], which only ever appends.

use rusqlite::Connection;
use tracing::info;

use crate::db::DbResult;

/// SQL statements for creating all database tables
pub const CREATE_TABLES: &[(&str, &str)] = &[
    (
        "Tracks",
        "CREATE TABLE IF NOT EXISTS Tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL UNIQUE,
            title TEXT,
            artist TEXT,
            album TEXT,
            genre TEXT,
            bpm INTEGER DEFAULT 0,
            key TEXT,
            duration REAL DEFAULT 0.0,
            file_size INTEGER DEFAULT 0,
            file_hash TEXT,
            acoustid_fingerprint TEXT,
            date_added TEXT NOT NULL,
            last_modified TEXT NOT NULL
        )",
    ),
    (
        "VirtualFolders",
        "CREATE TABLE IF NOT EXISTS VirtualFolders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            date_created TEXT NOT NULL,
            is_smart_playlist INTEGER DEFAULT 0,
            smart_criteria TEXT
        )",
    ),
    (
        "Folder_Tracks_Link",
        "CREATE TABLE IF NOT EXISTS Folder_Tracks_Link (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            folder_id INTEGER NOT NULL,
            track_id INTEGER NOT NULL,
            display_order INTEGER DEFAULT 0,
            date_added TEXT NOT NULL,
            FOREIGN KEY (folder_id) REFERENCES VirtualFolders(id) ON DELETE CASCADE,
            FOREIGN KEY (track_id) REFERENCES Tracks(id) ON DELETE CASCADE,
            UNIQUE(folder_id, track_id)
        )",
    ),
    (
        "Jobs",
        "CREATE TABLE IF NOT EXISTS Jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            parameters TEXT,
            date_created TEXT NOT NULL,
            date_started TEXT,
            date_completed TEXT,
            error_message TEXT,
            progress INTEGER DEFAULT 0
        )",
    ),
    (
        "CuePoints",
        "CREATE TABLE IF NOT EXISTS CuePoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL,
            position REAL NOT NULL,
            name TEXT,
            type INTEGER DEFAULT 0,
            hot_cue_number INTEGER DEFAULT -1,
            color TEXT,
            date_created TEXT NOT NULL,
            FOREIGN KEY (track_id) REFERENCES Tracks(id) ON DELETE CASCADE
        )",
    ),
];

/// Indices over columns present since the first schema version
const CREATE_INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tracks_artist ON Tracks(artist)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_album ON Tracks(album)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_genre ON Tracks(genre)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_bpm ON Tracks(bpm)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_key ON Tracks(key)",
    "CREATE INDEX IF NOT EXISTS idx_folder_tracks_folder ON Folder_Tracks_Link(folder_id)",
    "CREATE INDEX IF NOT EXISTS idx_folder_tracks_track ON Folder_Tracks_Link(track_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON Jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_type ON Jobs(job_type)",
    "CREATE INDEX IF NOT EXISTS idx_cue_points_track ON CuePoints(track_id)",
];

/// Create all database tables
pub fn create_tables(conn: &Connection) -> DbResult<()> {
    for (_, sql) in CREATE_TABLES {
        conn.execute(sql, [])?;
    }
    for sql in CREATE_INDICES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Run additive migrations for databases created by older versions
pub fn run_migrations(conn: &Connection) -> DbResult<()> {
    let track_columns = get_table_columns(conn, "Tracks")?;

    // Migration: acoustic fingerprint for duplicate detection
    if !track_columns.contains(&"acoustid_fingerprint".to_string()) {
        info!("[migration] Adding acoustid_fingerprint column to Tracks table");
        conn.execute("ALTER TABLE Tracks ADD COLUMN acoustid_fingerprint TEXT", [])?;
    }

    if !index_exists(conn, "idx_tracks_fingerprint")? {
        info!("[migration] Creating acoustid_fingerprint index on Tracks table");
        conn.execute(
            "CREATE INDEX idx_tracks_fingerprint ON Tracks(acoustid_fingerprint) WHERE acoustid_fingerprint IS NOT NULL",
            [],
        )?;
    }

    // Migration: smart playlist support
    let folder_columns = get_table_columns(conn, "VirtualFolders")?;
    if !folder_columns.contains(&"is_smart_playlist".to_string()) {
        info!("[migration] Adding is_smart_playlist column to VirtualFolders table");
        conn.execute(
            "ALTER TABLE VirtualFolders ADD COLUMN is_smart_playlist INTEGER DEFAULT 0",
            [],
        )?;
    }

    if !folder_columns.contains(&"smart_criteria".to_string()) {
        info!("[migration] Adding smart_criteria column to VirtualFolders table");
        conn.execute("ALTER TABLE VirtualFolders ADD COLUMN smart_criteria TEXT", [])?;
    }

    Ok(())
}

/// Get column names for a table
pub(crate) fn get_table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Check if an index exists
fn index_exists(conn: &Connection, index_name: &str) -> DbResult<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?",
        [index_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
