//! Track catalogue operations (Tracks table).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{map_constraint, Database, DbResult, Track};

const TRACK_COLUMNS: &str = "id, file_path, title, artist, album, genre, bpm, key, duration, \
     file_size, file_hash, acoustid_fingerprint, date_added, last_modified";

/// Map a database row to a Track struct
pub(crate) fn row_to_track(row: &Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get("id")?,
        file_path: row.get("file_path")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        genre: row.get("genre")?,
        bpm: row.get::<_, Option<i32>>("bpm")?.unwrap_or(0),
        key: row.get("key")?,
        duration: row.get::<_, Option<f64>>("duration")?.unwrap_or(0.0),
        file_size: row.get::<_, Option<i64>>("file_size")?.unwrap_or(0),
        file_hash: row.get("file_hash")?,
        acoustid_fingerprint: row.get("acoustid_fingerprint")?,
        date_added: row.get("date_added")?,
        last_modified: row.get("last_modified")?,
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn query_tracks<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> DbResult<Vec<Track>> {
    let mut stmt = conn.prepare(sql)?;
    let tracks = stmt
        .query_map(params, row_to_track)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

/// Insert a new track and return its id. Fails with `Constraint` on a duplicate path.
pub fn add_track(conn: &Connection, track: &Track) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO Tracks (file_path, title, artist, album, genre, bpm, key, duration,
             file_size, file_hash, acoustid_fingerprint, date_added, last_modified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            track.file_path,
            track.title,
            track.artist,
            track.album,
            track.genre,
            track.bpm,
            track.key,
            track.duration,
            track.file_size,
            track.file_hash,
            track.acoustid_fingerprint,
            track.date_added,
            track.last_modified,
        ],
    )
    .map_err(|e| map_constraint(e, || format!("track path already exists: {}", track.file_path)))?;

    Ok(conn.last_insert_rowid())
}

/// Update every column of an existing track. Returns false if no row has that id.
pub fn update_track(conn: &Connection, track: &Track) -> DbResult<bool> {
    let updated = conn
        .execute(
            "UPDATE Tracks SET file_path = ?1, title = ?2, artist = ?3, album = ?4, genre = ?5,
                 bpm = ?6, key = ?7, duration = ?8, file_size = ?9, file_hash = ?10,
                 acoustid_fingerprint = ?11, date_added = ?12, last_modified = ?13
             WHERE id = ?14",
            params![
                track.file_path,
                track.title,
                track.artist,
                track.album,
                track.genre,
                track.bpm,
                track.key,
                track.duration,
                track.file_size,
                track.file_hash,
                track.acoustid_fingerprint,
                track.date_added,
                track.last_modified,
                track.id,
            ],
        )
        .map_err(|e| map_constraint(e, || format!("track path already exists: {}", track.file_path)))?;

    Ok(updated > 0)
}

/// Delete a track. Its cue points and folder links go with it.
pub fn delete_track(conn: &Connection, id: i64) -> DbResult<bool> {
    let deleted = conn.execute("DELETE FROM Tracks WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

pub fn get_track(conn: &Connection, id: i64) -> DbResult<Option<Track>> {
    let track = conn
        .query_row(
            &format!("SELECT {} FROM Tracks WHERE id = ?", TRACK_COLUMNS),
            [id],
            row_to_track,
        )
        .optional()?;
    Ok(track)
}

pub fn get_track_by_path(conn: &Connection, file_path: &str) -> DbResult<Option<Track>> {
    let track = conn
        .query_row(
            &format!("SELECT {} FROM Tracks WHERE file_path = ?", TRACK_COLUMNS),
            [file_path],
            row_to_track,
        )
        .optional()?;
    Ok(track)
}

pub fn get_all_tracks(conn: &Connection) -> DbResult<Vec<Track>> {
    query_tracks(
        conn,
        &format!("SELECT {} FROM Tracks ORDER BY title COLLATE NOCASE, id", TRACK_COLUMNS),
        [],
    )
}

/// Case-insensitive substring search over title, artist, album and genre
pub fn search_tracks(conn: &Connection, term: &str) -> DbResult<Vec<Track>> {
    let pattern = like_pattern(term);
    query_tracks(
        conn,
        &format!(
            "SELECT {} FROM Tracks
             WHERE title LIKE ?1 ESCAPE '\\'
                OR artist LIKE ?1 ESCAPE '\\'
                OR album LIKE ?1 ESCAPE '\\'
                OR genre LIKE ?1 ESCAPE '\\'
             ORDER BY title COLLATE NOCASE, id",
            TRACK_COLUMNS
        ),
        [pattern],
    )
}

/// Exact fingerprint match. An empty fingerprint matches nothing.
pub fn find_tracks_by_fingerprint(conn: &Connection, fingerprint: &str) -> DbResult<Vec<Track>> {
    if fingerprint.is_empty() {
        return Ok(Vec::new());
    }
    query_tracks(
        conn,
        &format!(
            "SELECT {} FROM Tracks WHERE acoustid_fingerprint = ? ORDER BY title COLLATE NOCASE, id",
            TRACK_COLUMNS
        ),
        [fingerprint],
    )
}

/// Fingerprints shared by more than one track, each with its tracks
pub fn find_duplicate_fingerprints(conn: &Connection) -> DbResult<Vec<(String, Vec<Track>)>> {
    let mut stmt = conn.prepare(
        "SELECT acoustid_fingerprint FROM Tracks
         WHERE acoustid_fingerprint IS NOT NULL AND acoustid_fingerprint != ''
         GROUP BY acoustid_fingerprint
         HAVING COUNT(*) > 1
         ORDER BY acoustid_fingerprint",
    )?;
    let fingerprints = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups = Vec::with_capacity(fingerprints.len());
    for fp in fingerprints {
        let tracks = find_tracks_by_fingerprint(conn, &fp)?;
        groups.push((fp, tracks));
    }
    Ok(groups)
}

pub fn count_tracks(conn: &Connection) -> DbResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM Tracks", [], |row| row.get(0))?;
    Ok(count as usize)
}

impl Database {
    pub fn add_track(&self, track: &Track) -> DbResult<i64> {
        self.with_conn("add_track", |conn| add_track(conn, track))
    }

    pub fn update_track(&self, track: &Track) -> DbResult<bool> {
        self.with_conn("update_track", |conn| update_track(conn, track))
    }

    pub fn delete_track(&self, id: i64) -> DbResult<bool> {
        self.with_conn("delete_track", |conn| delete_track(conn, id))
    }

    pub fn get_track(&self, id: i64) -> DbResult<Option<Track>> {
        self.with_conn("get_track", |conn| get_track(conn, id))
    }

    pub fn get_track_by_path(&self, file_path: &str) -> DbResult<Option<Track>> {
        self.with_conn("get_track_by_path", |conn| get_track_by_path(conn, file_path))
    }

    pub fn get_all_tracks(&self) -> DbResult<Vec<Track>> {
        self.with_conn("get_all_tracks", get_all_tracks)
    }

    pub fn search_tracks(&self, term: &str) -> DbResult<Vec<Track>> {
        self.with_conn("search_tracks", |conn| search_tracks(conn, term))
    }

    pub fn find_tracks_by_fingerprint(&self, fingerprint: &str) -> DbResult<Vec<Track>> {
        self.with_conn("find_tracks_by_fingerprint", |conn| {
            find_tracks_by_fingerprint(conn, fingerprint)
        })
    }

    pub fn find_duplicate_fingerprints(&self) -> DbResult<Vec<(String, Vec<Track>)>> {
        self.with_conn("find_duplicate_fingerprints", find_duplicate_fingerprints)
    }

    pub fn count_tracks(&self) -> DbResult<usize> {
        self.with_conn("count_tracks", count_tracks)
    }
}
