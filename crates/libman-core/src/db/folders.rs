//! Virtual folder (playlist) operations.
//!
//! Static folders keep their membership in `Folder_Tracks_Link`; smart
//! folders compute it from their criteria (see [`crate::db::smart`]).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::smart::evaluate_smart_playlist;
use crate::db::tracks::row_to_track;
use crate::db::{map_constraint, Database, DbResult, FolderTrackLink, Track, VirtualFolder};

fn row_to_folder(row: &Row) -> rusqlite::Result<VirtualFolder> {
    Ok(VirtualFolder {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        date_created: row.get("date_created")?,
        is_smart_playlist: row.get::<_, Option<bool>>("is_smart_playlist")?.unwrap_or(false),
        smart_criteria: row.get("smart_criteria")?,
    })
}

fn row_to_link(row: &Row) -> rusqlite::Result<FolderTrackLink> {
    Ok(FolderTrackLink {
        id: row.get("id")?,
        folder_id: row.get("folder_id")?,
        track_id: row.get("track_id")?,
        display_order: row.get::<_, Option<i32>>("display_order")?.unwrap_or(0),
        date_added: row.get("date_added")?,
    })
}

pub fn add_folder(conn: &Connection, folder: &VirtualFolder) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO VirtualFolders (name, description, date_created, is_smart_playlist, smart_criteria)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            folder.name,
            folder.description,
            folder.date_created,
            folder.is_smart_playlist,
            folder.smart_criteria,
        ],
    )
    .map_err(|e| map_constraint(e, || format!("folder name already exists: {}", folder.name)))?;

    Ok(conn.last_insert_rowid())
}

pub fn update_folder(conn: &Connection, folder: &VirtualFolder) -> DbResult<bool> {
    let updated = conn
        .execute(
            "UPDATE VirtualFolders SET name = ?1, description = ?2, is_smart_playlist = ?3,
                 smart_criteria = ?4
             WHERE id = ?5",
            params![
                folder.name,
                folder.description,
                folder.is_smart_playlist,
                folder.smart_criteria,
                folder.id,
            ],
        )
        .map_err(|e| map_constraint(e, || format!("folder name already exists: {}", folder.name)))?;

    Ok(updated > 0)
}

/// Delete a folder and its links. Tracks are untouched.
pub fn delete_folder(conn: &Connection, id: i64) -> DbResult<bool> {
    let deleted = conn.execute("DELETE FROM VirtualFolders WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

pub fn get_folder(conn: &Connection, id: i64) -> DbResult<Option<VirtualFolder>> {
    let folder = conn
        .query_row(
            "SELECT id, name, description, date_created, is_smart_playlist, smart_criteria
             FROM VirtualFolders WHERE id = ?",
            [id],
            row_to_folder,
        )
        .optional()?;
    Ok(folder)
}

pub fn get_all_folders(conn: &Connection) -> DbResult<Vec<VirtualFolder>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, date_created, is_smart_playlist, smart_criteria
         FROM VirtualFolders ORDER BY name COLLATE NOCASE",
    )?;
    let folders = stmt
        .query_map([], row_to_folder)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

/// Add a track to a folder. Re-adding an existing membership is a no-op that
/// returns the existing link id.
pub fn add_folder_track_link(conn: &Connection, link: &FolderTrackLink) -> DbResult<i64> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO Folder_Tracks_Link (folder_id, track_id, display_order, date_added)
             VALUES (?1, ?2, ?3, ?4)",
            params![link.folder_id, link.track_id, link.display_order, link.date_added],
        )
        .map_err(|e| {
            map_constraint(e, || {
                format!("folder {} or track {} does not exist", link.folder_id, link.track_id)
            })
        })?;

    if inserted > 0 {
        return Ok(conn.last_insert_rowid());
    }

    let id = conn.query_row(
        "SELECT id FROM Folder_Tracks_Link WHERE folder_id = ? AND track_id = ?",
        [link.folder_id, link.track_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn update_folder_track_link(conn: &Connection, link: &FolderTrackLink) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE Folder_Tracks_Link SET display_order = ? WHERE id = ?",
        params![link.display_order, link.id],
    )?;
    Ok(updated > 0)
}

pub fn delete_folder_track_link(conn: &Connection, id: i64) -> DbResult<bool> {
    let deleted = conn.execute("DELETE FROM Folder_Tracks_Link WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

pub fn remove_track_from_folder(conn: &Connection, folder_id: i64, track_id: i64) -> DbResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM Folder_Tracks_Link WHERE folder_id = ? AND track_id = ?",
        [folder_id, track_id],
    )?;
    Ok(deleted > 0)
}

pub fn get_folder_links(conn: &Connection, folder_id: i64) -> DbResult<Vec<FolderTrackLink>> {
    let mut stmt = conn.prepare(
        "SELECT id, folder_id, track_id, display_order, date_added
         FROM Folder_Tracks_Link WHERE folder_id = ? ORDER BY display_order, id",
    )?;
    let links = stmt
        .query_map([folder_id], row_to_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Tracks linked to a folder, in display order
pub fn get_tracks_in_folder(conn: &Connection, folder_id: i64) -> DbResult<Vec<Track>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.file_path, t.title, t.artist, t.album, t.genre, t.bpm, t.key,
                t.duration, t.file_size, t.file_hash, t.acoustid_fingerprint,
                t.date_added, t.last_modified
         FROM Tracks t
         JOIN Folder_Tracks_Link l ON l.track_id = t.id
         WHERE l.folder_id = ?
         ORDER BY l.display_order, t.title COLLATE NOCASE",
    )?;
    let tracks = stmt
        .query_map([folder_id], row_to_track)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tracks)
}

pub fn get_folders_for_track(conn: &Connection, track_id: i64) -> DbResult<Vec<VirtualFolder>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.name, f.description, f.date_created, f.is_smart_playlist, f.smart_criteria
         FROM VirtualFolders f
         JOIN Folder_Tracks_Link l ON l.folder_id = f.id
         WHERE l.track_id = ?
         ORDER BY f.name COLLATE NOCASE",
    )?;
    let folders = stmt
        .query_map([track_id], row_to_folder)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

/// Append tracks after the folder's current last position, skipping existing members.
/// Returns the number of links created.
pub fn add_tracks_to_folder(conn: &Connection, folder_id: i64, track_ids: &[i64]) -> DbResult<usize> {
    let max_order: i32 = conn.query_row(
        "SELECT COALESCE(MAX(display_order), -1) FROM Folder_Tracks_Link WHERE folder_id = ?",
        [folder_id],
        |row| row.get(0),
    )?;

    let now = Utc::now();
    let mut next_order = max_order;
    let mut added = 0;

    for track_id in track_ids {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO Folder_Tracks_Link (folder_id, track_id, display_order, date_added)
                 VALUES (?1, ?2, ?3, ?4)",
                params![folder_id, track_id, next_order + 1, now],
            )
            .map_err(|e| {
                map_constraint(e, || format!("folder {} or track {} does not exist", folder_id, track_id))
            })?;
        if inserted > 0 {
            next_order += 1;
            added += 1;
        }
    }

    Ok(added)
}

/// Resolve a folder's membership: stored links, or criteria for smart folders
pub fn get_folder_tracks(conn: &Connection, folder: &VirtualFolder) -> DbResult<Vec<Track>> {
    if folder.is_smart_playlist {
        evaluate_smart_playlist(conn, folder)
    } else {
        get_tracks_in_folder(conn, folder.id)
    }
}

impl Database {
    pub fn add_folder(&self, folder: &VirtualFolder) -> DbResult<i64> {
        self.with_conn("add_folder", |conn| add_folder(conn, folder))
    }

    pub fn update_folder(&self, folder: &VirtualFolder) -> DbResult<bool> {
        self.with_conn("update_folder", |conn| update_folder(conn, folder))
    }

    pub fn delete_folder(&self, id: i64) -> DbResult<bool> {
        self.with_conn("delete_folder", |conn| delete_folder(conn, id))
    }

    pub fn get_folder(&self, id: i64) -> DbResult<Option<VirtualFolder>> {
        self.with_conn("get_folder", |conn| get_folder(conn, id))
    }

    pub fn get_all_folders(&self) -> DbResult<Vec<VirtualFolder>> {
        self.with_conn("get_all_folders", get_all_folders)
    }

    pub fn add_folder_track_link(&self, link: &FolderTrackLink) -> DbResult<i64> {
        self.with_conn("add_folder_track_link", |conn| add_folder_track_link(conn, link))
    }

    pub fn update_folder_track_link(&self, link: &FolderTrackLink) -> DbResult<bool> {
        self.with_conn("update_folder_track_link", |conn| update_folder_track_link(conn, link))
    }

    pub fn delete_folder_track_link(&self, id: i64) -> DbResult<bool> {
        self.with_conn("delete_folder_track_link", |conn| delete_folder_track_link(conn, id))
    }

    pub fn remove_track_from_folder(&self, folder_id: i64, track_id: i64) -> DbResult<bool> {
        self.with_conn("remove_track_from_folder", |conn| {
            remove_track_from_folder(conn, folder_id, track_id)
        })
    }

    pub fn get_folder_links(&self, folder_id: i64) -> DbResult<Vec<FolderTrackLink>> {
        self.with_conn("get_folder_links", |conn| get_folder_links(conn, folder_id))
    }

    pub fn get_tracks_in_folder(&self, folder_id: i64) -> DbResult<Vec<Track>> {
        self.with_conn("get_tracks_in_folder", |conn| get_tracks_in_folder(conn, folder_id))
    }

    pub fn get_folders_for_track(&self, track_id: i64) -> DbResult<Vec<VirtualFolder>> {
        self.with_conn("get_folders_for_track", |conn| get_folders_for_track(conn, track_id))
    }

    pub fn add_tracks_to_folder(&self, folder_id: i64, track_ids: &[i64]) -> DbResult<usize> {
        // One transaction so a bad id leaves the folder unchanged
        self.transaction(|conn| add_tracks_to_folder(conn, folder_id, track_ids))
    }

    pub fn get_folder_tracks(&self, folder: &VirtualFolder) -> DbResult<Vec<Track>> {
        self.with_conn("get_folder_tracks", |conn| get_folder_tracks(conn, folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;

    fn setup() -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let ids = ["Charlie", "Alpha", "Bravo"]
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let track = Track {
                    title: Some(title.to_string()),
                    ..Track::new(format!("/music/{}.mp3", i))
                };
                db.add_track(&track).unwrap()
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn test_folder_crud() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add_folder(&VirtualFolder::new("Warmup")).unwrap();

        let mut folder = db.get_folder(id).unwrap().unwrap();
        assert_eq!(folder.name, "Warmup");
        assert!(!folder.is_smart_playlist);

        folder.description = Some("Early evening".into());
        assert!(db.update_folder(&folder).unwrap());
        assert_eq!(
            db.get_folder(id).unwrap().unwrap().description.as_deref(),
            Some("Early evening")
        );

        let err = db.add_folder(&VirtualFolder::new("Warmup")).unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));

        db.add_folder(&VirtualFolder::new("afterhours")).unwrap();
        let names: Vec<_> = db.get_all_folders().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["afterhours", "Warmup"]);

        assert!(db.delete_folder(id).unwrap());
        assert!(db.get_folder(id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_membership_is_skipped() {
        let (db, ids) = setup();
        let folder_id = db.add_folder(&VirtualFolder::new("Set")).unwrap();

        let first = db
            .add_folder_track_link(&FolderTrackLink::new(folder_id, ids[0], 0))
            .unwrap();
        let again = db
            .add_folder_track_link(&FolderTrackLink::new(folder_id, ids[0], 5))
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(db.get_folder_links(folder_id).unwrap().len(), 1);
    }

    #[test]
    fn test_link_to_missing_track_is_constraint_error() {
        let (db, _) = setup();
        let folder_id = db.add_folder(&VirtualFolder::new("Set")).unwrap();

        let err = db
            .add_folder_track_link(&FolderTrackLink::new(folder_id, 9999, 0))
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_add_tracks_appends_in_order() {
        let (db, ids) = setup();
        let folder_id = db.add_folder(&VirtualFolder::new("Set")).unwrap();

        assert_eq!(db.add_tracks_to_folder(folder_id, &[ids[0], ids[1]]).unwrap(), 2);
        // Existing member skipped, new one appended after it
        assert_eq!(db.add_tracks_to_folder(folder_id, &[ids[1], ids[2]]).unwrap(), 1);

        let titles: Vec<_> = db
            .get_tracks_in_folder(folder_id)
            .unwrap()
            .into_iter()
            .filter_map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Charlie", "Alpha", "Bravo"]);

        let orders: Vec<_> = db
            .get_folder_links(folder_id)
            .unwrap()
            .into_iter()
            .map(|l| l.display_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_add_tracks_rolls_back_on_missing_track() {
        let (db, ids) = setup();
        let folder_id = db.add_folder(&VirtualFolder::new("Set")).unwrap();

        assert!(db.add_tracks_to_folder(folder_id, &[ids[0], 9999]).is_err());
        assert!(db.get_tracks_in_folder(folder_id).unwrap().is_empty());
    }

    #[test]
    fn test_reorder_and_remove_links() {
        let (db, ids) = setup();
        let folder_id = db.add_folder(&VirtualFolder::new("Set")).unwrap();
        db.add_tracks_to_folder(folder_id, &ids).unwrap();

        let mut links = db.get_folder_links(folder_id).unwrap();
        links[0].display_order = 10;
        assert!(db.update_folder_track_link(&links[0]).unwrap());
        let first = db.get_tracks_in_folder(folder_id).unwrap();
        assert_eq!(first.last().unwrap().id, ids[0]);

        assert!(db.remove_track_from_folder(folder_id, ids[1]).unwrap());
        assert!(!db.remove_track_from_folder(folder_id, ids[1]).unwrap());
        assert!(db.delete_folder_track_link(links[2].id).unwrap());
        assert_eq!(db.get_tracks_in_folder(folder_id).unwrap().len(), 1);
    }

    #[test]
    fn test_folders_for_track_and_cascade() {
        let (db, ids) = setup();
        let a = db.add_folder(&VirtualFolder::new("B-side")).unwrap();
        let b = db.add_folder(&VirtualFolder::new("A-side")).unwrap();
        db.add_tracks_to_folder(a, &[ids[0]]).unwrap();
        db.add_tracks_to_folder(b, &[ids[0], ids[1]]).unwrap();

        let names: Vec<_> = db
            .get_folders_for_track(ids[0])
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["A-side", "B-side"]);

        db.delete_track(ids[0]).unwrap();
        assert!(db.get_folders_for_track(ids[0]).unwrap().is_empty());
        assert_eq!(db.get_tracks_in_folder(b).unwrap().len(), 1);

        db.delete_folder(b).unwrap();
        assert!(db.get_folders_for_track(ids[1]).unwrap().is_empty());
        assert!(db.get_track(ids[1]).unwrap().is_some());
    }
}
