//! Cue point operations (CuePoints table).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{map_constraint, CuePoint, Database, DbError, DbResult, MAX_HOT_CUE, NO_HOT_CUE};

fn row_to_cue_point(row: &Row) -> rusqlite::Result<CuePoint> {
    Ok(CuePoint {
        id: row.get("id")?,
        track_id: row.get("track_id")?,
        position: row.get("position")?,
        name: row.get::<_, Option<String>>("name")?.unwrap_or_default(),
        cue_type: row.get("type")?,
        hot_cue_number: row.get::<_, Option<i32>>("hot_cue_number")?.unwrap_or(NO_HOT_CUE),
        color: row.get("color")?,
        date_created: row.get("date_created")?,
    })
}

fn validate(cue: &CuePoint) -> DbResult<()> {
    if cue.hot_cue_number != NO_HOT_CUE && !(0..=MAX_HOT_CUE).contains(&cue.hot_cue_number) {
        return Err(DbError::Constraint(format!(
            "hot cue number must be -1 or 0..={}, got {}",
            MAX_HOT_CUE, cue.hot_cue_number
        )));
    }
    Ok(())
}

pub fn add_cue_point(conn: &Connection, cue: &CuePoint) -> DbResult<i64> {
    validate(cue)?;
    conn.execute(
        "INSERT INTO CuePoints (track_id, position, name, type, hot_cue_number, color, date_created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            cue.track_id,
            cue.position,
            cue.name,
            cue.cue_type,
            cue.hot_cue_number,
            cue.color,
            cue.date_created,
        ],
    )
    .map_err(|e| map_constraint(e, || format!("track {} does not exist", cue.track_id)))?;

    Ok(conn.last_insert_rowid())
}

pub fn update_cue_point(conn: &Connection, cue: &CuePoint) -> DbResult<bool> {
    validate(cue)?;
    let updated = conn.execute(
        "UPDATE CuePoints SET position = ?1, name = ?2, type = ?3, hot_cue_number = ?4, color = ?5
         WHERE id = ?6",
        params![
            cue.position,
            cue.name,
            cue.cue_type,
            cue.hot_cue_number,
            cue.color,
            cue.id,
        ],
    )?;
    Ok(updated > 0)
}

pub fn delete_cue_point(conn: &Connection, id: i64) -> DbResult<bool> {
    let deleted = conn.execute("DELETE FROM CuePoints WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

pub fn get_cue_point(conn: &Connection, id: i64) -> DbResult<Option<CuePoint>> {
    let cue = conn
        .query_row(
            "SELECT id, track_id, position, name, type, hot_cue_number, color, date_created
             FROM CuePoints WHERE id = ?",
            [id],
            row_to_cue_point,
        )
        .optional()?;
    Ok(cue)
}

/// All cue points of a track, earliest position first
pub fn get_cue_points_for_track(conn: &Connection, track_id: i64) -> DbResult<Vec<CuePoint>> {
    let mut stmt = conn.prepare(
        "SELECT id, track_id, position, name, type, hot_cue_number, color, date_created
         FROM CuePoints WHERE track_id = ? ORDER BY position, id",
    )?;
    let cues = stmt
        .query_map([track_id], row_to_cue_point)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cues)
}

impl Database {
    pub fn add_cue_point(&self, cue: &CuePoint) -> DbResult<i64> {
        self.with_conn("add_cue_point", |conn| add_cue_point(conn, cue))
    }

    pub fn update_cue_point(&self, cue: &CuePoint) -> DbResult<bool> {
        self.with_conn("update_cue_point", |conn| update_cue_point(conn, cue))
    }

    pub fn delete_cue_point(&self, id: i64) -> DbResult<bool> {
        self.with_conn("delete_cue_point", |conn| delete_cue_point(conn, id))
    }

    pub fn get_cue_point(&self, id: i64) -> DbResult<Option<CuePoint>> {
        self.with_conn("get_cue_point", |conn| get_cue_point(conn, id))
    }

    pub fn get_cue_points_for_track(&self, track_id: i64) -> DbResult<Vec<CuePoint>> {
        self.with_conn("get_cue_points_for_track", |conn| {
            get_cue_points_for_track(conn, track_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CueType, Track};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let track_id = db.add_track(&Track::new("/music/a.mp3")).unwrap();
        (db, track_id)
    }

    #[test]
    fn test_cue_point_crud() {
        let (db, track_id) = setup();
        let mut cue = CuePoint::hot_cue(track_id, 32.0, 2);
        cue.color = Some("#FF0000".into());

        let id = db.add_cue_point(&cue).unwrap();
        let mut stored = db.get_cue_point(id).unwrap().unwrap();
        assert_eq!(stored.cue_type, CueType::HotCue);
        assert_eq!(stored.hot_cue_number, 2);
        assert_eq!(stored.color.as_deref(), Some("#FF0000"));

        stored.cue_type = CueType::LoopIn;
        stored.hot_cue_number = NO_HOT_CUE;
        stored.position = 64.0;
        assert!(db.update_cue_point(&stored).unwrap());

        let reloaded = db.get_cue_point(id).unwrap().unwrap();
        assert_eq!(reloaded.cue_type, CueType::LoopIn);
        assert_eq!(reloaded.position, 64.0);

        assert!(db.delete_cue_point(id).unwrap());
        assert!(db.get_cue_point(id).unwrap().is_none());
    }

    #[test]
    fn test_cue_points_ordered_by_position() {
        let (db, track_id) = setup();
        for (pos, name) in [(90.0, "Outro"), (0.5, "Intro"), (45.0, "Drop")] {
            db.add_cue_point(&CuePoint::new(track_id, pos, name)).unwrap();
        }

        let names: Vec<_> = db
            .get_cue_points_for_track(track_id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Intro", "Drop", "Outro"]);
    }

    #[test]
    fn test_hot_cue_number_range() {
        let (db, track_id) = setup();
        assert!(db.add_cue_point(&CuePoint::hot_cue(track_id, 1.0, 7)).is_ok());

        for bad in [8, -2, 100] {
            let err = db.add_cue_point(&CuePoint::hot_cue(track_id, 1.0, bad)).unwrap_err();
            assert!(matches!(err, DbError::Constraint(_)), "accepted {}", bad);
        }

        // Slot reuse within a track is allowed
        assert!(db.add_cue_point(&CuePoint::hot_cue(track_id, 2.0, 7)).is_ok());
    }

    #[test]
    fn test_cue_point_requires_existing_track() {
        let (db, _) = setup();
        let err = db.add_cue_point(&CuePoint::new(9999, 1.0, "Orphan")).unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_cue_points_cascade_with_track() {
        let (db, track_id) = setup();
        db.add_cue_point(&CuePoint::new(track_id, 1.0, "A")).unwrap();
        db.add_cue_point(&CuePoint::new(track_id, 2.0, "B")).unwrap();

        db.delete_track(track_id).unwrap();
        assert!(db.get_cue_points_for_track(track_id).unwrap().is_empty());
    }
}
