//! Per-user favorites and viewing history.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::auth::Principal;
use crate::error::{DirectoryError, DirectoryResult};
use crate::place::store::fetch_place;
use crate::place::Place;
use crate::sqlite::Database;

#[derive(Debug, Clone)]
pub struct UserCollections {
    db: Database,
}

impl UserCollections {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adding a place that is already a favorite leaves the set unchanged.
    pub fn add_favorite(&self, principal: &Principal, place_id: &str) -> DirectoryResult<()> {
        let added = self.db.write(|tx| {
            ensure_place(tx, place_id)?;
            let added = tx.execute(
                "INSERT OR IGNORE INTO user_favorites (user_id, place_id, added_seq)
                 SELECT ?1, ?2, COALESCE(MAX(added_seq), 0) + 1
                 FROM user_favorites WHERE user_id = ?1",
                params![&principal.id, place_id],
            )?;
            Ok(added > 0)
        })?;
        debug!(user = %principal.id, place_id, added, "favorite added");
        Ok(())
    }

    pub fn remove_favorite(&self, principal: &Principal, place_id: &str) -> DirectoryResult<()> {
        self.db.write(|tx| {
            tx.execute(
                "DELETE FROM user_favorites WHERE user_id = ?1 AND place_id = ?2",
                params![&principal.id, place_id],
            )?;
            Ok(())
        })?;
        debug!(user = %principal.id, place_id, "favorite removed");
        Ok(())
    }

    /// Favorites in the order they were added.
    pub fn favorites(&self, principal: &Principal) -> DirectoryResult<Vec<Place>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(
            "SELECT p.* FROM user_favorites f
             JOIN places p ON p.id = f.place_id
             WHERE f.user_id = ?1
             ORDER BY f.added_seq ASC",
        )?;
        let rows = stmt
            .query_map([&principal.id], |row| Place::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records a view. A place already in the history moves to the most
    /// recent end instead of appearing twice.
    pub fn append_history(&self, principal: &Principal, place_id: &str) -> DirectoryResult<()> {
        self.db.write(|tx| {
            ensure_place(tx, place_id)?;
            tx.execute(
                "INSERT INTO user_history (user_id, place_id, position)
                 SELECT ?1, ?2, COALESCE(MAX(position), 0) + 1
                 FROM user_history WHERE user_id = ?1
                 ON CONFLICT (user_id, place_id) DO UPDATE SET position = excluded.position",
                params![&principal.id, place_id],
            )?;
            Ok(())
        })?;
        debug!(user = %principal.id, place_id, "history appended");
        Ok(())
    }

    /// History from oldest to most recent.
    pub fn history(&self, principal: &Principal) -> DirectoryResult<Vec<Place>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(
            "SELECT p.* FROM user_history h
             JOIN places p ON p.id = h.place_id
             WHERE h.user_id = ?1
             ORDER BY h.position ASC",
        )?;
        let rows = stmt
            .query_map([&principal.id], |row| Place::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn clear_history(&self, principal: &Principal) -> DirectoryResult<usize> {
        let cleared = self.db.write(|tx| {
            let cleared = tx.execute(
                "DELETE FROM user_history WHERE user_id = ?1",
                [&principal.id],
            )?;
            Ok(cleared)
        })?;
        debug!(user = %principal.id, cleared, "history cleared");
        Ok(cleared)
    }
}

fn ensure_place(conn: &Connection, place_id: &str) -> DirectoryResult<()> {
    match fetch_place(conn, place_id)? {
        Some(_) => Ok(()),
        None => Err(DirectoryError::place_not_found(place_id)),
    }
}
