use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{require, Action, Principal};
use crate::config::ModerationSection;
use crate::error::{DirectoryError, DirectoryResult};
use crate::place::store::{delete_place_row, fetch_place, insert_place, update_place};
use crate::place::{NewPlace, Place, PlacePatch};
use crate::sqlite::Database;

use super::models::{
    validate_title, Listing, ListingMetrics, ListingPlace, ListingStatus, ListingSubmission,
    ListingUpdate,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Move a rejected listing back to pending when its owner edits it.
    pub reset_rejected_on_owner_edit: bool,
}

impl From<&ModerationSection> for LifecyclePolicy {
    fn from(section: &ModerationSection) -> Self {
        Self {
            reset_rejected_on_owner_edit: section.reset_rejected_on_owner_edit,
        }
    }
}

/// Moderated submissions and the only path by which their status changes.
#[derive(Debug, Clone)]
pub struct ListingLifecycle {
    db: Database,
    policy: LifecyclePolicy,
}

impl ListingLifecycle {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            policy: LifecyclePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub fn submit(
        &self,
        principal: &Principal,
        submission: ListingSubmission,
    ) -> DirectoryResult<Listing> {
        require(principal, Action::Submit, None)?;
        validate_title(&submission.title)?;

        let listing = self.db.write(|tx| {
            let place = prepare_place(tx, submission.place)?;
            let now = Utc::now();
            let listing = Listing {
                id: new_listing_id(),
                owner_id: principal.id.clone(),
                title: submission.title,
                description: submission.description,
                place_id: place.referenced_place().map(str::to_string),
                place,
                created_place: false,
                status: ListingStatus::Pending,
                admin_note: None,
                created_at: now,
                updated_at: now,
            };
            insert_listing(tx, &listing)?;
            Ok(listing)
        })?;

        info!(
            listing_id = %listing.id,
            owner = %listing.owner_id,
            "listing submitted"
        );
        Ok(listing)
    }

    /// Moves a pending listing to `accepted` or `rejected`.
    ///
    /// The guard is re-checked inside an immediate transaction and the status
    /// write only applies while the row is still pending, so of several
    /// concurrent moderators exactly one wins. Accepting publishes the place
    /// in the same transaction.
    pub fn transition(
        &self,
        principal: &Principal,
        listing_id: &str,
        to: ListingStatus,
        note: Option<&str>,
    ) -> DirectoryResult<Listing> {
        self.move_status(principal, listing_id, ListingStatus::Pending, to, note)
    }

    pub fn approve(&self, principal: &Principal, listing_id: &str) -> DirectoryResult<Listing> {
        self.transition(principal, listing_id, ListingStatus::Accepted, None)
    }

    pub fn reject(
        &self,
        principal: &Principal,
        listing_id: &str,
        note: &str,
    ) -> DirectoryResult<Listing> {
        self.transition(principal, listing_id, ListingStatus::Rejected, Some(note))
    }

    /// Takes an accepted listing back to `rejected`. The place it created is
    /// removed once nothing else references it; a place the listing only
    /// edited stays published.
    pub fn unpublish(
        &self,
        principal: &Principal,
        listing_id: &str,
        note: &str,
    ) -> DirectoryResult<Listing> {
        self.move_status(
            principal,
            listing_id,
            ListingStatus::Accepted,
            ListingStatus::Rejected,
            Some(note),
        )
    }

    fn move_status(
        &self,
        principal: &Principal,
        listing_id: &str,
        from: ListingStatus,
        to: ListingStatus,
        note: Option<&str>,
    ) -> DirectoryResult<Listing> {
        require(principal, Action::Moderate, None)?;
        if from == ListingStatus::Accepted {
            require(principal, Action::AdminEdit, None)?;
        }
        let note = match to {
            ListingStatus::Pending => {
                return Err(DirectoryError::validation(
                    "status",
                    "listings cannot be moved back to pending",
                ))
            }
            ListingStatus::Rejected => {
                let note = note.map(str::trim).unwrap_or_default();
                if note.is_empty() {
                    return Err(DirectoryError::validation(
                        "admin_note",
                        "a rejection requires a note",
                    ));
                }
                Some(note.to_string())
            }
            ListingStatus::Accepted => None,
        };

        let (listing, observed, removed) = self.db.write(|tx| {
            let mut listing = load_listing(tx, listing_id)?;
            let observed = listing.status;
            if observed != from {
                return Err(DirectoryError::InvalidTransition {
                    listing_id: listing.id,
                    from: observed.to_string(),
                    to: to.to_string(),
                });
            }

            let mut unpublished = None;
            if to == ListingStatus::Accepted {
                let published = publish_place(tx, &listing.place)?;
                listing.created_place = matches!(listing.place, ListingPlace::Inline { .. });
                listing.place_id = Some(published.id);
            } else if observed == ListingStatus::Accepted && listing.created_place {
                unpublished = listing.place_id.take();
                listing.created_place = false;
            }
            listing.status = to;
            listing.admin_note = note;
            listing.updated_at = Utc::now();

            let affected = tx.execute(
                "UPDATE listings
                 SET status = ?2, admin_note = ?3, place_id = ?4, created_place = ?5, updated_at = ?6
                 WHERE id = ?1 AND status = ?7",
                params![
                    &listing.id,
                    listing.status.as_str(),
                    &listing.admin_note,
                    &listing.place_id,
                    listing.created_place as i64,
                    listing.updated_at.naive_utc(),
                    observed.as_str(),
                ],
            )?;
            if affected == 0 {
                return Err(DirectoryError::Conflict {
                    listing_id: listing.id,
                    expected: observed.to_string(),
                });
            }

            let removed = match unpublished {
                Some(place_id) => remove_orphan_place(tx, place_id)?,
                None => None,
            };
            Ok((listing, observed, removed))
        })?;

        info!(
            listing_id = %listing.id,
            moderator = %principal.id,
            from = %observed,
            status = %listing.status,
            place_id = ?listing.place_id,
            removed_place = ?removed,
            "listing moderated"
        );
        Ok(listing)
    }

    pub fn update_own(
        &self,
        principal: &Principal,
        listing_id: &str,
        update: ListingUpdate,
    ) -> DirectoryResult<Listing> {
        let reset_rejected = self.policy.reset_rejected_on_owner_edit;
        let listing = self.db.write(|tx| {
            let mut listing = load_listing(tx, listing_id)?;
            require(principal, Action::SelfEdit, Some(&listing.owner_id))?;
            if !listing.status.owner_mutable() {
                return Err(DirectoryError::forbidden(format!(
                    "listing {} is {} and can no longer be edited by its owner",
                    listing.id, listing.status
                )));
            }
            let observed = listing.status;
            apply_update(tx, &mut listing, update)?;
            if reset_rejected && listing.status == ListingStatus::Rejected {
                listing.status = ListingStatus::Pending;
                listing.admin_note = None;
            }
            write_listing(tx, &listing, observed)?;
            Ok(listing)
        })?;

        info!(
            listing_id = %listing.id,
            owner = %principal.id,
            status = %listing.status,
            "listing edited by owner"
        );
        Ok(listing)
    }

    pub fn delete_own(&self, principal: &Principal, listing_id: &str) -> DirectoryResult<()> {
        self.db.write(|tx| {
            let listing = load_listing(tx, listing_id)?;
            require(principal, Action::SelfDelete, Some(&listing.owner_id))?;
            if !listing.status.owner_mutable() {
                return Err(DirectoryError::forbidden(format!(
                    "listing {} is {} and can no longer be deleted by its owner",
                    listing.id, listing.status
                )));
            }
            tx.execute("DELETE FROM listings WHERE id = ?1", [&listing.id])?;
            Ok(())
        })?;
        info!(listing_id = %listing_id, owner = %principal.id, "listing withdrawn");
        Ok(())
    }

    /// Edits any listing without touching its status. For an accepted listing
    /// the place changes are merged into the published place as well.
    pub fn admin_update(
        &self,
        principal: &Principal,
        listing_id: &str,
        update: ListingUpdate,
    ) -> DirectoryResult<Listing> {
        require(principal, Action::AdminEdit, None)?;
        let listing = self.db.write(|tx| {
            let mut listing = load_listing(tx, listing_id)?;
            let observed = listing.status;
            if observed == ListingStatus::Accepted {
                if let Some(place) = &update.place {
                    let published = listing.place_id.clone().ok_or_else(|| {
                        DirectoryError::validation("place", "accepted listing has no place")
                    })?;
                    if let Some(referenced) = place.referenced_place() {
                        if referenced != published {
                            return Err(DirectoryError::validation(
                                "place",
                                format!(
                                    "accepted listing is published as {published} and cannot \
                                     be pointed at {referenced}"
                                ),
                            ));
                        }
                    }
                    update_place(tx, &published, &published_patch(place))?;
                }
                let place_id = listing.place_id.clone();
                let created_place = listing.created_place;
                apply_update(tx, &mut listing, update)?;
                listing.place_id = place_id;
                listing.created_place = created_place;
            } else {
                apply_update(tx, &mut listing, update)?;
            }
            write_listing(tx, &listing, observed)?;
            Ok(listing)
        })?;

        info!(
            listing_id = %listing.id,
            admin = %principal.id,
            status = %listing.status,
            "listing edited by admin"
        );
        Ok(listing)
    }

    /// Removes a listing in any status. Returns the id of the place deleted
    /// along with it: the one this listing created, once nothing else
    /// references it.
    pub fn admin_delete(
        &self,
        principal: &Principal,
        listing_id: &str,
    ) -> DirectoryResult<Option<String>> {
        require(principal, Action::AdminDelete, None)?;
        let removed = self.db.write(|tx| {
            let listing = load_listing(tx, listing_id)?;
            tx.execute("DELETE FROM listings WHERE id = ?1", [&listing.id])?;
            match (listing.place_id, listing.created_place) {
                (Some(place_id), true) => remove_orphan_place(tx, place_id),
                _ => Ok(None),
            }
        })?;

        info!(
            listing_id = %listing_id,
            admin = %principal.id,
            removed_place = ?removed,
            "listing deleted"
        );
        Ok(removed)
    }

    /// Copies a rejected listing into a fresh pending one. The rejected
    /// listing stays as it is.
    pub fn resubmit(&self, principal: &Principal, listing_id: &str) -> DirectoryResult<Listing> {
        require(principal, Action::Submit, None)?;
        let listing = self.db.write(|tx| {
            let previous = load_listing(tx, listing_id)?;
            require(principal, Action::SelfEdit, Some(&previous.owner_id))?;
            if previous.status != ListingStatus::Rejected {
                return Err(DirectoryError::InvalidTransition {
                    listing_id: previous.id,
                    from: previous.status.to_string(),
                    to: ListingStatus::Pending.to_string(),
                });
            }
            let place = prepare_place(tx, previous.place)?;
            let now = Utc::now();
            let listing = Listing {
                id: new_listing_id(),
                owner_id: previous.owner_id,
                title: previous.title,
                description: previous.description,
                place_id: place.referenced_place().map(str::to_string),
                place,
                created_place: false,
                status: ListingStatus::Pending,
                admin_note: None,
                created_at: now,
                updated_at: now,
            };
            insert_listing(tx, &listing)?;
            Ok(listing)
        })?;

        info!(
            listing_id = %listing.id,
            resubmitted_from = %listing_id,
            owner = %principal.id,
            "listing resubmitted"
        );
        Ok(listing)
    }

    /// Creates a place directly, without a listing.
    pub fn publish_direct(&self, principal: &Principal, place: NewPlace) -> DirectoryResult<Place> {
        require(principal, Action::AdminEdit, None)?;
        let place = place.normalized()?;
        let place = self.db.write(|tx| insert_place(tx, place))?;
        info!(place_id = %place.id, admin = %principal.id, "place published directly");
        Ok(place)
    }

    /// The caller's own listings, newest first.
    pub fn my_listings(&self, principal: &Principal) -> DirectoryResult<Vec<Listing>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM listings WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([&principal.id], |row| Listing::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_listings(
        &self,
        principal: &Principal,
        status: Option<ListingStatus>,
    ) -> DirectoryResult<Vec<Listing>> {
        require(principal, Action::Moderate, None)?;
        let conn = self.db.open()?;
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM listings WHERE status = ?1 ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map([status.as_str()], |row| Listing::from_row(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM listings ORDER BY created_at DESC, rowid DESC")?;
                let rows = stmt
                    .query_map([], |row| Listing::from_row(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn get(&self, principal: &Principal, listing_id: &str) -> DirectoryResult<Listing> {
        let conn = self.db.open()?;
        let listing = load_listing(&conn, listing_id)?;
        if principal.is_admin() || listing.owner_id == principal.id {
            Ok(listing)
        } else {
            Err(DirectoryError::forbidden(format!(
                "{} {} may not read listing {}",
                principal.role, principal.id, listing.id
            )))
        }
    }

    pub fn metrics(&self, principal: &Principal) -> DirectoryResult<ListingMetrics> {
        require(principal, Action::Moderate, None)?;
        let conn = self.db.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM listings GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut metrics = ListingMetrics::default();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match status.parse::<ListingStatus>() {
                Ok(status) => metrics.record(status, count as usize),
                Err(err) => warn!(error = %err, "ignoring unknown listing status"),
            }
        }
        Ok(metrics)
    }
}

fn new_listing_id() -> String {
    format!("lst-{}", Uuid::new_v4().simple())
}

fn load_listing(conn: &Connection, id: &str) -> DirectoryResult<Listing> {
    let mut stmt = conn.prepare("SELECT * FROM listings WHERE id = ?1")?;
    let listing = stmt.query_row([id], |row| Listing::from_row(row)).optional()?;
    listing.ok_or_else(|| DirectoryError::listing_not_found(id))
}

/// Validates a proposed place without publishing it. Inline payloads come
/// back normalized; edits of existing places are dry-run against the record.
fn prepare_place(conn: &Connection, place: ListingPlace) -> DirectoryResult<ListingPlace> {
    match place {
        ListingPlace::Existing { place_id, changes } => {
            let mut current =
                fetch_place(conn, &place_id)?.ok_or_else(|| DirectoryError::place_not_found(&place_id))?;
            current.apply(&changes);
            current.validate()?;
            Ok(ListingPlace::Existing { place_id, changes })
        }
        ListingPlace::Inline { place } => Ok(ListingPlace::Inline {
            place: place.normalized()?,
        }),
    }
}

/// Deletes a place once no listing references it any more.
fn remove_orphan_place(conn: &Connection, place_id: String) -> DirectoryResult<Option<String>> {
    let references: i64 = conn.query_row(
        "SELECT COUNT(*) FROM listings WHERE place_id = ?1",
        [&place_id],
        |row| row.get(0),
    )?;
    if references > 0 {
        return Ok(None);
    }
    delete_place_row(conn, &place_id)?;
    Ok(Some(place_id))
}

fn publish_place(conn: &Connection, place: &ListingPlace) -> DirectoryResult<Place> {
    match place {
        ListingPlace::Existing { place_id, changes } if changes.is_empty() => {
            fetch_place(conn, place_id)?.ok_or_else(|| DirectoryError::place_not_found(place_id))
        }
        ListingPlace::Existing { place_id, changes } => update_place(conn, place_id, changes),
        ListingPlace::Inline { place } => insert_place(conn, place.clone().normalized()?),
    }
}

fn published_patch(place: &ListingPlace) -> PlacePatch {
    match place {
        ListingPlace::Existing { changes, .. } => changes.clone(),
        ListingPlace::Inline { place } => PlacePatch::from(place),
    }
}

fn apply_update(
    conn: &Connection,
    listing: &mut Listing,
    update: ListingUpdate,
) -> DirectoryResult<()> {
    if let Some(title) = update.title {
        validate_title(&title)?;
        listing.title = title;
    }
    if let Some(description) = update.description {
        listing.description = Some(description);
    }
    if let Some(place) = update.place {
        let place = prepare_place(conn, place)?;
        listing.place_id = place.referenced_place().map(str::to_string);
        listing.place = place;
    }
    listing.updated_at = Utc::now();
    Ok(())
}

fn insert_listing(conn: &Connection, listing: &Listing) -> DirectoryResult<()> {
    conn.execute(
        "INSERT INTO listings (
            id, owner_id, title, description, place_json, place_id, created_place,
            status, admin_note, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &listing.id,
            &listing.owner_id,
            &listing.title,
            &listing.description,
            serde_json::to_string(&listing.place)?,
            &listing.place_id,
            listing.created_place as i64,
            listing.status.as_str(),
            &listing.admin_note,
            listing.created_at.naive_utc(),
            listing.updated_at.naive_utc(),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column, provided the row still has the status the
/// caller read.
fn write_listing(
    conn: &Connection,
    listing: &Listing,
    observed: ListingStatus,
) -> DirectoryResult<()> {
    let affected = conn.execute(
        "UPDATE listings SET
            title = ?3, description = ?4, place_json = ?5, place_id = ?6,
            created_place = ?7, status = ?8, admin_note = ?9, updated_at = ?10
         WHERE id = ?1 AND status = ?2",
        params![
            &listing.id,
            observed.as_str(),
            &listing.title,
            &listing.description,
            serde_json::to_string(&listing.place)?,
            &listing.place_id,
            listing.created_place as i64,
            listing.status.as_str(),
            &listing.admin_note,
            listing.updated_at.naive_utc(),
        ],
    )?;
    if affected == 0 {
        return Err(DirectoryError::Conflict {
            listing_id: listing.id.clone(),
            expected: observed.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::error::ErrorKind;
    use crate::place::{GeoPoint, SqlitePlaceStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        places: SqlitePlaceStore,
        lifecycle: ListingLifecycle,
    }

    fn fixture(policy: LifecyclePolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("directory.sqlite")).unwrap();
        db.initialize().unwrap();
        Fixture {
            _dir: dir,
            places: SqlitePlaceStore::new(db.clone()),
            lifecycle: ListingLifecycle::new(db).with_policy(policy),
        }
    }

    fn kadoura() -> NewPlace {
        NewPlace::new("Kadoura", "Alexandria", 2, GeoPoint::new(29.8905, 31.1990))
    }

    fn inline(title: &str) -> ListingSubmission {
        ListingSubmission::new(title, ListingPlace::inline(kadoura()))
    }

    #[test]
    fn submission_starts_pending_and_stays_private() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let listing = fx.lifecycle.submit(&owner, inline("Seafood spot")).unwrap();
        assert_eq!(listing.status, ListingStatus::Pending);
        assert_eq!(listing.place_id, None);
        assert_eq!(fx.places.count().unwrap(), 0);

        let err = fx
            .lifecycle
            .submit(&Principal::user("u1"), inline("Nope"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = fx.lifecycle.submit(&owner, inline("  ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn submission_for_missing_place_is_not_found() {
        let fx = fixture(LifecyclePolicy::default());
        let submission = ListingSubmission::new("Ghost", ListingPlace::existing("place-nowhere"));
        let err = fx
            .lifecycle
            .submit(&Principal::owner("o1"), submission)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn acceptance_publishes_inline_place() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let admin = Principal::admin("a1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();

        let accepted = fx.lifecycle.approve(&admin, &listing.id).unwrap();
        assert_eq!(accepted.status, ListingStatus::Accepted);
        assert!(accepted.created_place);
        let place = fx.places.get(accepted.place_id.as_deref().unwrap()).unwrap();
        assert_eq!(place.name, "Kadoura");
    }

    #[test]
    fn acceptance_merges_changes_into_existing_place() {
        let fx = fixture(LifecyclePolicy::default());
        let place = fx.places.create(kadoura()).unwrap();
        let changes = PlacePatch {
            phone: Some("+20 3 480 0405".into()),
            ..PlacePatch::default()
        };
        let submission = ListingSubmission::new(
            "Phone number",
            ListingPlace::Existing {
                place_id: place.id.clone(),
                changes,
            },
        );
        let listing = fx
            .lifecycle
            .submit(&Principal::owner("o1"), submission)
            .unwrap();
        assert_eq!(listing.place_id.as_deref(), Some(place.id.as_str()));
        assert_eq!(fx.places.get(&place.id).unwrap().phone, None);

        let accepted = fx
            .lifecycle
            .approve(&Principal::admin("a1"), &listing.id)
            .unwrap();
        assert!(!accepted.created_place);
        assert_eq!(
            fx.places.get(&place.id).unwrap().phone.as_deref(),
            Some("+20 3 480 0405")
        );
    }

    #[test]
    fn guard_table_is_enforced() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let admin = Principal::admin("a1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();

        let err = fx.lifecycle.approve(&owner, &listing.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = fx.lifecycle.reject(&admin, &listing.id, "   ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = fx
            .lifecycle
            .transition(&admin, &listing.id, ListingStatus::Pending, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let rejected = fx.lifecycle.reject(&admin, &listing.id, "duplicate").unwrap();
        assert_eq!(rejected.admin_note.as_deref(), Some("duplicate"));

        let err = fx.lifecycle.approve(&admin, &listing.id).unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidTransition { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(fx.places.count().unwrap(), 0);

        let err = fx.lifecycle.approve(&admin, "lst-missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn owner_cannot_touch_accepted_listing() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        fx.lifecycle
            .approve(&Principal::admin("a1"), &listing.id)
            .unwrap();

        let update = ListingUpdate {
            title: Some("Kadoura Fish".into()),
            ..ListingUpdate::default()
        };
        let err = fx
            .lifecycle
            .update_own(&owner, &listing.id, update)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = fx.lifecycle.delete_own(&owner, &listing.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn rejected_edit_keeps_status_by_default() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        fx.lifecycle
            .reject(&Principal::admin("a1"), &listing.id, "missing photos")
            .unwrap();

        let update = ListingUpdate {
            description: Some("Now with photos".into()),
            ..ListingUpdate::default()
        };
        let edited = fx.lifecycle.update_own(&owner, &listing.id, update).unwrap();
        assert_eq!(edited.status, ListingStatus::Rejected);
        assert_eq!(edited.admin_note.as_deref(), Some("missing photos"));
        assert_eq!(edited.description.as_deref(), Some("Now with photos"));
    }

    #[test]
    fn rejected_edit_resets_to_pending_when_configured() {
        let fx = fixture(LifecyclePolicy {
            reset_rejected_on_owner_edit: true,
        });
        let owner = Principal::owner("o1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        fx.lifecycle
            .reject(&Principal::admin("a1"), &listing.id, "missing photos")
            .unwrap();

        let update = ListingUpdate {
            title: Some("Kadoura (photos)".into()),
            ..ListingUpdate::default()
        };
        let edited = fx.lifecycle.update_own(&owner, &listing.id, update).unwrap();
        assert_eq!(edited.status, ListingStatus::Pending);
        assert_eq!(edited.admin_note, None);
        let stored = fx.lifecycle.get(&owner, &listing.id).unwrap();
        assert_eq!(stored.status, ListingStatus::Pending);
    }

    #[test]
    fn resubmission_creates_new_pending_listing() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();

        let err = fx.lifecycle.resubmit(&owner, &listing.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        fx.lifecycle
            .reject(&Principal::admin("a1"), &listing.id, "duplicate")
            .unwrap();
        let fresh = fx.lifecycle.resubmit(&owner, &listing.id).unwrap();
        assert_ne!(fresh.id, listing.id);
        assert_eq!(fresh.status, ListingStatus::Pending);
        assert_eq!(fresh.title, listing.title);

        let err = fx
            .lifecycle
            .resubmit(&Principal::owner("o2"), &listing.id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let mine = fx.lifecycle.my_listings(&owner).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, fresh.id);
    }

    #[test]
    fn admin_update_never_changes_status_and_reaches_published_place() {
        let fx = fixture(LifecyclePolicy::default());
        let admin = Principal::admin("a1");
        let listing = fx
            .lifecycle
            .submit(&Principal::owner("o1"), inline("Kadoura"))
            .unwrap();
        let accepted = fx.lifecycle.approve(&admin, &listing.id).unwrap();
        let place_id = accepted.place_id.clone().unwrap();

        let mut revised = kadoura();
        revised.price_level = 3;
        let update = ListingUpdate {
            title: Some("Kadoura Seafood".into()),
            place: Some(ListingPlace::inline(revised)),
            ..ListingUpdate::default()
        };
        let edited = fx.lifecycle.admin_update(&admin, &listing.id, update).unwrap();
        assert_eq!(edited.status, ListingStatus::Accepted);
        assert_eq!(edited.place_id.as_deref(), Some(place_id.as_str()));
        assert!(edited.created_place);
        assert_eq!(fx.places.get(&place_id).unwrap().price_level, 3);
        assert_eq!(fx.places.count().unwrap(), 1);
    }

    #[test]
    fn admin_update_cannot_repoint_accepted_listing() {
        let fx = fixture(LifecyclePolicy::default());
        let admin = Principal::admin("a1");
        let published = fx.places.create(kadoura()).unwrap();
        let other = fx
            .places
            .create(NewPlace::new(
                "Fish Market",
                "Alexandria",
                3,
                GeoPoint::new(29.8830, 31.2010),
            ))
            .unwrap();
        let listing = fx
            .lifecycle
            .submit(
                &Principal::owner("o1"),
                ListingSubmission::new("Kadoura", ListingPlace::existing(&published.id)),
            )
            .unwrap();
        fx.lifecycle.approve(&admin, &listing.id).unwrap();

        let update = ListingUpdate {
            place: Some(ListingPlace::Existing {
                place_id: other.id.clone(),
                changes: PlacePatch {
                    name: Some("Renamed".into()),
                    ..PlacePatch::default()
                },
            }),
            ..ListingUpdate::default()
        };
        let err = fx
            .lifecycle
            .admin_update(&admin, &listing.id, update)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(fx.places.get(&published.id).unwrap().name, "Kadoura");
        assert_eq!(fx.places.get(&other.id).unwrap().name, "Fish Market");
        let stored = fx.lifecycle.get(&admin, &listing.id).unwrap();
        assert_eq!(stored.place.referenced_place(), Some(published.id.as_str()));

        let update = ListingUpdate {
            place: Some(ListingPlace::Existing {
                place_id: published.id.clone(),
                changes: PlacePatch {
                    name: Some("Kadoura Seafood".into()),
                    ..PlacePatch::default()
                },
            }),
            ..ListingUpdate::default()
        };
        let edited = fx.lifecycle.admin_update(&admin, &listing.id, update).unwrap();
        assert_eq!(edited.place_id.as_deref(), Some(published.id.as_str()));
        assert_eq!(fx.places.get(&published.id).unwrap().name, "Kadoura Seafood");
    }

    #[test]
    fn unpublish_removes_created_place() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let admin = Principal::admin("a1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        let place_id = fx
            .lifecycle
            .approve(&admin, &listing.id)
            .unwrap()
            .place_id
            .unwrap();

        let err = fx.lifecycle.unpublish(&owner, &listing.id, "closed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = fx.lifecycle.unpublish(&admin, &listing.id, " ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let rejected = fx.lifecycle.unpublish(&admin, &listing.id, "closed").unwrap();
        assert_eq!(rejected.status, ListingStatus::Rejected);
        assert_eq!(rejected.admin_note.as_deref(), Some("closed"));
        assert_eq!(rejected.place_id, None);
        assert!(!rejected.created_place);
        assert_eq!(
            fx.places.get(&place_id).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let err = fx.lifecycle.approve(&admin, &listing.id).unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidTransition { .. }));
        let err = fx.lifecycle.unpublish(&admin, &listing.id, "again").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let fresh = fx.lifecycle.resubmit(&owner, &listing.id).unwrap();
        let accepted = fx.lifecycle.approve(&admin, &fresh.id).unwrap();
        assert!(accepted.created_place);
        assert_eq!(fx.places.count().unwrap(), 1);
    }

    #[test]
    fn unpublish_keeps_edited_place() {
        let fx = fixture(LifecyclePolicy::default());
        let admin = Principal::admin("a1");
        let place = fx.places.create(kadoura()).unwrap();
        let listing = fx
            .lifecycle
            .submit(
                &Principal::owner("o1"),
                ListingSubmission::new("Kadoura", ListingPlace::existing(&place.id)),
            )
            .unwrap();

        let err = fx.lifecycle.unpublish(&admin, &listing.id, "closed").unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidTransition { .. }));

        fx.lifecycle.approve(&admin, &listing.id).unwrap();
        let rejected = fx.lifecycle.unpublish(&admin, &listing.id, "closed").unwrap();
        assert_eq!(rejected.status, ListingStatus::Rejected);
        assert_eq!(rejected.place_id.as_deref(), Some(place.id.as_str()));
        assert!(fx.places.get(&place.id).is_ok());
    }

    #[test]
    fn admin_delete_removes_orphaned_place() {
        let fx = fixture(LifecyclePolicy::default());
        let admin = Principal::admin("a1");
        let listing = fx
            .lifecycle
            .submit(&Principal::owner("o1"), inline("Kadoura"))
            .unwrap();
        let accepted = fx.lifecycle.approve(&admin, &listing.id).unwrap();
        let place_id = accepted.place_id.unwrap();

        let removed = fx.lifecycle.admin_delete(&admin, &listing.id).unwrap();
        assert_eq!(removed.as_deref(), Some(place_id.as_str()));
        assert_eq!(
            fx.places.get(&place_id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn admin_delete_keeps_shared_place() {
        let fx = fixture(LifecyclePolicy::default());
        let admin = Principal::admin("a1");
        let owner = Principal::owner("o1");
        let first = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        let place_id = fx
            .lifecycle
            .approve(&admin, &first.id)
            .unwrap()
            .place_id
            .unwrap();
        let follow_up = ListingSubmission::new("Kadoura hours", ListingPlace::existing(&place_id));
        fx.lifecycle.submit(&owner, follow_up).unwrap();

        assert_eq!(fx.lifecycle.admin_delete(&admin, &first.id).unwrap(), None);
        assert!(fx.places.get(&place_id).is_ok());
    }

    #[test]
    fn reads_are_scoped() {
        let fx = fixture(LifecyclePolicy::default());
        let owner = Principal::owner("o1");
        let admin = Principal::admin("a1");
        let listing = fx.lifecycle.submit(&owner, inline("Kadoura")).unwrap();
        fx.lifecycle
            .submit(&Principal::owner("o2"), inline("Other"))
            .unwrap();

        assert!(fx.lifecycle.get(&owner, &listing.id).is_ok());
        assert!(fx.lifecycle.get(&admin, &listing.id).is_ok());
        let err = fx
            .lifecycle
            .get(&Principal::owner("o2"), &listing.id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert_eq!(fx.lifecycle.my_listings(&owner).unwrap().len(), 1);
        assert_eq!(fx.lifecycle.all_listings(&admin, None).unwrap().len(), 2);
        assert!(fx.lifecycle.all_listings(&owner, None).is_err());

        fx.lifecycle.reject(&admin, &listing.id, "duplicate").unwrap();
        let rejected = fx
            .lifecycle
            .all_listings(&admin, Some(ListingStatus::Rejected))
            .unwrap();
        assert_eq!(rejected.len(), 1);

        let metrics = fx.lifecycle.metrics(&admin).unwrap();
        assert_eq!(metrics.pending, 1);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.total(), 2);
    }

    #[test]
    fn publish_direct_requires_admin() {
        let fx = fixture(LifecyclePolicy::default());
        let err = fx
            .lifecycle
            .publish_direct(&Principal::owner("o1"), kadoura())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let place = fx
            .lifecycle
            .publish_direct(&Principal::admin("a1"), kadoura())
            .unwrap();
        assert_eq!(fx.places.get(&place.id).unwrap().name, "Kadoura");
    }

    #[test]
    fn concurrent_moderation_has_one_winner() {
        let fx = fixture(LifecyclePolicy::default());
        let listing = fx
            .lifecycle
            .submit(&Principal::owner("o1"), inline("Kadoura"))
            .unwrap();
        let lifecycle = Arc::new(fx.lifecycle.clone());

        let handles: Vec<_> = (0..6)
            .map(|idx| {
                let lifecycle = Arc::clone(&lifecycle);
                let id = listing.id.clone();
                thread::spawn(move || {
                    let admin = Principal::admin(format!("a{idx}"));
                    if idx % 2 == 0 {
                        lifecycle.approve(&admin, &id)
                    } else {
                        lifecycle.reject(&admin, &id, "duplicate")
                    }
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results.iter().filter(|result| result.is_err()) {
            let err = result.as_ref().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict, "{err}");
        }
        assert!(fx.places.count().unwrap() <= 1);
    }
}
