use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DirectoryError, DirectoryResult};
use crate::sqlite::Database;

use super::geo::{bounding_boxes, distance_meters, MAX_SURFACE_DISTANCE_METERS};
use super::models::{GeoPoint, ImportReport, NearPlace, NewPlace, Place, PlacePatch};

const DEFAULT_INITIAL_RING_METERS: f64 = 1_000.0;
const DEFAULT_RADIUS_METERS: f64 = 5_000.0;

#[derive(Debug, Clone)]
pub struct SqlitePlaceStore {
    db: Database,
    initial_ring_meters: f64,
    default_radius_meters: f64,
}

impl SqlitePlaceStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            initial_ring_meters: DEFAULT_INITIAL_RING_METERS,
            default_radius_meters: DEFAULT_RADIUS_METERS,
        }
    }

    pub fn with_initial_ring(mut self, meters: f64) -> Self {
        if meters.is_finite() && meters > 0.0 {
            self.initial_ring_meters = meters;
        }
        self
    }

    pub fn with_default_radius(mut self, meters: f64) -> Self {
        if meters.is_finite() && meters > 0.0 {
            self.default_radius_meters = meters;
        }
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn create(&self, data: NewPlace) -> DirectoryResult<Place> {
        let data = data.normalized()?;
        let conn = self.db.open()?;
        let place = insert_place(&conn, data)?;
        info!(place_id = %place.id, city = %place.city, "place created");
        Ok(place)
    }

    pub fn get(&self, id: &str) -> DirectoryResult<Place> {
        let conn = self.db.open()?;
        fetch_place(&conn, id)?.ok_or_else(|| DirectoryError::place_not_found(id))
    }

    pub fn update(&self, id: &str, patch: &PlacePatch) -> DirectoryResult<Place> {
        let place = self.db.write(|tx| update_place(tx, id, patch))?;
        info!(place_id = %place.id, "place updated");
        Ok(place)
    }

    pub fn delete(&self, id: &str) -> DirectoryResult<()> {
        self.db.write(|tx| {
            let listings: i64 = tx.query_row(
                "SELECT COUNT(*) FROM listings WHERE place_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            if listings > 0 {
                return Err(DirectoryError::PlaceReferenced {
                    place_id: id.to_string(),
                    listings: listings as usize,
                });
            }
            delete_place_row(tx, id)
        })?;
        info!(place_id = %id, "place deleted");
        Ok(())
    }

    /// Places ordered by ascending distance from `origin`, optionally bounded.
    ///
    /// The returned iterator is lazy: it walks outward through the R*Tree in
    /// rings that double in radius and only touches rows inside each ring's
    /// bounding boxes.
    pub fn find_near(
        &self,
        origin: GeoPoint,
        max_distance_meters: Option<f64>,
    ) -> DirectoryResult<NearPlaces> {
        origin.validate()?;
        if let Some(max) = max_distance_meters {
            if !max.is_finite() || max < 0.0 {
                return Err(DirectoryError::validation(
                    "max_distance",
                    format!("must be a non-negative number of meters, got {max}"),
                ));
            }
        }
        let conn = self.db.open()?;
        Ok(NearPlaces::new(
            conn,
            origin,
            max_distance_meters,
            self.initial_ring_meters,
        ))
    }

    /// Every place within `radius` meters (the configured default when absent).
    pub fn places_within(
        &self,
        origin: GeoPoint,
        radius_meters: Option<f64>,
    ) -> DirectoryResult<Vec<NearPlace>> {
        let radius = radius_meters.unwrap_or(self.default_radius_meters);
        self.find_near(origin, Some(radius))?.collect()
    }

    pub fn list_all(&self) -> DirectoryResult<Vec<Place>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare("SELECT * FROM places ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map([], |row| Place::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cities(&self) -> DirectoryResult<Vec<String>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT TRIM(city) FROM places WHERE TRIM(city) <> '' ORDER BY TRIM(city)",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> DirectoryResult<usize> {
        let conn = self.db.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM places", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Bulk upsert keyed on exact coordinates, in a single transaction.
    ///
    /// Records that fail validation are skipped and counted rather than
    /// aborting the batch.
    pub fn import(&self, records: Vec<NewPlace>) -> DirectoryResult<ImportReport> {
        let report = self.db.write(|tx| {
            let mut report = ImportReport::default();
            for record in records {
                let record = match record.normalized() {
                    Ok(record) => record,
                    Err(err) => {
                        debug!(error = %err, "skipping invalid import record");
                        report.skipped += 1;
                        continue;
                    }
                };
                let existing = tx
                    .query_row(
                        "SELECT id FROM places WHERE lng = ?1 AND lat = ?2 ORDER BY seq LIMIT 1",
                        params![record.location.lng, record.location.lat],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                match existing {
                    Some(id) => {
                        overwrite_place(tx, &id, &record)?;
                        report.updated += 1;
                    }
                    None => {
                        insert_place(tx, record)?;
                        report.inserted += 1;
                    }
                }
            }
            Ok(report)
        })?;
        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "place import finished"
        );
        Ok(report)
    }
}

pub(crate) fn new_place_id() -> String {
    format!("place-{}", Uuid::new_v4().simple())
}

/// Inserts an already normalized payload.
pub(crate) fn insert_place(conn: &Connection, data: NewPlace) -> DirectoryResult<Place> {
    let now = Utc::now();
    let place = Place {
        id: new_place_id(),
        name: data.name,
        city: data.city,
        category: data.category,
        price_level: data.price_level,
        ratings_average: data.ratings_average,
        ratings_quantity: data.ratings_quantity,
        address: data.address,
        phone: data.phone,
        website: data.website,
        location: data.location,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO places (
            id, name, city, category, price_level, ratings_average, ratings_quantity,
            address, phone, website, lng, lat, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            &place.id,
            &place.name,
            &place.city,
            serde_json::to_string(&place.category)?,
            place.price_level,
            place.ratings_average,
            place.ratings_quantity,
            &place.address,
            &place.phone,
            &place.website,
            place.location.lng,
            place.location.lat,
            place.created_at.naive_utc(),
            place.updated_at.naive_utc(),
        ],
    )?;
    Ok(place)
}

pub(crate) fn fetch_place(conn: &Connection, id: &str) -> DirectoryResult<Option<Place>> {
    let mut stmt = conn.prepare("SELECT * FROM places WHERE id = ?1")?;
    let place = stmt.query_row([id], |row| Place::from_row(row)).optional()?;
    Ok(place)
}

/// Loads, patches, re-validates and writes back one place. Callers run this
/// inside a transaction so a failed validation leaves the row untouched.
pub(crate) fn update_place(
    conn: &Connection,
    id: &str,
    patch: &PlacePatch,
) -> DirectoryResult<Place> {
    let mut place = fetch_place(conn, id)?.ok_or_else(|| DirectoryError::place_not_found(id))?;
    place.apply(patch);
    place.validate()?;
    place.updated_at = Utc::now();
    write_place(conn, &place)?;
    Ok(place)
}

fn overwrite_place(conn: &Connection, id: &str, data: &NewPlace) -> DirectoryResult<()> {
    let mut place = fetch_place(conn, id)?.ok_or_else(|| DirectoryError::place_not_found(id))?;
    place.name = data.name.clone();
    place.city = data.city.clone();
    place.category = data.category.clone();
    place.price_level = data.price_level;
    place.ratings_average = data.ratings_average;
    place.ratings_quantity = data.ratings_quantity;
    place.address = data.address.clone();
    place.phone = data.phone.clone();
    place.website = data.website.clone();
    place.location = data.location;
    place.updated_at = Utc::now();
    write_place(conn, &place)
}

fn write_place(conn: &Connection, place: &Place) -> DirectoryResult<()> {
    conn.execute(
        "UPDATE places SET
            name = ?2, city = ?3, category = ?4, price_level = ?5, ratings_average = ?6,
            ratings_quantity = ?7, address = ?8, phone = ?9, website = ?10,
            lng = ?11, lat = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            &place.id,
            &place.name,
            &place.city,
            serde_json::to_string(&place.category)?,
            place.price_level,
            place.ratings_average,
            place.ratings_quantity,
            &place.address,
            &place.phone,
            &place.website,
            place.location.lng,
            place.location.lat,
            place.updated_at.naive_utc(),
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_place_row(conn: &Connection, id: &str) -> DirectoryResult<()> {
    let affected = conn.execute("DELETE FROM places WHERE id = ?1", [id])?;
    if affected == 0 {
        return Err(DirectoryError::place_not_found(id));
    }
    Ok(())
}

/// Lazy nearest-first walk over the geospatial index.
///
/// Each step queries the ring `radius` through the R*Tree, releases every
/// candidate whose exact distance is within that radius in sorted order, and
/// holds back the rest (bounding-box corners) for the next, wider ring.
pub struct NearPlaces {
    conn: Connection,
    origin: GeoPoint,
    limit: f64,
    radius: f64,
    exhausted: bool,
    ready: VecDeque<NearPlace>,
    deferred: Vec<NearPlace>,
    seen: HashSet<i64>,
}

impl NearPlaces {
    fn new(
        conn: Connection,
        origin: GeoPoint,
        max_distance: Option<f64>,
        initial_ring: f64,
    ) -> Self {
        let limit = max_distance
            .unwrap_or(MAX_SURFACE_DISTANCE_METERS)
            .min(MAX_SURFACE_DISTANCE_METERS);
        Self {
            conn,
            origin,
            limit,
            radius: initial_ring.min(limit),
            exhausted: false,
            ready: VecDeque::new(),
            deferred: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn advance_ring(&mut self) -> DirectoryResult<()> {
        let radius = self.radius;
        let mut candidates = std::mem::take(&mut self.deferred);

        for bbox in bounding_boxes(&self.origin, radius) {
            let mut stmt = self.conn.prepare_cached(
                "SELECT p.* FROM place_index i
                 JOIN places p ON p.seq = i.id
                 WHERE i.max_lng >= ?1 AND i.min_lng <= ?2
                   AND i.max_lat >= ?3 AND i.min_lat <= ?4",
            )?;
            let mut rows = stmt.query(params![
                bbox.min_lng,
                bbox.max_lng,
                bbox.min_lat,
                bbox.max_lat
            ])?;
            while let Some(row) = rows.next()? {
                let seq: i64 = row.get("seq")?;
                if !self.seen.insert(seq) {
                    continue;
                }
                let place = Place::from_row(row)?;
                let distance_meters = distance_meters(&self.origin, &place.location);
                if distance_meters <= self.limit {
                    candidates.push(NearPlace {
                        place,
                        distance_meters,
                    });
                }
            }
        }

        let last_ring = radius >= self.limit;
        let (mut within, beyond): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|near| last_ring || near.distance_meters <= radius);
        within.sort_by(compare_near);
        debug!(
            radius,
            released = within.len(),
            deferred = beyond.len(),
            "near ring scanned"
        );
        self.ready.extend(within);
        self.deferred = beyond;

        if last_ring {
            self.exhausted = true;
        } else {
            self.radius = (radius * 2.0).min(self.limit);
        }
        Ok(())
    }
}

impl Iterator for NearPlaces {
    type Item = DirectoryResult<NearPlace>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(near) = self.ready.pop_front() {
                return Some(Ok(near));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.advance_ring() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

fn compare_near(a: &NearPlace, b: &NearPlace) -> Ordering {
    a.distance_meters
        .partial_cmp(&b.distance_meters)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.place.id.cmp(&b.place.id))
}
