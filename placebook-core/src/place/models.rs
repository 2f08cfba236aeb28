use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DirectoryError, DirectoryResult};

pub const DEFAULT_RATING: f64 = 4.0;
pub const DEFAULT_CITY: &str = "Alexandria";
pub const PRICE_LEVELS: std::ops::RangeInclusive<i64> = 1..=4;

/// WGS84 coordinate pair, longitude first as stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn validate(&self) -> DirectoryResult<()> {
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(DirectoryError::validation(
                "location.lng",
                format!("must be within [-180, 180], got {}", self.lng),
            ));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(DirectoryError::validation(
                "location.lat",
                format!("must be within [-90, 90], got {}", self.lat),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub name: String,
    pub city: String,
    pub category: Vec<String>,
    pub price_level: i64,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub location: GeoPoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Place {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: NaiveDateTime = row.get("created_at")?;
        let updated_at: NaiveDateTime = row.get("updated_at")?;
        let category: String = row.get("category")?;
        let category = serde_json::from_str(&category).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            city: row.get("city")?,
            category,
            price_level: row.get("price_level")?,
            ratings_average: row.get("ratings_average")?,
            ratings_quantity: row.get("ratings_quantity")?,
            address: row.get("address")?,
            phone: row.get("phone")?,
            website: row.get("website")?,
            location: GeoPoint {
                lng: row.get("lng")?,
                lat: row.get("lat")?,
            },
            created_at: Utc.from_utc_datetime(&created_at),
            updated_at: Utc.from_utc_datetime(&updated_at),
        })
    }

    /// Applies `patch` on top of this record. The result still has to pass
    /// [`Place::validate`] before it is written.
    pub fn apply(&mut self, patch: &PlacePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(city) = &patch.city {
            self.city = city.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(price_level) = patch.price_level {
            self.price_level = price_level;
        }
        if let Some(rating) = patch.ratings_average {
            self.ratings_average = clamp_rating(&self.name, rating);
        }
        if let Some(quantity) = patch.ratings_quantity {
            self.ratings_quantity = quantity;
        }
        if let Some(address) = &patch.address {
            self.address = Some(address.clone());
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(website) = &patch.website {
            self.website = Some(website.clone());
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
    }

    pub fn validate(&self) -> DirectoryResult<()> {
        validate_fields(
            &self.name,
            &self.city,
            &self.category,
            self.price_level,
            self.ratings_quantity,
            &self.location,
        )
    }
}

/// Place fields supplied on creation, import or inline listing submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPlace {
    pub name: String,
    #[serde(default = "default_city")]
    pub city: String,
    pub category: Vec<String>,
    pub price_level: i64,
    #[serde(default = "default_rating")]
    pub ratings_average: f64,
    #[serde(default)]
    pub ratings_quantity: i64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub location: GeoPoint,
}

impl NewPlace {
    pub fn new(
        name: impl Into<String>,
        city: impl Into<String>,
        price_level: i64,
        location: GeoPoint,
    ) -> Self {
        Self {
            name: name.into(),
            city: city.into(),
            category: vec!["Restaurant".to_string()],
            price_level,
            ratings_average: DEFAULT_RATING,
            ratings_quantity: 0,
            address: None,
            phone: None,
            website: None,
            location,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.ratings_average = rating;
        self
    }

    pub fn with_category(mut self, category: Vec<String>) -> Self {
        self.category = category;
        self
    }

    /// Validates the payload and clamps an out-of-range rating to the default.
    pub fn normalized(mut self) -> DirectoryResult<Self> {
        self.ratings_average = clamp_rating(&self.name, self.ratings_average);
        validate_fields(
            &self.name,
            &self.city,
            &self.category,
            self.price_level,
            self.ratings_quantity,
            &self.location,
        )?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacePatch {
    pub name: Option<String>,
    pub city: Option<String>,
    pub category: Option<Vec<String>>,
    pub price_level: Option<i64>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i64>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub location: Option<GeoPoint>,
}

impl PlacePatch {
    pub fn is_empty(&self) -> bool {
        self == &PlacePatch::default()
    }
}

impl From<&NewPlace> for PlacePatch {
    /// A patch that overwrites every field of a record with `place`.
    fn from(place: &NewPlace) -> Self {
        Self {
            name: Some(place.name.clone()),
            city: Some(place.city.clone()),
            category: Some(place.category.clone()),
            price_level: Some(place.price_level),
            ratings_average: Some(place.ratings_average),
            ratings_quantity: Some(place.ratings_quantity),
            address: place.address.clone(),
            phone: place.phone.clone(),
            website: place.website.clone(),
            location: Some(place.location),
        }
    }
}

/// A place together with its distance from a query origin.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearPlace {
    pub place: Place,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

fn default_city() -> String {
    DEFAULT_CITY.to_string()
}

fn default_rating() -> f64 {
    DEFAULT_RATING
}

/// Out-of-range ratings are replaced with the default instead of rejected so
/// that ingested records with unusable scores still load.
pub(crate) fn clamp_rating(name: &str, rating: f64) -> f64 {
    if rating.is_finite() && (1.0..=5.0).contains(&rating) {
        rating
    } else {
        warn!(place = %name, rating, "rating outside [1, 5], using default");
        DEFAULT_RATING
    }
}

fn validate_fields(
    name: &str,
    city: &str,
    category: &[String],
    price_level: i64,
    ratings_quantity: i64,
    location: &GeoPoint,
) -> DirectoryResult<()> {
    if name.trim().is_empty() {
        return Err(DirectoryError::validation("name", "must not be blank"));
    }
    if city.trim().is_empty() {
        return Err(DirectoryError::validation("city", "must not be blank"));
    }
    if category.is_empty() || category.iter().all(|entry| entry.trim().is_empty()) {
        return Err(DirectoryError::validation(
            "category",
            "must contain at least one entry",
        ));
    }
    validate_price_level(price_level)?;
    if ratings_quantity < 0 {
        return Err(DirectoryError::validation(
            "ratings_quantity",
            format!("must not be negative, got {ratings_quantity}"),
        ));
    }
    location.validate()
}

pub(crate) fn validate_price_level(price_level: i64) -> DirectoryResult<()> {
    if PRICE_LEVELS.contains(&price_level) {
        Ok(())
    } else {
        Err(DirectoryError::validation(
            "price_level",
            format!("must be between 1 and 4, got {price_level}"),
        ))
    }
}
