use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};
use crate::place::models::validate_price_level;
use crate::place::{GeoPoint, Place, SqlitePlaceStore};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "nearest")]
    Nearest,
    #[serde(rename = "highRating", alias = "high_rating")]
    HighRating,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Default => "default",
            SortMode::Nearest => "nearest",
            SortMode::HighRating => "highRating",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" => Ok(SortMode::Default),
            "nearest" => Ok(SortMode::Nearest),
            "highRating" | "high_rating" => Ok(SortMode::HighRating),
            other => Err(DirectoryError::validation(
                "sort_by",
                format!("unknown sort mode {other}"),
            )),
        }
    }
}

/// Exact-match filters, combined with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub city: Option<String>,
    pub price_level: Option<i64>,
}

impl SearchFilters {
    pub fn matches(&self, place: &Place) -> bool {
        self.city.as_ref().map_or(true, |city| &place.city == city)
            && self
                .price_level
                .map_or(true, |level| place.price_level == level)
    }

    fn validate(&self) -> DirectoryResult<()> {
        if let Some(level) = self.price_level {
            validate_price_level(level)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(flatten)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub sort_by: SortMode,
    pub origin: Option<GeoPoint>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.filters.city = Some(city.into());
        self
    }

    pub fn price_level(mut self, level: i64) -> Self {
        self.filters.price_level = Some(level);
        self
    }

    pub fn sort_by(mut self, sort: SortMode) -> Self {
        self.sort_by = sort;
        self
    }

    pub fn origin(mut self, origin: GeoPoint) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Ordered search output. Pagination is left to the caller (`skip`/`take`).
pub struct SearchResults {
    inner: Box<dyn Iterator<Item = DirectoryResult<Place>> + Send>,
}

impl SearchResults {
    fn new<I>(inner: I) -> Self
    where
        I: Iterator<Item = DirectoryResult<Place>> + Send + 'static,
    {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn collect_places(self) -> DirectoryResult<Vec<Place>> {
        self.collect()
    }
}

impl Iterator for SearchResults {
    type Item = DirectoryResult<Place>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[derive(Debug, Clone)]
pub struct SearchEngine {
    places: SqlitePlaceStore,
}

impl SearchEngine {
    pub fn new(places: SqlitePlaceStore) -> Self {
        Self { places }
    }

    pub fn search(&self, request: &SearchRequest) -> DirectoryResult<SearchResults> {
        request.filters.validate()?;
        debug!(
            city = ?request.filters.city,
            price_level = ?request.filters.price_level,
            sort = %request.sort_by,
            "searching places"
        );

        match request.sort_by {
            SortMode::Nearest => {
                let origin = request.origin.ok_or(DirectoryError::Configuration {
                    sort: "nearest",
                    missing: "an origin point",
                })?;
                let filters = request.filters.clone();
                // Filter the distance-ordered stream; never re-sort afterwards.
                let near = self.places.find_near(origin, None)?.filter_map(move |item| {
                    match item {
                        Ok(near) if filters.matches(&near.place) => Some(Ok(near.place)),
                        Ok(_) => None,
                        Err(err) => Some(Err(err)),
                    }
                });
                Ok(SearchResults::new(near))
            }
            SortMode::Default | SortMode::HighRating => {
                let places = self.query_sorted(&request.filters, request.sort_by)?;
                Ok(SearchResults::new(places.into_iter().map(Ok)))
            }
        }
    }

    fn query_sorted(&self, filters: &SearchFilters, sort: SortMode) -> DirectoryResult<Vec<Place>> {
        let conn = self.places.database().open()?;
        let mut query = String::from("SELECT * FROM places");
        let mut clauses = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let Some(city) = &filters.city {
            clauses.push("city = ?");
            params.push(Value::Text(city.clone()));
        }
        if let Some(level) = filters.price_level {
            clauses.push("price_level = ?");
            params.push(Value::Integer(level));
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        match sort {
            SortMode::HighRating => query.push_str(" ORDER BY ratings_average DESC, id ASC"),
            _ => query.push_str(" ORDER BY created_at ASC, id ASC"),
        }

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Place::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
