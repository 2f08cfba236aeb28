pub mod geo;
pub mod models;
pub mod store;

pub use geo::{distance_meters, EARTH_RADIUS_METERS};
pub use models::{
    GeoPoint, ImportReport, NearPlace, NewPlace, Place, PlacePatch, DEFAULT_CITY, DEFAULT_RATING,
};
pub use store::{NearPlaces, SqlitePlaceStore};
