pub mod auth;
pub mod collections;
pub mod config;
pub mod error;
pub mod listing;
pub mod place;
pub mod search;
pub mod sqlite;

pub use auth::{can_perform, require, Action, Principal, Role};
pub use collections::UserCollections;
pub use config::{
    load_placebook_config, LoggingSection, ModerationSection, PathsSection, PlacebookConfig,
    SearchSection,
};
pub use error::{ConfigError, DirectoryError, DirectoryResult, ErrorKind, Result};
pub use listing::{
    LifecyclePolicy, Listing, ListingLifecycle, ListingMetrics, ListingPlace, ListingStatus,
    ListingSubmission, ListingUpdate,
};
pub use place::{
    distance_meters, GeoPoint, ImportReport, NearPlace, NearPlaces, NewPlace, Place, PlacePatch,
    SqlitePlaceStore, DEFAULT_CITY, DEFAULT_RATING, EARTH_RADIUS_METERS,
};
pub use search::{SearchEngine, SearchFilters, SearchRequest, SearchResults, SortMode};
pub use sqlite::{configure_connection, Database, DatabaseBuilder};

/// Every store of the directory wired to one database from a loaded config.
#[derive(Debug, Clone)]
pub struct Directory {
    pub places: SqlitePlaceStore,
    pub search: SearchEngine,
    pub listings: ListingLifecycle,
    pub collections: UserCollections,
}

impl Directory {
    pub fn new(db: Database, config: &PlacebookConfig) -> Self {
        let places = SqlitePlaceStore::new(db.clone())
            .with_initial_ring(config.search.initial_ring_meters)
            .with_default_radius(config.search.default_radius_meters);
        Self {
            search: SearchEngine::new(places.clone()),
            listings: ListingLifecycle::new(db.clone())
                .with_policy(LifecyclePolicy::from(&config.moderation)),
            collections: UserCollections::new(db),
            places,
        }
    }

    pub fn database(&self) -> &Database {
        self.places.database()
    }
}
