pub mod lifecycle;
pub mod models;

pub use lifecycle::{LifecyclePolicy, ListingLifecycle};
pub use models::{
    Listing, ListingMetrics, ListingPlace, ListingStatus, ListingSubmission, ListingUpdate,
};
