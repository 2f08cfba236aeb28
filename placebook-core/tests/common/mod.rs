use std::path::Path;

use placebook_core::{load_placebook_config, Database, Directory, GeoPoint, NewPlace};

pub fn setup_directory() -> (tempfile::TempDir, Directory) {
    let dir = tempfile::tempdir().unwrap();
    let config = load_placebook_config(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/placebook.toml"),
    )
    .unwrap();
    let db = Database::builder()
        .path(dir.path().join("directory.sqlite"))
        .create_if_missing(true)
        .build()
        .unwrap();
    db.initialize().unwrap();
    (dir, Directory::new(db, &config))
}

#[allow(dead_code)]
pub fn place(name: &str, city: &str, price_level: i64, rating: f64, lng: f64, lat: f64) -> NewPlace {
    NewPlace::new(name, city, price_level, GeoPoint::new(lng, lat)).with_rating(rating)
}
