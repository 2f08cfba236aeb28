//! Spherical-earth helpers used by the geospatial index.

use std::f64::consts::{FRAC_PI_2, PI};

use super::models::GeoPoint;

/// Sphere radius in meters; matches the radius used by common document
/// stores for spherical `$near` queries.
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Half the circumference: no two points are further apart than this.
pub const MAX_SURFACE_DISTANCE_METERS: f64 = PI * EARTH_RADIUS_METERS;

/// Great-circle distance between two points in meters (haversine).
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Axis-aligned longitude/latitude rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub max_lng: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    const WORLD: BoundingBox = BoundingBox {
        min_lng: -180.0,
        max_lng: 180.0,
        min_lat: -90.0,
        max_lat: 90.0,
    };
}

/// Rectangles covering every point within `radius` meters of `center`.
///
/// Returns two rectangles when the circle crosses the antimeridian. Near the
/// poles, or for radii spanning a quarter of the globe, the longitude range
/// widens to the full circle.
pub fn bounding_boxes(center: &GeoPoint, radius: f64) -> Vec<BoundingBox> {
    let angular = radius / EARTH_RADIUS_METERS;
    if angular >= FRAC_PI_2 {
        return vec![BoundingBox::WORLD];
    }

    let lat = center.lat.to_radians();
    let min_lat = (lat - angular).to_degrees();
    let max_lat = (lat + angular).to_degrees();

    if min_lat <= -90.0 || max_lat >= 90.0 {
        return vec![BoundingBox {
            min_lng: -180.0,
            max_lng: 180.0,
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
        }];
    }

    let spread = angular.sin() / lat.cos();
    if spread >= 1.0 {
        return vec![BoundingBox {
            min_lng: -180.0,
            max_lng: 180.0,
            min_lat,
            max_lat,
        }];
    }

    let dlng = spread.asin().to_degrees();
    let min_lng = center.lng - dlng;
    let max_lng = center.lng + dlng;

    if min_lng < -180.0 {
        vec![
            BoundingBox {
                min_lng: min_lng + 360.0,
                max_lng: 180.0,
                min_lat,
                max_lat,
            },
            BoundingBox {
                min_lng: -180.0,
                max_lng,
                min_lat,
                max_lat,
            },
        ]
    } else if max_lng > 180.0 {
        vec![
            BoundingBox {
                min_lng,
                max_lng: 180.0,
                min_lat,
                max_lat,
            },
            BoundingBox {
                min_lng: -180.0,
                max_lng: max_lng - 360.0,
                min_lat,
                max_lat,
            },
        ]
    } else {
        vec![BoundingBox {
            min_lng,
            max_lng,
            min_lat,
            max_lat,
        }]
    }
}
