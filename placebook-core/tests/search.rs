mod common;

use common::{place, setup_directory};
use placebook_core::{distance_meters, ErrorKind, GeoPoint, Place, SearchRequest, SortMode};

fn ids(places: &[Place]) -> Vec<&str> {
    places.iter().map(|place| place.id.as_str()).collect()
}

#[test]
fn test_city_and_price_scenario() {
    let (_dir, directory) = setup_directory();
    let a = directory
        .places
        .create(place("A", "Alexandria", 2, 4.5, 29.92, 31.20))
        .unwrap();
    let b = directory
        .places
        .create(place("B", "Cairo", 2, 4.8, 31.24, 30.04))
        .unwrap();

    let by_city = directory
        .search
        .search(&SearchRequest::new().city("Alexandria"))
        .unwrap()
        .collect_places()
        .unwrap();
    assert_eq!(ids(&by_city), vec![a.id.as_str()]);

    let by_rating = directory
        .search
        .search(
            &SearchRequest::new()
                .price_level(2)
                .sort_by(SortMode::HighRating),
        )
        .unwrap()
        .collect_places()
        .unwrap();
    assert_eq!(ids(&by_rating), vec![b.id.as_str(), a.id.as_str()]);
}

#[test]
fn test_filters_match_exactly_and_reads_are_repeatable() {
    let (_dir, directory) = setup_directory();
    directory
        .places
        .create(place("Alex cheap", "Alexandria", 1, 4.0, 29.90, 31.20))
        .unwrap();
    directory
        .places
        .create(place("Alex mid", "Alexandria", 2, 4.0, 29.91, 31.20))
        .unwrap();
    directory
        .places
        .create(place("alex lower", "alexandria", 2, 4.0, 29.92, 31.20))
        .unwrap();
    directory
        .places
        .create(place("Cairo mid", "Cairo", 2, 4.0, 31.23, 30.04))
        .unwrap();

    let request = SearchRequest::new().city("Alexandria").price_level(2);
    let first = directory.search.search(&request).unwrap().collect_places().unwrap();
    assert_eq!(first.len(), 1);
    assert!(first
        .iter()
        .all(|place| place.city == "Alexandria" && place.price_level == 2));

    let second = directory.search.search(&request).unwrap().collect_places().unwrap();
    assert_eq!(first, second);

    let default_order = directory
        .search
        .search(&SearchRequest::new())
        .unwrap()
        .collect_places()
        .unwrap();
    assert_eq!(default_order.len(), 4);
    assert!(default_order
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn test_nearest_is_ordered_by_distance_under_filters() {
    let (_dir, directory) = setup_directory();
    let origin = GeoPoint::new(29.9000, 31.2000);
    for (idx, (lng, lat)) in [
        (29.95, 31.25),
        (29.901, 31.201),
        (31.2357, 30.0444),
        (29.93, 31.19),
        (30.10, 31.30),
        (29.905, 31.2),
    ]
    .into_iter()
    .enumerate()
    {
        let level = if idx % 2 == 0 { 2 } else { 3 };
        directory
            .places
            .create(place(&format!("p{idx}"), "Alexandria", level, 4.0, lng, lat))
            .unwrap();
    }

    let all = directory
        .search
        .search(&SearchRequest::new().sort_by(SortMode::Nearest).origin(origin))
        .unwrap()
        .collect_places()
        .unwrap();
    assert_eq!(all.len(), 6);
    let distances: Vec<f64> = all
        .iter()
        .map(|place| distance_meters(&origin, &place.location))
        .collect();
    assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));

    let filtered = directory
        .search
        .search(
            &SearchRequest::new()
                .sort_by(SortMode::Nearest)
                .origin(origin)
                .price_level(2),
        )
        .unwrap()
        .collect_places()
        .unwrap();
    let expected: Vec<&str> = all
        .iter()
        .filter(|place| place.price_level == 2)
        .map(|place| place.id.as_str())
        .collect();
    assert_eq!(ids(&filtered), expected);

    let page: Vec<Place> = directory
        .search
        .search(&SearchRequest::new().sort_by(SortMode::Nearest).origin(origin))
        .unwrap()
        .skip(2)
        .take(2)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids(&page), ids(&all[2..4]));
}

#[test]
fn test_high_rating_ties_break_by_id() {
    let (_dir, directory) = setup_directory();
    for (idx, rating) in [4.2, 4.9, 4.2, 3.1, 4.9].into_iter().enumerate() {
        directory
            .places
            .create(place(&format!("r{idx}"), "Alexandria", 2, rating, 29.9 + idx as f64 * 0.01, 31.2))
            .unwrap();
    }
    let results = directory
        .search
        .search(&SearchRequest::new().sort_by(SortMode::HighRating))
        .unwrap()
        .collect_places()
        .unwrap();
    for pair in results.windows(2) {
        assert!(pair[0].ratings_average >= pair[1].ratings_average);
        if pair[0].ratings_average == pair[1].ratings_average {
            assert!(pair[0].id < pair[1].id);
        }
    }
}

#[test]
fn test_invalid_requests_are_reported() {
    let (_dir, directory) = setup_directory();
    let err = directory
        .search
        .search(&SearchRequest::new().sort_by(SortMode::Nearest))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = directory
        .search
        .search(
            &SearchRequest::new()
                .sort_by(SortMode::Nearest)
                .origin(GeoPoint::new(200.0, 0.0)),
        )
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = directory
        .search
        .search(&SearchRequest::new().price_level(7))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
