mod common;

use std::sync::Arc;
use std::thread;

use common::{place, setup_directory};
use placebook_core::{ErrorKind, Principal};

#[test]
fn test_favorite_twice_keeps_one_entry() {
    let (_dir, directory) = setup_directory();
    let user = Principal::user("u1");
    let p = directory
        .places
        .create(place("Sea Gull", "Alexandria", 3, 4.3, 29.88, 31.18))
        .unwrap();

    directory.collections.add_favorite(&user, &p.id).unwrap();
    directory.collections.add_favorite(&user, &p.id).unwrap();
    assert_eq!(directory.collections.favorites(&user).unwrap().len(), 1);

    let other = directory
        .places
        .create(place("Byblos", "Alexandria", 2, 4.0, 29.89, 31.18))
        .unwrap();
    directory
        .collections
        .remove_favorite(&user, &other.id)
        .unwrap();
    assert_eq!(directory.collections.favorites(&user).unwrap().len(), 1);
}

#[test]
fn test_history_append_and_clear() {
    let (_dir, directory) = setup_directory();
    let user = Principal::user("u1");
    let p = directory
        .places
        .create(place("Sea Gull", "Alexandria", 3, 4.3, 29.88, 31.18))
        .unwrap();

    directory.collections.append_history(&user, &p.id).unwrap();
    directory.collections.append_history(&user, &p.id).unwrap();
    assert_eq!(directory.collections.history(&user).unwrap().len(), 1);

    directory.collections.clear_history(&user).unwrap();
    directory.collections.append_history(&user, &p.id).unwrap();
    assert_eq!(directory.collections.history(&user).unwrap().len(), 1);

    let err = directory
        .collections
        .append_history(&user, "place-missing")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_concurrent_favorites_do_not_lose_updates() {
    let (_dir, directory) = setup_directory();
    let ids: Vec<String> = (0..8)
        .map(|idx| {
            directory
                .places
                .create(place(
                    &format!("spot-{idx}"),
                    "Alexandria",
                    2,
                    4.0,
                    29.88 + idx as f64 * 0.005,
                    31.18,
                ))
                .unwrap()
                .id
        })
        .collect();

    let collections = Arc::new(directory.collections.clone());
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let collections = Arc::clone(&collections);
            thread::spawn(move || {
                let user = Principal::user("u1");
                collections.add_favorite(&user, &id).unwrap();
                collections.append_history(&user, &id).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let user = Principal::user("u1");
    assert_eq!(directory.collections.favorites(&user).unwrap().len(), ids.len());
    assert_eq!(directory.collections.history(&user).unwrap().len(), ids.len());
}
