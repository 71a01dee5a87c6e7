//! Multi-instance and lock staleness tests.

use shelfdb_core::lock::{marker_path, LockCoordinator};
use shelfdb_core::{document, Collection, LockOwner, ManualClock, META_FILE};
use shelfdb_testkit::{open_instances, stress_concurrent_new, test_config, StressConfig};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[test]
fn two_hundred_concurrent_creates_across_instances() {
    let temp = TempDir::new().unwrap();
    let config = StressConfig {
        instances: 4,
        threads_per_instance: 5,
        operations: 200,
    };
    let instances = open_instances(
        &temp.path().join("shared"),
        &test_config().index_fields(["a"]),
        &config,
    );

    let result = stress_concurrent_new(&instances, &config);
    result.print_summary("concurrent new");
    assert_eq!(result.successful_ops, 200);
    assert_eq!(result.failed_ops, 0);

    let collection = &instances[0];
    assert_eq!(collection.len().unwrap(), 200);
    assert_eq!(collection.next_id().unwrap(), 200);
    assert_eq!(
        collection.count(&document([("a", 3)])).unwrap(),
        (0..200).filter(|n| n % 7 == 3).count() as u64
    );

    let report = collection.verify().unwrap();
    assert!(report.is_ok(), "{:?}", report.issues);
    assert_eq!(report.stored, 200);

    let markers: Vec<_> = fs::read_dir(collection.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".block"))
        .collect();
    assert!(markers.is_empty());
}

#[test]
fn stale_marker_is_reclaimed_by_a_writer() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("c");
    let collection = Collection::open(&path, test_config().index_fields(["a"])).unwrap();

    // A crashed instance left its marker behind, stamped an hour ago.
    let clock = Arc::new(ManualClock::at(SystemTime::now() - Duration::from_secs(3600)));
    let ghost = LockCoordinator::new(
        LockOwner::with_clock(clock),
        Duration::from_secs(10),
        Duration::from_millis(1),
        Duration::from_secs(2),
    );
    let meta = path.join(META_FILE);
    ghost.block(&meta).unwrap();
    assert_eq!(ghost.marker(&meta).map(|m| m.owner), Some(ghost.owner().id()));

    collection.new(document([("a", 1)])).unwrap();
    assert_eq!(collection.len().unwrap(), 1);
    assert!(!marker_path(&meta).exists());
}

#[test]
fn fresh_marker_holds_writers_until_released() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("c");
    let collection =
        Arc::new(Collection::open(&path, test_config().index_fields(["a"])).unwrap());

    let holder = LockCoordinator::new(
        LockOwner::new(),
        Duration::from_secs(10),
        Duration::from_millis(1),
        Duration::from_secs(2),
    );
    let meta = path.join(META_FILE);
    holder.block(&meta).unwrap();

    let writer = {
        let collection = Arc::clone(&collection);
        thread::spawn(move || collection.new(document([("a", 1)])).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    assert_eq!(collection.len().unwrap(), 0);

    holder.unblock(&meta);
    writer.join().unwrap();
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn manual_clock_ages_markers() {
    let temp = TempDir::new().unwrap();
    let resource = temp.path().join("data_0");
    let clock = Arc::new(ManualClock::new());
    let first = LockCoordinator::new(
        LockOwner::with_clock(clock.clone()),
        Duration::from_secs(10),
        Duration::from_millis(1),
        Duration::from_secs(2),
    );
    let second = LockCoordinator::new(
        LockOwner::with_clock(clock.clone()),
        Duration::from_secs(10),
        Duration::from_millis(1),
        Duration::from_secs(2),
    );

    first.block(&resource).unwrap();
    assert!(second.is_blocked(&resource));
    clock.advance(Duration::from_secs(9));
    assert!(second.block(&resource).is_err());
    clock.advance(Duration::from_secs(1));
    assert!(!second.is_blocked(&resource));
    second.wait_to_block(&resource).unwrap();
    assert!(second.owns(&resource));
    assert!(first.is_blocked(&resource));
}
