//! End-to-end pipeline runs over the in-memory store and CAR source.

mod common;

use std::sync::Arc;

use carlink::source::BlockIter;
use carlink::{
    CarFile, CarSourceLike, CarlinkError, FileRange, InMemoryCarSource, InMemoryStore,
    StoreLike, reconcile,
};
use common::{test_block, test_cid};

fn range(id: i64, seed: u8) -> FileRange {
    FileRange {
        id,
        cid: test_cid(seed).to_bytes(),
    }
}

fn car(id: i64, storage_path: &str) -> CarFile {
    CarFile {
        id,
        storage_path: storage_path.to_string(),
    }
}

#[test]
fn test_single_car_matches_one_of_two_ranges() {
    // Expected ranges 1 and 2; x.car holds range 1's block plus a stranger.
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa), range(2, 0xbb)],
        vec![car(10, "x.car")],
    );
    let source = InMemoryCarSource::new()
        .with_car("x.car", vec![test_block(0xaa), test_block(0xcc)]);

    let outcome = reconcile(&mut store, Arc::new(source), Some(2)).unwrap();

    assert_eq!(outcome.file_ranges, 2);
    assert_eq!(outcome.cars, 1);
    assert_eq!(outcome.associations, 1);
    // No association for range 2 and none invented for the stranger block.
    assert_eq!(store.associations, vec![(1, 10)]);
}

#[test]
fn test_repeated_block_in_one_car_associates_once() {
    let mut store = InMemoryStore::new(vec![range(1, 0xaa)], vec![car(10, "x.car")]);
    let source = InMemoryCarSource::new()
        .with_car("x.car", vec![test_block(0xaa), test_block(0xaa), test_block(0xaa)]);

    let outcome = reconcile(&mut store, Arc::new(source), None).unwrap();

    assert_eq!(outcome.associations, 1);
    assert_eq!(store.associations, vec![(1, 10)]);
}

#[test]
fn test_same_cid_in_two_cars_associates_each_car() {
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa)],
        vec![car(10, "x.car"), car(11, "y.car")],
    );
    let source = InMemoryCarSource::new()
        .with_car("x.car", vec![test_block(0xaa)])
        .with_car("y.car", vec![test_block(0xaa)]);

    let outcome = reconcile(&mut store, Arc::new(source), Some(2)).unwrap();

    assert_eq!(outcome.associations, 2);
    let mut got = store.associations.clone();
    got.sort();
    assert_eq!(got, vec![(1, 10), (1, 11)]);
}

#[test]
fn test_scan_failure_rolls_back_everything() {
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa), range(2, 0xbb), range(3, 0xcc)],
        vec![car(10, "good.car"), car(11, "bad.car")],
    );
    // Seed a pre-existing association from an earlier run. Ids 3/12 keep it
    // outside this run's unmatched sets.
    store.begin().unwrap();
    store.insert_association(3, 12).unwrap();
    store.commit().unwrap();

    let source = InMemoryCarSource::new()
        .with_car("good.car", vec![test_block(0xaa)])
        .with_failing_car("bad.car", vec![test_block(0xbb)]);

    let err = reconcile(&mut store, Arc::new(source), Some(2)).unwrap_err();
    assert!(err.to_string().contains("read failure"), "got: {}", err);
    // Exactly the rows present before the run, nothing from it.
    assert_eq!(store.associations, vec![(3, 12)]);
}

#[test]
fn test_missing_car_file_is_tolerated() {
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa)],
        vec![car(10, "gone.car"), car(11, "here.car")],
    );
    let source = InMemoryCarSource::new().with_car("here.car", vec![test_block(0xaa)]);

    let outcome = reconcile(&mut store, Arc::new(source), Some(2)).unwrap();

    assert_eq!(outcome.cars, 2);
    assert_eq!(store.associations, vec![(1, 11)]);
}

#[test]
fn test_insert_failure_rolls_back() {
    let mut store = InMemoryStore::new(vec![range(1, 0xaa)], vec![car(10, "x.car")]);
    store.fail_on_insert = true;
    let source = InMemoryCarSource::new().with_car("x.car", vec![test_block(0xaa)]);

    let err = reconcile(&mut store, Arc::new(source), None).unwrap_err();
    assert!(err.to_string().contains("insert"), "got: {}", err);
    assert!(store.associations.is_empty());
}

#[test]
fn test_rerun_is_idempotent() {
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa), range(2, 0xbb)],
        vec![car(10, "x.car"), car(11, "y.car")],
    );
    let source: Arc<InMemoryCarSource> = Arc::new(
        InMemoryCarSource::new()
            .with_car("x.car", vec![test_block(0xaa)])
            .with_car("y.car", vec![test_block(0xcc)]),
    );

    let first = reconcile(&mut store, source.clone(), Some(2)).unwrap();
    assert_eq!(first.associations, 1);
    let after_first = store.associations.clone();

    // Nothing changed on disk or in the tables: the second run sees only the
    // still-unmatched rows and adds nothing.
    let second = reconcile(&mut store, source, Some(2)).unwrap();
    assert_eq!(second.associations, 0);
    assert_eq!(store.associations, after_first);
}

/// Delegates to an in-memory source but dies outright on one path,
/// simulating a worker taken down by a bug rather than a reported error.
struct ExplodingCarSource {
    inner: InMemoryCarSource,
    explode_on: String,
}

impl CarSourceLike for ExplodingCarSource {
    fn open(&self, storage_path: &str) -> Result<Option<BlockIter>, CarlinkError> {
        if storage_path == self.explode_on {
            panic!("exploding source: {}", storage_path);
        }
        self.inner.open(storage_path)
    }
}

#[test]
fn test_worker_death_rolls_back_everything() {
    let mut store = InMemoryStore::new(
        vec![range(1, 0xaa), range(2, 0xbb)],
        vec![car(10, "good.car"), car(11, "evil.car")],
    );
    let source = ExplodingCarSource {
        inner: InMemoryCarSource::new().with_car("good.car", vec![test_block(0xaa)]),
        explode_on: "evil.car".to_string(),
    };

    let err = reconcile(&mut store, Arc::new(source), Some(2)).unwrap_err();
    assert!(err.to_string().contains("panicked"), "got: {}", err);
    // The match from good.car must not survive the dead worker.
    assert!(store.associations.is_empty());
}

#[test]
fn test_empty_inputs_commit_cleanly() {
    let mut store = InMemoryStore::new(Vec::new(), Vec::new());
    let outcome = reconcile(&mut store, Arc::new(InMemoryCarSource::new()), None).unwrap();
    assert_eq!(outcome.file_ranges, 0);
    assert_eq!(outcome.cars, 0);
    assert_eq!(outcome.associations, 0);
    assert!(store.associations.is_empty());
}

#[test]
fn test_many_cars_across_worker_pool() {
    let ranges: Vec<FileRange> = (0..50).map(|i| range(i as i64 + 1, i as u8)).collect();
    let cars: Vec<CarFile> = (0..50).map(|i| car(100 + i as i64, &format!("{i}.car"))).collect();
    let mut source = InMemoryCarSource::new();
    for i in 0..50u8 {
        source = source.with_car(&format!("{i}.car"), vec![test_block(i)]);
    }
    let mut store = InMemoryStore::new(ranges, cars);

    let outcome = reconcile(&mut store, Arc::new(source), Some(8)).unwrap();

    assert_eq!(outcome.associations, 50);
    let mut got = store.associations.clone();
    got.sort();
    let expected: Vec<(i64, i64)> = (0..50).map(|i| (i as i64 + 1, 100 + i as i64)).collect();
    assert_eq!(got, expected);
}
