use shmcache::{Cache, CacheConfig, Error};
use tempfile::tempdir;

fn small_config() -> CacheConfig {
    CacheConfig {
        nbuckets: 17,
        maxseg: 2,
        segsize: 4096,
        default_ttl: 0,
    }
}

#[test]
fn insert_retrieve_returns_stored_bytes() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("t1.cache");
    let mut cache = Cache::create(&path, small_config()).expect("cache create");

    cache.insert("a", b"hello", 100).expect("insert");

    let mut buf = Vec::new();
    assert!(cache.retrieve("a", 0, &mut buf).expect("retrieve"));
    assert_eq!(buf, b"hello");
    assert_eq!(buf.len(), 5);

    cache.destroy().expect("destroy");
}

#[test]
fn overwrite_keeps_one_bucket_per_key() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("t2.cache");
    let mut cache = Cache::create(&path, small_config()).expect("cache create");

    cache.insert("a", b"hello", 100).expect("first insert");
    cache.insert("a", b"world!", 100).expect("overwrite");

    let mut buf = Vec::new();
    assert!(cache.retrieve("a", 0, &mut buf).expect("retrieve"));
    assert_eq!(buf, b"world!");

    let entries = cache.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "a");
    assert_eq!(entries[0].length, 6);

    cache.destroy().expect("destroy");
}

#[test]
fn half_segment_payload_round_trips() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("big.cache");
    let mut cache = Cache::create(&path, small_config()).expect("cache create");

    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    cache.insert("big", &payload, 0).expect("insert");

    let mut buf = Vec::new();
    assert!(cache.retrieve("big", 0, &mut buf).expect("retrieve"));
    assert_eq!(buf, payload);

    cache.destroy().expect("destroy");
}

#[test]
fn second_large_payload_spills_to_second_segment() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("spill.cache");
    let mut cache = Cache::create(&path, small_config()).expect("cache create");

    let x = vec![b'x'; 3500];
    let y = vec![b'y'; 3500];
    cache.insert("b", &x, 0).expect("first large insert");
    cache.insert("c", &y, 0).expect("second large insert");

    let stats = cache.stats().expect("stats");
    assert_eq!(stats.segments.len(), 2);
    assert_eq!(stats.occupied, 2);

    let mut buf = Vec::new();
    assert!(cache.retrieve("b", 0, &mut buf).expect("retrieve b"));
    assert_eq!(buf, x);
    assert!(cache.retrieve("c", 0, &mut buf).expect("retrieve c"));
    assert_eq!(buf, y);

    cache.destroy().expect("destroy");
}

#[test]
fn single_segment_cache_runs_out_of_space() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("full.cache");
    let config = CacheConfig {
        maxseg: 1,
        ..small_config()
    };
    let mut cache = Cache::create(&path, config).expect("cache create");

    cache.insert("b", &vec![b'x'; 3500], 0).expect("first insert");
    match cache.insert("c", &vec![b'y'; 3500], 0) {
        Err(Error::NoSpace) => {}
        other => panic!("expected NoSpace, got {other:?}"),
    }

    // The failed insert must not have disturbed the existing entry.
    let mut buf = Vec::new();
    assert!(cache.retrieve("b", 0, &mut buf).expect("retrieve"));
    assert_eq!(buf.len(), 3500);
    assert_eq!(cache.entries().expect("entries").len(), 1);

    cache.destroy().expect("destroy");
}

#[test]
fn counters_track_hits_and_misses() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("counters.cache");
    let mut cache = Cache::create(&path, small_config()).expect("cache create");

    let mut buf = Vec::new();
    assert!(!cache.retrieve("absent", 0, &mut buf).expect("miss"));
    cache.insert("a", b"payload", 0).expect("insert");
    assert!(cache.retrieve("a", 0, &mut buf).expect("hit"));

    let stats = cache.stats().expect("stats");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    cache.clear().expect("clear");
    let stats = cache.stats().expect("stats after clear");
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.occupied, 0);
    assert!(!cache.retrieve("a", 0, &mut buf).expect("cleared"));

    cache.destroy().expect("destroy");
}
