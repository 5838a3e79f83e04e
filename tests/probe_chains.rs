use shmcache::{Cache, CacheConfig, Error};
use tempfile::tempdir;

const NBUCKETS: u32 = 17;

fn config() -> CacheConfig {
    CacheConfig {
        nbuckets: NBUCKETS as i32,
        maxseg: 2,
        segsize: 8192,
        default_ttl: 0,
    }
}

fn slot_of(key: &str) -> u32 {
    let h = key
        .as_bytes()
        .iter()
        .fold(0u32, |h, &c| h.wrapping_mul(127).wrapping_add(c as u32));
    h % NBUCKETS
}

/// Generates `n` distinct keys that all hash to the same initial slot.
fn colliding_keys(n: usize) -> Vec<String> {
    let target = slot_of("collide-0");
    let mut keys = Vec::new();
    let mut i = 0u64;
    while keys.len() < n {
        let candidate = format!("collide-{i}");
        if slot_of(&candidate) == target {
            keys.push(candidate);
        }
        i += 1;
    }
    keys
}

#[test]
fn chain_fills_every_bucket_then_reports_full() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("chains.cache");
    let mut cache = Cache::create(&path, config()).expect("cache create");

    let keys = colliding_keys(NBUCKETS as usize + 1);
    for key in &keys[..NBUCKETS as usize] {
        cache.insert(key, key.as_bytes(), 0).expect("chain insert");
    }
    assert_eq!(cache.entries().expect("entries").len(), NBUCKETS as usize);

    match cache.insert(&keys[NBUCKETS as usize], b"overflow", 0) {
        Err(Error::CacheFull) => {}
        other => panic!("expected CacheFull, got {other:?}"),
    }

    // Every chained entry is still reachable.
    let mut buf = Vec::new();
    for key in &keys[..NBUCKETS as usize] {
        assert!(cache.retrieve(key, 0, &mut buf).expect("retrieve"));
        assert_eq!(buf, key.as_bytes());
    }

    cache.destroy().expect("destroy");
}

#[test]
fn tombstones_are_skipped_but_reusable() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tombstone.cache");
    let mut cache = Cache::create(&path, config()).expect("cache create");

    let keys = colliding_keys(3);
    cache.insert(&keys[0], b"first", 0).expect("insert first");
    cache.insert(&keys[1], b"second", 0).expect("insert second");

    // Removing the head of the chain must not cut off the entry behind it.
    assert!(cache.remove(&keys[0]).expect("remove"));
    let mut buf = Vec::new();
    assert!(cache.retrieve(&keys[1], 0, &mut buf).expect("behind tombstone"));
    assert_eq!(buf, b"second");

    // A later insert may land on the tombstone instead of extending the
    // chain, and both entries stay reachable.
    cache.insert(&keys[2], b"third", 0).expect("reuse tombstone");
    assert!(cache.retrieve(&keys[1], 0, &mut buf).expect("second intact"));
    assert!(cache.retrieve(&keys[2], 0, &mut buf).expect("third found"));
    assert_eq!(cache.entries().expect("entries").len(), 2);

    cache.destroy().expect("destroy");
}

#[test]
fn stored_keys_never_match_on_prefix() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("prefix.cache");
    // One bucket forces every key onto the same slot.
    let config = CacheConfig {
        nbuckets: 1,
        maxseg: 1,
        segsize: 4096,
        default_ttl: 0,
    };
    let mut cache = Cache::create(&path, config).expect("cache create");

    cache.insert("abcd", b"payload", 0).expect("insert");

    let mut buf = Vec::new();
    assert!(!cache.search("ab").expect("prefix search"));
    assert!(!cache.retrieve("ab", 0, &mut buf).expect("prefix retrieve"));
    assert!(!cache.remove("ab").expect("prefix remove"));
    assert!(cache.search("abcd").expect("exact search"));

    cache.destroy().expect("destroy");
}
