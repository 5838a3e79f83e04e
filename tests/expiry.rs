use std::thread::sleep;
use std::time::Duration;

use shmcache::{Cache, CacheConfig};
use tempfile::tempdir;

fn config() -> CacheConfig {
    CacheConfig {
        nbuckets: 17,
        maxseg: 2,
        segsize: 4096,
        default_ttl: 0,
    }
}

#[test]
fn newer_witness_mtime_invalidates() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("mtime.cache");
    let mut cache = Cache::create(&path, config()).expect("cache create");

    cache.insert("k", b"v", 200).expect("insert");

    let mut buf = Vec::new();
    assert!(cache.retrieve("k", 100, &mut buf).expect("older witness"));
    assert!(cache.retrieve("k", 200, &mut buf).expect("equal witness"));
    assert!(!cache.retrieve("k", 300, &mut buf).expect("newer witness"));

    // Witness 0 skips the mtime comparison entirely.
    assert!(cache.retrieve("k", 0, &mut buf).expect("no witness"));

    cache.destroy().expect("destroy");
}

#[test]
fn entry_ttl_expires_and_slot_is_reclaimed() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("ttl.cache");
    let mut cache = Cache::create(&path, config()).expect("cache create");

    cache
        .insert_with_ttl("k", b"v", 0, 1)
        .expect("insert with ttl");
    let mut buf = Vec::new();
    assert!(cache.retrieve("k", 0, &mut buf).expect("fresh"));

    sleep(Duration::from_secs(2));
    assert!(!cache.retrieve("k", 0, &mut buf).expect("expired"));
    assert!(!cache.search("k").expect("search expired"));

    // The expired entry still occupies its bucket until a writer lands on
    // it; the next insert reclaims the slot in place.
    assert_eq!(cache.entries().expect("entries").len(), 1);
    cache.insert("k", b"fresh", 0).expect("reinsert");
    assert_eq!(cache.entries().expect("entries").len(), 1);
    assert!(cache.retrieve("k", 0, &mut buf).expect("reinserted"));
    assert_eq!(buf, b"fresh");

    cache.destroy().expect("destroy");
}

#[test]
fn default_ttl_applies_to_plain_inserts() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("default-ttl.cache");
    let mut cache = Cache::create(
        &path,
        CacheConfig {
            default_ttl: 1,
            ..config()
        },
    )
    .expect("cache create");

    cache.insert("k", b"v", 0).expect("insert");
    sleep(Duration::from_secs(2));
    let mut buf = Vec::new();
    assert!(!cache.retrieve("k", 0, &mut buf).expect("expired"));

    cache.destroy().expect("destroy");
}

#[test]
fn set_ttl_rewrites_expiry() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("set-ttl.cache");
    let mut cache = Cache::create(&path, config()).expect("cache create");

    cache.insert("k", b"v", 0).expect("insert");
    assert!(cache.set_ttl("k", 1).expect("set ttl"));
    assert!(!cache.set_ttl("absent", 1).expect("missing key"));

    sleep(Duration::from_secs(2));
    let mut buf = Vec::new();
    assert!(!cache.retrieve("k", 0, &mut buf).expect("expired"));

    // TTL 0 on a fresh entry means never expire.
    cache.insert("eternal", b"v", 0).expect("insert");
    assert!(cache.set_ttl("eternal", 0).expect("clear ttl"));
    assert!(cache.search("eternal").expect("still present"));

    cache.destroy().expect("destroy");
}
