//! The shared cache index and its public surface.
//!
//! One System V segment holds a `CacheHeader`, a slot table naming the data
//! segments, and a fixed array of `Bucket` descriptors forming an
//! open-addressed double-hashed table. Payload bytes live in separate data
//! segments managed by [`crate::alloc`]. All processes attached to the same
//! cache path see the same index; a single readers-writer lock serializes
//! writers against everyone.
//!
//! # Retrieval tiers
//!
//! The safe path takes the read lock and is always correct. The fast path
//! probes the shared bucket array with no lock at all and validates the hit
//! against the `{segment, offset, length, mtime}` snapshot taken on the
//! last locked read; any disagreement falls back to the safe path. A stale
//! snapshot can therefore cost a false miss but never yields another
//! entry's bytes: writers retire a bucket (store `UNUSED`, then free) or
//! reuse it (publish the segment id last), and either transition flips at
//! least one compared field.
//!
//! # Shared-memory discipline
//!
//! Descriptor fields that lock-free readers may observe are atomics with
//! acquire/release pairs; key bytes are written only while the bucket is
//! retired and re-read through raw copies. Nothing in shared memory is ever
//! a process-local address: buckets name payloads as `(segment_id, offset)`
//! and every dereference resolves through the per-process registry.

use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::ptr::{self, addr_of_mut};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::alloc::{RoundPolicy, Segment, SEGMENT_OVERHEAD};
use crate::clock::{Clock, SystemClock};
use crate::local::{LocalCache, LocalEntry};
use crate::registry::SegmentRegistry;
use crate::rwlock::RwLock;
use crate::{sys, Error, Result};

/// Longest accepted key, sized for filesystem paths.
pub const MAX_KEY_LEN: usize = 256;

const MAGIC_INIT: i32 = 0xC1A5;
const EMPTY: i32 = -1;
const UNUSED: i32 = -2;

// ftok project numbers: the index segment, then one per data segment slot.
// Semaphore keys live in a separate namespace and cannot collide.
const INDEX_PROJ: i32 = 0xCA;
const DATA_PROJ_BASE: i32 = 1;

const MIN_SEGSIZE: i32 = 128;
const MAX_SEGSIZE: i32 = 1 << 30;

#[repr(C)]
struct CacheHeader {
    magic: AtomicI32,
    nbuckets: i32,
    maxseg: i32,
    segsize: i32,
    default_ttl: i32,
    hits: AtomicI32,
    misses: AtomicI32,
}

#[repr(C)]
struct SegmentSlot {
    // 0 means the slot has no segment yet; ids of segments this crate
    // creates are never 0 because the slot array starts zeroed.
    shmid: AtomicI32,
}

#[repr(C)]
struct Bucket {
    key: [u8; MAX_KEY_LEN + 1],
    shmid: AtomicI32,
    offset: AtomicI32,
    length: AtomicI32,
    hit_count: AtomicI32,
    ttl: AtomicI32,
    checksum: AtomicU32,
    last_access: AtomicI64,
    create_time: AtomicI64,
    mtime: AtomicI64,
}

/// The descriptor fields a retrieval needs after its probe.
#[derive(Clone, Copy)]
struct Descriptor {
    shmid: i32,
    offset: i32,
    length: i32,
    mtime: i64,
    checksum: u32,
}

/// Geometry and default expiry of a cache, fixed at first creation.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub nbuckets: i32,
    pub maxseg: i32,
    pub segsize: i32,
    /// Default entry time-to-live in seconds; 0 means never expire.
    pub default_ttl: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            nbuckets: 1031,
            maxseg: 8,
            segsize: 8 * 1024 * 1024,
            default_ttl: 0,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.nbuckets < 1 {
            return Err(Error::Unsupported("cache needs at least one bucket"));
        }
        if self.maxseg < 1 || self.maxseg > 96 {
            return Err(Error::Unsupported("segment count must be in 1..=96"));
        }
        if self.segsize < MIN_SEGSIZE {
            return Err(Error::Unsupported("segment size too small"));
        }
        // Sizes and offsets are signed 32-bit; capping at 1 GiB keeps the
        // allocator's size arithmetic clear of the sign bit.
        if self.segsize > MAX_SEGSIZE {
            return Err(Error::Unsupported("segment size too large"));
        }
        if self.default_ttl < 0 {
            return Err(Error::Unsupported("default ttl must be non-negative"));
        }
        Ok(())
    }
}

/// Which retrieval tier `retrieve` uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalMode {
    Safe,
    Fast,
}

#[derive(Clone, Copy, Debug)]
pub struct SegmentStats {
    pub shmid: i32,
    pub total: i32,
    pub avail: i32,
}

#[derive(Clone, Debug)]
pub struct CacheStats {
    pub nbuckets: i32,
    pub maxseg: i32,
    pub segsize: i32,
    pub default_ttl: i32,
    pub hits: i32,
    pub misses: i32,
    pub occupied: i32,
    pub segments: Vec<SegmentStats>,
}

/// Metadata of one occupied bucket, as reported by [`Cache::entries`].
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub key: String,
    pub length: i32,
    pub hit_count: i32,
    pub ttl: i32,
    pub last_access: i64,
    pub create_time: i64,
    pub mtime: i64,
}

/// A process-local handle onto a shared cache.
///
/// The handle itself is single-threaded state (registry, snapshots, mode);
/// cross-process coordination happens entirely through the shared segment
/// and the lock. Embedding the cache in a threaded runtime requires
/// serializing entry per process.
pub struct Cache<C: Clock = SystemClock> {
    path: PathBuf,
    lock: RwLock,
    shmid: i32,
    base: *mut u8,
    nbuckets: i32,
    maxseg: i32,
    segsize: i32,
    default_ttl: i32,
    buckets_offset: usize,
    registry: SegmentRegistry,
    local: LocalCache,
    mode: RetrievalMode,
    clock: C,
    detached: bool,
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

fn slots_offset() -> usize {
    size_of::<CacheHeader>()
}

fn buckets_offset(maxseg: i32) -> usize {
    align8(slots_offset() + maxseg as usize * size_of::<SegmentSlot>())
}

fn index_size(nbuckets: i32, maxseg: i32) -> usize {
    buckets_offset(maxseg) + nbuckets as usize * size_of::<Bucket>()
}

fn hash_one(key: &[u8]) -> u32 {
    key.iter()
        .fold(0u32, |h, &c| h.wrapping_mul(127).wrapping_add(c as u32))
}

fn hash_two(key: &[u8]) -> u32 {
    let h = key
        .iter()
        .fold(0u32, |h, &c| h.wrapping_mul(37).wrapping_add(c as u32));
    h % 97 + 1
}

/// Validates a caller key. `Ok(None)` marks the empty key, which every
/// operation treats as a routine miss / no-op.
fn check_key(key: &str) -> Result<Option<&[u8]>> {
    if key.is_empty() {
        return Ok(None);
    }
    let bytes = key.as_bytes();
    if bytes.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey("longer than 256 bytes"));
    }
    if bytes.contains(&0) {
        return Err(Error::InvalidKey("contains a NUL byte"));
    }
    Ok(Some(bytes))
}

/// Full-equality match against the stored NUL-terminated key.
fn key_matches(bucket: &Bucket, key: &[u8]) -> bool {
    bucket.key[key.len()] == 0 && &bucket.key[..key.len()] == key
}

fn is_expired(bucket: &Bucket, witness_mtime: i64, now: i64) -> bool {
    let ttl = bucket.ttl.load(Ordering::Acquire);
    if ttl != 0 && now > bucket.create_time.load(Ordering::Acquire) + ttl as i64 {
        return true;
    }
    witness_mtime > bucket.mtime.load(Ordering::Acquire)
}

fn read_descriptor(bucket: &Bucket) -> Descriptor {
    Descriptor {
        shmid: bucket.shmid.load(Ordering::Acquire),
        offset: bucket.offset.load(Ordering::Acquire),
        length: bucket.length.load(Ordering::Acquire),
        mtime: bucket.mtime.load(Ordering::Acquire),
        checksum: bucket.checksum.load(Ordering::Acquire),
    }
}

fn crc32(payload: &[u8]) -> u32 {
    use crc32fast::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn copy_payload(segment: Segment, desc: &Descriptor, buf: &mut Vec<u8>) {
    buf.clear();
    let len = desc.length as usize;
    buf.reserve(len);
    unsafe {
        ptr::copy_nonoverlapping(segment.data_ptr(desc.offset), buf.as_mut_ptr(), len);
        buf.set_len(len);
    }
}

fn ensure_key_file(path: &Path) -> Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(())
}

impl Cache<SystemClock> {
    /// Creates or attaches the cache keyed by `path`.
    ///
    /// The first process to arrive initializes the shared index under the
    /// write lock (double-checked against the magic sentinel); everyone
    /// else attaches to the existing state. A sentinel that is neither the
    /// zero fill of a fresh segment nor the published value fails with
    /// `Error::Integrity` rather than re-initializing over a scribbled
    /// region. The index segment is marked for removal immediately, so it
    /// disappears once the last process detaches.
    pub fn create(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        Self::create_with_clock(path, config, SystemClock)
    }
}

impl<C: Clock> Cache<C> {
    /// Like [`Cache::create`] with a caller-chosen clock source.
    pub fn create_with_clock(path: impl AsRef<Path>, config: CacheConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        ensure_key_file(&path)?;

        let lock = RwLock::create(&path)?;
        let shmid = sys::shm_create(&path, INDEX_PROJ, index_size(config.nbuckets, config.maxseg))?;
        let base = sys::shm_attach(shmid)?;

        let cache = Self {
            path,
            lock,
            shmid,
            base,
            nbuckets: config.nbuckets,
            maxseg: config.maxseg,
            segsize: config.segsize,
            default_ttl: config.default_ttl,
            buckets_offset: buckets_offset(config.maxseg),
            registry: SegmentRegistry::new(),
            local: LocalCache::new(),
            mode: RetrievalMode::Safe,
            clock,
            detached: false,
        };

        if cache.header().magic.load(Ordering::Acquire) != MAGIC_INIT {
            let guard = cache.lock.write()?;
            let magic = cache.header().magic.load(Ordering::Acquire);
            if magic != MAGIC_INIT {
                // A fresh System V segment is zero-filled; any other value
                // in the sentinel means the region was scribbled on.
                if magic != 0 {
                    return Err(Error::Integrity("index magic is neither zero nor the sentinel"));
                }
                log::debug!(
                    "initializing cache at {:?}: {} buckets, {} segments of {} bytes",
                    cache.path,
                    cache.nbuckets,
                    cache.maxseg,
                    cache.segsize
                );
                cache.init_index();
            }
            drop(guard);
        }

        let header = cache.header();
        if header.nbuckets != cache.nbuckets
            || header.maxseg != cache.maxseg
            || header.segsize != cache.segsize
        {
            return Err(Error::Unsupported("existing cache has different geometry"));
        }
        Ok(cache)
    }

    /// Writes a fresh header and bucket array. Caller holds the write lock.
    ///
    /// The magic field is touched only by its atomic store at the end, so a
    /// process probing it outside the lock sees either the zero fill of a
    /// fresh segment or the fully published header, never a torn value.
    fn init_index(&self) {
        let size = index_size(self.nbuckets, self.maxseg);
        unsafe {
            ptr::write_bytes(self.base.add(4), 0, size - 4);
            let header = self.base as *mut CacheHeader;
            addr_of_mut!((*header).nbuckets).write(self.nbuckets);
            addr_of_mut!((*header).maxseg).write(self.maxseg);
            addr_of_mut!((*header).segsize).write(self.segsize);
            addr_of_mut!((*header).default_ttl).write(self.default_ttl);
        }
        for i in 0..self.nbuckets {
            self.bucket(i).shmid.store(EMPTY, Ordering::Relaxed);
        }
        self.header().magic.store(MAGIC_INIT, Ordering::Release);
    }

    /// Tears the cache down for every process: destroys all data segments,
    /// the index segment, and the lock. Other handles still attached keep
    /// their mappings until they detach, per System V removal semantics.
    pub fn destroy(mut self) -> Result<()> {
        {
            let guard = self.lock.write()?;
            for i in 0..self.maxseg {
                let shmid = self.slot(i).shmid.load(Ordering::Acquire);
                if shmid != 0 {
                    sys::shm_destroy(shmid);
                }
            }
            drop(guard);
        }
        self.detach();
        sys::shm_destroy(self.shmid);
        self.lock.destroy();
        Ok(())
    }

    /// Drops every entry, resets every data segment's free list, and zeros
    /// the hit/miss counters.
    pub fn clear(&mut self) -> Result<()> {
        let guard = self.lock.write()?;
        for i in 0..self.nbuckets {
            let (shmid, offset) = {
                let bucket = self.bucket(i);
                (
                    bucket.shmid.load(Ordering::Acquire),
                    bucket.offset.load(Ordering::Acquire),
                )
            };
            if shmid >= 0 {
                let base = self.registry.attach(shmid)?;
                unsafe { Segment::from_raw(base) }.deallocate(offset);
            }
            self.bucket(i).shmid.store(EMPTY, Ordering::Release);
        }
        for i in 0..self.maxseg {
            let shmid = self.slot(i).shmid.load(Ordering::Acquire);
            if shmid == 0 {
                break;
            }
            let base = self.registry.attach(shmid)?;
            unsafe { Segment::from_raw(base) }.init(self.segsize);
        }
        self.header().hits.store(0, Ordering::Release);
        self.header().misses.store(0, Ordering::Release);
        drop(guard);
        self.local.clear();
        Ok(())
    }

    /// Returns whether an unexpired entry for `key` exists. Does not touch
    /// the hit/miss counters.
    pub fn search(&self, key: &str) -> Result<bool> {
        let Some(key_bytes) = check_key(key)? else {
            return Ok(false);
        };
        let now = self.clock.now();
        let _guard = self.lock.read()?;
        let Some(slot) = self.probe_lookup(key_bytes) else {
            return Ok(false);
        };
        Ok(!is_expired(self.bucket(slot), 0, now))
    }

    /// Copies the payload stored under `key` into `buf`, growing it as
    /// needed, and returns whether the entry was found.
    ///
    /// `witness_mtime` is the source artifact's modification time; an entry
    /// inserted before that time counts as stale. Pass 0 when retrieval is
    /// purely by key.
    pub fn retrieve(&mut self, key: &str, witness_mtime: i64, buf: &mut Vec<u8>) -> Result<bool> {
        if check_key(key)?.is_none() {
            return Ok(false);
        }
        match self.mode {
            RetrievalMode::Safe => self.retrieve_safe(key, witness_mtime, buf),
            RetrievalMode::Fast => self.retrieve_fast(key, witness_mtime, buf),
        }
    }

    fn retrieve_safe(&mut self, key: &str, witness_mtime: i64, buf: &mut Vec<u8>) -> Result<bool> {
        let now = self.clock.now();
        let guard = self.lock.read()?;
        let Some(slot) = self.probe_lookup(key.as_bytes()) else {
            self.header().misses.fetch_add(1, Ordering::AcqRel);
            return Ok(false);
        };
        let desc = {
            let bucket = self.bucket(slot);
            if is_expired(bucket, witness_mtime, now) {
                self.header().misses.fetch_add(1, Ordering::AcqRel);
                return Ok(false);
            }
            read_descriptor(bucket)
        };
        let base = self.registry.attach(desc.shmid)?;
        copy_payload(unsafe { Segment::from_raw(base) }, &desc, buf);
        if cfg!(feature = "checksum") && crc32(buf) != desc.checksum {
            log::error!("checksum mismatch for key {key:?}, length {}", desc.length);
            self.header().misses.fetch_add(1, Ordering::AcqRel);
            return Ok(false);
        }
        {
            let bucket = self.bucket(slot);
            bucket.hit_count.fetch_add(1, Ordering::AcqRel);
            bucket.last_access.store(now, Ordering::Release);
        }
        self.header().hits.fetch_add(1, Ordering::AcqRel);
        drop(guard);

        if self.mode == RetrievalMode::Fast {
            self.local.insert(
                key,
                LocalEntry {
                    shmid: desc.shmid,
                    offset: desc.offset,
                    length: desc.length,
                    mtime: desc.mtime,
                },
            );
        }
        Ok(true)
    }

    /// Lock-free retrieval. Correct hits require the shared descriptor to
    /// agree with the snapshot from the last locked read; anything else
    /// falls back to [`Self::retrieve_safe`], which refreshes the snapshot.
    /// Counters and access stamps are left alone to keep the path free of
    /// shared-memory contention.
    fn retrieve_fast(&mut self, key: &str, witness_mtime: i64, buf: &mut Vec<u8>) -> Result<bool> {
        let now = self.clock.now();
        let Some(slot) = self.probe_lookup(key.as_bytes()) else {
            return Ok(false);
        };
        let desc = {
            let bucket = self.bucket(slot);
            if is_expired(bucket, witness_mtime, now) {
                return Ok(false);
            }
            read_descriptor(bucket)
        };
        let snapshot = LocalEntry {
            shmid: desc.shmid,
            offset: desc.offset,
            length: desc.length,
            mtime: desc.mtime,
        };
        if self.local.get(key) != Some(snapshot) {
            return self.retrieve_safe(key, witness_mtime, buf);
        }
        let base = self.registry.attach(desc.shmid)?;
        copy_payload(unsafe { Segment::from_raw(base) }, &desc, buf);
        if cfg!(feature = "checksum") && crc32(buf) != desc.checksum {
            // A writer raced the copy; the locked path settles it.
            return self.retrieve_safe(key, witness_mtime, buf);
        }
        Ok(true)
    }

    /// Stores `data` under `key` with the cache's default time-to-live.
    pub fn insert(&mut self, key: &str, data: &[u8], mtime: i64) -> Result<()> {
        self.insert_entry(key, data, mtime, None)
    }

    /// Stores `data` under `key` with a per-entry time-to-live in seconds
    /// (0 means never expire).
    pub fn insert_with_ttl(&mut self, key: &str, data: &[u8], mtime: i64, ttl: i32) -> Result<()> {
        self.insert_entry(key, data, mtime, Some(ttl))
    }

    fn insert_entry(
        &mut self,
        key: &str,
        data: &[u8],
        mtime: i64,
        ttl: Option<i32>,
    ) -> Result<()> {
        let Some(key_bytes) = check_key(key)? else {
            return Ok(());
        };
        if data.len() > (self.segsize - SEGMENT_OVERHEAD) as usize {
            return Err(Error::NoSpace);
        }
        let length = data.len() as i32;
        let checksum = if cfg!(feature = "checksum") { crc32(data) } else { 0 };
        let now = self.clock.now();

        let guard = self.lock.write()?;
        let Some((slot, reuse)) = self.probe_insert(key_bytes, now) else {
            return Err(Error::CacheFull);
        };

        // Space for the new payload is claimed before the old entry is
        // touched, so a failed insert leaves the index unchanged.
        let mut placed = None;
        for i in 0..self.maxseg {
            let mut shmid = self.slot(i).shmid.load(Ordering::Acquire);
            if shmid == 0 {
                shmid = sys::shm_create(&self.path, DATA_PROJ_BASE + i, self.segsize as usize)?;
                let base = self.registry.attach(shmid)?;
                unsafe { Segment::from_raw(base) }.init(self.segsize);
                self.slot(i).shmid.store(shmid, Ordering::Release);
            }
            let base = self.registry.attach(shmid)?;
            let segment = unsafe { Segment::from_raw(base) };
            if let Some(offset) = segment.allocate(length, RoundPolicy::Pow2) {
                placed = Some((shmid, segment, offset));
                break;
            }
        }
        let Some((seg_shmid, segment, offset)) = placed else {
            return Err(Error::NoSpace);
        };
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), segment.data_ptr(offset), data.len());
        }

        if reuse {
            let (old_shmid, old_offset) = {
                let bucket = self.bucket(slot);
                (
                    bucket.shmid.load(Ordering::Acquire),
                    bucket.offset.load(Ordering::Acquire),
                )
            };
            self.bucket(slot).shmid.store(UNUSED, Ordering::Release);
            let base = self.registry.attach(old_shmid)?;
            unsafe { Segment::from_raw(base) }.deallocate(old_offset);
        }

        self.store_key(slot, key_bytes);
        {
            let bucket = self.bucket(slot);
            bucket.offset.store(offset, Ordering::Release);
            bucket.length.store(length, Ordering::Release);
            bucket.hit_count.store(0, Ordering::Release);
            bucket.checksum.store(checksum, Ordering::Release);
            bucket.ttl.store(ttl.unwrap_or(self.default_ttl), Ordering::Release);
            bucket.last_access.store(now, Ordering::Release);
            bucket.create_time.store(now, Ordering::Release);
            bucket.mtime.store(mtime, Ordering::Release);
            bucket.shmid.store(seg_shmid, Ordering::Release);
        }
        drop(guard);
        Ok(())
    }

    /// Removes the entry under `key`, freeing its payload. Returns whether
    /// an entry (expired or not) was present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let Some(key_bytes) = check_key(key)? else {
            return Ok(false);
        };
        let guard = self.lock.write()?;
        let Some(slot) = self.probe_lookup(key_bytes) else {
            return Ok(false);
        };
        let (shmid, offset) = {
            let bucket = self.bucket(slot);
            (
                bucket.shmid.load(Ordering::Acquire),
                bucket.offset.load(Ordering::Acquire),
            )
        };
        self.bucket(slot).shmid.store(UNUSED, Ordering::Release);
        let base = self.registry.attach(shmid)?;
        unsafe { Segment::from_raw(base) }.deallocate(offset);
        drop(guard);
        self.local.remove(key);
        Ok(true)
    }

    /// Rewrites the per-entry time-to-live. Returns whether the key was
    /// present.
    pub fn set_ttl(&mut self, key: &str, ttl: i32) -> Result<bool> {
        let Some(key_bytes) = check_key(key)? else {
            return Ok(false);
        };
        let _guard = self.lock.write()?;
        let Some(slot) = self.probe_lookup(key_bytes) else {
            return Ok(false);
        };
        self.bucket(slot).ttl.store(ttl, Ordering::Release);
        Ok(true)
    }

    /// Selects the retrieval tier for subsequent [`Cache::retrieve`] calls.
    pub fn set_mode(&mut self, mode: RetrievalMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Header counters, occupancy, and per-segment memory accounting.
    pub fn stats(&mut self) -> Result<CacheStats> {
        let guard = self.lock.read()?;
        let mut occupied = 0;
        for i in 0..self.nbuckets {
            if self.bucket(i).shmid.load(Ordering::Acquire) >= 0 {
                occupied += 1;
            }
        }
        let mut segments = Vec::new();
        for i in 0..self.maxseg {
            let shmid = self.slot(i).shmid.load(Ordering::Acquire);
            if shmid == 0 {
                break;
            }
            let base = self.registry.attach(shmid)?;
            let (total, avail) = unsafe { Segment::from_raw(base) }.memory_info();
            segments.push(SegmentStats { shmid, total, avail });
        }
        let header = self.header();
        let stats = CacheStats {
            nbuckets: self.nbuckets,
            maxseg: self.maxseg,
            segsize: self.segsize,
            default_ttl: self.default_ttl,
            hits: header.hits.load(Ordering::Acquire),
            misses: header.misses.load(Ordering::Acquire),
            occupied,
            segments,
        };
        drop(guard);
        Ok(stats)
    }

    /// Metadata for every occupied bucket, expired entries included.
    pub fn entries(&self) -> Result<Vec<EntryInfo>> {
        let _guard = self.lock.read()?;
        let mut out = Vec::new();
        for i in 0..self.nbuckets {
            let bucket = self.bucket(i);
            if bucket.shmid.load(Ordering::Acquire) < 0 {
                continue;
            }
            let len = bucket
                .key
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(MAX_KEY_LEN);
            out.push(EntryInfo {
                key: String::from_utf8_lossy(&bucket.key[..len]).into_owned(),
                length: bucket.length.load(Ordering::Acquire),
                hit_count: bucket.hit_count.load(Ordering::Acquire),
                ttl: bucket.ttl.load(Ordering::Acquire),
                last_access: bucket.last_access.load(Ordering::Acquire),
                create_time: bucket.create_time.load(Ordering::Acquire),
                mtime: bucket.mtime.load(Ordering::Acquire),
            });
        }
        Ok(out)
    }

    fn header(&self) -> &CacheHeader {
        unsafe { &*(self.base as *const CacheHeader) }
    }

    fn slot(&self, index: i32) -> &SegmentSlot {
        let offset = slots_offset() + index as usize * size_of::<SegmentSlot>();
        unsafe { &*(self.base.add(offset) as *const SegmentSlot) }
    }

    fn bucket_ptr(&self, index: i32) -> *mut Bucket {
        let offset = self.buckets_offset + index as usize * size_of::<Bucket>();
        unsafe { self.base.add(offset) as *mut Bucket }
    }

    fn bucket(&self, index: i32) -> &Bucket {
        unsafe { &*self.bucket_ptr(index) }
    }

    fn store_key(&self, slot: i32, key: &[u8]) {
        let bucket = self.bucket_ptr(slot);
        unsafe {
            let dst = addr_of_mut!((*bucket).key) as *mut u8;
            ptr::copy_nonoverlapping(key.as_ptr(), dst, key.len());
            dst.add(key.len()).write(0);
        }
    }

    fn probe(&self, key: &[u8]) -> (i32, i32) {
        let slot = (hash_one(key) % self.nbuckets as u32) as i32;
        let mut step = (hash_two(key) % self.nbuckets as u32) as i32;
        if step == 0 {
            step = 1;
        }
        (slot, step)
    }

    /// Probes for an existing entry. `EMPTY` ends the chain, `UNUSED`
    /// tombstones are skipped, and at most `nbuckets` buckets are visited.
    fn probe_lookup(&self, key: &[u8]) -> Option<i32> {
        let (mut slot, step) = self.probe(key);
        for _ in 0..self.nbuckets {
            let bucket = self.bucket(slot);
            let shmid = bucket.shmid.load(Ordering::Acquire);
            if shmid == EMPTY {
                return None;
            }
            if shmid != UNUSED && key_matches(bucket, key) {
                return Some(slot);
            }
            slot = (slot + step) % self.nbuckets;
        }
        None
    }

    /// Probes for a slot an insert may take: the first free or tombstoned
    /// bucket, the entry already holding this key, or an expired entry.
    /// The `bool` reports whether an old payload must be retired.
    fn probe_insert(&self, key: &[u8], now: i64) -> Option<(i32, bool)> {
        let (mut slot, step) = self.probe(key);
        for _ in 0..self.nbuckets {
            let bucket = self.bucket(slot);
            if bucket.shmid.load(Ordering::Acquire) < 0 {
                return Some((slot, false));
            }
            if key_matches(bucket, key) || is_expired(bucket, 0, now) {
                return Some((slot, true));
            }
            slot = (slot + step) % self.nbuckets;
        }
        None
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.registry.detach_all();
        if let Err(err) = sys::shm_detach(self.base) {
            log::warn!("index segment detach failed: {err}");
        }
        self.local.clear();
    }
}

impl<C: Clock> Drop for Cache<C> {
    fn drop(&mut self) {
        self.detach();
    }
}
