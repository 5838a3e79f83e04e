//! Per-process table of attached data segments.
//!
//! Shared memory stores `(segment_id, offset)` pairs, never addresses, so
//! every dereference goes through this table to resolve a segment id to the
//! address it happens to be mapped at in this process. Segments attach
//! lazily on first use and stay attached until `detach_all`.

use crate::{sys, Error, Result};

const NUM_SLOTS: usize = 97;

#[derive(Clone, Copy)]
struct Slot {
    shmid: i32,
    addr: *mut u8,
}

const EMPTY_SLOT: Slot = Slot {
    shmid: -1,
    addr: std::ptr::null_mut(),
};

pub struct SegmentRegistry {
    slots: [Slot; NUM_SLOTS],
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self {
            slots: [EMPTY_SLOT; NUM_SLOTS],
        }
    }

    /// Returns the local address of `shmid`, attaching it on first use.
    ///
    /// The table is sized for caches of fewer than 97 data segments;
    /// saturation means the cache was configured past that bound.
    pub fn attach(&mut self, shmid: i32) -> Result<*mut u8> {
        let mut slot = (shmid as usize) % NUM_SLOTS;
        let step = ((shmid % 53) + 1) as usize;

        for _ in 0..NUM_SLOTS {
            if self.slots[slot].shmid == shmid {
                return Ok(self.slots[slot].addr);
            }
            if self.slots[slot].shmid == -1 {
                let addr = sys::shm_attach(shmid)?;
                self.slots[slot] = Slot { shmid, addr };
                return Ok(addr);
            }
            slot = (slot + step) % NUM_SLOTS;
        }
        Err(Error::RegistryFull)
    }

    /// Detaches every mapped segment and clears the table, invalidating all
    /// addresses previously handed out.
    pub fn detach_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.shmid != -1 {
                if let Err(err) = sys::shm_detach(slot.addr) {
                    log::warn!("segment {} detach failed: {err}", slot.shmid);
                }
                *slot = EMPTY_SLOT;
            }
        }
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
