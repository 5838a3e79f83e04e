//! Multi-process readers-writer lock built from three counting semaphores.
//!
//! `lock` is the writer mutex (initial 1), `reader` counts active readers
//! (initial 0), `writer` counts pending-or-active writers (initial 0).
//! A pending writer blocks future readers at their wait-for-zero on
//! `writer`, so readers cannot pile in forever once a writer announces
//! itself; writer starvation before that announcement is tolerated.
//!
//! Semaphore operations carry `SEM_UNDO`, so the kernel rolls back the
//! adjustments of a process that dies while holding the lock. That is the
//! only crash recovery on offer; the lock state otherwise survives exactly
//! as long as the semaphores do.

use std::path::Path;

use crate::{sys, Result};

const LOCK_PROJ: i32 = 0x01;
const READER_PROJ: i32 = 0x02;
const WRITER_PROJ: i32 = 0x03;

pub struct RwLock {
    lock: i32,
    reader: i32,
    writer: i32,
}

/// Releases a shared lock on drop.
pub struct ReadGuard<'a> {
    lock: &'a RwLock,
}

/// Releases an exclusive lock on drop.
pub struct WriteGuard<'a> {
    lock: &'a RwLock,
}

impl RwLock {
    /// Creates (or opens) the lock keyed by `path`.
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            lock: sys::sem_create(path, LOCK_PROJ, 1)?,
            reader: sys::sem_create(path, READER_PROJ, 0)?,
            writer: sys::sem_create(path, WRITER_PROJ, 0)?,
        })
    }

    /// Acquires a shared (read) lock.
    pub fn read(&self) -> Result<ReadGuard<'_>> {
        sys::sem_wait_zero(self.writer)?;
        sys::sem_unlock(self.reader)?;
        Ok(ReadGuard { lock: self })
    }

    /// Acquires an exclusive (write) lock.
    pub fn write(&self) -> Result<WriteGuard<'_>> {
        sys::sem_unlock(self.writer)?;
        sys::sem_wait_zero(self.reader)?;
        sys::sem_lock(self.lock)?;
        Ok(WriteGuard { lock: self })
    }

    /// Releases whichever lock the calling process holds.
    ///
    /// A held writer mutex (value <= 0) identifies the holder as a writer;
    /// otherwise a reader is retiring.
    fn unlock(&self) -> Result<()> {
        if sys::sem_value(self.lock)? <= 0 {
            sys::sem_unlock(self.lock)?;
            sys::sem_lock(self.writer)?;
        } else {
            sys::sem_lock(self.reader)?;
        }
        Ok(())
    }

    /// Removes the underlying semaphores. Callers must ensure no process
    /// will touch the lock again.
    pub fn destroy(&self) {
        sys::sem_destroy(self.lock);
        sys::sem_destroy(self.reader);
        sys::sem_destroy(self.writer);
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            log::warn!("read unlock failed: {err}");
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            log::warn!("write unlock failed: {err}");
        }
    }
}
