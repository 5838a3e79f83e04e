//! Thin wrappers over the System V IPC primitives the cache is built on.
//!
//! Segments and semaphores are keyed by `ftok(path, proj)`, so every
//! resource belonging to one cache derives from the cache's key file plus a
//! small project number. Errors surface as `Error::Io` carrying the errno;
//! callers decide whether a failure is fatal.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use crate::{Error, Result};

fn path_key(path: &Path, proj: i32) -> Result<libc::key_t> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::Unsupported("cache path contains null byte"))?;
    let key = unsafe { libc::ftok(cpath.as_ptr(), proj) };
    if key == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(key)
}

/// Creates (or opens) the shared memory segment keyed by `path` + `proj`.
pub fn shm_create(path: &Path, proj: i32, size: usize) -> Result<i32> {
    let key = path_key(path, proj)?;
    let shmid = unsafe { libc::shmget(key, size, libc::IPC_CREAT | 0o666) };
    if shmid < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(shmid)
}

/// Attaches `shmid` into this process and marks the segment for removal.
///
/// The removal mark is deliberate and immediate: the kernel defers actual
/// destruction until the last attached process detaches, so the segment
/// cannot outlive its users as an orphan. Linux still permits further
/// `shmat` calls on a segment marked for removal, which is what lets
/// late-starting workers reach data segments recorded in the index.
pub fn shm_attach(shmid: i32) -> Result<*mut u8> {
    let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    shm_destroy(shmid);
    Ok(addr as *mut u8)
}

pub fn shm_detach(addr: *mut u8) -> Result<()> {
    let rc = unsafe { libc::shmdt(addr as *const libc::c_void) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Marks `shmid` for removal. Failure is expected (the segment is usually
/// already marked) and ignored.
pub fn shm_destroy(shmid: i32) {
    unsafe {
        libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut());
    }
}

/// Creates (or opens) the counting semaphore keyed by `path` + `proj`.
///
/// The initial value is written only by the process that wins the exclusive
/// create; later openers observe whatever the semaphore has become. The
/// window between create and the initial `SETVAL` is benign under the
/// create-before-fork model the cache assumes.
pub fn sem_create(path: &Path, proj: i32, initial: i32) -> Result<i32> {
    let key = path_key(path, proj)?;
    let semid = unsafe { libc::semget(key, 1, libc::IPC_CREAT | libc::IPC_EXCL | 0o666) };
    if semid >= 0 {
        let rc = unsafe { libc::semctl(semid, 0, libc::SETVAL, initial) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        return Ok(semid);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EEXIST) {
        return Err(Error::Io(err));
    }
    let semid = unsafe { libc::semget(key, 1, 0) };
    if semid < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(semid)
}

fn sem_op(semid: i32, op: i16, flags: i16) -> Result<()> {
    let mut buf = libc::sembuf {
        sem_num: 0,
        sem_op: op,
        sem_flg: flags,
    };
    loop {
        let rc = unsafe { libc::semop(semid, &mut buf, 1) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(Error::Io(err));
    }
}

/// Decrements the semaphore, blocking while its value is zero.
pub fn sem_lock(semid: i32) -> Result<()> {
    sem_op(semid, -1, libc::SEM_UNDO as i16)
}

/// Increments the semaphore.
pub fn sem_unlock(semid: i32) -> Result<()> {
    sem_op(semid, 1, libc::SEM_UNDO as i16)
}

/// Blocks until the semaphore's value is zero.
pub fn sem_wait_zero(semid: i32) -> Result<()> {
    sem_op(semid, 0, 0)
}

pub fn sem_value(semid: i32) -> Result<i32> {
    let value = unsafe { libc::semctl(semid, 0, libc::GETVAL) };
    if value < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(value)
}

/// Removes the semaphore. Failure is expected on double-destroy and ignored.
pub fn sem_destroy(semid: i32) {
    unsafe {
        libc::semctl(semid, 0, libc::IPC_RMID);
    }
}
