//!
//! Mutex Implementation
//!
//! Scripts issue unpaired `lock`/`unlock` calls, so an acquired `MutexGuard`
//! cannot live on the Rust stack between them. Guards are instead parked in
//! thread-local storage, keyed by the mutex's address, and dropped again on
//! `unlock`. The condition variable borrows a parked guard for the duration
//! of a wait.
//!
//! Recursive locking by the same thread is not supported and may deadlock,
//! matching the underlying `std::sync::Mutex`.
//!

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use gale_std_core::{HeapHeader, HeapTag, alloc_object, release_object};
use tracing::warn;

thread_local! {
    static ACTIVE_GUARDS: RefCell<HashMap<usize, MutexGuard<'static, ()>>> =
        RefCell::new(HashMap::new());
}

/// Park an acquired guard for the calling thread.
pub(crate) fn park_guard(key: usize, guard: MutexGuard<'static, ()>) {
    ACTIVE_GUARDS.with(|guards| {
        guards.borrow_mut().insert(key, guard);
    });
}

/// Take back the guard this thread parked for `key`, if any.
pub(crate) fn unpark_guard(key: usize) -> Option<MutexGuard<'static, ()>> {
    ACTIVE_GUARDS.with(|guards| guards.borrow_mut().remove(&key))
}

/// A script-visible mutual-exclusion lock.
#[repr(C)]
pub struct GaleMutex {
    pub header: HeapHeader,
    inner: Mutex<()>,
}

impl GaleMutex {
    fn new() -> Self {
        Self {
            header: HeapHeader::new(HeapTag::Mutex),
            inner: Mutex::new(()),
        }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Block until the lock is acquired, then park the guard for this
    /// thread. A panicking run body must not poison script-visible locks,
    /// so poisoned acquisitions are recovered.
    pub fn lock(&self) {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // The guard is parked until unlock; the object outlives it because
        // unlock/drop runs before the mutex is freed.
        let guard: MutexGuard<'static, ()> = unsafe { std::mem::transmute(guard) };
        park_guard(self.key(), guard);
    }

    /// Release the lock. Returns false (and leaves everything untouched)
    /// when the calling thread does not hold it.
    pub fn unlock(&self) -> bool {
        match unpark_guard(self.key()) {
            Some(guard) => {
                drop(guard);
                true
            }
            None => false,
        }
    }

    /// Attempt to acquire without blocking. True iff acquired, in which
    /// case the guard is parked exactly as for `lock`.
    pub fn try_lock(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => {
                let guard: MutexGuard<'static, ()> = unsafe { std::mem::transmute(guard) };
                park_guard(self.key(), guard);
                true
            }
            Err(_) => false,
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_mutex_new() -> *mut GaleMutex {
    unsafe {
        let ptr = alloc_object::<GaleMutex>();
        std::ptr::write(ptr, GaleMutex::new());
        ptr
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_mutex_incref(m: *mut GaleMutex) {
    if !m.is_null() {
        unsafe { (*m).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_mutex_decref(m: *mut GaleMutex) {
    if !m.is_null() {
        unsafe {
            if (*m).header.decref() {
                release_object(m);
            }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_mutex_lock(m: *mut GaleMutex) {
    if m.is_null() {
        return;
    }
    unsafe { (*m).lock() };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_mutex_unlock(m: *mut GaleMutex) {
    if m.is_null() {
        return;
    }
    if !unsafe { (*m).unlock() } {
        warn!("unlock ignored: calling thread does not hold the mutex");
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_mutex_try_lock(m: *mut GaleMutex) -> i64 {
    if m.is_null() {
        return 0;
    }
    if unsafe { (*m).try_lock() } { 1 } else { 0 }
}
