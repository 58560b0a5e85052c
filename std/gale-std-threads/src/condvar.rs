//!
//! Condition Variable Implementation
//!
//! Wraps `std::sync::Condvar`. A condition variable is paired with a mutex
//! only for the duration of a wait: the caller's parked guard is taken out
//! of thread-local storage, handed to the native wait (which atomically
//! releases and reacquires the lock), and parked again before returning.
//!
//! Spurious wakeups are possible. Callers must re-check their predicate in
//! a loop; nothing here enforces that discipline.
//!
//! A condition variable binds to the first mutex it waits with and stays
//! bound for its lifetime: `std::sync::Condvar` panics when waited on with
//! two different mutexes, so a wait against a different mutex is reported
//! and ignored like other misuse instead of taking the process down.
//!
//! Unlike the historical backends, `timed_wait` is a real bounded wait.
//!

use std::sync::Condvar;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gale_std_core::{HeapHeader, HeapTag, alloc_object, release_object};
use tracing::warn;

use crate::mutex::{GaleMutex, park_guard, unpark_guard};

/// A script-visible condition variable. Holds no permanent reference to
/// any mutex.
#[repr(C)]
pub struct GaleCondVar {
    pub header: HeapHeader,
    inner: Condvar,
    bound: AtomicUsize,
}

impl GaleCondVar {
    fn new() -> Self {
        Self {
            header: HeapHeader::new(HeapTag::CondVar),
            inner: Condvar::new(),
            bound: AtomicUsize::new(0),
        }
    }

    /// Bind to the mutex on first wait; true iff `key` is that mutex.
    fn bind(&self, key: usize) -> bool {
        match self
            .bound
            .compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == key,
        }
    }

    /// Suspend until signalled or woken spuriously. The caller must hold
    /// `mutex`; waiting without it is reported and ignored. Returns true
    /// iff an actual wait happened.
    pub fn wait(&self, mutex: &GaleMutex) -> bool {
        let key = mutex as *const GaleMutex as usize;
        let Some(guard) = unpark_guard(key) else {
            warn!("wait ignored: calling thread does not hold the mutex");
            return false;
        };
        if !self.bind(key) {
            park_guard(key, guard);
            warn!("wait ignored: condition variable is bound to a different mutex");
            return false;
        }
        let guard = self.inner.wait(guard).unwrap_or_else(|e| e.into_inner());
        park_guard(key, guard);
        true
    }

    /// Bounded wait. Returns false iff the timeout elapsed without a
    /// wakeup; the mutex is reacquired before returning either way.
    /// Negative or NaN timeouts behave as a zero timeout.
    pub fn timed_wait(&self, mutex: &GaleMutex, timeout_seconds: f64) -> bool {
        let key = mutex as *const GaleMutex as usize;
        let Some(guard) = unpark_guard(key) else {
            warn!("timed wait ignored: calling thread does not hold the mutex");
            return false;
        };
        if !self.bind(key) {
            park_guard(key, guard);
            warn!("timed wait ignored: condition variable is bound to a different mutex");
            return false;
        }

        let timeout = Duration::try_from_secs_f64(timeout_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        let (guard, result) = self
            .inner
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|e| e.into_inner());
        park_guard(key, guard);
        !result.timed_out()
    }

    /// Wake at least one current waiter, if any. No fairness or selection
    /// guarantee; a waiter arriving after this call is not woken by it.
    pub fn signal(&self) {
        self.inner.notify_one();
    }

    /// Wake all current waiters, if any.
    pub fn broadcast(&self) {
        self.inner.notify_all();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_condvar_new() -> *mut GaleCondVar {
    unsafe {
        let ptr = alloc_object::<GaleCondVar>();
        std::ptr::write(ptr, GaleCondVar::new());
        ptr
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_incref(cv: *mut GaleCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_decref(cv: *mut GaleCondVar) {
    if !cv.is_null() {
        unsafe {
            if (*cv).header.decref() {
                release_object(cv);
            }
        }
    }
}

/// Historical backends required pairing a condition variable with a mutex
/// up front. Kept for binding compatibility; has no effect.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_init(_cv: *mut GaleCondVar, _m: *mut GaleMutex) {}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_wait(cv: *mut GaleCondVar, m: *mut GaleMutex) {
    if cv.is_null() || m.is_null() {
        return;
    }
    unsafe { (*cv).wait(&*m) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_timed_wait(
    cv: *mut GaleCondVar,
    m: *mut GaleMutex,
    timeout_seconds: f64,
) -> i64 {
    if cv.is_null() || m.is_null() {
        return 0;
    }
    if unsafe { (*cv).timed_wait(&*m, timeout_seconds) } { 1 } else { 0 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_signal(cv: *mut GaleCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).signal() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_condvar_broadcast(cv: *mut GaleCondVar) {
    if !cv.is_null() {
        unsafe { (*cv).broadcast() };
    }
}
