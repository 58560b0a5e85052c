//!
//! Thread Handles
//!
//! A `GaleThread` owns exactly one OS thread. The handle is created
//! unstarted with a run body (an `extern "C-unwind"` function plus captured
//! data); `start` spawns the OS thread, which runs a small trampoline:
//! invoke the body once, record a panicking body as cancelled, mark the
//! handle finished, free the captured data.
//!
//! ## Ownership
//!
//! The handle exclusively owns its OS thread. Dropping the last reference
//! to a started handle joins the thread first, so a still-running body is
//! never detached behind the caller's back. That join can block; callers
//! who care should `join` explicitly.
//!
//! ## Misuse
//!
//! The Rust API reports lifecycle misuse as `LifecycleError`. The FFI
//! surface keeps the script-facing contract of the original backends:
//! misuse is a no-op, downgraded to a tracing event.
//!

use std::alloc::{Layout, alloc, dealloc};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use gale_std_core::{HeapHeader, HeapTag, alloc_object, release_object};
use tracing::debug;

use crate::lifecycle::{LifecycleError, LifecycleFlags};

/// Run body signature: takes a pointer to captured data. `C-unwind` so a
/// panic raised inside a script body can reach the trampoline's catch.
pub type RunBodyFn = extern "C-unwind" fn(*mut u8);

/// A run body and its captured data. The data is freed after the body has
/// run, or when an unstarted handle is dropped.
struct RunBody {
    func: RunBodyFn,
    data: *mut u8,
    data_size: usize,
}

unsafe impl Send for RunBody {}

impl Drop for RunBody {
    fn drop(&mut self) {
        if !self.data.is_null() && self.data_size > 0 {
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.data_size, 8);
                dealloc(self.data, layout);
            }
        }
    }
}

/// A script-visible thread handle.
#[repr(C)]
pub struct GaleThread {
    pub header: HeapHeader,
    flags: Arc<LifecycleFlags>,
    body: Mutex<Option<RunBody>>,
    os_thread: Mutex<Option<JoinHandle<()>>>,
}

impl GaleThread {
    fn new(func: RunBodyFn, data: *mut u8, data_size: usize) -> Self {
        Self {
            header: HeapHeader::new(HeapTag::Thread),
            flags: Arc::new(LifecycleFlags::new()),
            body: Mutex::new(Some(RunBody { func, data, data_size })),
            os_thread: Mutex::new(None),
        }
    }

    /// Spawn the OS thread. At most one thread is ever spawned per handle;
    /// a second start fails with `AlreadyStarted`.
    pub fn start(&self) -> Result<(), LifecycleError> {
        // The slot is held across the spawn: a join racing this start sees
        // `started` only while the lock is taken, so it blocks here until
        // the handle is parked instead of finding an empty slot.
        let mut os_thread = self.os_thread.lock().unwrap_or_else(|e| e.into_inner());
        self.flags.begin_start()?;

        // begin_start succeeds exactly once, so the body is still present.
        let body = self
            .body
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(LifecycleError::AlreadyStarted)?;

        let flags = Arc::clone(&self.flags);
        *os_thread = Some(thread::spawn(move || trampoline(flags, body)));
        Ok(())
    }

    /// Set the advisory cancellation flag. The body keeps running; it is
    /// expected to poll `is_cancelled` if it wants to stop early.
    pub fn cancel(&self) -> Result<(), LifecycleError> {
        self.flags.request_cancel()
    }

    /// Block until the OS thread terminates. Cancellation does not shorten
    /// this wait: a cancelled body still runs to natural completion, and
    /// join observes it. A second join is a no-op.
    pub fn join(&self) -> Result<(), LifecycleError> {
        if !self.flags.is_started() {
            return Err(LifecycleError::NotStarted);
        }
        let handle = self
            .os_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // a panicking body was already recorded as cancelled
            let _ = handle.join();
        }
        Ok(())
    }

    /// True iff started and neither finished nor cancelled. Pure query.
    pub fn is_running(&self) -> bool {
        self.flags.is_running()
    }

    /// The cooperative-cancellation poll point for run bodies.
    pub fn is_cancelled(&self) -> bool {
        self.flags.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.flags.is_finished()
    }
}

impl Drop for GaleThread {
    fn drop(&mut self) {
        // Never release the handle while its OS thread still runs.
        let handle = self
            .os_thread
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Invoke the run body once, then mark the handle finished. The finish
/// store is the release point that publishes the body's side effects to
/// whoever joins.
fn trampoline(flags: Arc<LifecycleFlags>, body: RunBody) {
    let func = body.func;
    let data = body.data;

    if catch_unwind(AssertUnwindSafe(|| func(data))).is_err() {
        debug!("run body panicked; marking thread cancelled");
        flags.mark_cancelled();
    }
    flags.finish();
    drop(body);
}

#[unsafe(no_mangle)]
pub extern "C" fn gale_thread_new(
    func: RunBodyFn,
    data: *mut u8,
    data_size: usize,
) -> *mut GaleThread {
    unsafe {
        let ptr = alloc_object::<GaleThread>();
        std::ptr::write(ptr, GaleThread::new(func, data, data_size));
        ptr
    }
}

/// Allocate memory for captured run-body data. Freed by the trampoline
/// after the body runs, or with the handle if it never starts.
#[unsafe(no_mangle)]
pub extern "C" fn gale_thread_alloc_body_data(size: usize) -> *mut u8 {
    if size == 0 {
        return std::ptr::null_mut();
    }
    unsafe {
        let layout = Layout::from_size_align_unchecked(size, 8);
        alloc(layout)
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_incref(t: *mut GaleThread) {
    if !t.is_null() {
        unsafe { (*t).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_decref(t: *mut GaleThread) {
    if !t.is_null() {
        unsafe {
            if (*t).header.decref() {
                release_object(t);
            }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_start(t: *mut GaleThread) {
    if t.is_null() {
        return;
    }
    if let Err(err) = unsafe { (*t).start() } {
        debug!("thread start ignored: {err}");
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_cancel(t: *mut GaleThread) {
    if t.is_null() {
        return;
    }
    if let Err(err) = unsafe { (*t).cancel() } {
        debug!("thread cancel ignored: {err}");
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_join(t: *mut GaleThread) {
    if t.is_null() {
        return;
    }
    if let Err(err) = unsafe { (*t).join() } {
        debug!("thread join ignored: {err}");
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_running(t: *const GaleThread) -> i64 {
    if t.is_null() {
        return 0;
    }
    if unsafe { (*t).is_running() } { 1 } else { 0 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_thread_cancelled(t: *const GaleThread) -> i64 {
    if t.is_null() {
        return 0;
    }
    if unsafe { (*t).is_cancelled() } { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    static RUN_COUNTER: AtomicI64 = AtomicI64::new(0);

    extern "C-unwind" fn increment_run_counter(_data: *mut u8) {
        RUN_COUNTER.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_double_start_spawns_once() {
        RUN_COUNTER.store(0, Ordering::SeqCst);
        unsafe {
            let t = gale_thread_new(increment_run_counter, std::ptr::null_mut(), 0);
            assert_eq!(gale_thread_running(t), 0);

            gale_thread_start(t);
            gale_thread_start(t);
            gale_thread_join(t);

            assert_eq!(RUN_COUNTER.load(Ordering::SeqCst), 1);
            assert_eq!(gale_thread_running(t), 0);
            gale_thread_decref(t);
        }
    }

    extern "C-unwind" fn add_from_data(data: *mut u8) {
        let value = unsafe { *(data as *const i64) };
        RUN_COUNTER.fetch_add(value, Ordering::SeqCst);
    }

    #[test]
    fn test_body_data_reaches_body() {
        RUN_COUNTER.store(0, Ordering::SeqCst);
        unsafe {
            let data = gale_thread_alloc_body_data(8);
            *(data as *mut i64) = 41;

            let t = gale_thread_new(add_from_data, data, 8);
            gale_thread_start(t);
            gale_thread_join(t);

            assert_eq!(RUN_COUNTER.load(Ordering::SeqCst), 41);
            gale_thread_decref(t);
        }
    }

    static SLOW_RESULT: AtomicI64 = AtomicI64::new(0);

    extern "C-unwind" fn slow_body(_data: *mut u8) {
        std::thread::sleep(Duration::from_millis(80));
        SLOW_RESULT.store(7, Ordering::SeqCst);
    }

    #[test]
    fn test_join_waits_for_completion() {
        SLOW_RESULT.store(0, Ordering::SeqCst);
        unsafe {
            let t = gale_thread_new(slow_body, std::ptr::null_mut(), 0);
            gale_thread_start(t);
            assert_eq!(gale_thread_running(t), 1);

            gale_thread_join(t);
            assert_eq!(SLOW_RESULT.load(Ordering::SeqCst), 7);
            gale_thread_decref(t);
        }
    }

    #[test]
    fn test_join_without_start_is_noop() {
        unsafe {
            let t = gale_thread_new(increment_run_counter, std::ptr::null_mut(), 0);
            gale_thread_join(t);
            gale_thread_join(t);
            gale_thread_decref(t);
        }
    }

    static CANCEL_RESULT: AtomicI64 = AtomicI64::new(0);

    extern "C-unwind" fn cancelled_but_finishes(_data: *mut u8) {
        std::thread::sleep(Duration::from_millis(80));
        CANCEL_RESULT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_cancel_is_advisory_join_still_waits() {
        CANCEL_RESULT.store(0, Ordering::SeqCst);
        unsafe {
            let t = gale_thread_new(cancelled_but_finishes, std::ptr::null_mut(), 0);
            gale_thread_start(t);
            gale_thread_cancel(t);
            assert_eq!(gale_thread_cancelled(t), 1);
            assert_eq!(gale_thread_running(t), 0);

            // cancellation does not interrupt the body; join sees it complete
            gale_thread_join(t);
            assert_eq!(CANCEL_RESULT.load(Ordering::SeqCst), 1);
            gale_thread_decref(t);
        }
    }

    #[test]
    fn test_cancel_before_start_is_noop() {
        unsafe {
            let t = gale_thread_new(increment_run_counter, std::ptr::null_mut(), 0);
            gale_thread_cancel(t);
            assert_eq!(gale_thread_cancelled(t), 0);
            gale_thread_decref(t);
        }
    }

    extern "C-unwind" fn panicking_body(_data: *mut u8) {
        panic!("script body raised");
    }

    #[test]
    fn test_panicking_body_marks_cancelled() {
        unsafe {
            let t = gale_thread_new(panicking_body, std::ptr::null_mut(), 0);
            gale_thread_start(t);
            gale_thread_join(t);

            assert_eq!(gale_thread_cancelled(t), 1);
            assert_eq!(gale_thread_running(t), 0);
            gale_thread_decref(t);
        }
    }

    static DROP_RESULT: AtomicI64 = AtomicI64::new(0);

    extern "C-unwind" fn slow_drop_body(_data: *mut u8) {
        std::thread::sleep(Duration::from_millis(80));
        DROP_RESULT.store(3, Ordering::SeqCst);
    }

    #[test]
    fn test_drop_joins_running_thread() {
        DROP_RESULT.store(0, Ordering::SeqCst);
        unsafe {
            let t = gale_thread_new(slow_drop_body, std::ptr::null_mut(), 0);
            gale_thread_start(t);
            gale_thread_decref(t);
        }
        // decref joined before freeing, so the body's effect is visible
        assert_eq!(DROP_RESULT.load(Ordering::SeqCst), 3);
    }

    static RACE_COUNTER: AtomicI64 = AtomicI64::new(0);

    extern "C-unwind" fn brief_body(_data: *mut u8) {
        std::thread::sleep(Duration::from_millis(5));
        RACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_concurrent_start_and_join() {
        RACE_COUNTER.store(0, Ordering::SeqCst);
        for round in 1..=25 {
            unsafe {
                let t = gale_thread_new(brief_body, std::ptr::null_mut(), 0);
                let ptr = t as usize;

                // joins from another thread the instant the handle looks
                // started; must always observe the completed body
                let joiner = std::thread::spawn(move || {
                    let t = ptr as *mut GaleThread;
                    unsafe {
                        while gale_thread_running(t) == 0 && !(*t).is_finished() {
                            std::thread::yield_now();
                        }
                        gale_thread_join(t);
                        RACE_COUNTER.load(Ordering::SeqCst)
                    }
                });

                gale_thread_start(t);
                let seen = joiner.join().unwrap();
                assert_eq!(seen, round, "join returned before the body completed");
                gale_thread_decref(t);
            }
        }
    }

    #[test]
    fn test_rust_api_reports_misuse() {
        let t = GaleThread::new(increment_run_counter, std::ptr::null_mut(), 0);
        assert_eq!(t.join(), Err(LifecycleError::NotStarted));
        assert_eq!(t.cancel(), Err(LifecycleError::NotStarted));

        t.start().unwrap();
        assert_eq!(t.start(), Err(LifecycleError::AlreadyStarted));
        t.join().unwrap();
        assert!(t.is_finished());
        assert!(!t.is_running());
    }
}
